pub mod arbitration_service_errors;
pub mod duel_errors;
pub mod matchmaking_service_errors;
pub mod question_bank_errors;
