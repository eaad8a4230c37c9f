pub mod arbitration_service;
pub mod duel_engine;
pub mod duel_session;
pub mod errors;
pub mod matchmaking_service;
pub mod question_service;
pub mod retry;
