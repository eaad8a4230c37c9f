pub mod match_repository_errors;
pub mod queue_repository_errors;
