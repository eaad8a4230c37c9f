pub mod errors;
pub mod match_repository;
pub mod memory;
pub mod queue_repository;
