pub mod config;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::{ConfigError, DuelConfig};
pub use services::duel_engine::DuelEngine;
pub use services::duel_session::{DuelSession, SessionState};
pub use services::errors::duel_errors::DuelError;
