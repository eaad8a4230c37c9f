use chrono::{DateTime, Utc};

use crate::models::MatchInvariantViolation;
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;

#[derive(Debug)]
pub enum ArbitrationServiceError {
    ValidationError(String),
    MatchNotFound,
    NotParticipant,
    AlreadyAnswered,
    MatchResolved,
    ForfeitUnavailable(String),
    ForfeitNotDue { deadline: DateTime<Utc> },
    RepositoryError(MatchRepositoryError),
    Corrupted(MatchInvariantViolation),
}

impl ArbitrationServiceError {
    /// Store failures that outlasted the retry policy. Replaying the same
    /// request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArbitrationServiceError::RepositoryError(err) if err.is_transient())
    }
}

impl std::fmt::Display for ArbitrationServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbitrationServiceError::ValidationError(msg) => {
                write!(f, "Validation error: {}", msg)
            }
            ArbitrationServiceError::MatchNotFound => write!(f, "Match not found"),
            ArbitrationServiceError::NotParticipant => {
                write!(f, "Player is not a participant of this match")
            }
            ArbitrationServiceError::AlreadyAnswered => {
                write!(f, "Player has already answered this match")
            }
            ArbitrationServiceError::MatchResolved => write!(f, "Match is already resolved"),
            ArbitrationServiceError::ForfeitUnavailable(msg) => {
                write!(f, "Forfeit unavailable: {}", msg)
            }
            ArbitrationServiceError::ForfeitNotDue { deadline } => {
                write!(f, "Forfeit cannot be claimed before {}", deadline.to_rfc3339())
            }
            ArbitrationServiceError::RepositoryError(err) => {
                write!(f, "Repository error: {}", err)
            }
            ArbitrationServiceError::Corrupted(violation) => write!(f, "{}", violation),
        }
    }
}

impl std::error::Error for ArbitrationServiceError {}

impl From<MatchRepositoryError> for ArbitrationServiceError {
    fn from(err: MatchRepositoryError) -> Self {
        match err {
            MatchRepositoryError::NotFound => ArbitrationServiceError::MatchNotFound,
            MatchRepositoryError::NotParticipant => ArbitrationServiceError::NotParticipant,
            MatchRepositoryError::AlreadyAnswered => ArbitrationServiceError::AlreadyAnswered,
            MatchRepositoryError::AlreadyResolved => ArbitrationServiceError::MatchResolved,
            other => ArbitrationServiceError::RepositoryError(other),
        }
    }
}
