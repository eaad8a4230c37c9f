use crate::models::MatchInvariantViolation;
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;

#[derive(Debug)]
pub enum MatchmakingServiceError {
    ValidationError(String),
    /// Joining or starting a match failed for good; the player is not left
    /// half-claimed.
    CannotStartMatch(String),
    QueueRepositoryError(QueueRepositoryError),
    MatchRepositoryError(MatchRepositoryError),
    Corrupted(MatchInvariantViolation),
}

impl std::fmt::Display for MatchmakingServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchmakingServiceError::ValidationError(msg) => {
                write!(f, "Validation error: {}", msg)
            }
            MatchmakingServiceError::CannotStartMatch(msg) => {
                write!(f, "Cannot start match: {}", msg)
            }
            MatchmakingServiceError::QueueRepositoryError(err) => {
                write!(f, "Queue repository error: {}", err)
            }
            MatchmakingServiceError::MatchRepositoryError(err) => {
                write!(f, "Match repository error: {}", err)
            }
            MatchmakingServiceError::Corrupted(violation) => write!(f, "{}", violation),
        }
    }
}

impl std::error::Error for MatchmakingServiceError {}

impl From<QueueRepositoryError> for MatchmakingServiceError {
    fn from(err: QueueRepositoryError) -> Self {
        MatchmakingServiceError::QueueRepositoryError(err)
    }
}

impl From<MatchRepositoryError> for MatchmakingServiceError {
    fn from(err: MatchRepositoryError) -> Self {
        MatchmakingServiceError::MatchRepositoryError(err)
    }
}
