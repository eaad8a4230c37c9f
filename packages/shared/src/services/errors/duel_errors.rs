use crate::models::MatchInvariantViolation;
use crate::services::errors::arbitration_service_errors::ArbitrationServiceError;
use crate::services::errors::matchmaking_service_errors::MatchmakingServiceError;

/// Everything a player-facing duel session can fail with.
#[derive(Debug)]
pub enum DuelError {
    Matchmaking(MatchmakingServiceError),
    Arbitration(ArbitrationServiceError),
    NotMatched,
    SubscriptionClosed,
    Corrupted(MatchInvariantViolation),
}

impl DuelError {
    /// Short text suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            DuelError::Matchmaking(err) => match err {
                MatchmakingServiceError::ValidationError(msg) => format!("Invalid request: {}", msg),
                MatchmakingServiceError::CannotStartMatch(_) => {
                    "Cannot start a match right now. Please try again.".to_string()
                }
                MatchmakingServiceError::QueueRepositoryError(_)
                | MatchmakingServiceError::MatchRepositoryError(_) => {
                    "Failed to join game. Please try again.".to_string()
                }
                MatchmakingServiceError::Corrupted(_) => {
                    "Something went wrong with this match.".to_string()
                }
            },
            DuelError::Arbitration(err) => match err {
                ArbitrationServiceError::ValidationError(_) => "Please enter an answer.".to_string(),
                ArbitrationServiceError::AlreadyAnswered => {
                    "You've already submitted an answer for this question.".to_string()
                }
                ArbitrationServiceError::MatchResolved => "This match is already over.".to_string(),
                ArbitrationServiceError::ForfeitNotDue { .. } => {
                    "Your opponent still has time to answer.".to_string()
                }
                ArbitrationServiceError::ForfeitUnavailable(_) => {
                    "A forfeit cannot be claimed for this match.".to_string()
                }
                ArbitrationServiceError::RepositoryError(_) => {
                    "Failed to submit answer. Please try again.".to_string()
                }
                ArbitrationServiceError::MatchNotFound
                | ArbitrationServiceError::NotParticipant
                | ArbitrationServiceError::Corrupted(_) => {
                    "Something went wrong with this match.".to_string()
                }
            },
            DuelError::NotMatched => "You are not in a match yet.".to_string(),
            DuelError::SubscriptionClosed => {
                "Lost connection to the match. Please try again.".to_string()
            }
            DuelError::Corrupted(_) => "Something went wrong with this match.".to_string(),
        }
    }
}

impl std::fmt::Display for DuelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuelError::Matchmaking(err) => write!(f, "Matchmaking error: {}", err),
            DuelError::Arbitration(err) => write!(f, "Arbitration error: {}", err),
            DuelError::NotMatched => write!(f, "Session is not in a match"),
            DuelError::SubscriptionClosed => write!(f, "Match subscription closed"),
            DuelError::Corrupted(violation) => write!(f, "{}", violation),
        }
    }
}

impl std::error::Error for DuelError {}

impl From<MatchmakingServiceError> for DuelError {
    fn from(err: MatchmakingServiceError) -> Self {
        match err {
            MatchmakingServiceError::Corrupted(violation) => DuelError::Corrupted(violation),
            other => DuelError::Matchmaking(other),
        }
    }
}

impl From<ArbitrationServiceError> for DuelError {
    fn from(err: ArbitrationServiceError) -> Self {
        match err {
            ArbitrationServiceError::Corrupted(violation) => DuelError::Corrupted(violation),
            other => DuelError::Arbitration(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_is_surfaced_directly() {
        let violation = MatchInvariantViolation {
            match_id: "m-1".to_string(),
            reason: "winner is not a participant".to_string(),
        };
        let err = DuelError::from(ArbitrationServiceError::Corrupted(violation));
        assert!(matches!(err, DuelError::Corrupted(_)));
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = DuelError::from(MatchmakingServiceError::CannotStartMatch(
            "ProvisionedThroughputExceededException".to_string(),
        ));
        assert_eq!(
            err.user_message(),
            "Cannot start a match right now. Please try again."
        );

        let err = DuelError::from(ArbitrationServiceError::AlreadyAnswered);
        assert_eq!(
            err.user_message(),
            "You've already submitted an answer for this question."
        );
    }
}
