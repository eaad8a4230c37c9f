#[derive(Debug)]
pub enum MatchRepositoryError {
    NotFound,
    AlreadyExists,
    AlreadyAnswered,
    AlreadySet,
    AlreadyResolved,
    NotParticipant,
    ConditionFailed(String),
    Serialization(String),
    DynamoDb(String),
    Unavailable(String),
}

impl MatchRepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MatchRepositoryError::DynamoDb(_) | MatchRepositoryError::Unavailable(_)
        )
    }
}

impl std::fmt::Display for MatchRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRepositoryError::NotFound => write!(f, "Match not found"),
            MatchRepositoryError::AlreadyExists => write!(f, "Match already exists"),
            MatchRepositoryError::AlreadyAnswered => {
                write!(f, "Player already has an accepted answer")
            }
            MatchRepositoryError::AlreadySet => write!(f, "Match winner already set"),
            MatchRepositoryError::AlreadyResolved => write!(f, "Match already resolved"),
            MatchRepositoryError::NotParticipant => {
                write!(f, "Player is not a participant of this match")
            }
            MatchRepositoryError::ConditionFailed(msg) => {
                write!(f, "Conditional write rejected: {}", msg)
            }
            MatchRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            MatchRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
            MatchRepositoryError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for MatchRepositoryError {}
