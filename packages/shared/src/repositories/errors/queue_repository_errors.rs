#[derive(Debug)]
pub enum QueueRepositoryError {
    NotFound,
    Serialization(String),
    DynamoDb(String),
    Unavailable(String),
}

impl QueueRepositoryError {
    /// Infrastructure failures worth retrying. `NotFound` is lost contention,
    /// not a fault, and is returned to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueRepositoryError::DynamoDb(_) | QueueRepositoryError::Unavailable(_)
        )
    }
}

impl std::fmt::Display for QueueRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueRepositoryError::NotFound => write!(f, "Queue entry not found"),
            QueueRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            QueueRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
            QueueRepositoryError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for QueueRepositoryError {}
