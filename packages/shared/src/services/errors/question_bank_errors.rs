#[derive(Debug)]
pub enum QuestionBankError {
    Empty,
    Io(String),
    Parse(String),
    InvalidQuestion(String),
}

impl std::fmt::Display for QuestionBankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionBankError::Empty => write!(f, "Question bank has no questions"),
            QuestionBankError::Io(msg) => write!(f, "Failed to read question bank: {}", msg),
            QuestionBankError::Parse(msg) => write!(f, "Failed to parse question bank: {}", msg),
            QuestionBankError::InvalidQuestion(msg) => write!(f, "Invalid question: {}", msg),
        }
    }
}

impl std::error::Error for QuestionBankError {}
