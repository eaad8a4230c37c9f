use std::path::Path;

use rand::Rng;
use tracing::info;

use crate::models::Question;
use crate::services::errors::question_bank_errors::QuestionBankError;

/// Source of the question a new match is played on.
#[cfg_attr(test, mockall::automock)]
pub trait QuestionBank: Send + Sync {
    fn random_question(&self) -> Question;
}

/// A fixed, non-empty pool of questions picked from uniformly at random.
#[derive(Debug, Clone)]
pub struct StaticQuestionBank {
    questions: Vec<Question>,
}

impl StaticQuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuestionBankError> {
        if questions.is_empty() {
            return Err(QuestionBankError::Empty);
        }
        for question in &questions {
            if question.prompt.trim().is_empty() {
                return Err(QuestionBankError::InvalidQuestion(
                    "prompt is empty".to_string(),
                ));
            }
            if question.canonical_answer.trim().is_empty() {
                return Err(QuestionBankError::InvalidQuestion(format!(
                    "'{}' has no answer",
                    question.prompt
                )));
            }
        }
        Ok(Self { questions })
    }

    /// Loads a JSON array of `{prompt, canonical_answer, explanation}`.
    pub fn from_json_str(json: &str) -> Result<Self, QuestionBankError> {
        let questions: Vec<Question> =
            serde_json::from_str(json).map_err(|e| QuestionBankError::Parse(e.to_string()))?;
        Self::new(questions)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, QuestionBankError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| QuestionBankError::Io(e.to_string()))?;
        let bank = Self::from_json_str(&json)?;
        info!(
            "Loaded {} questions from {}",
            bank.len(),
            path.display()
        );
        Ok(bank)
    }

    /// Mental-math questions used when no bank file is configured.
    pub fn builtin() -> Self {
        let questions = [
            ("12 × 12", "144", "12 × 12 = 144"),
            ("15 + 27", "42", "15 + 27 = 42"),
            ("81 ÷ 9", "9", "9 × 9 = 81, so 81 ÷ 9 = 9"),
            ("100 - 37", "63", "100 - 30 = 70, then 70 - 7 = 63"),
            ("7 × 8", "56", "7 × 8 = 56"),
            ("25% of 80", "20", "80 ÷ 4 = 20"),
            ("2^10", "1024", "2^10 = 1024"),
            ("√169", "13", "13 × 13 = 169"),
            ("3/4 + 1/4", "1", "3/4 + 1/4 = 4/4 = 1"),
            ("46 + 59", "105", "46 + 60 = 106, then subtract 1"),
            ("13 × 7", "91", "13 × 7 = 70 + 21 = 91"),
            ("144 ÷ 16", "9", "16 × 9 = 144"),
        ]
        .into_iter()
        .map(|(prompt, answer, explanation)| Question::new(prompt, answer, explanation))
        .collect();

        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }
}

impl QuestionBank for StaticQuestionBank {
    fn random_question(&self) -> Question {
        let index = rand::thread_rng().gen_range(0..self.questions.len());
        self.questions[index].clone()
    }
}
