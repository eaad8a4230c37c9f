pub mod duel_match;
pub mod queue;
pub mod question;

pub use duel_match::{AnswerSubmission, Match, MatchInvariantViolation, MatchStatus};
pub use queue::QueueEntry;
pub use question::Question;
