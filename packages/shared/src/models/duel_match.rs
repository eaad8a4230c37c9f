use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::Question;

/// A correct answer accepted for one participant. Only correct answers are
/// ever stored, and at most one per participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub player_id: String,
    pub submitted_text: String,
    pub accepted_at: DateTime<Utc>,
    pub is_correct: bool,
}

impl AnswerSubmission {
    pub fn accepted(player_id: &str, submitted_text: &str, accepted_at: DateTime<Utc>) -> Self {
        AnswerSubmission {
            player_id: player_id.to_string(),
            submitted_text: submitted_text.trim().to_string(),
            accepted_at,
            is_correct: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Matched,
    Resolved,
}

/// One head-to-head duel. Created once by whichever engine claims both
/// players, never deleted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: String,
    pub participant_ids: Vec<String>,
    pub question: Question,
    #[serde(default)]
    pub submissions: HashMap<String, AnswerSubmission>,
    // Absent rather than null so `attribute_not_exists(winner_id)` holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn new(player_a: &str, player_b: &str, question: Question) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), player_a, player_b, question)
    }

    pub fn with_id(match_id: &str, player_a: &str, player_b: &str, question: Question) -> Self {
        Match {
            match_id: match_id.to_string(),
            participant_ids: vec![player_a.to_string(), player_b.to_string()],
            question,
            submissions: HashMap::new(),
            winner_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn status(&self) -> MatchStatus {
        if self.winner_id.is_some() {
            MatchStatus::Resolved
        } else {
            MatchStatus::Matched
        }
    }

    pub fn is_participant(&self, player_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == player_id)
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&str> {
        if !self.is_participant(player_id) {
            return None;
        }
        self.participant_ids
            .iter()
            .map(String::as_str)
            .find(|id| *id != player_id)
    }

    pub fn submission_of(&self, player_id: &str) -> Option<&AnswerSubmission> {
        self.submissions.get(player_id)
    }

    pub fn both_submitted(&self) -> bool {
        self.participant_ids
            .iter()
            .all(|id| self.submissions.contains_key(id))
    }

    /// Earliest accepted correct answer wins. Equal timestamps go to the
    /// lexicographically smaller player id so every observer agrees.
    pub fn decide_winner(&self) -> Option<String> {
        if !self.both_submitted() {
            return None;
        }

        self.participant_ids
            .iter()
            .filter_map(|id| self.submissions.get(id))
            .filter(|submission| submission.is_correct)
            .min_by(|a, b| {
                a.accepted_at
                    .cmp(&b.accepted_at)
                    .then_with(|| a.player_id.cmp(&b.player_id))
            })
            .map(|submission| submission.player_id.clone())
    }

    pub fn forfeit_deadline(&self, forfeit_after: Duration) -> DateTime<Utc> {
        self.created_at + forfeit_after
    }

    /// Structural checks every fetched snapshot must pass. A failure means the
    /// conditional-write discipline was bypassed somewhere.
    pub fn check_invariants(&self) -> Result<(), MatchInvariantViolation> {
        let violation = |reason: String| MatchInvariantViolation {
            match_id: self.match_id.clone(),
            reason,
        };

        if self.participant_ids.len() != 2 {
            return Err(violation(format!(
                "expected exactly 2 participants, found {}",
                self.participant_ids.len()
            )));
        }
        if self.participant_ids[0] == self.participant_ids[1] {
            return Err(violation(format!(
                "participant {} appears twice",
                self.participant_ids[0]
            )));
        }

        for (player_id, submission) in &self.submissions {
            if !self.is_participant(player_id) {
                return Err(violation(format!(
                    "submission from non-participant {}",
                    player_id
                )));
            }
            if submission.player_id != *player_id {
                return Err(violation(format!(
                    "submission keyed by {} belongs to {}",
                    player_id, submission.player_id
                )));
            }
            if !submission.is_correct {
                return Err(violation(format!(
                    "incorrect submission stored for {}",
                    player_id
                )));
            }
        }

        if let Some(winner_id) = &self.winner_id {
            if !self.is_participant(winner_id) {
                return Err(violation(format!(
                    "winner {} is not a participant",
                    winner_id
                )));
            }
            if !self.submissions.contains_key(winner_id) {
                return Err(violation(format!(
                    "winner {} has no accepted submission",
                    winner_id
                )));
            }
            if let Some(expected) = self.decide_winner() {
                if expected != *winner_id {
                    return Err(violation(format!(
                        "winner {} contradicts earliest submission by {}",
                        winner_id, expected
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInvariantViolation {
    pub match_id: String,
    pub reason: String,
}

impl std::fmt::Display for MatchInvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Match {} violates invariants: {}",
            self.match_id, self.reason
        )
    }
}

impl std::error::Error for MatchInvariantViolation {}
