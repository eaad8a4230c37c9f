use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::DuelConfig;
use crate::models::{AnswerSubmission, Match, MatchInvariantViolation};
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;
use crate::repositories::match_repository::MatchRepository;
use crate::services::errors::arbitration_service_errors::ArbitrationServiceError;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Wrong answer. Nothing was stored and the player may try again.
    Incorrect,
    /// The answer was recorded. `duel` is the latest snapshot, already
    /// carrying the winner when both participants have answered.
    Accepted { duel: Match },
}

/// Records answers and decides winners. Every decision is made from a
/// freshly read snapshot, and every write is conditional, so any number of
/// engines (and the stream resolver) may arbitrate the same match.
#[derive(Clone)]
pub struct ArbitrationService {
    match_repository: Arc<dyn MatchRepository + Send + Sync>,
    retry: RetryPolicy,
    forfeit_after: Option<chrono::Duration>,
}

impl ArbitrationService {
    pub fn new(match_repository: Arc<dyn MatchRepository + Send + Sync>, config: &DuelConfig) -> Self {
        Self {
            match_repository,
            retry: config.retry.clone(),
            forfeit_after: config
                .forfeit_after
                .and_then(|after| chrono::Duration::from_std(after).ok()),
        }
    }

    pub async fn submit_answer(
        &self,
        match_id: &str,
        player_id: &str,
        answer_text: &str,
    ) -> Result<SubmissionOutcome, ArbitrationServiceError> {
        if answer_text.trim().is_empty() {
            return Err(ArbitrationServiceError::ValidationError(
                "Answer cannot be empty".to_string(),
            ));
        }

        let duel = self.fetch(match_id).await?;
        if !duel.is_participant(player_id) {
            return Err(ArbitrationServiceError::NotParticipant);
        }
        if duel.submission_of(player_id).is_some() {
            return Err(ArbitrationServiceError::AlreadyAnswered);
        }
        if duel.winner_id.is_some() {
            return Err(ArbitrationServiceError::MatchResolved);
        }

        if !duel.question.is_correct(answer_text) {
            debug!("Player {} answered match {} incorrectly", player_id, match_id);
            return Ok(SubmissionOutcome::Incorrect);
        }

        let submission = AnswerSubmission::accepted(player_id, answer_text, Utc::now());
        let recorded = self
            .retry
            .run("record_submission", || {
                self.match_repository.record_submission(match_id, &submission)
            })
            .await;

        let updated = match recorded {
            Ok(updated) => updated,
            Err(MatchRepositoryError::AlreadyAnswered) => {
                // Our own earlier attempt may have landed before a retry.
                let current = self.fetch(match_id).await?;
                if current.submission_of(player_id) != Some(&submission) {
                    return Err(ArbitrationServiceError::AlreadyAnswered);
                }
                current
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            "Recorded correct answer from {} in match {}",
            player_id, match_id
        );

        let duel = self.resolve_winner(&updated).await?.unwrap_or(updated);
        Ok(SubmissionOutcome::Accepted { duel })
    }

    /// Sets the winner once both participants have answered. Returns the
    /// resolved snapshot, or `None` while an answer is still missing. Safe to
    /// call from any number of observers.
    pub async fn resolve_winner(
        &self,
        duel: &Match,
    ) -> Result<Option<Match>, ArbitrationServiceError> {
        if duel.winner_id.is_some() {
            return Ok(Some(duel.clone()));
        }
        let Some(winner_id) = duel.decide_winner() else {
            return Ok(None);
        };

        let result = self
            .retry
            .run("set_winner", || {
                self.match_repository.set_winner(&duel.match_id, &winner_id)
            })
            .await;

        match result {
            Ok(resolved) => {
                info!("Match {} resolved, winner {}", duel.match_id, winner_id);
                Ok(Some(resolved))
            }
            Err(MatchRepositoryError::AlreadySet) => {
                let current = self.fetch(&duel.match_id).await?;
                if current.winner_id.as_deref() == Some(winner_id.as_str()) {
                    debug!(
                        "Match {} was already resolved with the same winner",
                        duel.match_id
                    );
                    Ok(Some(current))
                } else {
                    let violation = MatchInvariantViolation {
                        match_id: duel.match_id.clone(),
                        reason: format!(
                            "stored winner {:?} contradicts decided winner {}",
                            current.winner_id, winner_id
                        ),
                    };
                    error!("{}", violation);
                    Err(ArbitrationServiceError::Corrupted(violation))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn claim_forfeit(
        &self,
        match_id: &str,
        player_id: &str,
    ) -> Result<Match, ArbitrationServiceError> {
        self.claim_forfeit_at(match_id, player_id, Utc::now()).await
    }

    /// Awards the match to a participant who answered correctly when the
    /// opponent has not answered by the forfeit deadline.
    pub async fn claim_forfeit_at(
        &self,
        match_id: &str,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Match, ArbitrationServiceError> {
        let Some(forfeit_after) = self.forfeit_after else {
            return Err(ArbitrationServiceError::ForfeitUnavailable(
                "forfeits are disabled".to_string(),
            ));
        };

        let duel = self.fetch(match_id).await?;
        if !duel.is_participant(player_id) {
            return Err(ArbitrationServiceError::NotParticipant);
        }
        if duel.winner_id.is_some() {
            return Err(ArbitrationServiceError::MatchResolved);
        }
        if duel.submission_of(player_id).is_none() {
            return Err(ArbitrationServiceError::ForfeitUnavailable(
                "answer correctly before claiming a forfeit".to_string(),
            ));
        }
        if duel.both_submitted() {
            return self.resolve_or_current(&duel).await;
        }

        let deadline = duel.forfeit_deadline(forfeit_after);
        if now < deadline {
            return Err(ArbitrationServiceError::ForfeitNotDue { deadline });
        }

        let Some(absent_player) = duel.opponent_of(player_id).map(str::to_string) else {
            return Err(ArbitrationServiceError::NotParticipant);
        };
        let result = self
            .retry
            .run("set_forfeit_winner", || {
                self.match_repository
                    .set_forfeit_winner(match_id, player_id, &absent_player)
            })
            .await;

        match result {
            Ok(resolved) => {
                info!(
                    "Match {} forfeited by {}, winner {}",
                    match_id, absent_player, player_id
                );
                Ok(resolved)
            }
            Err(MatchRepositoryError::AlreadySet) => {
                warn!("Match {} was resolved before the forfeit landed", match_id);
                self.fetch(match_id).await
            }
            Err(MatchRepositoryError::AlreadyAnswered) => {
                debug!("Opponent answered match {} before the forfeit landed", match_id);
                let current = self.fetch(match_id).await?;
                self.resolve_or_current(&current).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_or_current(&self, duel: &Match) -> Result<Match, ArbitrationServiceError> {
        Ok(self.resolve_winner(duel).await?.unwrap_or_else(|| duel.clone()))
    }

    /// Reads a match and refuses to act on one that breaks its invariants.
    pub async fn fetch(&self, match_id: &str) -> Result<Match, ArbitrationServiceError> {
        let duel = self
            .retry
            .run("get_match", || self.match_repository.get(match_id))
            .await?;

        if let Err(violation) = duel.check_invariants() {
            error!("{}", violation);
            return Err(ArbitrationServiceError::Corrupted(violation));
        }
        Ok(duel)
    }
}
