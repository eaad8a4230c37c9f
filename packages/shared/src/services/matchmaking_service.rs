use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::DuelConfig;
use crate::models::{Match, QueueEntry};
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::match_repository::MatchRepository;
use crate::repositories::queue_repository::QueueRepository;
use crate::services::errors::matchmaking_service_errors::MatchmakingServiceError;
use crate::services::question_service::QuestionBank;
use crate::services::retry::RetryPolicy;

const MAX_MATCH_ID_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This engine claimed an opponent and created the match.
    Matched(Match),
    /// Another engine removed this player's entry first and will create the
    /// match; it arrives through the participant subscription.
    ClaimedByOther,
    /// Nobody else is waiting, or every claim attempt lost its opponent.
    NoOpponent,
}

/// Pairs waiting players using only conditional deletes on the queue.
///
/// A claim removes the claimer's own entry before the opponent's. Whoever
/// deletes an entry owns that player, so two engines can never both pair the
/// same player, and a player who was already claimed stops claiming others.
#[derive(Clone)]
pub struct MatchmakingService {
    queue_repository: Arc<dyn QueueRepository + Send + Sync>,
    match_repository: Arc<dyn MatchRepository + Send + Sync>,
    question_bank: Arc<dyn QuestionBank + Send + Sync>,
    retry: RetryPolicy,
    queue_name: String,
    scan_limit: usize,
    max_claim_attempts: u32,
}

impl MatchmakingService {
    pub fn new(
        queue_repository: Arc<dyn QueueRepository + Send + Sync>,
        match_repository: Arc<dyn MatchRepository + Send + Sync>,
        question_bank: Arc<dyn QuestionBank + Send + Sync>,
        config: &DuelConfig,
    ) -> Self {
        Self {
            queue_repository,
            match_repository,
            question_bank,
            retry: config.retry.clone(),
            queue_name: config.queue_name.clone(),
            scan_limit: config.scan_limit.max(2),
            max_claim_attempts: config.max_claim_attempts.max(1),
        }
    }

    pub fn match_repository(&self) -> &Arc<dyn MatchRepository + Send + Sync> {
        &self.match_repository
    }

    pub async fn enqueue(&self, player_id: &str) -> Result<QueueEntry, MatchmakingServiceError> {
        if player_id.trim().is_empty() {
            return Err(MatchmakingServiceError::ValidationError(
                "Player id cannot be empty".to_string(),
            ));
        }

        let entry = QueueEntry::new(player_id, &self.queue_name);
        self.retry
            .run("enqueue", || self.queue_repository.enqueue(&entry))
            .await
            .map_err(|e| {
                error!("Failed to add player {} to queue: {}", player_id, e);
                MatchmakingServiceError::CannotStartMatch(e.to_string())
            })?;

        info!("Player {} joined queue {}", player_id, self.queue_name);
        Ok(entry)
    }

    /// Removes the player's entry. An entry that is already gone is fine.
    pub async fn leave_queue(&self, player_id: &str) -> Result<(), MatchmakingServiceError> {
        match self
            .retry
            .run("dequeue", || self.queue_repository.dequeue(player_id))
            .await
        {
            Ok(()) => {
                info!("Player {} left queue {}", player_id, self.queue_name);
                Ok(())
            }
            Err(QueueRepositoryError::NotFound) => {
                debug!("Player {} was no longer queued", player_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn claim_opponent(
        &self,
        player: &QueueEntry,
    ) -> Result<ClaimOutcome, MatchmakingServiceError> {
        for attempt in 1..=self.max_claim_attempts {
            let candidates = self
                .retry
                .run("scan_oldest", || {
                    self.queue_repository.scan_oldest(self.scan_limit)
                })
                .await?;

            let Some(opponent) = select_opponent(&candidates, &player.player_id) else {
                debug!("No opponent waiting for {}", player.player_id);
                return Ok(ClaimOutcome::NoOpponent);
            };

            match self
                .retry
                .run("dequeue", || self.queue_repository.dequeue(&player.player_id))
                .await
            {
                Ok(()) => {}
                Err(QueueRepositoryError::NotFound) => {
                    info!("Player {} was claimed by another engine", player.player_id);
                    return Ok(ClaimOutcome::ClaimedByOther);
                }
                Err(e) => return Err(e.into()),
            }

            match self
                .retry
                .run("dequeue", || self.queue_repository.dequeue(&opponent.player_id))
                .await
            {
                Ok(()) => {
                    info!(
                        "Player {} claimed opponent {}",
                        player.player_id, opponent.player_id
                    );
                    let duel = self.create_match(player, &opponent).await?;
                    return Ok(ClaimOutcome::Matched(duel));
                }
                Err(QueueRepositoryError::NotFound) => {
                    warn!(
                        "Opponent {} was taken before {} could claim it (attempt {}/{})",
                        opponent.player_id, player.player_id, attempt, self.max_claim_attempts
                    );
                    self.requeue(player).await?;
                    tokio::time::sleep(self.retry.jittered_delay(attempt)).await;
                }
                Err(e) => {
                    error!(
                        "Failed to claim opponent {} for {}: {}",
                        opponent.player_id, player.player_id, e
                    );
                    self.requeue(player).await?;
                    return Err(e.into());
                }
            }
        }

        warn!(
            "Player {} gave up claiming after {} attempts and stays queued",
            player.player_id, self.max_claim_attempts
        );
        Ok(ClaimOutcome::NoOpponent)
    }

    async fn create_match(
        &self,
        player: &QueueEntry,
        opponent: &QueueEntry,
    ) -> Result<Match, MatchmakingServiceError> {
        let question = self.question_bank.random_question();

        for attempt in 1..=MAX_MATCH_ID_ATTEMPTS {
            let duel = Match::new(&player.player_id, &opponent.player_id, question.clone());

            match self
                .retry
                .run("create_match", || self.match_repository.create(&duel))
                .await
            {
                Ok(()) => {
                    info!(
                        "Created match {} between {} and {}",
                        duel.match_id, player.player_id, opponent.player_id
                    );
                    return Ok(duel);
                }
                Err(MatchRepositoryError::AlreadyExists) => {
                    // A retried create whose first attempt landed also
                    // reports the id as taken.
                    if let Ok(existing) = self
                        .retry
                        .run("get_match", || self.match_repository.get(&duel.match_id))
                        .await
                    {
                        if is_same_match(&existing, &duel) {
                            info!(
                                "Created match {} between {} and {}",
                                duel.match_id, player.player_id, opponent.player_id
                            );
                            return Ok(existing);
                        }
                    }
                    warn!(
                        "Match id {} already taken (attempt {}/{}), generating a new one",
                        duel.match_id, attempt, MAX_MATCH_ID_ATTEMPTS
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to create match between {} and {}: {}",
                        player.player_id, opponent.player_id, e
                    );
                    self.restore_claimed(player, opponent).await;
                    return Err(MatchmakingServiceError::CannotStartMatch(e.to_string()));
                }
            }
        }

        self.restore_claimed(player, opponent).await;
        Err(MatchmakingServiceError::CannotStartMatch(
            "could not allocate a unique match id".to_string(),
        ))
    }

    async fn requeue(&self, entry: &QueueEntry) -> Result<(), MatchmakingServiceError> {
        self.retry
            .run("enqueue", || self.queue_repository.enqueue(entry))
            .await
            .map_err(|e| {
                error!("Failed to put player {} back in queue: {}", entry.player_id, e);
                MatchmakingServiceError::CannotStartMatch(e.to_string())
            })
    }

    /// Puts both claimed players back with their original join times.
    async fn restore_claimed(&self, player: &QueueEntry, opponent: &QueueEntry) {
        for entry in [player, opponent] {
            if self.requeue(entry).await.is_ok() {
                info!("Restored player {} to queue", entry.player_id);
            }
        }
    }
}

/// Oldest candidate that is not the claiming player.
pub fn select_opponent(candidates: &[QueueEntry], player_id: &str) -> Option<QueueEntry> {
    candidates
        .iter()
        .find(|entry| entry.player_id != player_id)
        .cloned()
}

fn is_same_match(stored: &Match, created: &Match) -> bool {
    stored.match_id == created.match_id
        && stored.participant_ids == created.participant_ids
        && stored.question == created.question
        && stored.created_at == created.created_at
}
