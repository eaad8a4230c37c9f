//! In-process store backing the queue ledger and match registry. Every
//! operation yields to the scheduler first, so concurrent sessions interleave
//! at the same points they would against a remote store.

pub mod collection;

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::models::duel_match::{AnswerSubmission, Match};
use crate::models::queue::QueueEntry;
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;
use crate::repositories::match_repository::{
    classify_rejected_submission, classify_rejected_winner, MatchFilter, MatchRepository,
    MatchSubscription,
};
use crate::repositories::queue_repository::QueueRepository;

use collection::{Collection, DeleteOutcome, PutOutcome, UpdateOutcome};

/// Makes the next `n` store calls fail as if the store were unreachable.
#[derive(Default)]
pub struct FaultInjector {
    remaining: AtomicU32,
}

impl FaultInjector {
    pub fn fail_next(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn trip(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Default)]
pub struct InMemoryQueueRepository {
    entries: Collection<QueueEntry>,
    faults: FaultInjector,
}

impl InMemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next(count);
    }

    /// All waiting players, oldest first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries
            .query_ordered(
                |_| true,
                |entry| (entry.joined_at, entry.player_id.clone()),
                usize::MAX,
            )
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.entries.get(player_id).is_some()
    }

    async fn round_trip(&self) -> Result<(), QueueRepositoryError> {
        tokio::task::yield_now().await;
        if self.faults.trip() {
            return Err(QueueRepositoryError::Unavailable(
                "injected queue store fault".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError> {
        self.round_trip().await?;
        self.entries.put(&entry.player_id, entry.clone());
        Ok(())
    }

    async fn dequeue(&self, player_id: &str) -> Result<(), QueueRepositoryError> {
        self.round_trip().await?;
        match self.entries.delete_if_present(player_id) {
            DeleteOutcome::Deleted(_) => Ok(()),
            DeleteOutcome::NotFound => Err(QueueRepositoryError::NotFound),
        }
    }

    async fn scan_oldest(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
        self.round_trip().await?;
        Ok(self
            .entries
            .query_ordered(
                |_| true,
                |entry| (entry.joined_at, entry.player_id.clone()),
                limit,
            )
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMatchRepository {
    matches: Collection<Match>,
    faults: FaultInjector,
}

impl InMemoryMatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next(count);
    }

    pub fn all_matches(&self) -> Vec<Match> {
        let mut matches = self.matches.values();
        matches.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        matches
    }

    pub fn subscriber_count(&self) -> usize {
        self.matches.subscriber_count()
    }

    async fn round_trip(&self) -> Result<(), MatchRepositoryError> {
        tokio::task::yield_now().await;
        if self.faults.trip() {
            return Err(MatchRepositoryError::Unavailable(
                "injected match store fault".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchRepository for InMemoryMatchRepository {
    async fn create(&self, duel: &Match) -> Result<(), MatchRepositoryError> {
        self.round_trip().await?;
        match self.matches.put_if_absent(&duel.match_id, duel.clone()) {
            PutOutcome::Created => Ok(()),
            PutOutcome::AlreadyExists => Err(MatchRepositoryError::AlreadyExists),
        }
    }

    async fn get(&self, match_id: &str) -> Result<Match, MatchRepositoryError> {
        self.round_trip().await?;
        self.matches
            .get(match_id)
            .ok_or(MatchRepositoryError::NotFound)
    }

    async fn find_by_participant(
        &self,
        player_id: &str,
    ) -> Result<Vec<Match>, MatchRepositoryError> {
        self.round_trip().await?;
        Ok(self
            .matches
            .query_ordered(
                |duel| duel.is_participant(player_id),
                |duel| duel.created_at,
                usize::MAX,
            )
            .into_iter()
            .map(|(_, duel)| duel)
            .collect())
    }

    async fn record_submission(
        &self,
        match_id: &str,
        submission: &AnswerSubmission,
    ) -> Result<Match, MatchRepositoryError> {
        self.round_trip().await?;
        let player_id = submission.player_id.as_str();

        let outcome = self.matches.conditional_update(
            match_id,
            |duel| {
                duel.is_participant(player_id)
                    && duel.winner_id.is_none()
                    && !duel.submissions.contains_key(player_id)
            },
            |duel| {
                duel.submissions
                    .insert(player_id.to_string(), submission.clone());
            },
        );

        match outcome {
            UpdateOutcome::Applied(duel) => Ok(duel),
            UpdateOutcome::PredicateFailed(duel) => {
                Err(classify_rejected_submission(&duel, player_id))
            }
            UpdateOutcome::NotFound => Err(MatchRepositoryError::NotFound),
        }
    }

    async fn set_winner(
        &self,
        match_id: &str,
        winner_id: &str,
    ) -> Result<Match, MatchRepositoryError> {
        self.round_trip().await?;

        let outcome = self.matches.conditional_update(
            match_id,
            |duel| duel.is_participant(winner_id) && duel.winner_id.is_none(),
            |duel| {
                duel.winner_id = Some(winner_id.to_string());
                duel.resolved_at = Some(Utc::now());
            },
        );

        match outcome {
            UpdateOutcome::Applied(duel) => Ok(duel),
            UpdateOutcome::PredicateFailed(duel) => {
                Err(classify_rejected_winner(&duel, winner_id, None))
            }
            UpdateOutcome::NotFound => Err(MatchRepositoryError::NotFound),
        }
    }

    async fn set_forfeit_winner(
        &self,
        match_id: &str,
        winner_id: &str,
        absent_player_id: &str,
    ) -> Result<Match, MatchRepositoryError> {
        self.round_trip().await?;

        let outcome = self.matches.conditional_update(
            match_id,
            |duel| {
                duel.is_participant(winner_id)
                    && duel.is_participant(absent_player_id)
                    && duel.winner_id.is_none()
                    && duel.submissions.contains_key(winner_id)
                    && !duel.submissions.contains_key(absent_player_id)
            },
            |duel| {
                duel.winner_id = Some(winner_id.to_string());
                duel.resolved_at = Some(Utc::now());
            },
        );

        match outcome {
            UpdateOutcome::Applied(duel) => Ok(duel),
            UpdateOutcome::PredicateFailed(duel) => Err(classify_rejected_winner(
                &duel,
                winner_id,
                Some(absent_player_id),
            )),
            UpdateOutcome::NotFound => Err(MatchRepositoryError::NotFound),
        }
    }

    fn subscribe(&self, filter: MatchFilter) -> MatchSubscription {
        MatchSubscription::new(self.matches.subscribe(move |duel| filter.matches(duel)))
    }
}
