use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::{Match, MatchInvariantViolation, QueueEntry};
use crate::repositories::match_repository::MatchSubscription;
use crate::services::arbitration_service::SubmissionOutcome;
use crate::services::duel_engine::DuelEngine;
use crate::services::errors::duel_errors::DuelError;
use crate::services::errors::matchmaking_service_errors::MatchmakingServiceError;
use crate::services::matchmaking_service::{ClaimOutcome, MatchmakingService};

type ClaimTask = JoinHandle<Result<ClaimOutcome, MatchmakingServiceError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Matched { duel: Match },
    Resolved { duel: Match },
}

impl SessionState {
    pub fn duel(&self) -> Option<&Match> {
        match self {
            SessionState::Waiting => None,
            SessionState::Matched { duel } | SessionState::Resolved { duel } => Some(duel),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionState::Resolved { .. })
    }
}

/// One player's view of the queue and of the match they end up in.
///
/// Snapshots from the store are adopted as they are, except that a
/// resolved match is never replaced by an unresolved snapshot of itself.
/// Dropping a session that is still waiting removes its queue entry once any
/// claim in flight has finished.
pub struct DuelSession {
    engine: DuelEngine,
    entry: QueueEntry,
    subscription: MatchSubscription,
    state: SessionState,
    pending_claim: Option<ClaimTask>,
    released: bool,
}

impl DuelSession {
    pub(crate) fn new(engine: DuelEngine, entry: QueueEntry, subscription: MatchSubscription) -> Self {
        Self {
            engine,
            entry,
            subscription,
            state: SessionState::Waiting,
            pending_claim: None,
            released: false,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.entry.player_id
    }

    pub fn queue_entry(&self) -> &QueueEntry {
        &self.entry
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Attempts a claim if still waiting, then applies pending snapshots.
    /// A claim interrupted by a cancelled caller is resumed, not restarted.
    pub async fn rescan(&mut self) -> Result<SessionState, DuelError> {
        if self.state == SessionState::Waiting && self.pending_claim.is_none() {
            // Runs on its own task so a caller that stops waiting cannot cut a
            // claim off between its two dequeues.
            let matchmaking = self.engine.matchmaking().clone();
            let entry = self.entry.clone();
            self.pending_claim =
                Some(tokio::spawn(async move { matchmaking.claim_opponent(&entry).await }));
        }

        if let Some(claim) = self.pending_claim.as_mut() {
            let joined = claim.await;
            self.pending_claim = None;
            let outcome = joined.map_err(|e| {
                MatchmakingServiceError::CannotStartMatch(format!("claim task failed: {}", e))
            })??;

            match outcome {
                ClaimOutcome::Matched(duel) => self.apply_snapshot(duel)?,
                ClaimOutcome::ClaimedByOther => {
                    debug!("Player {} waits for the claiming engine's match", self.entry.player_id);
                }
                ClaimOutcome::NoOpponent => {}
            }
        }
        self.drain_updates()
    }

    /// Applies every snapshot already delivered, without waiting.
    pub fn drain_updates(&mut self) -> Result<SessionState, DuelError> {
        while let Some(snapshot) = self.subscription.try_recv() {
            self.apply_snapshot(snapshot)?;
        }
        Ok(self.state.clone())
    }

    /// Waits for the next snapshot. While waiting for an opponent, claims are
    /// re-attempted every rescan interval. Safe to cancel.
    pub async fn next_update(&mut self) -> Result<SessionState, DuelError> {
        if let Some(snapshot) = self.subscription.try_recv() {
            self.apply_snapshot(snapshot)?;
            return Ok(self.state.clone());
        }

        loop {
            let rescan_interval = match self.state {
                SessionState::Waiting => self.engine.rescan_interval(),
                _ => None,
            };

            match rescan_interval {
                Some(interval) => {
                    tokio::select! {
                        snapshot = self.subscription.recv() => {
                            let snapshot = snapshot.ok_or(DuelError::SubscriptionClosed)?;
                            self.apply_snapshot(snapshot)?;
                            return Ok(self.state.clone());
                        }
                        _ = tokio::time::sleep(interval) => {
                            let state = self.rescan().await?;
                            if state != SessionState::Waiting {
                                return Ok(state);
                            }
                        }
                    }
                }
                None => {
                    let snapshot = self
                        .subscription
                        .recv()
                        .await
                        .ok_or(DuelError::SubscriptionClosed)?;
                    self.apply_snapshot(snapshot)?;
                    return Ok(self.state.clone());
                }
            }
        }
    }

    pub async fn submit_answer(&mut self, answer_text: &str) -> Result<SubmissionOutcome, DuelError> {
        let match_id = self.current_match_id()?;
        let outcome = self
            .engine
            .arbitration()
            .submit_answer(&match_id, &self.entry.player_id, answer_text)
            .await?;

        if let SubmissionOutcome::Accepted { duel } = &outcome {
            self.apply_snapshot(duel.clone())?;
        }
        Ok(outcome)
    }

    pub async fn claim_forfeit(&mut self) -> Result<SessionState, DuelError> {
        let match_id = self.current_match_id()?;
        let duel = self
            .engine
            .arbitration()
            .claim_forfeit(&match_id, &self.entry.player_id)
            .await?;
        self.apply_snapshot(duel)?;
        Ok(self.state.clone())
    }

    /// Leaves the queue if still waiting and ends the session. A claim still
    /// in flight is awaited first, since it may requeue this player.
    pub async fn leave(mut self) -> Result<(), DuelError> {
        self.released = true;
        if let Some(claim) = self.pending_claim.take() {
            if let Some(ClaimOutcome::Matched(duel)) = finish_claim(claim, &self.entry.player_id).await {
                self.apply_snapshot(duel)?;
            }
        }

        if self.state == SessionState::Waiting {
            self.engine
                .matchmaking()
                .leave_queue(&self.entry.player_id)
                .await?;
        }
        info!("Session ended for player {}", self.entry.player_id);
        Ok(())
    }

    fn current_match_id(&self) -> Result<String, DuelError> {
        self.state
            .duel()
            .map(|duel| duel.match_id.clone())
            .ok_or(DuelError::NotMatched)
    }

    fn apply_snapshot(&mut self, snapshot: Match) -> Result<(), DuelError> {
        if let Err(violation) = snapshot.check_invariants() {
            error!("{}", violation);
            return Err(DuelError::Corrupted(violation));
        }
        if !snapshot.is_participant(&self.entry.player_id) {
            warn!(
                "Ignoring match {} that does not include player {}",
                snapshot.match_id, self.entry.player_id
            );
            return Ok(());
        }

        if let Some(current) = self.state.duel() {
            if current.match_id != snapshot.match_id {
                let violation = MatchInvariantViolation {
                    match_id: snapshot.match_id.clone(),
                    reason: format!(
                        "player {} is already in match {}",
                        self.entry.player_id, current.match_id
                    ),
                };
                error!("{}", violation);
                return Err(DuelError::Corrupted(violation));
            }
            if self.state.is_resolved() && snapshot.winner_id.is_none() {
                debug!("Ignoring stale snapshot of resolved match {}", snapshot.match_id);
                return Ok(());
            }
        }

        let was_waiting = self.state == SessionState::Waiting;
        self.state = if snapshot.winner_id.is_some() {
            info!(
                "Match {} resolved for player {}, winner {:?}",
                snapshot.match_id, self.entry.player_id, snapshot.winner_id
            );
            SessionState::Resolved { duel: snapshot }
        } else {
            if was_waiting {
                info!(
                    "Player {} matched in {}",
                    self.entry.player_id, snapshot.match_id
                );
            }
            SessionState::Matched { duel: snapshot }
        };
        Ok(())
    }
}

/// Waits for an interrupted claim, logging rather than returning its failure.
async fn finish_claim(claim: ClaimTask, player_id: &str) -> Option<ClaimOutcome> {
    match claim.await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            warn!("Pending claim for player {} failed: {}", player_id, e);
            None
        }
        Err(e) => {
            warn!("Pending claim task for player {} failed: {}", player_id, e);
            None
        }
    }
}

async fn release_player(matchmaking: MatchmakingService, player_id: String, claim: Option<ClaimTask>) {
    if let Some(claim) = claim {
        if let Some(ClaimOutcome::Matched(duel)) = finish_claim(claim, &player_id).await {
            info!(
                "Player {} left while being matched into {}",
                player_id, duel.match_id
            );
            return;
        }
    }
    if let Err(e) = matchmaking.leave_queue(&player_id).await {
        warn!("Failed to remove player {} from the queue: {}", player_id, e);
    }
}

impl Drop for DuelSession {
    fn drop(&mut self) {
        if self.released || self.state != SessionState::Waiting {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime to remove player {} from the queue",
                self.entry.player_id
            );
            return;
        };

        handle.spawn(release_player(
            self.engine.matchmaking().clone(),
            self.entry.player_id.clone(),
            self.pending_claim.take(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuelConfig;
    use crate::models::{AnswerSubmission, Question};
    use crate::repositories::match_repository::MatchRepository;
    use crate::repositories::memory::{InMemoryMatchRepository, InMemoryQueueRepository};
    use crate::services::question_service::StaticQuestionBank;
    use crate::services::retry::RetryPolicy;
    use chrono::Utc;
    use std::sync::Arc;

    struct Harness {
        queue: Arc<InMemoryQueueRepository>,
        matches: Arc<InMemoryMatchRepository>,
        engine: DuelEngine,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let matches = Arc::new(InMemoryMatchRepository::new());
        let bank = StaticQuestionBank::new(vec![Question::new("6 × 7", "42", "6 × 7 = 42")])
            .unwrap();
        let config = DuelConfig {
            retry: RetryPolicy::immediate(3),
            rescan_interval: None,
            ..DuelConfig::default()
        };
        let engine = DuelEngine::new(queue.clone(), matches.clone(), Arc::new(bank), &config);
        Harness {
            queue,
            matches,
            engine,
        }
    }

    #[tokio::test]
    async fn test_lone_player_waits() {
        let h = harness();

        let session = h.engine.join_queue().await.unwrap();

        assert_eq!(session.state(), &SessionState::Waiting);
        assert!(h.queue.contains(session.player_id()));
    }

    #[tokio::test]
    async fn test_second_player_matches_both_sessions() {
        let h = harness();
        let mut first = h.engine.join_queue_as("first").await.unwrap();

        let second = h.engine.join_queue_as("second").await.unwrap();
        let state = first.next_update().await.unwrap();

        let duel = second.state().duel().cloned().unwrap();
        assert_eq!(state, SessionState::Matched { duel: duel.clone() });
        assert!(duel.is_participant("first"));
        assert!(h.queue.entries().is_empty());
    }

    #[tokio::test]
    async fn test_answers_flow_to_resolution() {
        let h = harness();
        let mut first = h.engine.join_queue_as("first").await.unwrap();
        let mut second = h.engine.join_queue_as("second").await.unwrap();
        first.next_update().await.unwrap();

        assert_eq!(
            first.submit_answer("41").await.unwrap(),
            SubmissionOutcome::Incorrect
        );
        first.submit_answer("42").await.unwrap();
        second.submit_answer("42").await.unwrap();

        assert!(second.state().is_resolved());
        let resolved = first.drain_updates().unwrap();
        assert_eq!(
            resolved.duel().and_then(|d| d.winner_id.clone()).as_deref(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn test_submit_before_match_is_rejected() {
        let h = harness();
        let mut session = h.engine.join_queue().await.unwrap();

        let result = session.submit_answer("42").await;

        assert!(matches!(result, Err(DuelError::NotMatched)));
    }

    #[tokio::test]
    async fn test_stale_snapshot_does_not_undo_resolution() {
        let h = harness();
        let mut first = h.engine.join_queue_as("first").await.unwrap();
        let mut second = h.engine.join_queue_as("second").await.unwrap();
        let matched = first.next_update().await.unwrap();
        let stale = matched.duel().cloned().unwrap();

        first.submit_answer("42").await.unwrap();
        second.submit_answer("42").await.unwrap();
        first.drain_updates().unwrap();
        assert!(first.state().is_resolved());

        first.apply_snapshot(stale).unwrap();
        assert!(first.state().is_resolved());
    }

    #[tokio::test]
    async fn test_snapshot_of_a_second_match_is_corruption() {
        let h = harness();
        let mut first = h.engine.join_queue_as("first").await.unwrap();
        let _second = h.engine.join_queue_as("second").await.unwrap();
        first.next_update().await.unwrap();

        let other = Match::with_id("other", "first", "third", Question::new("1", "1", ""));
        let result = first.apply_snapshot(other);

        assert!(matches!(result, Err(DuelError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_leave_removes_queue_entry() {
        let h = harness();
        let session = h.engine.join_queue_as("leaver").await.unwrap();

        session.leave().await.unwrap();

        assert!(!h.queue.contains("leaver"));
        assert_eq!(h.matches.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_waiting_session_cleans_up() {
        let h = harness();
        let session = h.engine.join_queue_as("dropper").await.unwrap();

        drop(session);
        for _ in 0..100 {
            if !h.queue.contains("dropper") {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!h.queue.contains("dropper"));
    }

    #[tokio::test]
    async fn test_forfeit_through_session() {
        let queue = Arc::new(InMemoryQueueRepository::new());
        let matches = Arc::new(InMemoryMatchRepository::new());
        let config = DuelConfig {
            retry: RetryPolicy::immediate(3),
            rescan_interval: None,
            forfeit_after: Some(std::time::Duration::from_secs(30)),
            ..DuelConfig::default()
        };
        let engine = DuelEngine::new(
            queue,
            matches.clone(),
            Arc::new(StaticQuestionBank::builtin()),
            &config,
        );

        // A match that started a minute ago and only one side answered.
        let mut duel = Match::with_id("m-1", "present", "absent", Question::new("1 + 1", "2", ""));
        duel.created_at = Utc::now() - chrono::Duration::seconds(60);
        matches.create(&duel).await.unwrap();
        matches
            .record_submission("m-1", &AnswerSubmission::accepted("present", "2", Utc::now()))
            .await
            .unwrap();

        let mut session = engine.join_queue_as("present").await.unwrap();
        session.drain_updates().unwrap();
        let state = session.claim_forfeit().await.unwrap();

        assert_eq!(
            state.duel().and_then(|d| d.winner_id.clone()).as_deref(),
            Some("present")
        );
        assert!(state.is_resolved());
    }
}
