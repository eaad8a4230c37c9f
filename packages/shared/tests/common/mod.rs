#![allow(dead_code)]

use std::sync::Arc;

use shared::models::Question;
use shared::repositories::memory::{InMemoryMatchRepository, InMemoryQueueRepository};
use shared::services::question_service::StaticQuestionBank;
use shared::services::retry::RetryPolicy;
use shared::{DuelConfig, DuelEngine, DuelError, DuelSession, SessionState};

pub const ANSWER: &str = "42";

pub struct TestEngine {
    pub queue: Arc<InMemoryQueueRepository>,
    pub matches: Arc<InMemoryMatchRepository>,
    pub engine: DuelEngine,
}

/// Sessions never rescan on their own in tests; `settle` drives them.
pub fn test_config() -> DuelConfig {
    DuelConfig {
        retry: RetryPolicy::immediate(5),
        rescan_interval: None,
        ..DuelConfig::default()
    }
}

pub fn fixed_bank() -> StaticQuestionBank {
    StaticQuestionBank::new(vec![Question::new("6 × 7", ANSWER, "6 × 7 = 42")])
        .expect("bank with one question")
}

pub fn test_engine() -> TestEngine {
    test_engine_with(test_config())
}

pub fn test_engine_with(config: DuelConfig) -> TestEngine {
    let queue = Arc::new(InMemoryQueueRepository::new());
    let matches = Arc::new(InMemoryMatchRepository::new());
    let engine = DuelEngine::new(
        queue.clone(),
        matches.clone(),
        Arc::new(fixed_bank()),
        &config,
    );
    TestEngine {
        queue,
        matches,
        engine,
    }
}

/// Joins every player concurrently, each on its own task.
pub async fn join_concurrently(engine: &DuelEngine, players: usize) -> Vec<DuelSession> {
    let handles: Vec<_> = (0..players)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.join_queue().await })
        })
        .collect();

    let mut sessions = Vec::with_capacity(players);
    for handle in handles {
        let session = handle
            .await
            .expect("join task panicked")
            .expect("join failed");
        sessions.push(session);
    }
    sessions
}

pub fn waiting_count(sessions: &[DuelSession]) -> usize {
    sessions
        .iter()
        .filter(|session| *session.state() == SessionState::Waiting)
        .count()
}

/// Lets waiting sessions rescan one at a time until at most one of them is
/// left without a partner.
pub async fn settle(sessions: &mut [DuelSession]) -> Result<(), DuelError> {
    for _ in 0..=sessions.len() {
        for session in sessions.iter_mut() {
            session.rescan().await?;
        }
        for session in sessions.iter_mut() {
            session.drain_updates()?;
        }
        if waiting_count(sessions) <= 1 {
            break;
        }
    }
    Ok(())
}

/// Two sessions that have both observed their shared match.
pub async fn matched_pair(engine: &DuelEngine) -> (DuelSession, DuelSession) {
    let mut first = engine.join_queue().await.expect("first join");
    let mut second = engine.join_queue().await.expect("second join");
    first.next_update().await.expect("first sees the match");
    second.drain_updates().expect("second sees the match");

    assert_eq!(
        first.state().duel().map(|d| d.match_id.clone()),
        second.state().duel().map(|d| d.match_id.clone())
    );
    (first, second)
}

pub fn winner_of(session: &DuelSession) -> Option<String> {
    session.state().duel().and_then(|duel| duel.winner_id.clone())
}
