pub mod common;

use common::*;
use shared::models::Question;
use shared::repositories::match_repository::MatchRepository;
use shared::services::arbitration_service::{ArbitrationService, SubmissionOutcome};
use shared::services::errors::arbitration_service_errors::ArbitrationServiceError;
use shared::{DuelError, SessionState};

/// The earlier correct answer wins and both players see the same result.
#[tokio::test]
async fn test_earlier_correct_answer_wins() {
    let t = test_engine();
    let (mut x, mut y) = matched_pair(&t.engine).await;

    // 1) X answers first
    let outcome = x.submit_answer(ANSWER).await.unwrap();
    assert!(matches!(outcome, SubmissionOutcome::Accepted { .. }));
    assert!(!x.state().is_resolved());

    // 2) Y answers later and triggers resolution
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    y.submit_answer(ANSWER).await.unwrap();
    assert!(y.state().is_resolved());

    // 3) X sees the resolution through its subscription
    let state = x.drain_updates().unwrap();
    assert!(state.is_resolved());
    assert_eq!(winner_of(&x), Some(x.player_id().to_string()));
    assert_eq!(winner_of(&y), winner_of(&x));
}

/// Wrong answers are never stored, and the player can keep trying.
#[tokio::test]
async fn test_wrong_answer_then_correct() {
    let t = test_engine();
    let (mut x, mut y) = matched_pair(&t.engine).await;

    assert_eq!(
        x.submit_answer("41").await.unwrap(),
        SubmissionOutcome::Incorrect
    );
    let stored = t.matches.all_matches().remove(0);
    assert!(stored.submissions.is_empty());

    y.submit_answer(ANSWER).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    x.submit_answer(ANSWER).await.unwrap();

    let resolved = t.matches.all_matches().remove(0);
    assert_eq!(resolved.winner_id.as_deref(), Some(y.player_id()));
    assert_eq!(resolved.submissions.len(), 2);
    assert!(resolved.submissions.values().all(|s| s.is_correct));
}

/// Answers submitted at the same moment from two engines still produce
/// exactly one winner that both players agree on.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_answers_agree_on_one_winner() {
    let t = test_engine();
    let (x, y) = matched_pair(&t.engine).await;

    let submit = |session: shared::DuelSession| {
        tokio::spawn(async move {
            let mut session = session;
            let outcome = session.submit_answer(ANSWER).await;
            (session, outcome)
        })
    };
    let (x_handle, y_handle) = (submit(x), submit(y));
    let (mut x, x_outcome) = x_handle.await.unwrap();
    let (mut y, y_outcome) = y_handle.await.unwrap();
    x_outcome.unwrap();
    y_outcome.unwrap();

    x.drain_updates().unwrap();
    y.drain_updates().unwrap();

    let stored = t.matches.all_matches().remove(0);
    stored.check_invariants().unwrap();
    assert!(stored.winner_id.is_some());
    assert_eq!(stored.winner_id, stored.decide_winner());
    assert_eq!(winner_of(&x), stored.winner_id);
    assert_eq!(winner_of(&y), stored.winner_id);
}

/// Duplicate submissions racing for the same player record exactly one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_submissions_are_recorded_once() {
    let t = test_engine();
    let (x, _y) = matched_pair(&t.engine).await;
    let match_id = x.state().duel().unwrap().match_id.clone();
    let player_id = x.player_id().to_string();
    let arbitration = t.engine.arbitration().clone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let arbitration = arbitration.clone();
            let match_id = match_id.clone();
            let player_id = player_id.clone();
            tokio::spawn(async move {
                arbitration
                    .submit_answer(&match_id, &player_id, ANSWER)
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(SubmissionOutcome::Accepted { .. }) => accepted += 1,
            Err(ArbitrationServiceError::AlreadyAnswered) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(accepted, 1);

    let stored = t.matches.get(&match_id).await.unwrap();
    assert_eq!(stored.submissions.len(), 1);
    assert!(stored.submissions.contains_key(&player_id));
}

/// Several arbiters resolving the same finished match all land on the same
/// winner, and only the first write changes anything.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_is_idempotent() {
    let t = test_engine();
    let (mut x, mut y) = matched_pair(&t.engine).await;
    let match_id = x.state().duel().unwrap().match_id.clone();

    // Record both answers straight into the store so nobody resolves yet
    let now = chrono::Utc::now();
    for (offset, player) in [(0, x.player_id()), (3, y.player_id())] {
        t.matches
            .record_submission(
                &match_id,
                &shared::models::AnswerSubmission::accepted(
                    player,
                    ANSWER,
                    now + chrono::Duration::milliseconds(offset),
                ),
            )
            .await
            .unwrap();
    }
    let unresolved = t.matches.get(&match_id).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let arbitration = ArbitrationService::new(t.matches.clone(), &test_config());
            let snapshot = unresolved.clone();
            tokio::spawn(async move { arbitration.resolve_winner(&snapshot).await })
        })
        .collect();

    for handle in handles {
        let resolved = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(resolved.winner_id.as_deref(), Some(x.player_id()));
    }

    x.drain_updates().unwrap();
    y.drain_updates().unwrap();
    assert_eq!(winner_of(&x), Some(x.player_id().to_string()));
    assert_eq!(winner_of(&y), Some(x.player_id().to_string()));
}

#[tokio::test]
async fn test_answers_after_resolution_are_rejected() {
    let t = test_engine();
    let (mut x, mut y) = matched_pair(&t.engine).await;
    x.submit_answer(ANSWER).await.unwrap();
    y.submit_answer(ANSWER).await.unwrap();

    let err = x.submit_answer(ANSWER).await.unwrap_err();
    assert_eq!(
        err.user_message(),
        "You've already submitted an answer for this question."
    );
}

#[tokio::test]
async fn test_empty_answer_is_rejected_before_the_store() {
    let t = test_engine();
    let (mut x, _y) = matched_pair(&t.engine).await;

    let err = x.submit_answer("   ").await.unwrap_err();

    assert!(matches!(
        err,
        DuelError::Arbitration(ArbitrationServiceError::ValidationError(_))
    ));
    assert_eq!(err.user_message(), "Please enter an answer.");
}

#[tokio::test]
async fn test_transient_faults_during_submission_are_retried() {
    let t = test_engine();
    let (mut x, _y) = matched_pair(&t.engine).await;

    t.matches.fail_next(3);
    let outcome = x.submit_answer(ANSWER).await.unwrap();

    assert!(matches!(outcome, SubmissionOutcome::Accepted { .. }));
}

#[tokio::test]
async fn test_absent_opponent_forfeits_after_deadline() {
    let mut config = test_config();
    config.forfeit_after = Some(std::time::Duration::from_secs(30));
    let t = test_engine_with(config);

    // A match created a minute ago in which only one player ever answers
    let mut duel = shared::models::Match::with_id(
        "stale-match",
        "present",
        "absent",
        Question::new("6 × 7", ANSWER, ""),
    );
    duel.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
    t.matches.create(&duel).await.unwrap();

    let arbitration = t.engine.arbitration();
    arbitration
        .submit_answer("stale-match", "present", ANSWER)
        .await
        .unwrap();
    let resolved = arbitration
        .claim_forfeit("stale-match", "present")
        .await
        .unwrap();

    assert_eq!(resolved.winner_id.as_deref(), Some("present"));
    let late = arbitration
        .submit_answer("stale-match", "absent", ANSWER)
        .await;
    assert!(matches!(late, Err(ArbitrationServiceError::MatchResolved)));
}

/// A resolved session ignores unresolved snapshots that arrive late.
#[tokio::test]
async fn test_resolved_state_is_terminal() {
    let t = test_engine();
    let (mut x, mut y) = matched_pair(&t.engine).await;

    x.submit_answer(ANSWER).await.unwrap();
    y.submit_answer(ANSWER).await.unwrap();
    let resolved = y.state().clone();

    // Y's queue of snapshots still holds its earlier, unresolved views
    let state = y.drain_updates().unwrap();
    assert_eq!(state, resolved);
    assert!(matches!(state, SessionState::Resolved { .. }));
}

#[tokio::test]
async fn test_cloned_engines_share_one_queue() {
    let t = test_engine();
    let other_engine = t.engine.clone();

    let mut first = t.engine.join_queue().await.unwrap();
    let second = other_engine.join_queue().await.unwrap();
    first.next_update().await.unwrap();

    assert_eq!(
        first.state().duel().map(|d| d.match_id.clone()),
        second.state().duel().map(|d| d.match_id.clone())
    );
    assert!(second.state().duel().is_some());
}
