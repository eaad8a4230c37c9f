use std::time::Duration;

use anyhow::{bail, Context};
use rand::Rng;
use shared::services::arbitration_service::SubmissionOutcome;
use shared::{DuelEngine, DuelSession, SessionState};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub rounds: u32,
    pub max_think_time: Duration,
    pub wrong_answer_rate: f64,
    pub match_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundResult {
    Won,
    Lost,
    Unmatched,
    Failed(String),
}

/// Plays up to `rounds` duels back to back, re-joining the queue after each
/// one. Stops early once nobody is left to play against.
pub async fn play(engine: DuelEngine, settings: PlayerSettings) -> Vec<RoundResult> {
    let mut results = Vec::new();

    for round in 1..=settings.rounds {
        let result = match play_round(&engine, &settings).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Round {} failed: {:#}", round, e);
                RoundResult::Failed(e.to_string())
            }
        };
        let unmatched = result == RoundResult::Unmatched;
        results.push(result);
        if unmatched {
            break;
        }
    }

    results
}

async fn play_round(engine: &DuelEngine, settings: &PlayerSettings) -> anyhow::Result<RoundResult> {
    let mut session = engine.join_queue().await?;

    while *session.state() == SessionState::Waiting {
        match tokio::time::timeout(settings.match_timeout, session.next_update()).await {
            Ok(update) => {
                update?;
            }
            Err(_) => {
                info!("Player {} found no opponent, leaving", session.player_id());
                session.leave().await?;
                return Ok(RoundResult::Unmatched);
            }
        }
    }

    let question = session
        .state()
        .duel()
        .map(|duel| duel.question.clone())
        .context("matched session has no match")?;

    think(settings).await;
    let guess_wrong = rand::thread_rng().gen_bool(settings.wrong_answer_rate.clamp(0.0, 1.0));
    if guess_wrong {
        let outcome = session.submit_answer("not the answer").await?;
        debug!("Player {} guessed wrong: {:?}", session.player_id(), outcome);
        think(settings).await;
    }

    let outcome = session.submit_answer(&question.canonical_answer).await?;
    if outcome == SubmissionOutcome::Incorrect {
        bail!("canonical answer '{}' was rejected", question.canonical_answer);
    }

    wait_for_result(&mut session, settings).await
}

async fn wait_for_result(
    session: &mut DuelSession,
    settings: &PlayerSettings,
) -> anyhow::Result<RoundResult> {
    while !session.state().is_resolved() {
        match tokio::time::timeout(settings.match_timeout, session.next_update()).await {
            Ok(update) => {
                update?;
            }
            Err(_) => {
                // Opponent went quiet; a forfeit is the only way out.
                session
                    .claim_forfeit()
                    .await
                    .context("opponent never answered")?;
            }
        }
    }

    let winner = session.state().duel().and_then(|duel| duel.winner_id.clone());
    if winner.as_deref() == Some(session.player_id()) {
        Ok(RoundResult::Won)
    } else {
        Ok(RoundResult::Lost)
    }
}

async fn think(settings: &PlayerSettings) {
    let max_millis = settings.max_think_time.as_millis() as u64;
    if max_millis == 0 {
        return;
    }
    let millis = rand::thread_rng().gen_range(0..=max_millis);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
