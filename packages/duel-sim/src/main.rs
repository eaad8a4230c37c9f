//! Drives a crowd of simulated players through the duel queue.
//!
//! Every player runs on its own task with its own session, the way separate
//! devices would, and all of them share one store. Against the in-memory
//! backend the run finishes by checking every stored match for consistency.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use shared::config::{dynamodb_client, DuelConfig};
use shared::repositories::match_repository::DynamoDbMatchRepository;
use shared::repositories::memory::{InMemoryMatchRepository, InMemoryQueueRepository};
use shared::repositories::queue_repository::DynamoDbQueueRepository;
use shared::services::question_service::StaticQuestionBank;
use shared::DuelEngine;
use tracing::info;

mod player;

use player::{PlayerSettings, RoundResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Dynamodb,
}

#[derive(Parser)]
#[command(name = "duel-sim")]
#[command(about = "Simulates players racing each other through quiz duels", long_about = None)]
struct Cli {
    /// Number of concurrent players
    #[arg(short, long, default_value = "10")]
    players: usize,

    /// Store to run against; DynamoDB tables come from the environment
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Duels each player plays back to back
    #[arg(long, default_value = "1")]
    rounds: u32,

    /// Upper bound on a player's thinking time before answering
    #[arg(long, default_value = "250")]
    max_think_ms: u64,

    /// Chance that a player tries a wrong answer first
    #[arg(long, default_value = "0.3")]
    wrong_answer_rate: f64,

    /// How long a player waits for an opponent or a result
    #[arg(long, default_value = "3000")]
    match_timeout_ms: u64,

    /// Log every queue and match transition
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Summary {
    won: usize,
    lost: usize,
    unmatched: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, result: &RoundResult) {
        match result {
            RoundResult::Won => self.won += 1,
            RoundResult::Lost => self.lost += 1,
            RoundResult::Unmatched => self.unmatched += 1,
            RoundResult::Failed(_) => self.failed += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .without_time()
        .init();

    let config = DuelConfig::from_env().context("invalid configuration")?;
    let bank = match &config.question_bank_path {
        Some(path) => StaticQuestionBank::from_json_file(path)?,
        None => StaticQuestionBank::builtin(),
    };

    let (engine, memory_store) = match cli.backend {
        Backend::Memory => {
            let matches = Arc::new(InMemoryMatchRepository::new());
            let engine = DuelEngine::new(
                Arc::new(InMemoryQueueRepository::new()),
                matches.clone(),
                Arc::new(bank),
                &config,
            );
            (engine, Some(matches))
        }
        Backend::Dynamodb => {
            let client = dynamodb_client().await;
            let engine = DuelEngine::new(
                Arc::new(DynamoDbQueueRepository::new(
                    client.clone(),
                    &config.queue_table,
                    &config.queue_name,
                )),
                Arc::new(DynamoDbMatchRepository::new(
                    client,
                    &config.matches_table,
                    config.poll_interval,
                )),
                Arc::new(bank),
                &config,
            );
            (engine, None)
        }
    };

    let settings = PlayerSettings {
        rounds: cli.rounds.max(1),
        max_think_time: Duration::from_millis(cli.max_think_ms),
        wrong_answer_rate: cli.wrong_answer_rate,
        match_timeout: Duration::from_millis(cli.match_timeout_ms),
    };

    info!("Starting {} players against {:?}", cli.players, cli.backend);
    let handles: Vec<_> = (0..cli.players)
        .map(|_| tokio::spawn(player::play(engine.clone(), settings.clone())))
        .collect();

    let mut summary = Summary::default();
    for handle in handles {
        for result in handle.await.context("player task panicked")? {
            summary.record(&result);
        }
    }

    println!(
        "won: {}  lost: {}  unmatched: {}  failed: {}",
        summary.won, summary.lost, summary.unmatched, summary.failed
    );

    if let Some(matches) = memory_store {
        verify_store(&matches, &summary)?;
    }
    if summary.failed > 0 {
        bail!("{} rounds failed", summary.failed);
    }
    Ok(())
}

/// Every resolved match has exactly one winner and one loser, so the tallies
/// must agree with the store.
fn verify_store(matches: &InMemoryMatchRepository, summary: &Summary) -> anyhow::Result<()> {
    let all = matches.all_matches();
    let mut resolved = 0;

    for duel in &all {
        duel.check_invariants()?;
        if duel.winner_id.is_some() {
            resolved += 1;
        }
    }

    println!("matches created: {}  resolved: {}", all.len(), resolved);
    if summary.failed == 0 && (summary.won != resolved || summary.lost != resolved) {
        bail!(
            "{} resolved matches but {} wins and {} losses were reported",
            resolved,
            summary.won,
            summary.lost
        );
    }
    Ok(())
}
