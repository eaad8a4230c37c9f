use std::sync::Arc;
use std::time::Duration;

use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::Error;
use shared::config::DuelConfig;
use shared::models::Match;
use shared::repositories::match_repository::{DynamoDbMatchRepository, MatchRepository};
use shared::services::arbitration_service::ArbitrationService;
use shared::services::errors::arbitration_service_errors::ArbitrationServiceError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverAction {
    /// At least one participant has not answered yet.
    Pending,
    /// This invocation decided the winner, or confirmed an identical one.
    Resolved { winner_id: String },
    AlreadyResolved,
}

/// Watches the matches table stream and settles any match whose second
/// answer landed without the answering engine finishing resolution.
#[derive(Clone)]
pub struct MatchResolverProcessor {
    arbitration: ArbitrationService,
}

impl MatchResolverProcessor {
    pub fn new(client: aws_sdk_dynamodb::Client, config: &DuelConfig) -> Self {
        // Subscriptions are never opened here, so the poll interval is unused.
        let repository = Arc::new(DynamoDbMatchRepository::new(
            client,
            &config.matches_table,
            Duration::from_secs(1),
        ));
        Self::with_repository(repository, config)
    }

    pub fn with_repository(
        repository: Arc<dyn MatchRepository + Send + Sync>,
        config: &DuelConfig,
    ) -> Self {
        Self {
            arbitration: ArbitrationService::new(repository, config),
        }
    }

    /// Fails the whole batch when a store outage kept any match from being
    /// settled, so the stream redelivers it. Other failures are only logged.
    pub async fn process_event(&self, event: Event) -> Result<(), Error> {
        let mut unsettled = Vec::new();

        for record in event.records {
            let event_name = record.event_name.as_str();

            match event_name {
                "INSERT" | "MODIFY" => {
                    let duel: Match = match serde_dynamo::from_item(record.change.new_image) {
                        Ok(duel) => duel,
                        Err(e) => {
                            error!("Failed to decode match image: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = self.handle_snapshot(&duel).await {
                        error!("Failed to resolve match {}: {}", duel.match_id, e);
                        if e.is_transient() {
                            unsettled.push(duel.match_id);
                        }
                    }
                }
                "REMOVE" => {
                    let removed: Result<Match, _> = serde_dynamo::from_item(record.change.old_image);
                    if let Ok(duel) = removed {
                        warn!("Match {} was deleted outside the engine", duel.match_id);
                    }
                }
                _ => {
                    warn!("Unhandled event type: {}", event_name);
                }
            }
        }

        if !unsettled.is_empty() {
            return Err(format!("store unavailable for matches {}", unsettled.join(", ")).into());
        }
        Ok(())
    }

    pub async fn handle_snapshot(
        &self,
        duel: &Match,
    ) -> Result<ResolverAction, ArbitrationServiceError> {
        if let Err(violation) = duel.check_invariants() {
            error!("{}", violation);
            return Err(ArbitrationServiceError::Corrupted(violation));
        }
        if duel.winner_id.is_some() {
            debug!("Match {} is already resolved", duel.match_id);
            return Ok(ResolverAction::AlreadyResolved);
        }
        if !duel.both_submitted() {
            return Ok(ResolverAction::Pending);
        }

        match self.arbitration.resolve_winner(duel).await? {
            Some(resolved) => {
                let winner_id = resolved.winner_id.unwrap_or_default();
                info!("Match {} settled by resolver, winner {}", duel.match_id, winner_id);
                Ok(ResolverAction::Resolved { winner_id })
            }
            None => Ok(ResolverAction::Pending),
        }
    }
}
