use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::config::DuelConfig;
use crate::repositories::match_repository::{MatchFilter, MatchRepository};
use crate::repositories::queue_repository::QueueRepository;
use crate::services::arbitration_service::ArbitrationService;
use crate::services::duel_session::DuelSession;
use crate::services::errors::duel_errors::DuelError;
use crate::services::matchmaking_service::MatchmakingService;
use crate::services::question_service::QuestionBank;

/// Entry point for one player-facing process. Cheap to clone; every clone
/// shares the same repositories.
#[derive(Clone)]
pub struct DuelEngine {
    matchmaking: MatchmakingService,
    arbitration: ArbitrationService,
    rescan_interval: Option<Duration>,
}

impl DuelEngine {
    pub fn new(
        queue_repository: Arc<dyn QueueRepository + Send + Sync>,
        match_repository: Arc<dyn MatchRepository + Send + Sync>,
        question_bank: Arc<dyn QuestionBank + Send + Sync>,
        config: &DuelConfig,
    ) -> Self {
        let matchmaking = MatchmakingService::new(
            queue_repository,
            match_repository.clone(),
            question_bank,
            config,
        );
        let arbitration = ArbitrationService::new(match_repository, config);

        Self {
            matchmaking,
            arbitration,
            rescan_interval: config.rescan_interval,
        }
    }

    pub fn matchmaking(&self) -> &MatchmakingService {
        &self.matchmaking
    }

    pub fn arbitration(&self) -> &ArbitrationService {
        &self.arbitration
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval
    }

    /// Joins the queue under a fresh player identity.
    pub async fn join_queue(&self) -> Result<DuelSession, DuelError> {
        self.join_queue_as(&Uuid::new_v4().to_string()).await
    }

    /// Subscribes to the player's matches, enqueues, and makes one claim
    /// attempt. The session comes back `Waiting` or already `Matched`.
    pub async fn join_queue_as(&self, player_id: &str) -> Result<DuelSession, DuelError> {
        // Subscribe before enqueueing so a match created by another engine
        // the moment the entry appears is never missed.
        let subscription = self
            .matchmaking
            .match_repository()
            .subscribe(MatchFilter::Participant(player_id.to_string()));

        let entry = self.matchmaking.enqueue(player_id).await?;
        let mut session = DuelSession::new(self.clone(), entry, subscription);
        info!("Session started for player {}", player_id);

        session.rescan().await?;
        Ok(session)
    }
}
