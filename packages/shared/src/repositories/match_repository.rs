use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use serde_dynamo::{from_item, to_attribute_value, to_item};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::models::duel_match::{AnswerSubmission, Match};
use crate::repositories::errors::match_repository_errors::MatchRepositoryError;

/// Which match documents a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchFilter {
    MatchId(String),
    Participant(String),
}

impl MatchFilter {
    pub fn matches(&self, duel: &Match) -> bool {
        match self {
            MatchFilter::MatchId(match_id) => duel.match_id == *match_id,
            MatchFilter::Participant(player_id) => duel.is_participant(player_id),
        }
    }
}

/// Receiving end of a snapshot stream. Every value is a full match document;
/// delivery is at-least-once and may be reordered. Dropping the subscription
/// unsubscribes.
pub struct MatchSubscription {
    receiver: mpsc::UnboundedReceiver<Match>,
    poller: Option<JoinHandle<()>>,
}

impl MatchSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Match>) -> Self {
        Self {
            receiver,
            poller: None,
        }
    }

    pub fn with_poller(receiver: mpsc::UnboundedReceiver<Match>, poller: JoinHandle<()>) -> Self {
        Self {
            receiver,
            poller: Some(poller),
        }
    }

    /// Waits for the next snapshot. `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Match> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Match> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for MatchSubscription {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

/// The match registry. Every mutation is conditional; there is no
/// unconditional overwrite of a match document.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Create-if-absent on `match_id`.
    async fn create(&self, duel: &Match) -> Result<(), MatchRepositoryError>;

    async fn get(&self, match_id: &str) -> Result<Match, MatchRepositoryError>;

    async fn find_by_participant(&self, player_id: &str)
        -> Result<Vec<Match>, MatchRepositoryError>;

    /// Stores the submission only if the player is a participant, has no
    /// submission yet and the match is unresolved. Returns the new snapshot.
    async fn record_submission(
        &self,
        match_id: &str,
        submission: &AnswerSubmission,
    ) -> Result<Match, MatchRepositoryError>;

    /// Sets the winner only if none is set yet.
    async fn set_winner(&self, match_id: &str, winner_id: &str)
        -> Result<Match, MatchRepositoryError>;

    /// Sets the winner only if none is set yet, the winner has an accepted
    /// submission and `absent_player_id` has none.
    async fn set_forfeit_winner(
        &self,
        match_id: &str,
        winner_id: &str,
        absent_player_id: &str,
    ) -> Result<Match, MatchRepositoryError>;

    /// Delivers the current matching documents, then every committed change.
    fn subscribe(&self, filter: MatchFilter) -> MatchSubscription;
}

/// Why a conditional submission write was refused, given the document that
/// refused it.
pub fn classify_rejected_submission(duel: &Match, player_id: &str) -> MatchRepositoryError {
    if !duel.is_participant(player_id) {
        MatchRepositoryError::NotParticipant
    } else if duel.submissions.contains_key(player_id) {
        MatchRepositoryError::AlreadyAnswered
    } else if duel.winner_id.is_some() {
        MatchRepositoryError::AlreadyResolved
    } else {
        MatchRepositoryError::ConditionFailed(format!(
            "submission for {} in match {}",
            player_id, duel.match_id
        ))
    }
}

/// Why a conditional winner write was refused. `absent_player_id` is set for
/// forfeit claims.
pub fn classify_rejected_winner(
    duel: &Match,
    winner_id: &str,
    absent_player_id: Option<&str>,
) -> MatchRepositoryError {
    let absent_is_stranger = absent_player_id
        .map(|absent| !duel.is_participant(absent))
        .unwrap_or(false);
    let absent_has_answered = absent_player_id
        .map(|absent| duel.submissions.contains_key(absent))
        .unwrap_or(false);

    if !duel.is_participant(winner_id) || absent_is_stranger {
        MatchRepositoryError::NotParticipant
    } else if duel.winner_id.is_some() {
        MatchRepositoryError::AlreadySet
    } else if absent_has_answered {
        MatchRepositoryError::AlreadyAnswered
    } else {
        MatchRepositoryError::ConditionFailed(format!(
            "winner {} for match {}",
            winner_id, duel.match_id
        ))
    }
}

/// Index keys must be scalar, so each participant slot gets its own
/// attribute and its own index.
const PARTICIPANT_INDEXES: [(&str, &str); 2] = [
    ("GSI_MatchByFirstPlayer", "first_player_id"),
    ("GSI_MatchBySecondPlayer", "second_player_id"),
];

/// Adds the participant index keys to a match item before it is written.
pub fn with_participant_keys(
    duel: &Match,
    mut item: HashMap<String, AttributeValue>,
) -> HashMap<String, AttributeValue> {
    for ((_, attribute), player_id) in PARTICIPANT_INDEXES.iter().zip(&duel.participant_ids) {
        item.insert(attribute.to_string(), AttributeValue::S(player_id.clone()));
    }
    item
}

#[derive(Clone)]
pub struct DynamoDbMatchRepository {
    pub client: Client,
    pub table_name: String,
    pub poll_interval: Duration,
}

impl DynamoDbMatchRepository {
    pub fn new(client: Client, table_name: &str, poll_interval: Duration) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            poll_interval,
        }
    }

    fn decode(item: Option<HashMap<String, AttributeValue>>) -> Result<Match, MatchRepositoryError> {
        let item = item.ok_or_else(|| {
            MatchRepositoryError::Serialization("update returned no attributes".to_string())
        })?;
        from_item(item).map_err(|e| MatchRepositoryError::Serialization(e.to_string()))
    }

    fn is_conditional_failure<E, R>(error: &SdkError<E, R>) -> bool
    where
        E: ConditionalCheck,
    {
        matches!(error, SdkError::ServiceError(service_err) if service_err.err().is_condition_failure())
    }

    /// A conditional update failed; read the document back to tell the
    /// caller why.
    async fn explain_rejected_submission(
        &self,
        match_id: &str,
        player_id: &str,
    ) -> MatchRepositoryError {
        match self.get(match_id).await {
            Ok(duel) => classify_rejected_submission(&duel, player_id),
            Err(e) => e,
        }
    }

    async fn explain_rejected_winner(
        &self,
        match_id: &str,
        winner_id: &str,
        absent_player_id: Option<&str>,
    ) -> MatchRepositoryError {
        match self.get(match_id).await {
            Ok(duel) => classify_rejected_winner(&duel, winner_id, absent_player_id),
            Err(e) => e,
        }
    }

    async fn poll_snapshots(self, filter: MatchFilter, sender: mpsc::UnboundedSender<Match>) {
        let mut delivered: HashMap<String, Match> = HashMap::new();
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            ticker.tick().await;
            if sender.is_closed() {
                break;
            }

            let snapshots = match &filter {
                MatchFilter::MatchId(match_id) => match self.get(match_id).await {
                    Ok(duel) => vec![duel],
                    Err(MatchRepositoryError::NotFound) => Vec::new(),
                    Err(e) => {
                        warn!("Polling match {} failed: {}", match_id, e);
                        continue;
                    }
                },
                MatchFilter::Participant(player_id) => {
                    match self.find_by_participant(player_id).await {
                        Ok(duels) => duels,
                        Err(e) => {
                            warn!("Polling matches for player {} failed: {}", player_id, e);
                            continue;
                        }
                    }
                }
            };

            for snapshot in snapshots {
                if delivered.get(&snapshot.match_id) == Some(&snapshot) {
                    continue;
                }
                delivered.insert(snapshot.match_id.clone(), snapshot.clone());
                if sender.send(snapshot).is_err() {
                    return;
                }
            }
        }

        debug!("Stopped polling for {:?}", filter);
    }
}

/// Lets the error-classification helper work across the per-operation SDK
/// error types.
pub trait ConditionalCheck {
    fn is_condition_failure(&self) -> bool;
}

impl ConditionalCheck for aws_sdk_dynamodb::operation::put_item::PutItemError {
    fn is_condition_failure(&self) -> bool {
        self.is_conditional_check_failed_exception()
    }
}

impl ConditionalCheck for aws_sdk_dynamodb::operation::update_item::UpdateItemError {
    fn is_condition_failure(&self) -> bool {
        self.is_conditional_check_failed_exception()
    }
}

#[async_trait]
impl MatchRepository for DynamoDbMatchRepository {
    async fn create(&self, duel: &Match) -> Result<(), MatchRepositoryError> {
        let item = to_item(duel).map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;
        let item = with_participant_keys(duel, item);

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(match_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if Self::is_conditional_failure(&e) => Err(MatchRepositoryError::AlreadyExists),
            Err(e) => Err(MatchRepositoryError::DynamoDb(e.to_string())),
        }
    }

    async fn get(&self, match_id: &str) -> Result<Match, MatchRepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| MatchRepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            let duel: Match =
                from_item(item).map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;
            Ok(duel)
        } else {
            Err(MatchRepositoryError::NotFound)
        }
    }

    async fn find_by_participant(
        &self,
        player_id: &str,
    ) -> Result<Vec<Match>, MatchRepositoryError> {
        let mut duels: HashMap<String, Match> = HashMap::new();

        for (index_name, attribute) in PARTICIPANT_INDEXES {
            let mut exclusive_start_key = None;
            loop {
                let query_result = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .index_name(index_name)
                    .key_condition_expression(format!("{} = :player_id", attribute))
                    .expression_attribute_values(
                        ":player_id",
                        AttributeValue::S(player_id.to_string()),
                    )
                    .set_exclusive_start_key(exclusive_start_key)
                    .send()
                    .await
                    .map_err(|e| MatchRepositoryError::DynamoDb(e.to_string()))?;

                for item in query_result.items.unwrap_or_default() {
                    let duel: Match = from_item(item)
                        .map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;
                    duels.insert(duel.match_id.clone(), duel);
                }

                match query_result.last_evaluated_key {
                    Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                    _ => break,
                }
            }
        }

        let mut duels: Vec<Match> = duels.into_values().collect();
        duels.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(duels)
    }

    async fn record_submission(
        &self,
        match_id: &str,
        submission: &AnswerSubmission,
    ) -> Result<Match, MatchRepositoryError> {
        let submission_value = to_attribute_value(submission)
            .map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .update_expression("SET submissions.#player = :submission")
            .condition_expression(
                "attribute_exists(match_id) AND attribute_not_exists(winner_id) \
                 AND attribute_not_exists(submissions.#player) \
                 AND contains(participant_ids, :player_id)",
            )
            .expression_attribute_names("#player", &submission.player_id)
            .expression_attribute_values(":submission", submission_value)
            .expression_attribute_values(
                ":player_id",
                AttributeValue::S(submission.player_id.clone()),
            )
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => Self::decode(output.attributes),
            Err(e) if Self::is_conditional_failure(&e) => Err(self
                .explain_rejected_submission(match_id, &submission.player_id)
                .await),
            Err(e) => Err(MatchRepositoryError::DynamoDb(e.to_string())),
        }
    }

    async fn set_winner(
        &self,
        match_id: &str,
        winner_id: &str,
    ) -> Result<Match, MatchRepositoryError> {
        let resolved_at = to_attribute_value(Utc::now())
            .map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .update_expression("SET winner_id = :winner_id, resolved_at = :resolved_at")
            .condition_expression(
                "attribute_exists(match_id) AND attribute_not_exists(winner_id) \
                 AND contains(participant_ids, :winner_id)",
            )
            .expression_attribute_values(":winner_id", AttributeValue::S(winner_id.to_string()))
            .expression_attribute_values(":resolved_at", resolved_at)
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => Self::decode(output.attributes),
            Err(e) if Self::is_conditional_failure(&e) => {
                Err(self.explain_rejected_winner(match_id, winner_id, None).await)
            }
            Err(e) => Err(MatchRepositoryError::DynamoDb(e.to_string())),
        }
    }

    async fn set_forfeit_winner(
        &self,
        match_id: &str,
        winner_id: &str,
        absent_player_id: &str,
    ) -> Result<Match, MatchRepositoryError> {
        let resolved_at = to_attribute_value(Utc::now())
            .map_err(|e| MatchRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("match_id", AttributeValue::S(match_id.to_string()))
            .update_expression("SET winner_id = :winner_id, resolved_at = :resolved_at")
            .condition_expression(
                "attribute_exists(match_id) AND attribute_not_exists(winner_id) \
                 AND attribute_exists(submissions.#winner) \
                 AND attribute_not_exists(submissions.#absent) \
                 AND contains(participant_ids, :winner_id) \
                 AND contains(participant_ids, :absent_id)",
            )
            .expression_attribute_names("#winner", winner_id)
            .expression_attribute_names("#absent", absent_player_id)
            .expression_attribute_values(":winner_id", AttributeValue::S(winner_id.to_string()))
            .expression_attribute_values(
                ":absent_id",
                AttributeValue::S(absent_player_id.to_string()),
            )
            .expression_attribute_values(":resolved_at", resolved_at)
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => Self::decode(output.attributes),
            Err(e) if Self::is_conditional_failure(&e) => Err(self
                .explain_rejected_winner(match_id, winner_id, Some(absent_player_id))
                .await),
            Err(e) => Err(MatchRepositoryError::DynamoDb(e.to_string())),
        }
    }

    fn subscribe(&self, filter: MatchFilter) -> MatchSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let repository = self.clone();
        let poller = tokio::spawn(repository.poll_snapshots(filter, sender));
        MatchSubscription::with_poller(receiver, poller)
    }
}
