use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde_dynamo::{from_item, to_item};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::models::queue::{sort_oldest_first, QueueEntry};
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;

/// The queue ledger: players waiting for an opponent, at most one entry per
/// player id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Inserts or overwrites the entry for `entry.player_id`.
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError>;

    /// Removes the entry only if it is still present. `NotFound` means some
    /// other engine already claimed or removed it.
    async fn dequeue(&self, player_id: &str) -> Result<(), QueueRepositoryError>;

    /// Up to `limit` entries, oldest `joined_at` first. Entries may be in the
    /// middle of being claimed by another engine.
    async fn scan_oldest(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueRepositoryError>;
}

pub struct DynamoDbQueueRepository {
    pub client: Client,
    pub table_name: String,
    pub queue_name: String,
}

impl DynamoDbQueueRepository {
    pub fn new(client: Client, table_name: &str, queue_name: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            queue_name: queue_name.to_string(),
        }
    }
}

#[async_trait]
impl QueueRepository for DynamoDbQueueRepository {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), QueueRepositoryError> {
        let item = to_item(entry).map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

        debug!(
            "Enqueued player {} in queue {}",
            entry.player_id, entry.queue_name
        );
        Ok(())
    }

    async fn dequeue(&self, player_id: &str) -> Result<(), QueueRepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("queue_name", AttributeValue::S(self.queue_name.clone()))
            .key("player_id", AttributeValue::S(player_id.to_string()))
            .condition_expression("attribute_exists(player_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Err(QueueRepositoryError::NotFound);
                    }
                }
                Err(QueueRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn scan_oldest(&self, limit: usize) -> Result<Vec<QueueEntry>, QueueRepositoryError> {
        let mut entries = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let query_result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("queue_name = :queue_name")
                .expression_attribute_values(
                    ":queue_name",
                    AttributeValue::S(self.queue_name.clone()),
                )
                .consistent_read(true)
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| QueueRepositoryError::DynamoDb(e.to_string()))?;

            if let Some(items) = query_result.items {
                for item in items {
                    let entry: QueueEntry = from_item(item)
                        .map_err(|e| QueueRepositoryError::Serialization(e.to_string()))?;
                    entries.push(entry);
                }
            }

            match query_result.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => break,
            }
        }

        // The sort key is player_id, so ordering by wait time happens here
        sort_oldest_first(&mut entries);
        entries.truncate(limit);

        debug!(
            "Scanned {} waiting players in queue {}",
            entries.len(),
            self.queue_name
        );
        Ok(entries)
    }
}
