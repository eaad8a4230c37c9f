use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A player currently waiting in the queue ledger.
/// Each record corresponds to a DynamoDB item partitioned by queue name.
/// Example PK: "quickplay", SK: "player-uuid"
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueEntry {
    pub queue_name: String,
    pub player_id: String,
    pub joined_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(player_id: &str, queue_name: &str) -> Self {
        QueueEntry {
            queue_name: queue_name.to_string(),
            player_id: player_id.to_string(),
            joined_at: Utc::now(),
        }
    }

    /// Same player and queue, explicit join time. Used when a claimed player
    /// is put back so they keep their place in line.
    pub fn with_joined_at(player_id: &str, queue_name: &str, joined_at: DateTime<Utc>) -> Self {
        QueueEntry {
            queue_name: queue_name.to_string(),
            player_id: player_id.to_string(),
            joined_at,
        }
    }
}

/// Orders entries oldest first, breaking equal timestamps by player id so the
/// scan order is stable across backends.
pub fn sort_oldest_first(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_entry_creation() {
        let entry = QueueEntry::new("player-1", "quickplay");

        assert_eq!(entry.player_id, "player-1");
        assert_eq!(entry.queue_name, "quickplay");
        assert!((Utc::now() - entry.joined_at).num_seconds() < 10);
    }

    #[test]
    fn test_sort_oldest_first() {
        let now = Utc::now();
        let mut entries = vec![
            QueueEntry::with_joined_at("newest", "quickplay", now),
            QueueEntry::with_joined_at("oldest", "quickplay", now - chrono::Duration::minutes(10)),
            QueueEntry::with_joined_at("b-middle", "quickplay", now - chrono::Duration::minutes(5)),
            QueueEntry::with_joined_at("a-middle", "quickplay", now - chrono::Duration::minutes(5)),
        ];

        sort_oldest_first(&mut entries);

        let ids: Vec<&str> = entries.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(ids, vec!["oldest", "a-middle", "b-middle", "newest"]);
    }

    #[test]
    fn test_queue_entry_serialization() {
        let entry = QueueEntry::new("player-1", "quickplay");

        let serialized = serde_json::to_string(&entry).unwrap();
        assert!(serialized.contains("\"queue_name\""));
        assert!(serialized.contains("\"joined_at\""));

        let deserialized: QueueEntry = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, entry);
    }
}
