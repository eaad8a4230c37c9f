use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome<V> {
    Deleted(V),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome<V> {
    Applied(V),
    PredicateFailed(V),
    NotFound,
}

type Filter<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

struct Subscriber<V> {
    filter: Filter<V>,
    sender: mpsc::UnboundedSender<V>,
}

struct Documents<V> {
    items: HashMap<String, V>,
    subscribers: Vec<Subscriber<V>>,
}

impl<V: Clone> Documents<V> {
    /// Pushes a committed document to every interested subscriber and drops
    /// the ones whose receiver has gone away.
    fn notify(&mut self, value: &V) {
        self.subscribers.retain(|subscriber| {
            if !(subscriber.filter)(value) {
                return !subscriber.sender.is_closed();
            }
            subscriber.sender.send(value.clone()).is_ok()
        });
    }
}

/// A keyed document collection with single-document atomic operations only.
/// All mutations of one collection are serialized by one lock, which gives
/// the same per-document guarantees a conditional write in DynamoDB does.
pub struct Collection<V> {
    documents: Mutex<Documents<V>>,
}

impl<V: Clone + Send + 'static> Default for Collection<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> Collection<V> {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Documents {
                items: HashMap::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Documents<V>> {
        // No operation panics while holding the lock, so a poisoned guard
        // still holds consistent documents.
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_if_absent(&self, key: &str, value: V) -> PutOutcome {
        let mut documents = self.lock();
        if documents.items.contains_key(key) {
            return PutOutcome::AlreadyExists;
        }
        documents.items.insert(key.to_string(), value.clone());
        documents.notify(&value);
        PutOutcome::Created
    }

    /// Unconditional upsert.
    pub fn put(&self, key: &str, value: V) {
        let mut documents = self.lock();
        documents.items.insert(key.to_string(), value.clone());
        documents.notify(&value);
    }

    pub fn delete_if_present(&self, key: &str) -> DeleteOutcome<V> {
        match self.lock().items.remove(key) {
            Some(value) => DeleteOutcome::Deleted(value),
            None => DeleteOutcome::NotFound,
        }
    }

    /// Applies `mutation` only if `predicate` holds for the current document,
    /// both under the same lock.
    pub fn conditional_update<P, M>(&self, key: &str, predicate: P, mutation: M) -> UpdateOutcome<V>
    where
        P: FnOnce(&V) -> bool,
        M: FnOnce(&mut V),
    {
        let mut documents = self.lock();
        let updated = {
            let Some(current) = documents.items.get_mut(key) else {
                return UpdateOutcome::NotFound;
            };
            if !predicate(current) {
                return UpdateOutcome::PredicateFailed(current.clone());
            }
            mutation(current);
            current.clone()
        };
        documents.notify(&updated);
        UpdateOutcome::Applied(updated)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().items.get(key).cloned()
    }

    pub fn query_ordered<F, O, K>(&self, filter: F, order_by: O, limit: usize) -> Vec<(String, V)>
    where
        F: Fn(&V) -> bool,
        O: Fn(&V) -> K,
        K: Ord,
    {
        let documents = self.lock();
        let mut results: Vec<(String, V)> = documents
            .items
            .iter()
            .filter(|(_, value)| filter(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        results.sort_by(|(key_a, a), (key_b, b)| {
            order_by(a).cmp(&order_by(b)).then_with(|| key_a.cmp(key_b))
        });
        results.truncate(limit);
        results
    }

    /// Sends every currently matching document, then each later committed
    /// write that matches. Dropping the receiver unsubscribes.
    pub fn subscribe<F>(&self, filter: F) -> mpsc::UnboundedReceiver<V>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut documents = self.lock();

        let mut initial: Vec<(&String, &V)> = documents
            .items
            .iter()
            .filter(|(_, value)| filter(value))
            .collect();
        initial.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (_, value) in initial {
            // The receiver is still in hand, so this cannot fail
            let _ = sender.send(value.clone());
        }

        documents.subscribers.push(Subscriber {
            filter: Box::new(filter),
            sender,
        });
        receiver
    }

    pub fn values(&self) -> Vec<V> {
        self.lock().items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        let mut documents = self.lock();
        documents
            .subscribers
            .retain(|subscriber| !subscriber.sender.is_closed());
        documents.subscribers.len()
    }
}
