//! In-memory record stores.
//!
//! [`Store`] is the authoritative map of id → record, with a secondary index
//! by owning user. Every record sits behind its own [`tokio::sync::Mutex`]
//! so that a user-issued cancel/stop and a scheduler-issued fill/emit on the
//! same record are serialized, while operations on different records run in
//! parallel.
//!
//! Lock order: the map lock is never held while waiting on a record lock,
//! and the two index locks are never held together.

use std::sync::Arc;

use ahash::AHashMap;
use atx_core::types::{Algorithm, Order};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A record owned by a [`Store`].
pub trait Record: Clone + Send + 'static {
    fn id(&self) -> Uuid;
    fn user_id(&self) -> &str;
    fn created_at(&self) -> u64;
}

impl Record for Order {
    fn id(&self) -> Uuid {
        self.id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

impl Record for Algorithm {
    fn id(&self) -> Uuid {
        self.id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Shared handle to one record.
pub type RecordHandle<T> = Arc<Mutex<T>>;

pub struct Store<T> {
    records: RwLock<AHashMap<Uuid, RecordHandle<T>>>,
    by_user: RwLock<AHashMap<String, Vec<Uuid>>>,
}

pub type OrderStore = Store<Order>;
pub type AlgorithmStore = Store<Algorithm>;

impl<T: Record> Store<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(AHashMap::new()),
            by_user: RwLock::new(AHashMap::new()),
        }
    }

    /// Insert a record (replacing any record with the same id) and return
    /// its handle.
    pub async fn insert(&self, record: T) -> RecordHandle<T> {
        let id = record.id();
        let user = record.user_id().to_string();
        let handle = Arc::new(Mutex::new(record));
        let replaced = self.records.write().await.insert(id, Arc::clone(&handle));
        if replaced.is_none() {
            self.by_user.write().await.entry(user).or_default().push(id);
        }
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<RecordHandle<T>> {
        self.records.read().await.get(&id).cloned()
    }

    /// Clone of the current record.
    pub async fn snapshot(&self, id: Uuid) -> Option<T> {
        let handle = self.get(id).await?;
        let record = handle.lock().await;
        Some(record.clone())
    }

    /// Handles of every record, in no particular order.
    pub async fn handles(&self) -> Vec<RecordHandle<T>> {
        self.records.read().await.values().cloned().collect()
    }

    /// Clones of a user's records that satisfy `filter`, oldest first.
    pub async fn for_user(&self, user_id: &str, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let ids = match self.by_user.read().await.get(user_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let handles: Vec<RecordHandle<T>> = {
            let records = self.records.read().await;
            ids.iter().filter_map(|id| records.get(id).cloned()).collect()
        };
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.lock().await;
            if filter(&record) {
                out.push(record.clone());
            }
        }
        out.sort_by_key(|r| r.created_at());
        out
    }

    /// Clones of every record, oldest first.
    pub async fn all(&self) -> Vec<T> {
        let mut out = Vec::new();
        for handle in self.handles().await {
            out.push(handle.lock().await.clone());
        }
        out.sort_by_key(|r| r.created_at());
        out
    }

    /// Drop every record that satisfies `filter` and return their ids.
    ///
    /// Handles already held elsewhere stay valid; the records just stop
    /// being reachable through the store.
    pub async fn prune(&self, filter: impl Fn(&T) -> bool) -> Vec<Uuid> {
        let mut doomed = Vec::new();
        for handle in self.handles().await {
            let record = handle.lock().await;
            if filter(&record) {
                doomed.push((record.id(), record.user_id().to_string()));
            }
        }
        if doomed.is_empty() {
            return Vec::new();
        }

        {
            let mut records = self.records.write().await;
            for (id, _) in &doomed {
                records.remove(id);
            }
        }
        let mut by_user = self.by_user.write().await;
        for (id, user) in &doomed {
            if let Some(ids) = by_user.get_mut(user) {
                ids.retain(|i| i != id);
                if ids.is_empty() {
                    by_user.remove(user);
                }
            }
        }
        doomed.into_iter().map(|(id, _)| id).collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl<T: Record> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{order_for, pair};
    use atx_core::types::OrderStatus;

    #[tokio::test]
    async fn indexes_by_user() {
        let store = OrderStore::new();
        let a = order_for("alice", 1, &pair());
        let b = order_for("bob", 2, &pair());
        let mut c = order_for("alice", 3, &pair());
        c.status = OrderStatus::Filled;
        store.insert(a.clone()).await;
        store.insert(b).await;
        store.insert(c.clone()).await;

        let alice = store.for_user("alice", |_| true).await;
        assert_eq!(alice.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a.id, c.id]);

        let filled = store.for_user("alice", |o| o.status == OrderStatus::Filled).await;
        assert_eq!(filled.len(), 1);
        assert!(store.for_user("carol", |_| true).await.is_empty());
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn reinsert_does_not_duplicate_index() {
        let store = OrderStore::new();
        let a = order_for("alice", 1, &pair());
        store.insert(a.clone()).await;
        store.insert(a.clone()).await;
        assert_eq!(store.for_user("alice", |_| true).await.len(), 1);
    }

    #[tokio::test]
    async fn record_handles_are_shared() {
        let store = OrderStore::new();
        let a = order_for("alice", 1, &pair());
        let handle = store.insert(a.clone()).await;
        handle.lock().await.filled_quantity = 0.5;
        assert_eq!(store.snapshot(a.id).await.unwrap().filled_quantity, 0.5);
        assert!(store.snapshot(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn prune_drops_records_and_index_entries() {
        let store = OrderStore::new();
        let live = order_for("alice", 1, &pair());
        let mut done = order_for("alice", 2, &pair());
        done.status = OrderStatus::Filled;
        let mut gone = order_for("bob", 3, &pair());
        gone.status = OrderStatus::Cancelled;
        for o in [&live, &done, &gone] {
            store.insert(o.clone()).await;
        }

        let mut pruned = store.prune(|o| o.is_terminal()).await;
        pruned.sort();
        let mut expected = vec![done.id, gone.id];
        expected.sort();
        assert_eq!(pruned, expected);
        assert_eq!(store.len().await, 1);
        assert!(store.snapshot(done.id).await.is_none());
        assert_eq!(store.for_user("alice", |_| true).await, vec![live]);
        assert!(store.for_user("bob", |_| true).await.is_empty());
        assert!(store.by_user.read().await.get("bob").is_none());
        assert!(store.prune(|o| o.is_terminal()).await.is_empty());
    }
}
