//! Fire-and-forget delivery of collection events to the edge cache.
//!
//! A single dispatcher task drains one queue, so events reach the cache in
//! the order they were emitted. Failed deliveries are logged and dropped;
//! the cache re-hydrates from the ledger on its next miss.
use crate::cache_client::CollectionCacheClient;
use collection_cache::snapshot::CollectionEdgeEvent;
use std::sync::{
    Arc,
    Mutex,
};
use tokio::{
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
};

pub trait CollectionEmitter: Send + Sync {
    /// Never blocks and never fails the caller.
    fn emit(&self, user_id: &str, event: CollectionEdgeEvent);
}

/// For deployments without a cache.
pub struct NoopEmitter;

impl CollectionEmitter for NoopEmitter {
    fn emit(&self, user_id: &str, _event: CollectionEdgeEvent) {
        tracing::trace!("no collection cache configured; dropping event for {user_id}");
    }
}

/// Keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<(String, CollectionEdgeEvent)>>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<(String, CollectionEdgeEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl CollectionEmitter for RecordingEmitter {
    fn emit(&self, user_id: &str, event: CollectionEdgeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((user_id.to_string(), event));
        }
    }
}

pub struct HttpCollectionEmitter {
    sender: mpsc::UnboundedSender<(String, CollectionEdgeEvent)>,
}

impl HttpCollectionEmitter {
    /// Starts the dispatcher on `runtime`. It stops once the emitter is
    /// dropped and the queue has drained.
    pub fn spawn(client: CollectionCacheClient, runtime: &Handle) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = runtime.spawn(dispatch(client, receiver));
        (Self { sender }, dispatcher)
    }
}

impl CollectionEmitter for HttpCollectionEmitter {
    fn emit(&self, user_id: &str, event: CollectionEdgeEvent) {
        if self.sender.send((user_id.to_string(), event)).is_err() {
            tracing::warn!("collection dispatcher stopped; dropping event for {user_id}");
        }
    }
}

async fn dispatch(
    client: CollectionCacheClient,
    mut receiver: mpsc::UnboundedReceiver<(String, CollectionEdgeEvent)>,
) {
    while let Some((user_id, event)) = receiver.recv().await {
        match client.post_event(&user_id, &event).await {
            Ok(true) => tracing::debug!("delivered collection event for {user_id}"),
            Ok(false) => tracing::debug!("collection cache cold for {user_id}; event dropped"),
            Err(e) => tracing::warn!("failed to deliver collection event for {user_id}: {e:#}"),
        }
    }
    tracing::debug!("collection dispatcher stopped");
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use chrono::Utc;
    use collection_cache::{
        app::{
            actix_collection_api::ActixCollectionApi,
            actor::CollectionActors,
            in_memory_snapshot_storage::InMemorySnapshotStorage,
            request::ApiKey,
        },
        snapshot::{
            CollectionEntry,
            CollectionSnapshot,
        },
    };
    use gacha_core::CardId;
    use std::time::Duration;

    fn entry(id: &str) -> CollectionEntry {
        CollectionEntry {
            id: id.to_string(),
            card_id: CardId::new("shoichi:card01"),
            serial_number: Some(1),
            obtained_at: Utc::now(),
            card: None,
        }
    }

    #[tokio::test]
    async fn emit__unreachable_cache__is_logged_not_raised() {
        // given
        let client = CollectionCacheClient::new("http://127.0.0.1:1", "key").unwrap();
        let (sut, dispatcher) = HttpCollectionEmitter::spawn(client, &Handle::current());

        // when
        sut.emit("user", CollectionEdgeEvent::add(entry("inv-1"), 1));
        drop(sut);

        // then
        tokio::time::timeout(Duration::from_secs(10), dispatcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn emit__events_arrive_in_order() {
        // given
        let actors = CollectionActors::new(InMemorySnapshotStorage::new(), Handle::current());
        let cache = ActixCollectionApi::new("127.0.0.1", None, ApiKey::new("k"), actors).unwrap();
        let client = CollectionCacheClient::new(cache.base_url(), "k").unwrap();
        client
            .put_snapshot("user", &CollectionSnapshot::empty(60, Utc::now()))
            .await
            .unwrap();
        let (sut, dispatcher) = HttpCollectionEmitter::spawn(client.clone(), &Handle::current());

        // when
        sut.emit("user", CollectionEdgeEvent::add(entry("inv-1"), 1));
        sut.emit("user", CollectionEdgeEvent::add(entry("inv-2"), 0));
        sut.emit("user", CollectionEdgeEvent::remove("inv-1", 0));
        drop(sut);
        dispatcher.await.unwrap();

        // then
        let page = client.page("user", 50, 0).await.unwrap().unwrap();
        assert_eq!(page.total_owned, 1);
        assert_eq!(page.distinct_owned, 1);
        assert_eq!(page.collection[0].id, "inv-2");
    }
}
