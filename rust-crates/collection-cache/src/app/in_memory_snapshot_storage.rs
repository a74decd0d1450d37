use crate::{
    app::snapshot_storage::SnapshotStorage,
    snapshot::CollectionSnapshot,
};
use anyhow::anyhow;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(Clone, Default)]
pub struct InMemorySnapshotStorage {
    snapshots: Arc<Mutex<HashMap<String, CollectionSnapshot>>>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Arc<Mutex<HashMap<String, CollectionSnapshot>>> {
        self.snapshots.clone()
    }
}

impl SnapshotStorage for InMemorySnapshotStorage {
    fn snapshot(&self, user_id: &str) -> anyhow::Result<Option<CollectionSnapshot>> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("snapshot map poisoned"))?;
        Ok(guard.get(user_id).cloned())
    }

    fn write_snapshot(
        &self,
        user_id: &str,
        snapshot: &CollectionSnapshot,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("snapshot map poisoned"))?;
        guard.insert(user_id.to_string(), snapshot.clone());
        Ok(())
    }
}
