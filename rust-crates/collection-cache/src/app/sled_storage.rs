// Sled-backed persistence for hydrated collection snapshots.
use crate::{
    app::snapshot_storage::SnapshotStorage,
    snapshot::CollectionSnapshot,
};
use anyhow::Context;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

#[derive(Clone)]
pub struct SledSnapshotStorage {
    db: Db,
    snapshot_tree: Tree,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    user_id: String,
    snapshot: CollectionSnapshot,
}

impl SledSnapshotStorage {
    pub fn new(db: Db) -> anyhow::Result<Self> {
        let snapshot_tree = db
            .open_tree("collection_snapshots")
            .context("open collection_snapshots tree")?;
        Ok(Self { db, snapshot_tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(db)
    }

    fn serialize_record<T: Serialize>(value: &T, label: &str) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
    }
}

impl SnapshotStorage for SledSnapshotStorage {
    fn snapshot(&self, user_id: &str) -> anyhow::Result<Option<CollectionSnapshot>> {
        let value = match self
            .snapshot_tree
            .get(user_id.as_bytes())
            .context("read collection snapshot")?
        {
            Some(value) => value,
            None => return Ok(None),
        };
        let record = deserialize::<SnapshotRecord>(value.as_ref())?;
        Ok(Some(record.snapshot))
    }

    fn write_snapshot(
        &self,
        user_id: &str,
        snapshot: &CollectionSnapshot,
    ) -> anyhow::Result<()> {
        let record = SnapshotRecord {
            user_id: user_id.to_string(),
            snapshot: snapshot.clone(),
        };
        let bytes = Self::serialize_record(&record, "collection snapshot record")?;
        self.snapshot_tree
            .insert(user_id.as_bytes(), bytes)
            .context("persist collection snapshot")?;
        self.db.flush().context("flush collection snapshot")?;
        Ok(())
    }
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(bytes).context("deserialize stored record")
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempdir::TempDir;

    #[test]
    fn open__after_previous_handle_dropped__reacquires_database() {
        // given
        let dir = TempDir::new("collection-sled").unwrap();
        drop(SledSnapshotStorage::open(dir.path()).unwrap());

        // when
        let reopened = SledSnapshotStorage::open(dir.path());

        // then
        assert!(reopened.is_ok());
    }

    #[test]
    fn snapshot__survives_reopen() {
        // given
        let dir = TempDir::new("collection-sled").unwrap();
        let snapshot = CollectionSnapshot::empty(60, Utc::now());
        {
            let storage = SledSnapshotStorage::open(dir.path()).unwrap();
            storage.write_snapshot("user-1", &snapshot).unwrap();
        }

        // when
        let storage = SledSnapshotStorage::open(dir.path()).unwrap();
        let loaded = storage.snapshot("user-1").unwrap();

        // then
        assert_eq!(loaded, Some(snapshot));
        assert_eq!(storage.snapshot("user-2").unwrap(), None);
    }
}
