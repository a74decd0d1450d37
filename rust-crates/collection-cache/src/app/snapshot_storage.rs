use crate::snapshot::CollectionSnapshot;

/// Durable home of hydrated snapshots, so a restarted cache keeps serving
/// users it has already seen.
pub trait SnapshotStorage: Clone + Send + Sync + 'static {
    /// retrieve the stored snapshot for a user, if it was ever hydrated
    fn snapshot(&self, user_id: &str) -> anyhow::Result<Option<CollectionSnapshot>>;

    /// write or overwrite the snapshot for a user
    fn write_snapshot(
        &self,
        user_id: &str,
        snapshot: &CollectionSnapshot,
    ) -> anyhow::Result<()>;
}
