//! One task per user owns that user's snapshot. Every command for a user goes
//! through its mailbox, so events apply strictly in arrival order while
//! different users proceed in parallel.
use crate::{
    Error,
    Result,
    app::snapshot_storage::SnapshotStorage,
    snapshot::{
        CollectionEdgeEvent,
        CollectionPage,
        CollectionSnapshot,
    },
};
use anyhow::Context;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc,
        oneshot,
    },
    task::JoinHandle,
};

const MAILBOX_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Nothing hydrated for this user yet; the event was dropped.
    Cold,
}

#[derive(Debug)]
enum Command {
    Get {
        limit: usize,
        offset: usize,
        reply: oneshot::Sender<Option<CollectionPage>>,
    },
    Put {
        snapshot: Box<CollectionSnapshot>,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Apply {
        event: Box<CollectionEdgeEvent>,
        reply: oneshot::Sender<Applied>,
    },
}

struct ActorSlot {
    sender: mpsc::Sender<Command>,
    in_flight: Arc<AtomicUsize>,
    last_used: Instant,
}

/// Decrements the slot's in-flight count when the caller is done with it.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner<S> {
    storage: S,
    runtime: Handle,
    slots: Mutex<HashMap<String, ActorSlot>>,
}

#[derive(Clone)]
pub struct CollectionActors<S> {
    inner: Arc<Inner<S>>,
}

impl<S: SnapshotStorage> CollectionActors<S> {
    /// Actors are spawned on `runtime`, independent of the thread that
    /// happens to deliver the command.
    pub fn new(storage: S, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                runtime,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn get(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Option<CollectionPage>> {
        let (reply, response) = oneshot::channel();
        self.send(
            user_id,
            Command::Get {
                limit,
                offset,
                reply,
            },
            response,
        )
        .await
    }

    pub async fn put(&self, user_id: &str, snapshot: CollectionSnapshot) -> Result<()> {
        let (reply, response) = oneshot::channel();
        let command = Command::Put {
            snapshot: Box::new(snapshot),
            reply,
        };
        self.send(user_id, command, response)
            .await?
            .map_err(Error::Internal)
    }

    pub async fn apply(&self, user_id: &str, event: CollectionEdgeEvent) -> Result<Applied> {
        let (reply, response) = oneshot::channel();
        let command = Command::Apply {
            event: Box::new(event),
            reply,
        };
        self.send(user_id, command, response).await
    }

    pub fn live_actors(&self) -> usize {
        self.inner.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Drops actors idle for at least `idle_for` with nothing in flight.
    /// Returns how many were evicted.
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let Ok(mut slots) = self.inner.slots.lock() else {
            return 0;
        };
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.in_flight.load(Ordering::SeqCst) > 0 || slot.last_used.elapsed() < idle_for
        });
        before - slots.len()
    }

    /// Periodically evicts idle actors until the returned task is aborted.
    pub fn spawn_eviction(&self, every: Duration, idle_for: Duration) -> JoinHandle<()> {
        let actors = self.clone();
        self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = actors.evict_idle(idle_for);
                if evicted > 0 {
                    tracing::debug!("evicted {evicted} idle collection actors");
                }
            }
        })
    }

    async fn send<T>(
        &self,
        user_id: &str,
        command: Command,
        response: oneshot::Receiver<T>,
    ) -> Result<T> {
        let (sender, _in_flight) = self.acquire(user_id)?;
        sender
            .send(command)
            .await
            .map_err(|_| Error::ActorGone(user_id.to_string()))?;
        response
            .await
            .map_err(|_| Error::ActorGone(user_id.to_string()))
    }

    /// Looks up or spawns the user's actor and marks a command in flight,
    /// all under the slot lock so eviction cannot race the lookup.
    fn acquire(&self, user_id: &str) -> Result<(mpsc::Sender<Command>, InFlight)> {
        let mut slots = self
            .inner
            .slots
            .lock()
            .map_err(|_| Error::ActorGone(user_id.to_string()))?;
        let slot = slots
            .entry(user_id.to_string())
            .or_insert_with(|| self.spawn_actor(user_id));
        slot.last_used = Instant::now();
        slot.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok((slot.sender.clone(), InFlight(slot.in_flight.clone())))
    }

    fn spawn_actor(&self, user_id: &str) -> ActorSlot {
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let storage = self.inner.storage.clone();
        let user_id = user_id.to_string();
        tracing::debug!("spawning collection actor for {user_id}");
        self.inner
            .runtime
            .spawn(run_actor(user_id, storage, receiver));
        ActorSlot {
            sender,
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_used: Instant::now(),
        }
    }
}

async fn run_actor<S: SnapshotStorage>(
    user_id: String,
    storage: S,
    mut receiver: mpsc::Receiver<Command>,
) {
    let mut snapshot = match load(&storage, &user_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("failed to load stored snapshot for {user_id}: {e:?}");
            None
        }
    };

    // buffered commands still drain after the pool drops its sender
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Get {
                limit,
                offset,
                reply,
            } => {
                let page = snapshot.as_ref().map(|s| s.page(limit, offset));
                let _ = reply.send(page);
            }
            Command::Put {
                snapshot: replacement,
                reply,
            } => {
                let result = persist(&storage, &user_id, (*replacement).clone()).await;
                if result.is_ok() {
                    snapshot = Some(*replacement);
                }
                let _ = reply.send(result);
            }
            Command::Apply { event, reply } => {
                let Some(current) = snapshot.as_mut() else {
                    let _ = reply.send(Applied::Cold);
                    continue;
                };
                current.apply(&event, Utc::now());
                if let Err(e) = persist(&storage, &user_id, current.clone()).await {
                    tracing::warn!("failed to persist snapshot for {user_id}: {e:?}");
                }
                let _ = reply.send(Applied::Applied);
            }
        }
    }
    tracing::debug!("collection actor for {user_id} stopped");
}

// Storage calls run on the blocking pool.

async fn load<S: SnapshotStorage>(
    storage: &S,
    user_id: &str,
) -> anyhow::Result<Option<CollectionSnapshot>> {
    let storage = storage.clone();
    let user_id = user_id.to_string();
    tokio::task::spawn_blocking(move || storage.snapshot(&user_id))
        .await
        .context("snapshot load task")?
}

async fn persist<S: SnapshotStorage>(
    storage: &S,
    user_id: &str,
    snapshot: CollectionSnapshot,
) -> anyhow::Result<()> {
    let storage = storage.clone();
    let user_id = user_id.to_string();
    tokio::task::spawn_blocking(move || storage.write_snapshot(&user_id, &snapshot))
        .await
        .context("snapshot write task")?
}
