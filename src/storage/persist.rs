use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::models::PersistedState;
use crate::store::{CharacterStore, SubscriptionId};

use super::{codec, DbPool, STORAGE_KEY};

#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    pub key: String,
    pub debounce_ms: u64,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            key: STORAGE_KEY.into(),
            debounce_ms: 300,
        }
    }
}

/// The single pending-write slot: the latest captured snapshot plus the timer
/// scheduled to flush it. Rescheduling aborts the prior timer, so at most one
/// write is ever in flight for the key.
struct PendingWrite {
    snapshot: Option<PersistedState>,
    timer: Option<JoinHandle<()>>,
}

/// Keeps a store wired to durable storage until [`detach`](Self::detach) is
/// called. Dropping the handle without detaching leaves the subscription
/// alive for the lifetime of the store.
pub struct PersistenceHandle {
    store: Arc<CharacterStore>,
    pool: DbPool,
    key: String,
    subscription: SubscriptionId,
    pending: Arc<Mutex<PendingWrite>>,
}

/// Wire a store to the persistence codec.
///
/// Any previously persisted state is loaded and hydrated into the store
/// before this returns, so the very next read reflects persisted data. After
/// that, every store change captures a snapshot and schedules a trailing-edge
/// debounced write: bursts of changes within `debounce_ms` of each other
/// coalesce into a single write carrying the latest snapshot.
///
/// Must be called from within a tokio runtime; the debounce timer runs on it.
pub fn attach_store_persistence(
    store: Arc<CharacterStore>,
    pool: DbPool,
    options: PersistenceOptions,
) -> PersistenceHandle {
    if let Some(persisted) = codec::load_state(&pool, &options.key) {
        tracing::debug!(key = %options.key, "Hydrating store from persisted state");
        store.hydrate(persisted);
    }

    let pending = Arc::new(Mutex::new(PendingWrite {
        snapshot: None,
        timer: None,
    }));
    let debounce = Duration::from_millis(options.debounce_ms);
    let runtime = Handle::current();

    let subscription = store.subscribe({
        let pending = pending.clone();
        let pool = pool.clone();
        let key = options.key.clone();
        move |snapshot: &PersistedState| {
            let mut guard = pending.lock().unwrap();
            guard.snapshot = Some(snapshot.clone());
            if let Some(timer) = guard.timer.take() {
                timer.abort();
            }

            let task_pending = pending.clone();
            let task_pool = pool.clone();
            let task_key = key.clone();
            guard.timer = Some(runtime.spawn(async move {
                tokio::time::sleep(debounce).await;
                // A timer that already passed its sleep can race a reschedule;
                // taking from the shared slot ensures the latest snapshot wins
                // and is written exactly once.
                let snapshot = {
                    let mut guard = task_pending.lock().unwrap();
                    guard.timer = None;
                    guard.snapshot.take()
                };
                if let Some(snapshot) = snapshot {
                    codec::save_state(&task_pool, &task_key, &snapshot);
                }
            }));
        }
    });

    PersistenceHandle {
        store,
        pool,
        key: options.key,
        subscription,
        pending,
    }
}

impl PersistenceHandle {
    /// Unsubscribe from the store and flush any pending debounced write
    /// immediately, so no mutation is lost when a session ends. No further
    /// writes occur after this returns.
    pub fn detach(self) {
        self.store.unsubscribe(self.subscription);

        let snapshot = {
            let mut guard = self.pending.lock().unwrap();
            if let Some(timer) = guard.timer.take() {
                timer.abort();
            }
            guard.snapshot.take()
        };
        if let Some(snapshot) = snapshot {
            codec::save_state(&self.pool, &self.key, &snapshot);
        }
    }
}
