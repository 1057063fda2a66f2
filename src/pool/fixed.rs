//! Fixed-slot policy: one connection at a time, never reused.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::DbError;
use crate::models::db_config::PoolKind;
use crate::pool::waiter::{Acquire, Delivery, Reclaim, WaiterQueue};
use crate::pool::{ConnectionHandle, Establisher, Pool, PoolStatus, close_now, dispose};
use crate::udbc::driver::Driver;

/// Serializes callers through a single slot.
///
/// Each lease gets a freshly established connection which is closed when it
/// is put back, so no session state leaks from one caller to the next.
pub struct FixedPool {
    shared: Arc<Shared>,
}

struct Shared {
    establisher: Establisher,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// A connection is lent or being established.
    busy: bool,
    waiters: WaiterQueue,
    closed: bool,
}

impl FixedPool {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        info!(db_type = %driver.r#type(), "fixed pool created");
        Self {
            shared: Arc::new(Shared {
                establisher: Establisher::new(driver),
                state: Mutex::new(State::default()),
            }),
        }
    }
}

impl Shared {
    fn acquire(self: &Arc<Self>) -> Acquire {
        let mut state = self.state.lock();
        if state.closed {
            return Acquire::Ready(Err(DbError::PoolClosed));
        }
        if state.busy {
            trace!("slot busy, queueing");
            return Acquire::Waiting(state.waiters.push());
        }
        state.busy = true;
        drop(state);
        let (tx, rx) = oneshot::channel();
        self.spawn_establish(tx);
        Acquire::Waiting(rx)
    }

    fn spawn_establish(self: &Arc<Self>, requester: oneshot::Sender<Delivery>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            match shared.establisher.establish().await {
                Ok(handle) => {
                    if shared.state.lock().closed {
                        dispose(handle);
                        shared.vacate();
                        let _ = requester.send(Err(DbError::PoolClosed));
                    } else if let Err(Ok(handle)) = requester.send(Ok(handle)) {
                        debug!(connection_id = handle.id(), "requester went away, releasing new connection");
                        shared.release(handle);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "connection establishment failed");
                    let next = shared.next_holder();
                    let _ = requester.send(Err(err));
                    if let Some(next) = next {
                        shared.spawn_establish(next);
                    }
                }
            }
        });
    }

    /// Passes the slot to the oldest live waiter, or frees it.
    fn next_holder(&self) -> Option<oneshot::Sender<Delivery>> {
        let mut state = self.state.lock();
        let next = if state.closed {
            None
        } else {
            state.waiters.pop_live()
        };
        state.busy = next.is_some();
        next
    }

    fn vacate(self: &Arc<Self>) {
        if let Some(next) = self.next_holder() {
            trace!("slot passed to next waiter");
            self.spawn_establish(next);
        }
    }

    /// Closes `handle`, then passes the slot on. The slot stays busy until
    /// the close has finished.
    fn release(self: &Arc<Self>, handle: ConnectionHandle) {
        trace!(connection_id = handle.id(), "closing released connection");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            close_now(&handle).await;
            shared.vacate();
        });
    }
}

impl Reclaim for Shared {
    fn reclaim(self: Arc<Self>, handle: ConnectionHandle) {
        self.release(handle);
    }
}

#[async_trait]
impl Pool for FixedPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Fixed
    }

    async fn fetch(&self) -> Result<ConnectionHandle, DbError> {
        self.shared.acquire().resolve(self.shared.clone()).await
    }

    fn putback(&self, handle: ConnectionHandle) {
        self.shared.release(handle);
    }

    fn destroyed(&self, handle: ConnectionHandle) {
        debug!(connection_id = handle.id(), "connection destroyed");
        self.shared.release(handle);
    }

    async fn close_all(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let failed = state.waiters.fail_all(|| DbError::PoolClosed);
        info!(busy = state.busy, failed_waiters = failed, "closing fixed pool");
    }

    fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            kind: PoolKind::Fixed,
            idle: 0,
            outstanding: usize::from(state.busy),
            waiting: state.waiters.len(),
            closed: state.closed,
        }
    }
}
