//! Persistent-slot policy: one long-lived connection shared in turn.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::DbError;
use crate::models::db_config::PoolKind;
use crate::pool::waiter::{Acquire, Reclaim, WaiterQueue};
use crate::pool::{ConnectionHandle, Establisher, Pool, PoolStatus, close_now, dispose};
use crate::udbc::driver::Driver;

/// Establishes one connection and lends it to callers in arrival order.
///
/// The connection is only closed on [`Pool::close_all`] or when it is
/// reported through [`Pool::destroyed`]. A failed establishment fails the
/// oldest waiter only; the next [`Pool::fetch`] tries again.
pub struct PersistentPool {
    shared: Arc<Shared>,
}

struct Shared {
    establisher: Establisher,
    state: Mutex<State>,
}

#[derive(Default)]
enum Slot {
    #[default]
    Absent,
    Connecting,
    Idle(ConnectionHandle),
    Lent,
}

#[derive(Default)]
struct State {
    slot: Slot,
    waiters: WaiterQueue,
    closed: bool,
}

impl PersistentPool {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        info!(db_type = %driver.r#type(), "persistent pool created");
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
        match std::mem::take(&mut state.slot) {
            Slot::Idle(handle) => {
                state.slot = Slot::Lent;
                trace!(connection_id = handle.id(), "connection lent");
                Acquire::Ready(Ok(handle))
            }
            Slot::Absent => {
                state.slot = Slot::Connecting;
                let rx = state.waiters.push();
                drop(state);
                self.spawn_establish();
                Acquire::Waiting(rx)
            }
            busy => {
                state.slot = busy;
                trace!("connection busy, queueing");
                Acquire::Waiting(state.waiters.push())
            }
        }
    }

    /// Opens the connection. The slot is already `Connecting`.
    fn spawn_establish(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = shared.establisher.establish().await;
            let mut state = shared.state.lock();
            match result {
                Ok(handle) if state.closed => {
                    state.slot = Slot::Absent;
                    drop(state);
                    dispose(handle);
                }
                Ok(handle) => {
                    state.slot = Slot::Lent;
                    if let Err(handle) = state.waiters.hand_off(handle) {
                        debug!(connection_id = handle.id(), "no waiter left, connection idle");
                        state.slot = Slot::Idle(handle);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "connection establishment failed");
                    state.slot = Slot::Absent;
                    state.waiters.fail_next(err);
                }
            }
        });
    }

    fn release(&self, handle: ConnectionHandle) {
        let mut state = self.state.lock();
        if state.closed {
            state.slot = Slot::Absent;
            drop(state);
            dispose(handle);
            return;
        }
        state.slot = Slot::Lent;
        if let Err(handle) = state.waiters.hand_off(handle) {
            trace!(connection_id = handle.id(), "connection idle");
            state.slot = Slot::Idle(handle);
        }
    }

    fn destroyed(self: &Arc<Self>, handle: ConnectionHandle) {
        debug!(connection_id = handle.id(), "connection destroyed");
        dispose(handle);
        let mut state = self.state.lock();
        if !state.closed && state.waiters.has_live() {
            state.slot = Slot::Connecting;
            drop(state);
            self.spawn_establish();
        } else {
            state.slot = Slot::Absent;
        }
    }
}

impl Reclaim for Shared {
    fn reclaim(self: Arc<Self>, handle: ConnectionHandle) {
        self.release(handle);
    }
}

#[async_trait]
impl Pool for PersistentPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Persistent
    }

    async fn fetch(&self) -> Result<ConnectionHandle, DbError> {
        self.shared.acquire().resolve(self.shared.clone()).await
    }

    fn putback(&self, handle: ConnectionHandle) {
        self.shared.release(handle);
    }

    fn destroyed(&self, handle: ConnectionHandle) {
        self.shared.destroyed(handle);
    }

    async fn close_all(&self) {
        let idle = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            let failed = state.waiters.fail_all(|| DbError::PoolClosed);
            info!(failed_waiters = failed, "closing persistent pool");
            match std::mem::take(&mut state.slot) {
                Slot::Idle(handle) => Some(handle),
                other => {
                    state.slot = other;
                    None
                }
            }
        };
        if let Some(handle) = idle {
            close_now(&handle).await;
        }
    }

    fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        let (idle, outstanding) = match state.slot {
            Slot::Absent => (0, 0),
            Slot::Idle(_) => (1, 0),
            Slot::Connecting | Slot::Lent => (0, 1),
        };
        PoolStatus {
            kind: PoolKind::Persistent,
            idle,
            outstanding,
            waiting: state.waiters.len(),
            closed: state.closed,
        }
    }
}
