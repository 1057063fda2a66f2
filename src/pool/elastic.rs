//! Elastic policy: between `min` and `max` connections.

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

/// Pool keeping between `min` and `max` connections.
///
/// Connections are opened on demand while fewer than `max` are outstanding.
/// On release a connection goes to the oldest waiter, or back to the idle set
/// unless `min` connections are already idle, in which case it is closed.
pub struct ElasticPool {
    shared: Arc<Shared>,
}

struct Shared {
    min: usize,
    max: usize,
    establisher: Establisher,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    idle: Vec<ConnectionHandle>,
    /// Lent plus being established.
    outstanding: usize,
    waiters: WaiterQueue,
    closed: bool,
}

impl ElasticPool {
    /// # Errors
    ///
    /// [`DbError::Config`] unless `1 <= max` and `min <= max`.
    pub fn new(min: usize, max: usize, driver: Arc<dyn Driver>) -> Result<Self, DbError> {
        PoolKind::Elastic { min, max }.validate()?;
        info!(min, max, db_type = %driver.r#type(), "elastic pool created");
        Ok(Self {
            shared: Arc::new(Shared {
                min,
                max,
                establisher: Establisher::new(driver),
                state: Mutex::new(State::default()),
            }),
        })
    }
}

impl Shared {
    fn acquire(self: &Arc<Self>) -> Acquire {
        let mut state = self.state.lock();
        if state.closed {
            return Acquire::Ready(Err(DbError::PoolClosed));
        }
        if let Some(handle) = state.idle.pop() {
            state.outstanding += 1;
            trace!(connection_id = handle.id(), outstanding = state.outstanding, "idle connection lent");
            return Acquire::Ready(Ok(handle));
        }
        if state.outstanding < self.max {
            state.outstanding += 1;
            trace!(outstanding = state.outstanding, "opening new connection");
            drop(state);
            let (tx, rx) = oneshot::channel();
            self.spawn_establish(tx);
            return Acquire::Waiting(rx);
        }
        trace!(outstanding = state.outstanding, "pool at capacity, queueing");
        Acquire::Waiting(state.waiters.push())
    }

    /// Opens a connection for `requester`. The capacity it uses has already
    /// been counted in `outstanding`.
    fn spawn_establish(self: &Arc<Self>, requester: oneshot::Sender<Delivery>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            match shared.establisher.establish().await {
                Ok(handle) => shared.deliver(requester, handle),
                Err(err) => {
                    warn!(error = %err, "connection establishment failed");
                    let next = {
                        let mut state = shared.state.lock();
                        state.outstanding -= 1;
                        shared.claim_capacity(&mut state)
                    };
                    let _ = requester.send(Err(err));
                    if let Some(next) = next {
                        shared.spawn_establish(next);
                    }
                }
            }
        });
    }

    fn deliver(&self, requester: oneshot::Sender<Delivery>, handle: ConnectionHandle) {
        let closed = {
            let mut state = self.state.lock();
            if state.closed {
                state.outstanding -= 1;
            }
            state.closed
        };
        if closed {
            dispose(handle);
            let _ = requester.send(Err(DbError::PoolClosed));
            return;
        }
        if let Err(Ok(handle)) = requester.send(Ok(handle)) {
            debug!(connection_id = handle.id(), "requester went away, releasing new connection");
            self.release(handle);
        }
    }

    /// Takes one unit of free capacity for the oldest live waiter.
    fn claim_capacity(&self, state: &mut State) -> Option<oneshot::Sender<Delivery>> {
        if state.closed || state.outstanding >= self.max {
            return None;
        }
        let waiter = state.waiters.pop_live()?;
        state.outstanding += 1;
        Some(waiter)
    }

    fn release(&self, handle: ConnectionHandle) {
        let mut state = self.state.lock();
        let handle = if state.closed {
            handle
        } else {
            match state.waiters.hand_off(handle) {
                Ok(()) => return,
                Err(handle) => handle,
            }
        };
        state.outstanding -= 1;
        if state.closed || state.idle.len() >= self.min {
            trace!(connection_id = handle.id(), idle = state.idle.len(), "closing excess connection");
            drop(state);
            dispose(handle);
        } else {
            trace!(connection_id = handle.id(), idle = state.idle.len() + 1, "connection idle");
            state.idle.push(handle);
        }
    }

    fn destroyed(self: &Arc<Self>, handle: ConnectionHandle) {
        debug!(connection_id = handle.id(), "connection destroyed");
        dispose(handle);
        let next = {
            let mut state = self.state.lock();
            state.outstanding -= 1;
            self.claim_capacity(&mut state)
        };
        if let Some(next) = next {
            self.spawn_establish(next);
        }
    }
}

impl Reclaim for Shared {
    fn reclaim(self: Arc<Self>, handle: ConnectionHandle) {
        self.release(handle);
    }
}

#[async_trait]
impl Pool for ElasticPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Elastic {
            min: self.shared.min,
            max: self.shared.max,
        }
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
            info!(
                idle = state.idle.len(),
                outstanding = state.outstanding,
                failed_waiters = failed,
                "closing elastic pool"
            );
            std::mem::take(&mut state.idle)
        };
        for handle in idle {
            close_now(&handle).await;
        }
    }

    fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            kind: self.kind(),
            idle: state.idle.len(),
            outstanding: state.outstanding,
            waiting: state.waiters.len(),
            closed: state.closed,
        }
    }
}
