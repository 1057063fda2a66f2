//! FIFO queue of callers blocked on a connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::DbError;
use crate::pool::ConnectionHandle;

/// Result delivered to a blocked caller.
pub(crate) type Delivery = Result<ConnectionHandle, DbError>;

/// Outcome of a policy's admission decision.
pub(crate) enum Acquire {
    /// Resolved without waiting.
    Ready(Delivery),
    /// Resolved later through the result cell.
    Waiting(oneshot::Receiver<Delivery>),
}

/// Takes back a connection that was delivered to a caller who stopped
/// waiting for it.
pub(crate) trait Reclaim: Send + Sync {
    fn reclaim(self: Arc<Self>, handle: ConnectionHandle);
}

impl Acquire {
    /// Waits for the delivery. If the returned future is dropped first, a
    /// connection already sent to it goes back to `owner`.
    pub(crate) async fn resolve(self, owner: Arc<dyn Reclaim>) -> Delivery {
        match self {
            Acquire::Ready(delivery) => delivery,
            Acquire::Waiting(rx) => {
                let mut pending = Pending { rx, owner };
                // Sender dropped without an answer: the pool itself is gone.
                (&mut pending.rx).await.unwrap_or(Err(DbError::PoolClosed))
            }
        }
    }
}

struct Pending {
    rx: oneshot::Receiver<Delivery>,
    owner: Arc<dyn Reclaim>,
}

impl Drop for Pending {
    fn drop(&mut self) {
        // Closing first makes any later hand-off skip this cell.
        self.rx.close();
        if let Ok(Ok(handle)) = self.rx.try_recv() {
            trace!(connection_id = handle.id(), "caller left after hand-off, reclaiming");
            self.owner.clone().reclaim(handle);
        }
    }
}

struct Waiter {
    tx: oneshot::Sender<Delivery>,
    since: Instant,
}

#[derive(Default)]
pub(crate) struct WaiterQueue {
    queue: VecDeque<Waiter>,
}

impl WaiterQueue {
    /// Enqueues a new waiter at the back.
    pub(crate) fn push(&mut self) -> oneshot::Receiver<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(Waiter {
            tx,
            since: Instant::now(),
        });
        rx
    }

    /// Removes the oldest waiter whose caller is still listening.
    pub(crate) fn pop_live(&mut self) -> Option<oneshot::Sender<Delivery>> {
        while let Some(waiter) = self.queue.pop_front() {
            if !waiter.tx.is_closed() {
                return Some(waiter.tx);
            }
            trace!("skipping abandoned waiter");
        }
        None
    }

    /// Hands `handle` to the oldest live waiter, or gives it back if there is
    /// none.
    pub(crate) fn hand_off(&mut self, mut handle: ConnectionHandle) -> Result<(), ConnectionHandle> {
        while let Some(waiter) = self.queue.pop_front() {
            let waited = waiter.since.elapsed();
            match waiter.tx.send(Ok(handle)) {
                Ok(()) => {
                    trace!(waited_ms = waited.as_millis() as u64, "connection handed to waiter");
                    return Ok(());
                }
                Err(Ok(returned)) => handle = returned,
                Err(Err(_)) => unreachable!("a connection was sent"),
            }
        }
        Err(handle)
    }

    /// Fails the oldest live waiter with `err`. Returns false when no waiter
    /// was listening.
    pub(crate) fn fail_next(&mut self, mut err: DbError) -> bool {
        while let Some(waiter) = self.queue.pop_front() {
            match waiter.tx.send(Err(err)) {
                Ok(()) => return true,
                Err(Err(returned)) => err = returned,
                Err(Ok(_)) => unreachable!("an error was sent"),
            }
        }
        false
    }

    /// Fails every queued waiter, returning how many were notified.
    pub(crate) fn fail_all(&mut self, make_err: impl Fn() -> DbError) -> usize {
        self.queue
            .drain(..)
            .filter_map(|waiter| waiter.tx.send(Err(make_err())).ok())
            .count()
    }

    /// Number of waiters whose callers are still listening.
    pub(crate) fn len(&self) -> usize {
        self.queue.iter().filter(|waiter| !waiter.tx.is_closed()).count()
    }

    pub(crate) fn has_live(&self) -> bool {
        self.queue.iter().any(|waiter| !waiter.tx.is_closed())
    }
}
