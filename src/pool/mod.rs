//! Connection pools.
//!
//! Three admission policies share the [`Pool`] contract:
//!
//! - [`FixedPool`]: one slot, a fresh connection per lease, closed on putback.
//! - [`PersistentPool`]: one connection for the pool's lifetime, lent in turn.
//! - [`ElasticPool`]: between `min` and `max` connections, opened on demand.
//!
//! Every policy keeps its state behind a single mutex and applies each
//! transition before resolving the waiter it serves, so a caller that reacts
//! to its connection by calling back into the pool sees the committed state.
//!
//! ```rust,ignore
//! let pool = upool::pool::build(PoolKind::Elastic { min: 1, max: 4 }, driver)?;
//! let conn = pool.fetch().await?;
//! let rows = conn.query("SELECT 1", &[]).await;
//! pool.putback(conn);
//! ```

mod elastic;
mod fixed;
mod persistent;
pub(crate) mod waiter;

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::DbError;
use crate::models::db_config::PoolKind;
use crate::udbc::connection::Connection;
use crate::udbc::driver::Driver;

pub use elastic::ElasticPool;
pub use fixed::FixedPool;
pub use persistent::PersistentPool;

/// Admission policy contract.
#[async_trait]
pub trait Pool: Send + Sync {
    fn kind(&self) -> PoolKind;

    /// Acquires a connection, waiting in FIFO order when none is available.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the establishment made on this caller's
    /// behalf fails, [`DbError::PoolClosed`] once the pool is closed.
    async fn fetch(&self) -> Result<ConnectionHandle, DbError>;

    /// Returns a connection obtained from [`Pool::fetch`].
    fn putback(&self, handle: ConnectionHandle);

    /// Reports a lent connection as dead. The pool closes it and frees the
    /// capacity it occupied.
    fn destroyed(&self, handle: ConnectionHandle);

    /// Fails every queued waiter with [`DbError::PoolClosed`] and closes the
    /// connections the pool currently holds.
    async fn close_all(&self);

    fn status(&self) -> PoolStatus;
}

/// Builds the pool described by `kind` on top of `driver`.
pub fn build(kind: PoolKind, driver: Arc<dyn Driver>) -> Result<Arc<dyn Pool>, DbError> {
    let pool: Arc<dyn Pool> = match kind {
        PoolKind::Fixed => Arc::new(FixedPool::new(driver)),
        PoolKind::Persistent => Arc::new(PersistentPool::new(driver)),
        PoolKind::Elastic { min, max } => Arc::new(ElasticPool::new(min, max, driver)?),
    };
    Ok(pool)
}

/// Snapshot of a pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub kind: PoolKind,
    /// Connections held by the pool and not lent.
    pub idle: usize,
    /// Connections lent or being established.
    pub outstanding: usize,
    /// Callers queued for a connection.
    pub waiting: usize,
    pub closed: bool,
}

/// A connection lent by a pool.
///
/// Exactly one caller owns a handle at a time; give it back with
/// [`Pool::putback`] (or [`Pool::destroyed`]). Dropping a handle closes
/// nothing and leaks the pool capacity it occupies.
pub struct ConnectionHandle {
    id: u64,
    established_at: Instant,
    /// Set by the first pool-side close.
    closed: AtomicBool,
    conn: Box<dyn Connection>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: u64, conn: Box<dyn Connection>) -> Self {
        Self {
            id,
            established_at: Instant::now(),
            closed: AtomicBool::new(false),
            conn,
        }
    }

    /// Pool-assigned identifier, unique per pool instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

impl Deref for ConnectionHandle {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish()
    }
}

/// Driver wrapper assigning handle ids.
pub(crate) struct Establisher {
    driver: Arc<dyn Driver>,
    next_id: AtomicU64,
}

impl Establisher {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) async fn establish(&self) -> Result<ConnectionHandle, DbError> {
        let start = Instant::now();
        let conn = self
            .driver
            .connect()
            .await
            .map_err(DbError::into_establishment)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = id,
            db_type = %self.driver.r#type(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "connection established"
        );
        Ok(ConnectionHandle::new(id, conn))
    }
}

/// Closes `handle` in the background.
pub(crate) fn dispose(handle: ConnectionHandle) {
    tokio::spawn(async move { close_now(&handle).await });
}

/// Closes `handle` unless the pool already did.
pub(crate) async fn close_now(handle: &ConnectionHandle) {
    if handle.closed.swap(true, Ordering::AcqRel) {
        return;
    }
    if let Err(e) = handle.close().await {
        warn!(connection_id = handle.id, error = %e, "failed to close connection");
    } else {
        debug!(connection_id = handle.id, "connection closed");
    }
}
