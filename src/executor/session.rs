use crate::error::DbError;
use crate::pool::{ConnectionHandle, Pool, PoolStatus, close_now};
use crate::udbc::connection::{Notification, NotifyCallback};
use crate::udbc::RowSet;
use crate::udbc::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Database client on top of a pool.
///
/// Cloning is cheap; clones share the pool and the held listener connections.
#[derive(Clone)]
pub struct Session {
    pool: Arc<dyn Pool>,
    listeners: Arc<Mutex<Listeners>>,
}

/// Connections held by listeners, closed with the session.
#[derive(Default)]
struct Listeners {
    held: Vec<ConnectionHandle>,
    closed: bool,
}

impl Session {
    pub fn new(pool: Arc<dyn Pool>) -> Self {
        Self {
            pool,
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Acquires a connection for manual use; give it back with
    /// [`Session::putback`].
    pub async fn fetch(&self) -> Result<ConnectionHandle, DbError> {
        self.pool.fetch().await
    }

    pub fn putback(&self, handle: ConnectionHandle) {
        self.pool.putback(handle);
    }

    /// Runs `sql` on a pooled connection and returns its rows.
    ///
    /// The connection goes back to the pool before the result is returned,
    /// whether the query succeeded or not.
    pub async fn run_query(&self, sql: &str, args: &[Value]) -> Result<RowSet, DbError> {
        let lease = Lease::new(self.pool.as_ref(), self.pool.fetch().await?);
        let start = Instant::now();
        let result = lease.query(sql, args).await;
        lease.finish();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(rows) => debug!(sql, elapsed_ms, rows = rows.len(), "query finished"),
            Err(e) => debug!(sql, elapsed_ms, error = %e, "query failed"),
        }
        result
    }

    /// Runs a statement that yields no rows and returns the affected row
    /// count, with the same putback guarantee as [`Session::run_query`].
    pub async fn run_operation(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let lease = Lease::new(self.pool.as_ref(), self.pool.fetch().await?);
        let start = Instant::now();
        let result = lease.execute(sql, args).await;
        lease.finish();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(affected) => debug!(sql, elapsed_ms, affected, "operation finished"),
            Err(e) => debug!(sql, elapsed_ms, error = %e, "operation failed"),
        }
        result
    }

    /// Holds one connection for the lifetime of the session and forwards the
    /// notifications of `channels` to `callback`.
    ///
    /// Runs in the background and reports nothing to the caller. Channel
    /// subscription is best-effort: a channel that cannot be listened on is
    /// logged and skipped, and the remaining channels are still subscribed.
    pub fn register_listener<F, I, S>(&self, callback: F, channels: I)
    where
        F: Fn(Notification) + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let callback: NotifyCallback = Arc::new(callback);
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        let session = self.clone();
        tokio::spawn(async move {
            let handle = match session.pool.fetch().await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, ?channels, "listener could not acquire a connection");
                    return;
                }
            };
            handle.subscribe(callback);
            for channel in &channels {
                info!(channel = %channel, connection_id = handle.id(), "Listening on channel");
                if let Err(e) = handle.listen(channel).await {
                    warn!(channel = %channel, error = %e, "failed to listen on channel, skipping");
                }
            }
            session.hold(handle);
        });
    }

    fn hold(&self, handle: ConnectionHandle) {
        let mut listeners = self.listeners.lock();
        if listeners.closed {
            drop(listeners);
            debug!(connection_id = handle.id(), "session closed, dropping listener");
            self.pool.destroyed(handle);
        } else {
            listeners.held.push(handle);
        }
    }

    /// Number of listener connections currently held.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().held.len()
    }

    /// Closes listener connections and the pool.
    pub async fn close_all(&self) {
        let held = {
            let mut listeners = self.listeners.lock();
            listeners.closed = true;
            std::mem::take(&mut listeners.held)
        };
        self.pool.close_all().await;
        for handle in held {
            close_now(&handle).await;
            self.pool.destroyed(handle);
        }
    }
}

/// Connection borrowed for one statement.
///
/// A lease dropped before [`Lease::finish`] (the statement future was
/// cancelled mid-flight) reports its connection as destroyed, since the
/// session may still be busy with the abandoned statement.
struct Lease<'a> {
    pool: &'a dyn Pool,
    handle: Option<ConnectionHandle>,
}

impl<'a> Lease<'a> {
    fn new(pool: &'a dyn Pool, handle: ConnectionHandle) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.putback(handle);
        }
    }
}

impl std::ops::Deref for Lease<'_> {
    type Target = ConnectionHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("lease already finished")
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(connection_id = handle.id(), "statement abandoned, discarding connection");
            self.pool.destroyed(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_config::PoolKind;
    use crate::udbc::mock::{MockDriver, settle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts what the session hands back to the pool.
    struct CountingPool {
        inner: Arc<dyn Pool>,
        putbacks: AtomicUsize,
        destroyed: AtomicUsize,
    }

    #[async_trait]
    impl Pool for CountingPool {
        fn kind(&self) -> PoolKind {
            self.inner.kind()
        }

        async fn fetch(&self) -> Result<ConnectionHandle, DbError> {
            self.inner.fetch().await
        }

        fn putback(&self, handle: ConnectionHandle) {
            self.putbacks.fetch_add(1, Ordering::SeqCst);
            self.inner.putback(handle);
        }

        fn destroyed(&self, handle: ConnectionHandle) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            self.inner.destroyed(handle);
        }

        async fn close_all(&self) {
            self.inner.close_all().await;
        }

        fn status(&self) -> PoolStatus {
            self.inner.status()
        }
    }

    fn counting(kind: PoolKind, driver: &MockDriver) -> Arc<CountingPool> {
        Arc::new(CountingPool {
            inner: crate::pool::build(kind, Arc::new(driver.clone())).unwrap(),
            putbacks: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        })
    }

    fn elastic() -> PoolKind {
        PoolKind::Elastic { min: 1, max: 2 }
    }

    #[tokio::test]
    async fn test_run_query_returns_rows_and_puts_back() {
        let driver = MockDriver::new();
        let pool = counting(elastic(), &driver);
        let session = Session::new(pool.clone());

        let rows = session.run_query("SELECT 1", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["session"], Value::I64(1));
        assert_eq!(pool.putbacks.load(Ordering::SeqCst), 1);
        assert_eq!(pool.destroyed.load(Ordering::SeqCst), 0);

        let status = session.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.outstanding, 0);
    }

    #[tokio::test]
    async fn test_run_query_failure_still_puts_back() {
        let driver = MockDriver::new();
        let pool = counting(elastic(), &driver);
        let session = Session::new(pool.clone());

        let err = session.run_query("FAIL SELECT", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Query(_)));
        assert_eq!(pool.putbacks.load(Ordering::SeqCst), 1);
        assert_eq!(session.status().outstanding, 0);

        // The connection survives the failed statement and is reused.
        session.run_query("SELECT 1", &[]).await.unwrap();
        assert_eq!(driver.created(), 1);
        assert_eq!(pool.putbacks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_query_fetch_failure_skips_putback() {
        let driver = MockDriver::new();
        let pool = counting(PoolKind::Fixed, &driver);
        let session = Session::new(pool.clone());

        driver.fail_next(1);
        let err = session.run_query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_establishment());
        assert_eq!(pool.putbacks.load(Ordering::SeqCst), 0);
        assert_eq!(pool.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(session.status().outstanding, 0);
    }

    #[tokio::test]
    async fn test_run_operation_returns_affected_rows() {
        let driver = MockDriver::new();
        let pool = counting(PoolKind::Persistent, &driver);
        let session = Session::new(pool.clone());

        let affected = session
            .run_operation("UPDATE t SET a = $1", &[Value::I32(1)])
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(pool.putbacks.load(Ordering::SeqCst), 1);
        assert_eq!(session.status().idle, 1);
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_capacity() {
        let driver = MockDriver::new();
        let session = Session::new(crate::pool::build(PoolKind::Persistent, Arc::new(driver.clone())).unwrap());

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.run_query("SELECT 1", &[]).await })
            })
            .collect();
        for task in tasks {
            let rows = task.await.unwrap().unwrap();
            assert_eq!(rows[0]["session"], Value::I64(1));
        }
        assert_eq!(driver.created(), 1);
    }

    #[tokio::test]
    async fn test_register_listener_subscribes_and_holds_connection() {
        let driver = MockDriver::new();
        let session = Session::new(crate::pool::build(elastic(), Arc::new(driver.clone())).unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        session.register_listener(move |n: Notification| sink.lock().push(n), ["orders", "bad channel", "users"]);
        settle().await;

        assert_eq!(session.listener_count(), 1);
        assert_eq!(driver.session(0).listened(), vec!["orders", "users"]);
        assert_eq!(session.status().outstanding, 1);

        driver.notify("orders", "42");
        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].channel, "orders");
        assert_eq!(received[0].payload, "42");
    }

    #[tokio::test]
    async fn test_register_listener_fetch_failure_is_logged_only() {
        let driver = MockDriver::new();
        let session = Session::new(crate::pool::build(PoolKind::Fixed, Arc::new(driver.clone())).unwrap());

        driver.fail_next(1);
        session.register_listener(|_| {}, ["orders"]);
        settle().await;

        assert_eq!(session.listener_count(), 0);
        assert_eq!(session.status().outstanding, 0);
        session.run_query("SELECT 1", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_all_closes_listener_connections() {
        let driver = MockDriver::new();
        let session = Session::new(crate::pool::build(elastic(), Arc::new(driver.clone())).unwrap());

        session.run_query("SELECT 1", &[]).await.unwrap();
        session.register_listener(|_| {}, ["orders"]);
        settle().await;
        assert_eq!(session.listener_count(), 1);
        assert_eq!(driver.created(), 1);

        session.close_all().await;
        assert!(driver.session(0).is_closed());
        settle().await;
        assert_eq!(driver.session(0).close_calls(), 1);
        assert_eq!(driver.open(), 0);
        assert_eq!(session.status().outstanding, 0);
        assert_eq!(session.listener_count(), 0);
        assert!(session.status().closed);
        assert!(session.run_query("SELECT 1", &[]).await.unwrap_err().is_pool_closed());
    }

    #[tokio::test]
    async fn test_listener_established_during_close_is_released() {
        let (driver, gate) = MockDriver::gated();
        let pool = counting(PoolKind::Persistent, &driver);
        let session = Session::new(pool.clone());

        session.register_listener(|_| {}, ["orders"]);
        settle().await;
        session.close_all().await;
        gate.add_permits(1);
        settle().await;

        assert_eq!(session.listener_count(), 0);
        assert_eq!(driver.open(), 0);
    }
}
