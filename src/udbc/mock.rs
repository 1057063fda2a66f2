//! In-memory driver for pool tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::DbError;
use crate::models::db_type::DatabaseType;
use crate::udbc::connection::{Connection, Notification, NotifyCallback};
use crate::udbc::driver::Driver;
use crate::udbc::value::Value;
use crate::udbc::{Row, RowSet};

/// Lets spawned pool tasks (establishments, closes) run to completion.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockDriver {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    fail_next: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    close_delay: Option<Duration>,
    /// Most sessions open at once.
    peak_open: AtomicUsize,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Driver whose establishments each wait for one permit of the returned
    /// semaphore.
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let driver = Self {
            inner: Arc::new(MockInner {
                gate: Some(gate.clone()),
                ..MockInner::default()
            }),
        };
        (driver, gate)
    }

    /// Driver whose connections take `delay` to close.
    pub(crate) fn slow_close(delay: Duration) -> Self {
        Self {
            inner: Arc::new(MockInner {
                close_delay: Some(delay),
                ..MockInner::default()
            }),
        }
    }

    /// The next `n` establishments fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub(crate) fn open(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    pub(crate) fn peak_open(&self) -> usize {
        self.inner.peak_open.load(Ordering::SeqCst)
    }

    /// Session by creation order, starting at 0.
    pub(crate) fn session(&self, index: usize) -> Arc<MockSession> {
        self.inner.sessions.lock()[index].clone()
    }

    pub(crate) fn notify(&self, channel: &str, payload: &str) {
        let sessions = self.inner.sessions.lock().clone();
        for session in sessions.iter().filter(|s| !s.is_closed()) {
            session.notify(channel, payload);
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn r#type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        if let Some(gate) = &self.inner.gate {
            gate.acquire()
                .await
                .map_err(|_| DbError::Connection("gate closed".into()))?
                .forget();
        }
        let refuse = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(DbError::Connection("connection refused".into()));
        }
        let mut sessions = self.inner.sessions.lock();
        let session = Arc::new(MockSession::new(sessions.len() + 1, self.inner.close_delay));
        sessions.push(session.clone());
        let open = sessions.iter().filter(|s| !s.is_closed()).count();
        self.inner.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockConnection(session)))
    }
}

pub(crate) struct MockSession {
    pub(crate) id: usize,
    close_delay: Option<Duration>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    listened: Mutex<Vec<String>>,
    observers: Mutex<Vec<NotifyCallback>>,
}

impl MockSession {
    fn new(id: usize, close_delay: Option<Duration>) -> Self {
        Self {
            id,
            close_delay,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            listened: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn listened(&self) -> Vec<String> {
        self.listened.lock().clone()
    }

    fn notify(&self, channel: &str, payload: &str) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(Notification {
                process_id: self.id as u32,
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
    }

    fn check(&self, sql: &str) -> Result<(), DbError> {
        if self.is_closed() {
            return Err(DbError::Query("connection is closed".into()));
        }
        if sql.starts_with("FAIL") {
            return Err(DbError::Query(format!("syntax error at or near \"{}\"", sql)));
        }
        Ok(())
    }
}

struct MockConnection(Arc<MockSession>);

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, _args: &[Value]) -> Result<RowSet, DbError> {
        self.0.check(sql)?;
        let mut row = Row::new();
        row.insert("session".to_string(), Value::I64(self.0.id as i64));
        Ok(vec![row])
    }

    async fn execute(&self, sql: &str, _args: &[Value]) -> Result<u64, DbError> {
        self.0.check(sql)?;
        Ok(1)
    }

    fn subscribe(&self, callback: NotifyCallback) {
        self.0.observers.lock().push(callback);
    }

    async fn listen(&self, channel: &str) -> Result<(), DbError> {
        if channel.starts_with("bad") {
            return Err(DbError::Query(format!("cannot listen on {}", channel)));
        }
        self.0.listened.lock().push(channel.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.0.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.0.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.0.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
