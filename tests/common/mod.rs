#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use upool::DbError;
use upool::models::DatabaseType;
use upool::udbc::{Connection, Driver, NotifyCallback, Row, RowSet, Value};

/// Driver whose connections echo their id and count how many are open.
#[derive(Clone, Default)]
pub struct EchoDriver {
    stats: Arc<Stats>,
    latency: Duration,
}

#[derive(Default)]
pub struct Stats {
    pub created: AtomicUsize,
    pub open: AtomicUsize,
    pub peak: AtomicUsize,
}

impl EchoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every query sleeps for `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for EchoDriver {
    fn r#type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let id = self.stats.created.fetch_add(1, Ordering::SeqCst) + 1;
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(EchoConnection {
            id,
            latency: self.latency,
            stats: self.stats.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct EchoConnection {
    id: usize,
    latency: Duration,
    stats: Arc<Stats>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for EchoConnection {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<RowSet, DbError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if sql.starts_with("FAIL") {
            return Err(DbError::Query(sql.to_string()));
        }
        let mut row = Row::new();
        row.insert("conn".to_string(), Value::I64(self.id as i64));
        if let Some(arg) = args.first() {
            row.insert("arg".to_string(), arg.clone());
        }
        Ok(vec![row])
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        self.query(sql, args).await.map(|rows| rows.len() as u64)
    }

    fn subscribe(&self, _callback: NotifyCallback) {}

    async fn close(&self) -> Result<(), DbError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Gives spawned pool tasks time to finish.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
