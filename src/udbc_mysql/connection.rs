use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Params, Row as MyRow};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::DbError;
use crate::udbc::connection::{Connection, NotifyCallback};
use crate::udbc::value::Value;
use crate::udbc::{Row, RowSet};
use crate::udbc_mysql::value_codec::{from_mysql_value, to_mysql_value};

pub struct MysqlConnection {
    /// `None` once closed.
    conn: Mutex<Option<Conn>>,
}

impl MysqlConnection {
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    fn map_row(row: MyRow) -> Result<Row, DbError> {
        let cols = row.columns_ref();
        let mut out = Row::with_capacity(row.len());
        for i in 0..row.len() {
            let name = cols
                .get(i)
                .map(|c| c.name_str().to_string())
                .unwrap_or_else(|| i.to_string());
            let value = match row.as_ref(i) {
                Some(v) => from_mysql_value(v)?,
                None => Value::Null,
            };
            out.insert(name, value);
        }
        Ok(out)
    }

    fn params(args: &[Value]) -> Params {
        if args.is_empty() {
            Params::Empty
        } else {
            Params::Positional(args.iter().map(to_mysql_value).collect())
        }
    }
}

fn closed() -> DbError {
    DbError::Query("connection is closed".into())
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<RowSet, DbError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        let rows: Vec<MyRow> = conn.exec(sql, Self::params(args)).await?;
        rows.into_iter().map(Self::map_row).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        conn.exec_drop(sql, Self::params(args)).await?;
        Ok(conn.affected_rows())
    }

    fn subscribe(&self, _callback: NotifyCallback) {
        warn!("mysql connections do not deliver notifications");
    }

    async fn listen(&self, channel: &str) -> Result<(), DbError> {
        Err(DbError::Unsupported(format!("LISTEN {} on mysql", channel)))
    }

    async fn close(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect().await?;
        }
        Ok(())
    }
}
