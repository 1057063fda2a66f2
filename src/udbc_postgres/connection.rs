use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tokio_postgres::types::ToSql;

use crate::error::DbError;
use crate::udbc::connection::{Connection, NotifyCallback, listen_statement};
use crate::udbc::value::Value;
use crate::udbc::RowSet;
use crate::udbc_postgres::value_codec::{PgParam, map_row};

pub struct PostgresConnection {
    /// `None` once closed.
    client: Mutex<Option<Client>>,
    observers: Arc<RwLock<Vec<NotifyCallback>>>,
}

impl PostgresConnection {
    pub(crate) fn new(client: Client, observers: Arc<RwLock<Vec<NotifyCallback>>>) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            observers,
        }
    }
}

fn closed() -> DbError {
    DbError::Query("connection is closed".into())
}

/// Converts `args` to the parameter types the server inferred for `stmt`.
fn bind(stmt: &tokio_postgres::Statement, args: &[Value]) -> Result<Vec<PgParam>, DbError> {
    let types = stmt.params();
    if types.len() != args.len() {
        return Err(DbError::Query(format!(
            "statement expects {} parameters, {} given",
            types.len(),
            args.len()
        )));
    }
    args.iter()
        .zip(types)
        .map(|(value, ty)| PgParam::for_type(value, ty))
        .collect()
}

fn as_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<RowSet, DbError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        let stmt = client.prepare(sql).await?;
        let params = bind(&stmt, args)?;
        let rows = client.query(&stmt, &as_refs(&params)).await?;
        rows.iter().map(map_row).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        let stmt = client.prepare(sql).await?;
        let params = bind(&stmt, args)?;
        Ok(client.execute(&stmt, &as_refs(&params)).await?)
    }

    fn subscribe(&self, callback: NotifyCallback) {
        self.observers.write().push(callback);
    }

    async fn listen(&self, channel: &str) -> Result<(), DbError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        client.batch_execute(&listen_statement(channel)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        // Dropping the client terminates the session and its dispatch task.
        drop(self.client.lock().await.take());
        self.observers.write().clear();
        Ok(())
    }
}
