use crate::error::DbError;
use crate::udbc::value::Value;
use crate::udbc::RowSet;
use async_trait::async_trait;
use std::sync::Arc;

/// Asynchronous notification delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Backend process that raised the notification.
    pub process_id: u32,
    pub channel: String,
    pub payload: String,
}

/// Observer invoked once per inbound notification.
pub type NotifyCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// One live database session.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<RowSet, DbError>;

    /// Runs a statement that yields no rows, returning the affected row count.
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError>;

    /// Registers `callback` for every notification this session receives.
    fn subscribe(&self, callback: NotifyCallback);

    /// Starts listening on `channel`.
    async fn listen(&self, channel: &str) -> Result<(), DbError> {
        self.execute(&listen_statement(channel), &[]).await?;
        Ok(())
    }

    /// Releases the session. Calling it again is a no-op.
    async fn close(&self) -> Result<(), DbError>;
}

/// `LISTEN` with the channel quoted as an identifier.
pub fn listen_statement(channel: &str) -> String {
    format!("LISTEN \"{}\"", channel.replace('"', "\"\""))
}
