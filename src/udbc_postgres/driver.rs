use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_postgres::{AsyncMessage, Config, NoTls};
use tracing::{debug, warn};

use crate::error::DbError;
use crate::models::db_config::ConnectionParams;
use crate::models::db_type::DatabaseType;
use crate::udbc::connection::{Connection, Notification, NotifyCallback};
use crate::udbc::driver::Driver;
use crate::udbc_postgres::connection::PostgresConnection;

/// Opens one `tokio_postgres::Client` per establishment.
pub struct PostgresDriver {
    config: Config,
}

impl PostgresDriver {
    /// Builds the driver from connection parameters.
    ///
    /// A `url` key is parsed as a `postgres://` URL (or conninfo string) and
    /// must be the only key. Otherwise every pair is passed through as a
    /// libpq conninfo keyword.
    pub fn new(params: &ConnectionParams) -> Result<Self, DbError> {
        let source = match params.get("url") {
            Some(_) if params.len() > 1 => {
                return Err(DbError::Config(
                    "'url' cannot be combined with other postgres parameters".into(),
                ));
            }
            Some(url) => url.clone(),
            None => conninfo(params),
        };
        let config = source
            .parse::<Config>()
            .map_err(|e| DbError::Config(format!("invalid postgres parameters: {}", e)))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Renders `key='value'` pairs with quotes and backslashes escaped.
pub fn conninfo(params: &ConnectionParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}='{}'", k, v.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Driver for PostgresDriver {
    fn r#type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let (client, mut connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let observers: Arc<RwLock<Vec<NotifyCallback>>> = Arc::default();
        let sink = observers.clone();
        // Drives the socket; ends when the client is dropped.
        tokio::spawn(async move {
            while let Some(message) = futures::future::poll_fn(|cx| connection.poll_message(cx)).await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        let notification = Notification {
                            process_id: n.process_id() as u32,
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        };
                        let observers = sink.read().clone();
                        for observer in &observers {
                            observer(notification.clone());
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        debug!(severity = notice.severity(), message = notice.message(), "postgres notice");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "postgres connection error");
                        break;
                    }
                }
            }
            debug!("postgres connection task finished");
        });

        Ok(Box::new(PostgresConnection::new(client, observers)))
    }
}
