use thiserror::Error;

/// Errors produced by pools, drivers and the session facade.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("General error: {0}")]
    General(String),
    /// Establishing a new connection failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A query or operation failed on an otherwise healthy connection.
    #[error("Query error: {0}")]
    Query(String),
    #[error("Value error: {0}")]
    Value(String),
    /// The pool was closed before (or while) the request could be served.
    #[error("Pool closed")]
    PoolClosed,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabaseType(String),
}

impl DbError {
    /// True for failures to establish a connection.
    pub fn is_establishment(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }

    pub fn is_pool_closed(&self) -> bool {
        matches!(self, DbError::PoolClosed)
    }

    /// Normalizes any driver failure raised while connecting into
    /// [`DbError::Connection`].
    pub(crate) fn into_establishment(self) -> Self {
        match self {
            DbError::Connection(_) => self,
            other => DbError::Connection(other.to_string()),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for DbError {
    fn from(e: mysql_async::Error) -> Self {
        DbError::Query(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        DbError::Query(e.to_string())
    }
}
