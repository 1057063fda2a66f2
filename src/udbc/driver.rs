use crate::error::DbError;
use crate::models::db_type::DatabaseType;
use crate::udbc::connection::Connection;
use async_trait::async_trait;

/// Establishes sessions with the parameters it was built from.
///
/// Pools receive a driver at construction and call [`Driver::connect`] each
/// time they need a new connection, which makes the establishment step
/// replaceable by a test double.
#[async_trait]
pub trait Driver: Send + Sync {
    fn r#type(&self) -> DatabaseType;

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}
