pub mod error;
pub mod executor;
pub mod models;
pub mod pool;
pub mod pool_manager;
pub mod udbc;
#[cfg(feature = "mysql")]
pub mod udbc_mysql;
#[cfg(feature = "postgres")]
pub mod udbc_postgres;

pub use error::DbError;
pub use executor::Session;
pub use models::{DatabaseType, PoolKind, PoolOptions};
pub use pool::{ConnectionHandle, Pool, PoolStatus};
pub use pool_manager::{DB, PoolManager, pool_mgr};
