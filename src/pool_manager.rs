use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::error::DbError;
use crate::executor::session::Session;
use crate::models::db_config::{PoolKind, PoolOptions};
use crate::models::db_type::DatabaseType;
use crate::pool;
use crate::udbc::driver::Driver;

// 全局单例
pub static DB: LazyLock<PoolManager> = LazyLock::new(PoolManager::new);

/// 获取全局 PoolManager 实例
pub fn pool_mgr() -> &'static PoolManager {
    &DB
}

/// Named pools, each wrapped in the [`Session`] that owns its listeners.
pub struct PoolManager {
    sessions: DashMap<String, Session>,
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Builds the backend driver for `options.db_type` and a pool with the
    /// configured policy. No connection is opened until the first fetch.
    ///
    /// # Errors
    ///
    /// [`DbError::Config`] for invalid bounds or parameters,
    /// [`DbError::UnsupportedDatabaseType`] when the backend feature is not
    /// compiled in, [`DbError::General`] when `name` is taken.
    pub fn register(&self, name: &str, options: &PoolOptions) -> Result<(), DbError> {
        options.validate()?;
        let driver: Arc<dyn Driver> = match options.db_type {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => Arc::new(crate::udbc_postgres::PostgresDriver::new(&options.params)?),
            #[cfg(feature = "mysql")]
            DatabaseType::MySql => Arc::new(crate::udbc_mysql::MysqlDriver::new(&options.params)?),
            #[allow(unreachable_patterns)]
            other => return Err(DbError::UnsupportedDatabaseType(other.to_string())),
        };
        self.register_driver(name, &options.kind, driver)
    }

    /// Registers a pool over a caller-supplied driver.
    pub fn register_driver(&self, name: &str, kind: &PoolKind, driver: Arc<dyn Driver>) -> Result<(), DbError> {
        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(DbError::General(format!("pool '{}' is already registered", name))),
            Entry::Vacant(slot) => {
                let pool = pool::build(*kind, driver)?;
                info!(name, policy = %kind, "pool registered");
                slot.insert(Session::new(pool));
                Ok(())
            }
        }
    }

    /// 获取用于执行原生 SQL 查询的客户端
    pub fn session(&self, name: &str) -> Option<Session> {
        self.sessions.get(name).map(|v| v.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Unregisters `name` and closes its pool. Returns false when unknown.
    pub async fn close(&self, name: &str) -> bool {
        match self.sessions.remove(name) {
            Some((_, session)) => {
                session.close_all().await;
                info!(name, "pool closed");
                true
            }
            None => false,
        }
    }

    /// Closes and unregisters every pool.
    pub async fn close_all(&self) {
        for name in self.names() {
            self.close(&name).await;
        }
    }
}
