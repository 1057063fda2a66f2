use crate::error::DbError;
use crate::models::db_type::DatabaseType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connection parameters forwarded verbatim to the driver.
pub type ConnectionParams = BTreeMap<String, String>;

/// Admission policy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PoolKind {
    /// One slot; every lease gets a fresh connection, closed on putback.
    Fixed,
    /// One connection for the pool's lifetime, shared in turn.
    Persistent,
    /// Between `min` and `max` connections, opened on demand.
    Elastic { min: usize, max: usize },
}

impl PoolKind {
    pub fn validate(&self) -> Result<(), DbError> {
        if let PoolKind::Elastic { min, max } = *self {
            if max == 0 {
                return Err(DbError::Config("elastic pool max must be at least 1".into()));
            }
            if min > max {
                return Err(DbError::Config(format!(
                    "elastic pool min ({}) exceeds max ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::Fixed => f.write_str("fixed"),
            PoolKind::Persistent => f.write_str("persistent"),
            PoolKind::Elastic { min, max } => write!(f, "elastic({}..={})", min, max),
        }
    }
}

/// Pool definition: backend, admission policy and connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub db_type: DatabaseType,
    #[serde(flatten)]
    pub kind: PoolKind,
    #[serde(default)]
    pub params: ConnectionParams,
}

impl PoolOptions {
    /// Elastic `1..=10` pool with no parameters.
    pub fn new(db_type: DatabaseType) -> Self {
        PoolOptions {
            db_type,
            kind: PoolKind::Elastic { min: 1, max: 10 },
            params: ConnectionParams::new(),
        }
    }

    pub fn fixed(mut self) -> Self {
        self.kind = PoolKind::Fixed;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.kind = PoolKind::Persistent;
        self
    }

    pub fn elastic(mut self, min: usize, max: usize) -> Self {
        self.kind = PoolKind::Elastic { min, max };
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: ConnectionParams) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<(), DbError> {
        self.kind.validate()
    }
}
