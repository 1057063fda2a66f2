pub mod db_config;
pub mod db_type;

pub use db_config::{ConnectionParams, PoolKind, PoolOptions};
pub use db_type::DatabaseType;
