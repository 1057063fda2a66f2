//! PostgreSQL backend over `tokio-postgres`, including LISTEN/NOTIFY.

pub mod connection;
pub mod driver;
pub mod value_codec;

pub use connection::PostgresConnection;
pub use driver::PostgresDriver;
