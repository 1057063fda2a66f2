//! MySQL backend over `mysql_async`.
//!
//! MySQL has no asynchronous notifications: [`Connection::listen`] fails with
//! [`DbError::Unsupported`](crate::error::DbError::Unsupported) and
//! subscriptions never fire.
//!
//! [`Connection::listen`]: crate::udbc::connection::Connection::listen

pub mod connection;
pub mod driver;
pub mod value_codec;

pub use connection::MysqlConnection;
pub use driver::MysqlDriver;
