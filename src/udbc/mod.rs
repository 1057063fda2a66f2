pub mod value;

pub mod connection;
pub mod driver;
#[cfg(test)]
pub(crate) mod mock;

use std::collections::HashMap;

pub use connection::{Connection, Notification, NotifyCallback};
pub use driver::Driver;
pub use value::Value;

/// One result row keyed by column name.
pub type Row = HashMap<String, Value>;

pub type RowSet = Vec<Row>;
