use async_trait::async_trait;
use mysql_async::{Conn, Opts, OptsBuilder};

use crate::error::DbError;
use crate::models::db_config::ConnectionParams;
use crate::models::db_type::DatabaseType;
use crate::udbc::connection::Connection;
use crate::udbc::driver::Driver;
use crate::udbc_mysql::connection::MysqlConnection;

/// Opens one `mysql_async::Conn` per establishment.
pub struct MysqlDriver {
    opts: Opts,
}

impl MysqlDriver {
    /// Builds the driver from connection parameters.
    ///
    /// A `url` key is parsed as a `mysql://` URL and must be the only key.
    /// Otherwise `host`, `port`, `user`, `password` and `dbname` (or
    /// `database`) are recognised; any other key is rejected.
    pub fn new(params: &ConnectionParams) -> Result<Self, DbError> {
        if let Some(url) = params.get("url") {
            if params.len() > 1 {
                return Err(DbError::Config("'url' cannot be combined with other mysql parameters".into()));
            }
            let opts = Opts::from_url(url).map_err(|e| DbError::Config(e.to_string()))?;
            return Ok(Self { opts });
        }

        let mut builder = OptsBuilder::default();
        for (key, value) in params {
            builder = match key.as_str() {
                "host" => builder.ip_or_hostname(value.as_str()),
                "port" => {
                    let port = value
                        .parse::<u16>()
                        .map_err(|_| DbError::Config(format!("invalid mysql port '{}'", value)))?;
                    builder.tcp_port(port)
                }
                "user" => builder.user(Some(value.as_str())),
                "password" => builder.pass(Some(value.as_str())),
                "dbname" | "database" => builder.db_name(Some(value.as_str())),
                other => return Err(DbError::Config(format!("unknown mysql parameter '{}'", other))),
            };
        }
        Ok(Self { opts: builder.into() })
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn r#type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let conn = Conn::new(self.opts.clone())
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Box::new(MysqlConnection::new(conn)))
    }
}
