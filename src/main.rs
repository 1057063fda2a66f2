use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};
use upool::models::{DatabaseType, PoolOptions};
use upool::pool_manager::{DB, pool_mgr};
use upool::udbc::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/postgres".into());
    let options = PoolOptions::new(DatabaseType::Postgres).elastic(1, 4).param("url", url);
    let manager = pool_mgr();
    manager.register("main", &options)?;

    let session = DB
        .session("main")
        .ok_or_else(|| anyhow::anyhow!("pool 'main' is not registered"))?;
    session.register_listener(
        |n| tracing::info!(channel = %n.channel, payload = %n.payload, pid = n.process_id, "notification"),
        ["upool_demo"],
    );

    let mut tasks = Vec::new();
    for i in 0..8i64 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            session
                .run_query("SELECT $1::int8 AS n, pg_backend_pid() AS pid", &[Value::I64(i)])
                .await
        }));
    }
    for task in tasks {
        let rows = task.await??;
        println!("{:?}", rows);
    }

    session
        .run_operation("SELECT pg_notify('upool_demo', 'hello')", &[])
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("{:?}", session.status());

    manager.close_all().await;
    Ok(())
}
