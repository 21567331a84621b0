//! Basic usage example for the trino-rs driver.
//!
//! Expects a coordinator with the `tpch` connector, e.g.
//! `docker run -p 8080:8080 trinodb/trino`.

use std::error::Error;
use std::time::Duration;
use trino_rs::{Connection, ConnectionConfig, TrinoError};

const HOST: &str = "localhost";
const PORT: u16 = 8080;
const USER: &str = "demo";

/// Opens a connection to the coordinator.
async fn example_connection() -> Result<Connection, Box<dyn Error>> {
    let config = ConnectionConfig::builder()
        .host(HOST)
        .port(PORT)
        .user(USER)
        .source("trino-rs-demo")
        .catalog("tpch")
        .schema("tiny")
        .statement_timeout(Duration::from_secs(60))
        .verify_on_open(true)
        .build()?;
    let mut connection = Connection::new(config);
    connection.open().await?;
    Ok(connection)
}

/// Executes a simple arithmetic query and returns its single value.
async fn example_simple_select(conn: &Connection) -> Result<Option<i64>, Box<dyn Error>> {
    let mut execution = conn.execute("SELECT 1 + 1")?;
    let value = if execution.advance().await? {
        execution.current()?.get_i64(0)
    } else {
        None
    };
    Ok(value)
}

/// Walks a multi-batch result row by row.
async fn example_cursor(conn: &Connection) -> Result<usize, Box<dyn Error>> {
    let mut execution = conn.execute("SELECT nationkey, name FROM nation ORDER BY nationkey")?;
    let mut count = 0;
    while execution.advance().await? {
        let row = execution.current()?;
        if count < 3 {
            println!("  {}", row);
        }
        count += 1;
    }
    if let Some(id) = execution.query_id() {
        println!("  query id: {}", id);
    }
    Ok(count)
}

/// Collects a result into an Arrow record batch.
async fn example_arrow(conn: &Connection) -> Result<usize, Box<dyn Error>> {
    let mut execution = conn.execute("SELECT regionkey, count(*) AS nations FROM nation GROUP BY regionkey")?;
    let batch = execution.fetch_record_batch().await?;
    println!("  schema: {:?}", batch.schema().fields());
    Ok(batch.num_rows())
}

/// Cancels a long-running statement.
async fn example_cancel(conn: &Connection) -> Result<(), Box<dyn Error>> {
    let mut execution = conn.execute("SELECT count(*) FROM tpch.sf1000.lineitem")?;
    let handle = execution.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
    });

    match execution.advance().await {
        Err(TrinoError::Cancelled(reason)) => println!("  cancelled: {}", reason),
        Err(e) => return Err(e.into()),
        Ok(_) => println!("  finished before the cancel"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut conn = example_connection().await?;
    if let Some(info) = conn.server_info() {
        println!("Connected to Trino {}", info.node_version.version);
    }

    println!("SELECT 1 + 1 = {:?}", example_simple_select(&conn).await?);

    println!("Nations:");
    let rows = example_cursor(&conn).await?;
    println!("  {} rows", rows);

    println!("Arrow:");
    let rows = example_arrow(&conn).await?;
    println!("  {} rows", rows);

    println!("Cancel:");
    example_cancel(&conn).await?;

    conn.close().await;
    Ok(())
}
