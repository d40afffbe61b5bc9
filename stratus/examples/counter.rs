//! Counter example for Stratus.
//!
//! Connects to a memcache server on localhost, stores a counter, bumps it
//! a few times, and reads it back. Start a server first:
//!
//! ```text
//! memcached -p 11211
//! ```

use std::sync::Arc;

use stratus::{Client, PoolConfig, TcpConnector, TimeToLive};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Arc::new(Client::new(
        TcpConnector::host("127.0.0.1"),
        PoolConfig::default().min_connections(1),
    ));

    let runner = Arc::clone(&client);
    tokio::spawn(async move { runner.run().await });

    // Counters are decimal ASCII on the wire, so the server can do the
    // arithmetic.
    client.set("visits", &0u64).await?;

    for _ in 0..3 {
        client.increment("visits", 1).await?;
    }
    let visits = client.increment_fetch("visits", 1).await?;
    println!("visits = {visits}");

    // Dependent operations share one leased connection.
    client
        .with_connection(|conn| async move {
            conn.set("session", &String::from("active")).await?;
            conn.touch(
                "session",
                TimeToLive::expires_in(std::time::Duration::from_secs(60)),
            )
            .await
        })
        .await?;

    let session: Option<String> = client.get("session").await?;
    println!("session = {session:?}");

    client.delete("visits").await?;
    client.shutdown().await;

    Ok(())
}
