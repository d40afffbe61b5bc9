//! Client facade integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingMonitor, TestConnector};
use stratus_core::ClientError;
use stratus_transport::{Client, PoolConfig};

fn spawn_client(
    connector: TestConnector,
    config: PoolConfig,
    monitor: Arc<RecordingMonitor>,
) -> (Arc<Client<TestConnector>>, tokio::task::JoinHandle<()>) {
    let client = Arc::new(Client::with_monitor(connector, config, monitor));
    let runner = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.run().await })
    };
    (client, runner)
}

#[tokio::test]
async fn test_single_shot_helpers_lease_and_release() {
    let connector = TestConnector::new();
    let monitor = RecordingMonitor::new();
    let (client, runner) = spawn_client(connector.clone(), PoolConfig::new(), Arc::clone(&monitor));

    client.set("greeting", &b"hello".to_vec()).await.unwrap();
    let missing: Option<Vec<u8>> = client.get("greeting").await.unwrap();
    assert_eq!(missing, None); // the canned server always misses
    client.delete("greeting").await.unwrap();
    client.increment("ctr", 1).await.unwrap();
    client.noop().await.unwrap();

    // Every helper released its lease.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        monitor.count("connection_leased"),
        monitor.count("connection_released")
    );

    runner.abort();
}

#[tokio::test]
async fn test_with_connection_reuses_one_lease() {
    let connector = TestConnector::new();
    let monitor = RecordingMonitor::new();
    let config = PoolConfig::new().soft_limit(1).hard_limit(1);
    let (client, runner) = spawn_client(connector.clone(), config, Arc::clone(&monitor));

    client
        .with_connection(|conn| async move {
            conn.set("a", &b"1".to_vec()).await?;
            conn.set("b", &b"2".to_vec()).await?;
            conn.noop().await
        })
        .await
        .unwrap();

    // Dependent operations shared a single connection.
    assert_eq!(connector.established(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(monitor.count("connection_leased"), 1);
    assert_eq!(monitor.count("connection_released"), 1);

    runner.abort();
}

#[tokio::test]
async fn test_with_connection_releases_on_error() {
    let connector = TestConnector::new();
    let monitor = RecordingMonitor::new();
    let config = PoolConfig::new().soft_limit(1).hard_limit(1);
    let (client, runner) = spawn_client(connector.clone(), config, Arc::clone(&monitor));

    let err = client
        .with_connection(|conn| async move {
            let _held = conn;
            Err::<(), _>(ClientError::protocol("injected failure"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol { .. }));

    // The lease came back despite the error; with hard_limit = 1 this
    // would otherwise deadlock.
    client.noop().await.unwrap();

    runner.abort();
}

#[tokio::test]
async fn test_with_connection_releases_on_cancellation() {
    let connector = TestConnector::new();
    let monitor = RecordingMonitor::new();
    let config = PoolConfig::new().soft_limit(1).hard_limit(1);
    let (client, runner) = spawn_client(connector.clone(), config, Arc::clone(&monitor));

    let stuck = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .with_connection(|conn| async move {
                    let _held = conn;
                    std::future::pending::<Result<(), ClientError>>().await
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stuck.abort();
    let _ = stuck.await;

    // Cancellation returned the lease to the pool.
    client.noop().await.unwrap();

    runner.abort();
}
