//! Provisioning against a real Redis server with the RediSearch and RedisJSON modules.
//!
//! Run with `cargo test -- --ignored` and `REDIS_URL` pointing at a Redis Stack instance. Each test
//! works under its own random prefix and removes its keys afterwards.

use std::sync::Arc;

use linkdb::redis::{self, AsyncCommands, aio::ConnectionManager as RedisConnection};
use linkdb::{
    ConnectTarget, ConnectionManager, IndexKind, IndexSpec, MemoryLogger, RedisBackend, Topology, TracingLogger,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn target() -> ConnectTarget {
    let url = redis::parse_redis_url(&redis_url()).expect("REDIS_URL must be a redis:// URL");
    ConnectTarget {
        host: url.host_str().unwrap_or("127.0.0.1").to_string(),
        port: url.port().unwrap_or(6379),
        ..ConnectTarget::default()
    }
}

async fn raw_connection() -> RedisConnection {
    let client = redis::Client::open(redis_url()).expect("valid redis url");
    RedisConnection::new(client).await.expect("redis is reachable")
}

async fn cleanup(prefix: &str) {
    let mut conn = raw_connection().await;
    let keys: Vec<String> = conn.keys(format!("{prefix}:*")).await.unwrap_or_default();
    if !keys.is_empty() {
        let _: () = conn.del(keys).await.unwrap_or(());
    }
    let indexes: Vec<String> = redis::cmd("FT._LIST").query_async(&mut conn).await.unwrap_or_default();
    for index in indexes.into_iter().filter(|name| name.starts_with(prefix)) {
        let _: redis::RedisResult<()> = redis::cmd("FT.DROPINDEX").arg(index).query_async(&mut conn).await;
    }
}

fn manager(prefix: &str) -> (ConnectionManager, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::forwarding_to(Arc::new(TracingLogger)));
    let manager = ConnectionManager::builder(Arc::new(RedisBackend::new(prefix)))
        .logger(logger.clone())
        .target(target())
        .build();
    (manager, logger)
}

fn topology() -> Topology {
    let target = target();
    let mut topology = Topology::default().with_database(
        "orders",
        [
            (
                "items",
                vec![
                    IndexSpec::ascending("sku"),
                    IndexSpec::descending("created").with_kind(IndexKind::Numeric),
                ],
            ),
            ("payments", Vec::new()),
        ],
    );
    topology.host = target.host;
    topology.port = target.port;
    topology
}

#[tokio::test]
#[ignore = "requires a Redis Stack server"]
async fn provisions_collections_and_indexes() {
    let prefix = format!("linkdb_test_{}", uuid::Uuid::new_v4());
    let (manager, logger) = manager(&prefix);

    manager.initialize(&topology()).await.expect("linking succeeds");
    manager.settle_indexes().await;

    assert_eq!(manager.get_layout()["orders"], vec!["items", "payments"]);
    assert_eq!(logger.count("index_ensured"), 2);
    assert_eq!(logger.count("index_failed"), 0);

    let mut conn = raw_connection().await;
    let collections: Vec<String> = conn.smembers(format!("{prefix}:orders:collections")).await.unwrap();
    assert_eq!(collections.len(), 2);

    cleanup(&prefix).await;
}

#[tokio::test]
#[ignore = "requires a Redis Stack server"]
async fn second_run_creates_nothing() {
    let prefix = format!("linkdb_test_{}", uuid::Uuid::new_v4());

    let (first, _) = manager(&prefix);
    first.initialize(&topology()).await.unwrap();
    first.settle_indexes().await;

    let (second, logger) = manager(&prefix);
    second.initialize(&topology()).await.unwrap();
    second.settle_indexes().await;

    assert_eq!(logger.count("creating_collection"), 0);
    assert_eq!(logger.count("index_ensured"), 2);

    cleanup(&prefix).await;
}

#[tokio::test]
#[ignore = "requires a Redis Stack server"]
async fn probes_and_explains() {
    let prefix = format!("linkdb_test_{}", uuid::Uuid::new_v4());
    let (manager, _) = manager(&prefix);
    manager.initialize(&topology()).await.unwrap();

    assert!(!manager.link_database_if_exists("reporting").await.unwrap());
    assert!(manager.link_database_if_exists("orders").await.unwrap());

    let mut conn = raw_connection().await;
    for id in ["sku-1", "sku-2", "other-1"] {
        let _: () = redis::cmd("JSON.SET")
            .arg(format!("{prefix}:orders:items:{id}"))
            .arg("$")
            .arg(r#"{"sku":"x","created":1}"#)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    let items = manager.collection("items").unwrap();
    let explain = manager.perf_log(&items.find("sku-*")).await.unwrap();
    assert_eq!(explain.n, 2);
    assert_eq!(explain.nscanned, 3);

    cleanup(&prefix).await;
}
