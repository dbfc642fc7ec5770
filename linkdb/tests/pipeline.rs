//! Provisioning pipeline failures and ordering.

use std::sync::Arc;
use std::time::Duration;

use linkdb::{
    CollectionsDef, ConnectionManager, DatabaseClient, IndexProvisioner, LinkError, LinkEvent, MemoryBackend,
    MemoryLogger, Stage, Topology,
};

fn manager(backend: &MemoryBackend) -> (ConnectionManager, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::new());
    let manager = ConnectionManager::builder(Arc::new(backend.clone()))
        .logger(logger.clone())
        .build();
    (manager, logger)
}

fn collections(names: &[&str]) -> CollectionsDef {
    names.iter().map(|name| (name.to_string(), Vec::new())).collect()
}

fn stage_of(err: &LinkError) -> Option<Stage> {
    match err {
        LinkError::Connection { stage, .. } => Some(*stage),
        _ => None,
    }
}

#[tokio::test]
async fn initialize_stops_at_the_first_failing_database() {
    let backend = MemoryBackend::new();
    backend.fail_connect("beta");
    let (manager, _) = manager(&backend);
    let topology = Topology::default()
        .with_database("alpha", [("a", Vec::new())])
        .with_database("beta", [("b", Vec::new())])
        .with_database("gamma", [("c", Vec::new())]);

    let err = manager.initialize(&topology).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(Stage::Connect));
    assert!(err.to_string().contains("'beta'"));
    assert_eq!(manager.database_names(), vec!["alpha"]);
    assert_eq!(backend.connect_count("gamma"), 0);
    assert!(manager.collection("a").is_some());
}

#[tokio::test]
async fn a_failed_link_leaves_no_trace() {
    let backend = MemoryBackend::new();
    backend.fail_enumerate("orders");
    let (manager, logger) = manager(&backend);

    let err = manager.add_database("orders", &collections(&["items"])).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(Stage::Enumerate));
    assert!(!manager.is_linked("orders"));
    assert!(manager.resolve("orders").is_none());
    assert!(manager.get_layout().is_empty());
    assert_eq!(logger.count("pipeline_failed"), 1);
    assert!(backend.created("orders").is_empty());
}

#[tokio::test]
async fn failed_links_can_be_retried() {
    let backend = MemoryBackend::new();
    backend.fail_connect("orders");
    let (manager, _) = manager(&backend);

    assert!(manager.link_database("orders", &CollectionsDef::new()).await.is_err());
    assert!(manager.link_database("orders", &CollectionsDef::new()).await.is_err());

    assert_eq!(backend.connect_count("orders"), 2);
    assert!(!manager.is_linking("orders"));
}

#[tokio::test]
async fn concurrent_waiters_see_the_same_failure() {
    let backend = MemoryBackend::new();
    backend.fail_connect("orders");
    backend.set_connect_delay(Duration::from_millis(50));
    let (manager, _) = manager(&backend);
    let desired = CollectionsDef::new();

    let (first, second) = tokio::join!(
        manager.link_database("orders", &desired),
        manager.link_database("orders", &desired)
    );

    assert_eq!(first.unwrap_err(), second.unwrap_err());
    assert_eq!(backend.connect_count("orders"), 1);
}

#[tokio::test]
async fn rejected_creations_fail_the_create_stage() {
    let backend = MemoryBackend::new();
    backend.reject_collection("payments");
    let (manager, _) = manager(&backend);

    let err = manager
        .link_database("orders", &collections(&["items", "payments"]))
        .await
        .unwrap_err();

    assert_eq!(stage_of(&err), Some(Stage::Create));
    assert!(!manager.is_linked("orders"));
}

#[tokio::test]
async fn missing_collections_are_created_concurrently() {
    let backend = MemoryBackend::new();
    backend.set_create_delay(Duration::from_millis(50));
    let (manager, _) = manager(&backend);

    manager
        .link_database("orders", &collections(&["items", "payments", "refunds"]))
        .await
        .unwrap();

    assert!(backend.peak_concurrent_creates() > 1);
    assert_eq!(backend.created("orders").len(), 3);
}

#[tokio::test]
async fn colliding_remote_names_are_rejected() {
    let backend = MemoryBackend::new().with_collections("orders", ["items", "orders.items"]);
    let (manager, _) = manager(&backend);

    let err = manager.link_database("orders", &CollectionsDef::new()).await.unwrap_err();

    assert_eq!(
        err,
        LinkError::DuplicateCollection {
            database: "orders".to_string(),
            collection: "items".to_string()
        }
    );
}

#[tokio::test]
async fn stages_are_logged_in_order() {
    let backend = MemoryBackend::new().with_collections("orders", ["items"]);
    let (manager, logger) = manager(&backend);

    manager
        .link_database("orders", &collections(&["items", "payments"]))
        .await
        .unwrap();

    let kinds: Vec<&str> = logger
        .events()
        .iter()
        .map(LinkEvent::kind)
        .filter(|kind| *kind != "alias_installed")
        .collect();
    assert_eq!(
        kinds,
        vec![
            "pipeline_started",
            "client_created",
            "existing_collections",
            "missing_collections",
            "creating_collection",
            "database_linked",
        ]
    );
}

#[tokio::test]
async fn a_client_connects_once_and_keeps_its_connection() {
    let backend = MemoryBackend::new().with_collections("orders", ["items"]);
    let logger = Arc::new(MemoryLogger::new());
    let provisioner = IndexProvisioner::new(logger.clone());
    let client = DatabaseClient::new("orders", Default::default(), logger).unwrap();
    assert!(!client.is_connected());

    client
        .initialize(&backend, &collections(&["items", "payments"]), &provisioner)
        .await
        .unwrap();

    assert!(client.is_connected());
    assert_eq!(client.admin().unwrap().database(), "orders");
    assert_eq!(backend.connect_count("orders"), 1);
    assert_eq!(client.collection_names(), vec!["items", "payments"]);
}

#[tokio::test]
async fn overrides_change_the_connect_target() {
    let backend = MemoryBackend::new();
    let (manager, logger) = manager(&backend);
    let topology = Topology::from_toml_str(
        r#"
        host = "10.0.0.1"
        port = 6400

        [databases.orders]
        items = []

        [databases.analytics]
        events = []

        [overrides.analytics]
        host = "10.0.0.9"
        "#,
    )
    .unwrap();

    manager.initialize(&topology).await.unwrap();

    let addresses: Vec<String> = logger
        .events()
        .into_iter()
        .filter_map(|event| match event {
            LinkEvent::ClientCreated { address, .. } => Some(address),
            _ => None,
        })
        .collect();
    assert_eq!(addresses, vec!["memory://10.0.0.9:6400", "memory://10.0.0.1:6400"]);
    assert_eq!(manager.database("analytics").unwrap().target().host, "10.0.0.9");
}

#[tokio::test]
async fn an_abandoned_link_releases_its_alias() {
    let backend = MemoryBackend::new();
    backend.set_connect_delay(Duration::from_millis(200));
    let (manager, logger) = manager(&backend);
    let desired = collections(&["items"]);

    let abandoned = tokio::time::timeout(Duration::from_millis(20), manager.link_database("orders", &desired)).await;
    assert!(abandoned.is_err());
    assert!(manager.resolve("orders").is_none());
    assert!(!manager.is_linking("orders"));

    manager.link_database("orders", &desired).await.unwrap();

    let linked = manager.database("orders").unwrap();
    let target = manager.resolve("orders").unwrap();
    let aliased = target.as_database().unwrap();
    assert!(Arc::ptr_eq(&linked, aliased));
    assert!(aliased.is_connected());
    assert_eq!(aliased.collection_names(), vec!["items"]);
    assert!(logger.conflicts().is_empty());
}
