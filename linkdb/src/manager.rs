//! Top-level orchestrator.
//!
//! The manager links databases (`unlinked -> linking -> linked`), keeps one [`DatabaseClient`]
//! per linked name and exposes every managed collection and database through a flat
//! [`AliasNamespace`] next to the always-valid qualified path
//! (`manager.database("orders")?.collection("items")`).
//!
//! # Example
//! ```ignore
//! let manager = ConnectionManager::new(Arc::new(RedisBackend::default()));
//! manager.initialize(&Topology::load("topology.toml")?).await?;
//!
//! let items = manager.collection("items").expect("aliased");
//! println!("{:?}", manager.get_layout());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::backend::{Backend, Connection, ExplainResult};
use crate::client::{CollectionHandle, Cursor};
use crate::database::{DatabaseClient, is_reserved};
use crate::errors::{LinkError, Stage};
use crate::indexes::IndexProvisioner;
use crate::logging::{LinkEvent, Logger, TracingLogger};
use crate::namespace::{AliasNamespace, AliasTarget, Installed};
use crate::perf::{PerfAggregator, PerfConfig, PerfRecord};
use crate::topology::{CollectionsDef, ConnectTarget, TargetOverride, Topology};
use crate::{escape, id};

/// Runs at most one operation per key at a time; concurrent callers share its result.
struct SingleFlight<T> {
    slots: Mutex<HashMap<String, Arc<OnceCell<Result<T, LinkError>>>>>,
}

impl<T: Clone> SingleFlight<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn run<F, Fut>(&self, key: &str, work: F) -> Result<T, LinkError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LinkError>>,
    {
        let slot = self.slots.lock().entry(key.to_string()).or_default().clone();
        let release = SlotRelease {
            slots: &self.slots,
            key,
            slot,
        };
        release.slot.get_or_init(work).await.clone()
    }

    fn in_flight(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }
}

/// Forgets a slot once its last caller is done or dropped, so a failed or abandoned
/// operation can be retried.
struct SlotRelease<'a, T> {
    slots: &'a Mutex<HashMap<String, Arc<OnceCell<Result<T, LinkError>>>>>,
    key: &'a str,
    slot: Arc<OnceCell<Result<T, LinkError>>>,
}

impl<T> Drop for SlotRelease<'_, T> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // the map and this guard hold the only references: no other caller is waiting
        let last = slots
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot) && Arc::strong_count(&self.slot) == 2);
        if last {
            slots.remove(self.key);
        }
    }
}

/// Unbinds a database alias unless the link that installed it completes.
struct AliasRollback<'a> {
    namespace: &'a RwLock<AliasNamespace>,
    name: &'a str,
    client: Arc<DatabaseClient>,
    armed: bool,
}

impl AliasRollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AliasRollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.namespace.write().remove_database(self.name, &self.client);
        }
    }
}

pub struct ConnectionManagerBuilder {
    backend: Arc<dyn Backend>,
    logger: Arc<dyn Logger>,
    defaults: ConnectTarget,
    overrides: BTreeMap<String, TargetOverride>,
    reserved: Vec<String>,
    perf: PerfConfig,
}

impl ConnectionManagerBuilder {
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn target(mut self, defaults: ConnectTarget) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn override_target(mut self, database: impl Into<String>, overrides: TargetOverride) -> Self {
        self.overrides.insert(database.into(), overrides);
        self
    }

    /// Reserve an additional control name in the alias namespace.
    pub fn reserve(mut self, name: impl Into<String>) -> Self {
        self.reserved.push(name.into());
        self
    }

    pub fn perf(mut self, config: PerfConfig) -> Self {
        self.perf = config;
        self
    }

    pub fn build(self) -> ConnectionManager {
        ConnectionManager {
            backend: self.backend,
            defaults: RwLock::new(self.defaults),
            overrides: RwLock::new(self.overrides),
            databases: RwLock::new(BTreeMap::new()),
            namespace: RwLock::new(AliasNamespace::with_reserved(self.reserved)),
            linking: SingleFlight::new(),
            probing: SingleFlight::new(),
            provisioner: IndexProvisioner::new(self.logger.clone()),
            perf: PerfAggregator::new(self.perf, self.logger.clone()),
            logger: self.logger,
        }
    }
}

pub struct ConnectionManager {
    backend: Arc<dyn Backend>,
    logger: Arc<dyn Logger>,
    defaults: RwLock<ConnectTarget>,
    overrides: RwLock<BTreeMap<String, TargetOverride>>,
    databases: RwLock<BTreeMap<String, Arc<DatabaseClient>>>,
    namespace: RwLock<AliasNamespace>,
    linking: SingleFlight<()>,
    probing: SingleFlight<bool>,
    provisioner: IndexProvisioner,
    perf: PerfAggregator,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: Arc<dyn Backend>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            backend,
            logger: Arc::new(TracingLogger),
            defaults: ConnectTarget::default(),
            overrides: BTreeMap::new(),
            reserved: Vec::new(),
            perf: PerfConfig::default(),
        }
    }

    /// Adopt the topology's connection defaults and add every database it names, in name order.
    ///
    /// The first failure stops the loop: the failing database and every later one stay unlinked.
    pub async fn initialize(&self, topology: &Topology) -> Result<(), LinkError> {
        *self.defaults.write() = topology.default_target();
        self.overrides
            .write()
            .extend(topology.overrides.iter().map(|(name, o)| (name.clone(), o.clone())));
        self.logger.log(LinkEvent::ManagerInitializing {
            databases: topology.databases.keys().cloned().collect(),
        });

        for (name, collections) in &topology.databases {
            self.add_database(name, collections).await?;
        }
        Ok(())
    }

    /// Link `name`, then alias every collection it manages.
    pub async fn add_database(&self, name: &str, collections: &CollectionsDef) -> Result<(), LinkError> {
        self.link_database(name, collections).await?;

        let Some(client) = self.database(name) else {
            return Ok(());
        };
        for (collection, handle) in client.collections() {
            self.install_alias(&collection, AliasTarget::Collection(handle));
        }
        Ok(())
    }

    /// Link `name`, creating it and its missing collections if necessary. Idempotent.
    pub async fn link_database(&self, name: &str, collections: &CollectionsDef) -> Result<(), LinkError> {
        if self.is_linked(name) {
            self.logger.log(LinkEvent::AlreadyLinked {
                database: name.to_string(),
            });
            return Ok(());
        }
        self.linking.run(name, move || self.link_new(name, collections)).await
    }

    async fn link_new(&self, name: &str, collections: &CollectionsDef) -> Result<(), LinkError> {
        if self.is_linked(name) {
            return Ok(());
        }
        if is_reserved(name) {
            self.logger.log(LinkEvent::ReservedNameSkipped { name: name.to_string() });
            return Ok(());
        }

        let client = Arc::new(DatabaseClient::new(name, self.target_for(name), self.logger.clone())?);
        let aliased = self.install_alias(name, AliasTarget::Database(client.clone()));
        let rollback = AliasRollback {
            namespace: &self.namespace,
            name,
            client: client.clone(),
            armed: aliased,
        };

        match client
            .initialize(self.backend.as_ref(), collections, &self.provisioner)
            .await
        {
            Ok(()) => {
                rollback.disarm();
                let count = client.collection_names().len();
                self.databases.write().insert(name.to_string(), client);
                self.logger.log(LinkEvent::DatabaseLinked {
                    database: name.to_string(),
                    collections: count,
                });
                Ok(())
            }
            Err(error) => {
                drop(rollback);
                self.logger.log(LinkEvent::PipelineFailed {
                    database: name.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Link `name` only if the server already has it (case-insensitive match).
    ///
    /// Returns whether the database is linked afterwards. Needs at least one linked database
    /// to reach the admin interface.
    pub async fn link_database_if_exists(&self, name: &str) -> Result<bool, LinkError> {
        if self.is_linked(name) {
            self.logger.log(LinkEvent::AlreadyLinked {
                database: name.to_string(),
            });
            return Ok(true);
        }

        self.probing
            .run(name, move || async move {
                let admin = self.admin_connection().ok_or_else(|| LinkError::NoAdminAvailable {
                    database: name.to_string(),
                })?;
                let present = admin
                    .list_databases()
                    .await
                    .map_err(|err| LinkError::backend(name, Stage::ListDatabases, err))?;

                if !present.iter().any(|database| database.eq_ignore_ascii_case(name)) {
                    self.logger.log(LinkEvent::DatabaseAbsent {
                        database: name.to_string(),
                    });
                    return Ok(false);
                }

                self.link_database(name, &CollectionsDef::new()).await?;
                Ok(self.is_linked(name))
            })
            .await
    }

    /// Whether an existence check for `name` is currently running.
    pub fn is_probing(&self, name: &str) -> bool {
        self.probing.in_flight(name)
    }

    /// Whether a link of `name` is currently running.
    pub fn is_linking(&self, name: &str) -> bool {
        self.linking.in_flight(name)
    }

    fn install_alias(&self, name: &str, target: AliasTarget) -> bool {
        let path = target.kind().qualified_path();
        let outcome = self.namespace.write().install(name, target);
        match outcome {
            Ok(Installed::New) => {
                self.logger.log(LinkEvent::AliasInstalled {
                    name: name.to_string(),
                    path,
                });
                true
            }
            Ok(Installed::Unchanged) => true,
            Ok(Installed::Skipped) => {
                self.logger.log(LinkEvent::ReservedNameSkipped { name: name.to_string() });
                false
            }
            Err(conflict) => {
                self.logger.log(LinkEvent::AliasConflict(conflict));
                false
            }
        }
    }

    fn target_for(&self, name: &str) -> ConnectTarget {
        let defaults = self.defaults.read().clone();
        match self.overrides.read().get(name) {
            Some(overrides) => defaults.apply(overrides),
            None => defaults,
        }
    }

    fn admin_connection(&self) -> Option<Arc<dyn Connection>> {
        self.databases.read().values().find_map(|client| client.admin())
    }

    // ---- reflection ----

    pub fn is_linked(&self, name: &str) -> bool {
        self.databases.read().contains_key(name)
    }

    /// Qualified access to a linked database.
    pub fn database(&self, name: &str) -> Option<Arc<DatabaseClient>> {
        self.databases.read().get(name).cloned()
    }

    pub fn databases(&self) -> BTreeMap<String, Arc<DatabaseClient>> {
        self.databases.read().clone()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Managed collection names of `database`, or of every linked database when `None`.
    pub fn get_collection_names(&self, database: Option<&str>) -> Vec<String> {
        let databases = self.databases.read();
        match database {
            Some(name) => databases
                .get(name)
                .map(|client| client.collection_names())
                .unwrap_or_default(),
            None => databases.values().flat_map(|client| client.collection_names()).collect(),
        }
    }

    /// Every linked database with the names of its managed collections.
    pub fn get_layout(&self) -> BTreeMap<String, Vec<String>> {
        self.databases
            .read()
            .iter()
            .map(|(name, client)| (name.clone(), client.collection_names()))
            .collect()
    }

    /// Look `name` up in the alias namespace.
    pub fn resolve(&self, name: &str) -> Option<AliasTarget> {
        self.namespace.read().get(name).cloned()
    }

    /// Collection bound to the alias `name`, if any.
    pub fn collection(&self, name: &str) -> Option<CollectionHandle> {
        self.resolve(name).and_then(|target| target.as_collection().cloned())
    }

    pub fn aliases(&self) -> Vec<String> {
        self.namespace.read().aliases()
    }

    // ---- helpers ----

    pub fn uid(&self) -> String {
        id::uid()
    }

    pub fn escape_dot(&self, raw: &str) -> String {
        escape::escape_dot(raw)
    }

    pub fn unescape_dot(&self, value: &Value) -> Value {
        escape::unescape_dot(value)
    }

    // ---- indexes and performance ----

    pub fn provisioner(&self) -> &IndexProvisioner {
        &self.provisioner
    }

    /// Wait for every background index build issued so far.
    pub async fn settle_indexes(&self) {
        self.provisioner.settle().await;
    }

    pub fn perf(&self) -> &PerfAggregator {
        &self.perf
    }

    /// Explain `cursor`, log its latency and fold it into the perf accumulators.
    pub async fn perf_log(&self, cursor: &Cursor) -> Option<ExplainResult> {
        let collection = cursor.collection().name();
        match cursor.explain().await {
            Ok(explain) => {
                self.perf.record(collection, cursor.selector(), &explain);
                Some(explain)
            }
            Err(err) => {
                self.logger.log(LinkEvent::ExplainFailed {
                    collection: collection.to_string(),
                    error: err.to_string(),
                });
                None
            }
        }
    }

    pub fn dump_perf(&self) -> Option<Vec<PerfRecord>> {
        self.perf.flush()
    }

    /// Flushed perf records of the last `hours` hours (24 by default) for `collection`, or for
    /// the aggregate when `collection` is `None`.
    pub fn perf_history(&self, hours: Option<i64>, collection: Option<&str>) -> Vec<PerfRecord> {
        self.perf.recent(hours, collection)
    }

    /// Flush the perf accumulators every `every` until the manager is dropped.
    pub fn start_perf_flush(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.dump_perf();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn single_flight_shares_one_result() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let counter = std::sync::atomic::AtomicU32::new(0);
        let calls = &counter;
        let work = move || async move {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(7)
        };

        let (a, b) = tokio::join!(flight.run("k", work), flight.run("k", work));
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!flight.in_flight("k"));
    }

    #[tokio::test]
    async fn single_flight_forgets_failures() {
        let flight: SingleFlight<()> = SingleFlight::new();
        let failed = flight
            .run("k", || async { Err(LinkError::NoAdminAvailable { database: "k".into() }) })
            .await;
        assert!(failed.is_err());
        assert!(flight.run("k", || async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn single_flight_forgets_abandoned_work() {
        let flight: SingleFlight<()> = SingleFlight::new();
        let slow = flight.run("k", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());

        assert!(!flight.in_flight("k"));
        assert!(flight.run("k", || async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn overrides_apply_per_database() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::builder(Arc::new(backend))
            .override_target(
                "analytics",
                TargetOverride {
                    port: Some(7001),
                    ..TargetOverride::default()
                },
            )
            .build();

        assert_eq!(manager.target_for("analytics").port, 7001);
        assert_eq!(manager.target_for("orders").port, crate::topology::DEFAULT_PORT);
    }
}
