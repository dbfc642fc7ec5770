//! In-process backend.
//!
//! Holds databases and collections in memory and records every remote call, which makes it the
//! backend of choice for tests and dry runs. Failures and latency can be injected per database
//! or per collection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backend, Connection, ExplainResult};
use crate::errors::BackendError;
use crate::topology::{ConnectTarget, IndexSpec};

#[derive(Default)]
struct MemoryState {
    /// database -> raw collection names as the server reports them
    databases: BTreeMap<String, BTreeSet<String>>,
    indexes: BTreeMap<(String, String), Vec<IndexSpec>>,
    connects: HashMap<String, usize>,
    created: Vec<(String, String)>,
    index_requests: Vec<(String, String, IndexSpec)>,
    explain_results: HashMap<String, ExplainResult>,
    list_database_calls: usize,

    unreachable: HashSet<String>,
    failing_enumerations: HashSet<String>,
    rejected_collections: HashSet<String>,
    failing_indexes: HashSet<String>,
    failing_admin: bool,
    connect_delay: Option<Duration>,
    create_delay: Option<Duration>,
    index_delay: Option<Duration>,
}

/// Cloneable handle onto a shared in-memory server.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    creates_in_flight: Arc<AtomicUsize>,
    peak_creates: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `database` with pre-existing collections.
    pub fn with_collections<I, S>(self, database: &str, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            let entry = state.databases.entry(database.to_string()).or_default();
            entry.extend(collections.into_iter().map(Into::into));
        }
        self
    }

    /// Seed an empty database that shows up in the admin listing.
    pub fn with_database(self, database: &str) -> Self {
        self.state.lock().databases.entry(database.to_string()).or_default();
        self
    }

    pub fn fail_connect(&self, database: &str) {
        self.state.lock().unreachable.insert(database.to_string());
    }

    pub fn fail_enumerate(&self, database: &str) {
        self.state.lock().failing_enumerations.insert(database.to_string());
    }

    pub fn reject_collection(&self, collection: &str) {
        self.state.lock().rejected_collections.insert(collection.to_string());
    }

    pub fn fail_index(&self, collection: &str) {
        self.state.lock().failing_indexes.insert(collection.to_string());
    }

    pub fn fail_list_databases(&self) {
        self.state.lock().failing_admin = true;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = Some(delay);
    }

    pub fn set_index_delay(&self, delay: Duration) {
        self.state.lock().index_delay = Some(delay);
    }

    pub fn set_explain_result(&self, collection: &str, result: ExplainResult) {
        self.state.lock().explain_results.insert(collection.to_string(), result);
    }

    pub fn connect_count(&self, database: &str) -> usize {
        self.state.lock().connects.get(database).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    /// Collections created through `create_collection`, in completion order.
    pub fn created(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .created
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, collection)| collection.clone())
            .collect()
    }

    pub fn collections(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.state.lock().databases.contains_key(database)
    }

    /// Every index-ensure call issued for `collection`, successful or not.
    pub fn index_requests(&self, database: &str, collection: &str) -> Vec<IndexSpec> {
        self.state
            .lock()
            .index_requests
            .iter()
            .filter(|(db, coll, _)| db == database && coll == collection)
            .map(|(_, _, spec)| spec.clone())
            .collect()
    }

    pub fn total_index_requests(&self) -> usize {
        self.state.lock().index_requests.len()
    }

    /// Indexes that were actually built.
    pub fn indexes(&self, database: &str, collection: &str) -> Vec<IndexSpec> {
        self.state
            .lock()
            .indexes
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_database_calls(&self) -> usize {
        self.state.lock().list_database_calls
    }

    /// Highest number of `create_collection` calls observed running at the same time.
    pub fn peak_concurrent_creates(&self) -> usize {
        self.peak_creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self, target: &ConnectTarget, database: &str) -> Result<Arc<dyn Connection>, BackendError> {
        let delay = {
            let mut state = self.state.lock();
            *state.connects.entry(database.to_string()).or_default() += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().unreachable.contains(database) {
            return Err(BackendError::Unavailable {
                message: format!("{}:{} refused the connection", target.host, target.port),
            });
        }
        Ok(Arc::new(MemoryConnection {
            backend: self.clone(),
            database: database.to_string(),
            address: format!("memory://{}:{}", target.host, target.port),
        }))
    }
}

struct MemoryConnection {
    backend: MemoryBackend,
    database: String,
    address: String,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        let state = self.backend.state.lock();
        if state.failing_enumerations.contains(&self.database) {
            return Err(BackendError::Unavailable {
                message: "listing collections timed out".to_string(),
            });
        }
        Ok(state
            .databases
            .get(&self.database)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(&self, name: &str) -> Result<String, BackendError> {
        let running = self.backend.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.peak_creates.fetch_max(running, Ordering::SeqCst);

        let delay = self.backend.state.lock().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.backend.state.lock();
            if state.rejected_collections.contains(name) {
                Err(BackendError::Rejected {
                    message: format!("collection '{name}' rejected by server"),
                })
            } else {
                state
                    .databases
                    .entry(self.database.clone())
                    .or_default()
                    .insert(name.to_string());
                state.created.push((self.database.clone(), name.to_string()));
                Ok(name.to_string())
            }
        };

        self.backend.creates_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<String, BackendError> {
        let delay = {
            let mut state = self.backend.state.lock();
            state
                .index_requests
                .push((self.database.clone(), collection.to_string(), spec.clone()));
            state.index_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.backend.state.lock();
        if state.failing_indexes.contains(collection) {
            return Err(BackendError::Rejected {
                message: format!("cannot build index {} on {collection}", spec.name()),
            });
        }
        let built = state
            .indexes
            .entry((self.database.clone(), collection.to_string()))
            .or_default();
        if !built.contains(spec) {
            built.push(spec.clone());
        }
        Ok(spec.name())
    }

    async fn list_databases(&self) -> Result<Vec<String>, BackendError> {
        let mut state = self.backend.state.lock();
        state.list_database_calls += 1;
        if state.failing_admin {
            return Err(BackendError::Unavailable {
                message: "listDatabases requires admin privileges".to_string(),
            });
        }
        Ok(state.databases.keys().cloned().collect())
    }

    async fn explain(&self, collection: &str, _selector: &str) -> Result<ExplainResult, BackendError> {
        let state = self.backend.state.lock();
        state
            .explain_results
            .get(collection)
            .copied()
            .ok_or_else(|| BackendError::Rejected {
                message: format!("no explain plan for {collection}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_collections_become_visible() {
        let backend = MemoryBackend::new().with_collections("orders", ["items"]);
        let conn = backend.connect(&ConnectTarget::default(), "orders").await.unwrap();
        conn.create_collection("payments").await.unwrap();

        assert_eq!(conn.list_collections().await.unwrap(), vec!["items", "payments"]);
        assert_eq!(backend.created("orders"), vec!["payments"]);
        assert_eq!(backend.connect_count("orders"), 1);
    }

    #[tokio::test]
    async fn unreachable_databases_fail_to_connect() {
        let backend = MemoryBackend::new();
        backend.fail_connect("orders");
        let err = backend.connect(&ConnectTarget::default(), "orders").await.err().unwrap();
        assert!(matches!(err, BackendError::Unavailable { .. }));
        assert_eq!(backend.connect_count("orders"), 1);
    }
}
