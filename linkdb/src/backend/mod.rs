//! Remote database capabilities consumed by the provisioning core.
//!
//! The core only ever talks to a [`Backend`] (to open connections) and to the [`Connection`]s it
//! hands out. [`redis::RedisBackend`] is the production implementation; [`memory::MemoryBackend`]
//! keeps everything in process and records every call.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::topology::{ConnectTarget, IndexSpec};

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a connection to `database` at `target`.
    async fn connect(&self, target: &ConnectTarget, database: &str) -> Result<Arc<dyn Connection>, BackendError>;
}

/// One open connection to one named database.
#[async_trait]
pub trait Connection: Send + Sync {
    fn database(&self) -> &str;

    /// Human readable address, used in logs.
    fn address(&self) -> String;

    /// Names of every collection currently present in this database.
    async fn list_collections(&self) -> Result<Vec<String>, BackendError>;

    /// Create `name` and return the name the server reports for it.
    async fn create_collection(&self, name: &str) -> Result<String, BackendError>;

    /// Ensure `spec` exists on `collection`, returning the index name.
    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<String, BackendError>;

    /// Administrative listing of every database present on the server.
    async fn list_databases(&self) -> Result<Vec<String>, BackendError>;

    /// Run `selector` against `collection` and report how it executed.
    async fn explain(&self, collection: &str, selector: &str) -> Result<ExplainResult, BackendError>;
}

/// Execution statistics for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainResult {
    pub millis: u64,
    /// Records returned.
    pub n: u64,
    /// Records examined.
    pub nscanned: u64,
}
