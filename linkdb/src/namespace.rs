//! Flat alias namespace shared by databases and collections.
//!
//! A name is bound at most once: the first binding wins and later candidates are rejected with
//! an [`AliasConflict`], leaving them reachable only through their qualified path.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::CollectionHandle;
use crate::database::{DatabaseClient, is_reserved};
use crate::errors::{AliasConflict, AliasKind};

/// Operation names of the manager. They occupy the namespace before anything is linked.
pub const CONTROL_NAMES: &[&str] = &[
    "initialize",
    "add_database",
    "link_database",
    "link_database_if_exists",
    "get_collection_names",
    "get_layout",
    "databases",
    "database",
    "resolve",
    "uid",
    "escape_dot",
    "unescape_dot",
    "perf_log",
    "dump_perf",
];

#[derive(Clone)]
pub enum AliasTarget {
    Reserved,
    Database(Arc<DatabaseClient>),
    Collection(CollectionHandle),
}

impl AliasTarget {
    pub fn kind(&self) -> AliasKind {
        match self {
            AliasTarget::Reserved => AliasKind::Reserved,
            AliasTarget::Database(client) => AliasKind::Database {
                database: client.name().to_string(),
            },
            AliasTarget::Collection(handle) => AliasKind::Collection {
                database: handle.database().to_string(),
                collection: handle.name().to_string(),
            },
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionHandle> {
        match self {
            AliasTarget::Collection(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_database(&self) -> Option<&Arc<DatabaseClient>> {
        match self {
            AliasTarget::Database(client) => Some(client),
            _ => None,
        }
    }

    fn same_binding(&self, other: &AliasTarget) -> bool {
        match (self, other) {
            (AliasTarget::Database(a), AliasTarget::Database(b)) => Arc::ptr_eq(a, b),
            (AliasTarget::Collection(a), AliasTarget::Collection(b)) => a.same_collection(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for AliasTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AliasTarget({})", self.kind())
    }
}

/// Outcome of a successful [`AliasNamespace::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installed {
    New,
    /// The exact same binding already existed.
    Unchanged,
    /// Reserved-prefix names are never aliased.
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct AliasNamespace {
    entries: BTreeMap<String, AliasTarget>,
}

impl AliasNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace pre-populated with [`CONTROL_NAMES`] plus `extra` reserved names.
    pub fn with_reserved<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for name in CONTROL_NAMES {
            entries.insert(name.to_string(), AliasTarget::Reserved);
        }
        for name in extra {
            entries.insert(name.into(), AliasTarget::Reserved);
        }
        Self { entries }
    }

    pub fn install(&mut self, name: &str, target: AliasTarget) -> Result<Installed, AliasConflict> {
        if is_reserved(name) {
            return Ok(Installed::Skipped);
        }
        match self.entries.get(name) {
            Some(existing) if existing.same_binding(&target) => Ok(Installed::Unchanged),
            Some(existing) => Err(AliasConflict {
                name: name.to_string(),
                existing: existing.kind(),
                rejected: target.kind(),
            }),
            None => {
                self.entries.insert(name.to_string(), target);
                Ok(Installed::New)
            }
        }
    }

    /// Drop the alias of `client` if `name` is still bound to it.
    pub fn remove_database(&mut self, name: &str, client: &Arc<DatabaseClient>) -> bool {
        let bound = matches!(self.entries.get(name), Some(AliasTarget::Database(current)) if Arc::ptr_eq(current, client));
        if bound {
            self.entries.remove(name);
        }
        bound
    }

    pub fn get(&self, name: &str) -> Option<&AliasTarget> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names bound to a database or collection, reserved names excluded.
    pub fn aliases(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, target)| !matches!(target, AliasTarget::Reserved))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
