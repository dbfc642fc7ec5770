//! Injected logging.
//!
//! Every component receives an `Arc<dyn Logger>` at construction instead of writing to a
//! process-wide logger. Events are structured so callers (and tests) can react to them;
//! [`TracingLogger`] is the default sink and renders them through `tracing`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;

use crate::errors::{AliasConflict, LinkError};

const TARGET: &str = "linkdb";

pub trait Logger: Send + Sync {
    fn log(&self, event: LinkEvent);
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ManagerInitializing {
        databases: Vec<String>,
    },
    ClientCreated {
        database: String,
        address: String,
    },
    PipelineStarted {
        database: String,
        collections: Vec<String>,
    },
    ExistingCollections {
        database: String,
        collections: Vec<String>,
    },
    MissingCollections {
        database: String,
        collections: Vec<String>,
    },
    CreatingCollection {
        database: String,
        collection: String,
    },
    ReservedNameSkipped {
        name: String,
    },
    IndexEnsured {
        database: String,
        collection: String,
        index: String,
    },
    IndexFailed {
        database: String,
        collection: String,
        index: String,
        error: String,
    },
    PipelineFailed {
        database: String,
        error: LinkError,
    },
    DatabaseLinked {
        database: String,
        collections: usize,
    },
    AlreadyLinked {
        database: String,
    },
    DatabaseAbsent {
        database: String,
    },
    AliasInstalled {
        name: String,
        path: String,
    },
    AliasConflict(AliasConflict),
    QueryProfiled {
        collection: String,
        selector: String,
        millis: u64,
        returned: u64,
        scanned: u64,
        slow: bool,
    },
    ExplainFailed {
        collection: String,
        error: String,
    },
    PerfFlushSkipped {
        pending: usize,
    },
    PerfFlushed {
        records: usize,
    },
}

impl LinkEvent {
    pub fn level(&self) -> Level {
        match self {
            LinkEvent::IndexFailed { .. } | LinkEvent::PipelineFailed { .. } | LinkEvent::ExplainFailed { .. } => {
                Level::ERROR
            }
            LinkEvent::AliasConflict(_) => Level::WARN,
            LinkEvent::QueryProfiled { slow: true, .. } => Level::WARN,
            LinkEvent::ExistingCollections { .. }
            | LinkEvent::ReservedNameSkipped { .. }
            | LinkEvent::AlreadyLinked { .. }
            | LinkEvent::QueryProfiled { .. }
            | LinkEvent::PerfFlushSkipped { .. } => Level::DEBUG,
            _ => Level::INFO,
        }
    }

    /// Short machine-friendly name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::ManagerInitializing { .. } => "manager_initializing",
            LinkEvent::ClientCreated { .. } => "client_created",
            LinkEvent::PipelineStarted { .. } => "pipeline_started",
            LinkEvent::ExistingCollections { .. } => "existing_collections",
            LinkEvent::MissingCollections { .. } => "missing_collections",
            LinkEvent::CreatingCollection { .. } => "creating_collection",
            LinkEvent::ReservedNameSkipped { .. } => "reserved_name_skipped",
            LinkEvent::IndexEnsured { .. } => "index_ensured",
            LinkEvent::IndexFailed { .. } => "index_failed",
            LinkEvent::PipelineFailed { .. } => "pipeline_failed",
            LinkEvent::DatabaseLinked { .. } => "database_linked",
            LinkEvent::AlreadyLinked { .. } => "already_linked",
            LinkEvent::DatabaseAbsent { .. } => "database_absent",
            LinkEvent::AliasInstalled { .. } => "alias_installed",
            LinkEvent::AliasConflict(_) => "alias_conflict",
            LinkEvent::QueryProfiled { .. } => "query_profiled",
            LinkEvent::ExplainFailed { .. } => "explain_failed",
            LinkEvent::PerfFlushSkipped { .. } => "perf_flush_skipped",
            LinkEvent::PerfFlushed { .. } => "perf_flushed",
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::ManagerInitializing { databases } => {
                write!(f, "initializing databases [{}]", databases.join(", "))
            }
            LinkEvent::ClientCreated { database, address } => {
                write!(f, "created client for the '{database}' database at {address}")
            }
            LinkEvent::PipelineStarted { database, collections } => {
                write!(f, "initializing '{database}' with collections [{}]", collections.join(", "))
            }
            LinkEvent::ExistingCollections { database, collections } => {
                write!(f, "'{database}' has existing collections [{}]", collections.join(", "))
            }
            LinkEvent::MissingCollections { database, collections } => {
                write!(f, "'{database}' is missing collections [{}]", collections.join(", "))
            }
            LinkEvent::CreatingCollection { database, collection } => {
                write!(f, "creating missing collection '{database}.{collection}'")
            }
            LinkEvent::ReservedNameSkipped { name } => write!(f, "skipping reserved name '{name}'"),
            LinkEvent::IndexEnsured {
                database,
                collection,
                index,
            } => write!(f, "collection {database}.{collection} has index named {index}"),
            LinkEvent::IndexFailed {
                database,
                collection,
                index,
                error,
            } => write!(f, "ensuring index {index} on {database}.{collection} failed: {error}"),
            LinkEvent::PipelineFailed { database, error } => {
                write!(f, "initializing '{database}' failed: {error}")
            }
            LinkEvent::DatabaseLinked { database, collections } => {
                write!(f, "database '{database}' linked with {collections} collection(s)")
            }
            LinkEvent::AlreadyLinked { database } => write!(f, "database '{database}' is already linked"),
            LinkEvent::DatabaseAbsent { database } => {
                write!(f, "database '{database}' does not exist on the server, not linking")
            }
            LinkEvent::AliasInstalled { name, path } => write!(f, "'{name}' is a valid shortcut for {path}"),
            LinkEvent::AliasConflict(conflict) => write!(f, "{conflict}"),
            LinkEvent::QueryProfiled {
                collection,
                selector,
                millis,
                returned,
                scanned,
                slow,
            } => {
                if *slow {
                    write!(
                        f,
                        "latency {millis}ms on {collection} ({selector}): {returned} records returned, {scanned} scanned"
                    )
                } else {
                    write!(
                        f,
                        "{collection} ({selector}): {scanned} records scanned, {returned} returned in {millis}ms"
                    )
                }
            }
            LinkEvent::ExplainFailed { collection, error } => write!(f, "explain on {collection} failed: {error}"),
            LinkEvent::PerfFlushSkipped { pending } => {
                write!(f, "perf flush is disabled, keeping {pending} accumulator(s)")
            }
            LinkEvent::PerfFlushed { records } => write!(f, "flushed {records} perf record(s)"),
        }
    }
}

/// Default logger: renders events through `tracing` under the `linkdb` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, event: LinkEvent) {
        let kind = event.kind();
        let level = event.level();
        if level == Level::ERROR {
            tracing::error!(target: TARGET, event = kind, "{event}");
        } else if level == Level::WARN {
            tracing::warn!(target: TARGET, event = kind, "{event}");
        } else if level == Level::INFO {
            tracing::info!(target: TARGET, event = kind, "{event}");
        } else {
            tracing::debug!(target: TARGET, event = kind, "{event}");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _event: LinkEvent) {}
}

/// Records every event in memory, optionally forwarding it to another logger.
#[derive(Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<LinkEvent>>,
    forward: Option<Arc<dyn Logger>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding_to(logger: Arc<dyn Logger>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            forward: Some(logger),
        }
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.events.lock().clone()
    }

    pub fn conflicts(&self) -> Vec<AliasConflict> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LinkEvent::AliasConflict(conflict) => Some(conflict.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|event| event.kind() == kind).count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, event: LinkEvent) {
        if let Some(forward) = &self.forward {
            forward.log(event.clone());
        }
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_queries_are_warnings() {
        let event = LinkEvent::QueryProfiled {
            collection: "items".to_string(),
            selector: "*".to_string(),
            millis: 450,
            returned: 3,
            scanned: 9000,
            slow: true,
        };
        assert_eq!(event.level(), Level::WARN);
        assert_eq!(
            event.to_string(),
            "latency 450ms on items (*): 3 records returned, 9000 scanned"
        );
    }

    #[test]
    fn memory_logger_forwards_and_records() {
        let inner = Arc::new(MemoryLogger::new());
        let outer = MemoryLogger::forwarding_to(inner.clone());
        outer.log(LinkEvent::AlreadyLinked {
            database: "orders".to_string(),
        });
        assert_eq!(outer.count("already_linked"), 1);
        assert_eq!(inner.events().len(), 1);
    }
}
