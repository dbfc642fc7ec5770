//! linkdb core library.
//!
//! Declarative provisioning of several logical databases on one backend: each database listed in
//! a [`Topology`] is connected, its missing collections are created and its indexes are ensured in
//! the background. Every managed collection is then reachable through a flat alias namespace
//! (first binding wins) as well as its qualified `database -> collection` path.

pub mod backend;
pub mod client;
pub mod database;
pub mod errors;
pub mod escape;
pub mod id;
pub mod indexes;
pub mod logging;
pub mod manager;
pub mod namespace;
pub mod perf;
pub mod topology;

pub use backend::{Backend, Connection, ExplainResult, MemoryBackend, RedisBackend};
pub use client::{CollectionHandle, Cursor};
pub use database::{DatabaseClient, RESERVED_PREFIX, is_reserved};
pub use errors::*;
pub use escape::{escape_dot, unescape_dot};
pub use id::uid;
pub use indexes::IndexProvisioner;
pub use logging::{LinkEvent, Logger, MemoryLogger, NoopLogger, TracingLogger};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use namespace::{AliasNamespace, AliasTarget, CONTROL_NAMES, Installed};
pub use perf::{PerfAggregator, PerfConfig, PerfRecord, PerfStats};
pub use topology::{
    CollectionsDef, ConnectTarget, IndexDirection, IndexKey, IndexKind, IndexSpec, TargetOverride, Topology,
};

pub use redis;
