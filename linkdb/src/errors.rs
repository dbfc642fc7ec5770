use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Fatal errors surfaced by database linking and provisioning.
///
/// Cloneable so that every caller waiting on the same in-flight link receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// A required argument (e.g. a database name) was empty or missing.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: Cow<'static, str> },

    /// A remote call failed while provisioning a database.
    #[error("connection error on database '{database}' during {stage}: {message}")]
    Connection {
        database: String,
        stage: Stage,
        message: String,
    },

    /// Two remote collections normalize to the same managed name.
    #[error("can't override existing collection '{collection}' in database '{database}'")]
    DuplicateCollection { database: String, collection: String },

    /// `link_database_if_exists` needs an already linked database to reach the admin interface.
    #[error("no linked database available to check whether '{database}' exists")]
    NoAdminAvailable { database: String },
}

impl LinkError {
    pub(crate) fn backend(database: &str, stage: Stage, err: BackendError) -> Self {
        Self::Connection {
            database: database.to_string(),
            stage,
            message: err.to_string(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Pipeline stage in which a remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Enumerate,
    Create,
    ListDatabases,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Connect => "connect",
            Stage::Enumerate => "enumerate",
            Stage::Create => "create",
            Stage::ListDatabases => "list-databases",
        };
        f.write_str(label)
    }
}

/// Failure of a single remote call issued through a [`crate::backend::Connection`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The remote end could not be reached.
    #[error("unavailable: {message}")]
    Unavailable { message: String },

    /// The remote end refused the request.
    #[error("rejected: {message}")]
    Rejected { message: String },
}

/// What a name in the alias namespace is bound to, for conflict reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasKind {
    /// A control operation of the manager itself.
    Reserved,
    Database { database: String },
    Collection { database: String, collection: String },
}

impl AliasKind {
    /// Collision-free access route for the binding.
    pub fn qualified_path(&self) -> String {
        match self {
            AliasKind::Reserved => "<reserved>".to_string(),
            AliasKind::Database { database } => format!("databases.{database}"),
            AliasKind::Collection { database, collection } => format!("databases.{database}.{collection}"),
        }
    }
}

impl fmt::Display for AliasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasKind::Reserved => f.write_str("reserved control name"),
            AliasKind::Database { database } => write!(f, "database '{database}'"),
            AliasKind::Collection { database, collection } => {
                write!(f, "collection '{collection}' of database '{database}'")
            }
        }
    }
}

/// Non-fatal name collision in the alias namespace. The first binding is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting name '{name}' is already bound to {existing}, use {} instead", .rejected.qualified_path())]
pub struct AliasConflict {
    pub name: String,
    pub existing: AliasKind,
    pub rejected: AliasKind,
}

/// Errors raised while loading a topology description.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read topology: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML topology: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON topology: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported topology format '{extension}' (expected .toml or .json)")]
    UnsupportedFormat { extension: String },
}
