//! Declarative description of the databases, collections and indexes to provision.
//!
//! A topology is usually loaded from TOML:
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 6379
//!
//! [databases.orders]
//! items = [{ keys = [{ field = "sku" }] }]
//! payments = []
//!
//! [overrides.analytics]
//! host = "10.0.0.12"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::errors::ConfigError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

/// Collection name to the ordered list of indexes to ensure on it.
pub type CollectionsDef = BTreeMap<String, Vec<IndexSpec>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend specific connection options, passed through untouched.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub databases: BTreeMap<String, CollectionsDef>,
    /// Per-database replacements for `host`, `port` and `options`.
    #[serde(default)]
    pub overrides: BTreeMap<String, TargetOverride>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            options: BTreeMap::new(),
            databases: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Topology {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a topology file, choosing the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let content = std::fs::read_to_string(path)?;
        match extension.as_str() {
            "toml" => Self::from_toml_str(&content),
            "json" => Self::from_json_str(&content),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }

    /// Add a database definition, replacing any previous one with the same name.
    pub fn with_database<I, S>(mut self, name: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<IndexSpec>)>,
        S: Into<String>,
    {
        let collections = collections.into_iter().map(|(name, specs)| (name.into(), specs)).collect();
        self.databases.insert(name.into(), collections);
        self
    }

    /// Connection defaults shared by every database of this topology.
    pub fn default_target(&self) -> ConnectTarget {
        ConnectTarget {
            host: self.host.clone(),
            port: self.port,
            options: self.options.clone(),
        }
    }
}

/// Optional per-database connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOverride {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
}

/// Where and how to connect for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub options: BTreeMap<String, String>,
}

impl Default for ConnectTarget {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            options: BTreeMap::new(),
        }
    }
}

impl ConnectTarget {
    pub fn apply(&self, overrides: &TargetOverride) -> ConnectTarget {
        ConnectTarget {
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.unwrap_or(self.port),
            options: overrides.options.clone().unwrap_or_else(|| self.options.clone()),
        }
    }

    /// Render `scheme://host:port/` with the options as query parameters.
    pub fn connection_string(&self, scheme: &str) -> String {
        let mut url = format!("{scheme}://{}:{}/", self.host, self.port);
        if !self.options.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.options)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexDirection {
    #[default]
    Asc,
    Desc,
}

impl IndexDirection {
    #[inline]
    pub const fn as_i8(self) -> i8 {
        match self {
            IndexDirection::Asc => 1,
            IndexDirection::Desc => -1,
        }
    }
}

/// How a backend that distinguishes field types should index the field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Tag,
    Text,
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub direction: IndexDirection,
    #[serde(default)]
    pub kind: IndexKind,
}

/// Field/direction description of one index. Never interpreted by the provisioning core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexKey>,
    #[serde(default = "default_background")]
    pub background: bool,
}

fn default_background() -> bool {
    true
}

impl IndexSpec {
    pub fn new(keys: Vec<IndexKey>) -> Self {
        Self { keys, background: true }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(vec![IndexKey {
            field: field.into(),
            direction: IndexDirection::Asc,
            kind: IndexKind::Tag,
        }])
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(vec![IndexKey {
            field: field.into(),
            direction: IndexDirection::Desc,
            kind: IndexKind::Tag,
        }])
    }

    pub fn with_kind(mut self, kind: IndexKind) -> Self {
        for key in &mut self.keys {
            key.kind = kind;
        }
        self
    }

    /// Conventional index name, e.g. `email_1_created_-1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|key| format!("{}_{}", key.field, key.direction.as_i8()))
            .collect::<Vec<_>>()
            .join("_")
    }
}
