//! Redis backed databases.
//!
//! Redis has no native notion of named databases or collections, so they are laid out as key
//! namespaces under a global prefix:
//!
//! | key                                   | type | contents                           |
//! |---------------------------------------|------|------------------------------------|
//! | `{prefix}:databases`                  | SET  | every database ever created        |
//! | `{prefix}:{db}:collections`           | SET  | collections of `db`                |
//! | `{prefix}:{db}:{collection}:{id}`     | JSON | documents                          |
//!
//! Indexes are RediSearch indexes over the JSON documents of one collection.

use std::sync::Arc;
use std::time::Instant;

use ::redis::{Client, aio::ConnectionManager, cmd};
use async_trait::async_trait;
use regex::Regex;

use super::{Backend, Connection, ExplainResult};
use crate::errors::BackendError;
use crate::topology::{ConnectTarget, IndexKind, IndexSpec};

const DEFAULT_PREFIX: &str = "linkdb";
const TAG_SEPARATOR: &str = "|";
const SCAN_COUNT: usize = 1000;

#[derive(Debug, Clone)]
pub struct RedisBackend {
    prefix: String,
}

impl Default for RedisBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl RedisBackend {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn connect(&self, target: &ConnectTarget, database: &str) -> Result<Arc<dyn Connection>, BackendError> {
        let url = target.connection_string("redis");
        let client = Client::open(url.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = cmd("PING").query_async(&mut conn).await?;

        Ok(Arc::new(RedisConnection {
            conn,
            address: format!("{}:{}", target.host, target.port),
            prefix: self.prefix.clone(),
            database: database.to_string(),
        }))
    }
}

#[derive(Clone)]
pub struct RedisConnection {
    conn: ConnectionManager,
    address: String,
    prefix: String,
    database: String,
}

impl RedisConnection {
    fn databases_key(&self) -> String {
        format!("{}:databases", self.prefix)
    }

    fn collections_key(&self) -> String {
        format!("{}:{}:collections", self.prefix, self.database)
    }

    fn documents_prefix(&self, collection: &str) -> String {
        format!("{}:{}:{}:", self.prefix, self.database, collection)
    }

    fn index_name(&self, collection: &str, spec: &IndexSpec) -> String {
        format!("{}:{}:{}:idx:{}", self.prefix, self.database, collection, spec.name())
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn list_collections(&self) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = cmd("SMEMBERS").arg(self.collections_key()).query_async(&mut conn).await?;
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<String, BackendError> {
        let mut conn = self.conn.clone();
        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .cmd("SADD")
            .arg(self.collections_key())
            .arg(name)
            .ignore()
            .cmd("SADD")
            .arg(self.databases_key())
            .arg(&self.database)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(name.to_string())
    }

    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<String, BackendError> {
        if spec.keys.is_empty() {
            return Err(BackendError::Rejected {
                message: format!("index on {collection} has no keys"),
            });
        }

        let mut conn = self.conn.clone();
        let index_name = self.index_name(collection, spec);
        let indexes: Vec<String> = cmd("FT._LIST").query_async(&mut conn).await?;
        if indexes.iter().any(|name| name == &index_name) {
            return Ok(index_name);
        }

        let mut command = cmd("FT.CREATE");
        command.arg(index_name.as_str());
        command.arg("ON").arg("JSON");
        command.arg("PREFIX").arg(1).arg(self.documents_prefix(collection));
        command.arg("SCHEMA");
        for key in &spec.keys {
            command.arg(format!("$.{}", key.field));
            command.arg("AS").arg(key.field.as_str());
            match key.kind {
                IndexKind::Tag => {
                    command.arg("TAG");
                    command.arg("SEPARATOR").arg(TAG_SEPARATOR);
                }
                IndexKind::Text => {
                    command.arg("TEXT");
                }
                IndexKind::Numeric => {
                    command.arg("NUMERIC");
                }
            }
            command.arg("SORTABLE");
        }

        if let Err(err) = command.query_async::<()>(&mut conn).await {
            if index_exists_error(&err) {
                return Ok(index_name);
            }
            return Err(err.into());
        }

        Ok(index_name)
    }

    async fn list_databases(&self) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = cmd("SMEMBERS").arg(self.databases_key()).query_async(&mut conn).await?;
        names.sort();
        Ok(names)
    }

    /// Walks the collection with a SCAN cursor. Every document key visited counts as scanned,
    /// keys whose id matches the glob `selector` count as returned.
    async fn explain(&self, collection: &str, selector: &str) -> Result<ExplainResult, BackendError> {
        let started = Instant::now();
        let documents_prefix = self.documents_prefix(collection);
        let matcher = glob_to_regex(selector)?;
        let pattern = format!("{documents_prefix}*");

        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut scanned: u64 = 0;
        let mut returned: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            for key in &keys {
                scanned += 1;
                let id = key.strip_prefix(&documents_prefix).unwrap_or(key);
                if matcher.is_match(id) {
                    returned += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(ExplainResult {
            millis: started.elapsed().as_millis() as u64,
            n: returned,
            nscanned: scanned,
        })
    }
}

fn index_exists_error(err: &::redis::RedisError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("already exists") && msg.contains("index")
}

/// Translate a Redis style glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, BackendError> {
    let mut pattern = String::with_capacity(glob.len() + 2);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|err| BackendError::Rejected {
        message: format!("invalid selector '{glob}': {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_selectors_are_anchored() {
        let any = glob_to_regex("*").unwrap();
        assert!(any.is_match("abc"));

        let prefixed = glob_to_regex("user-?.v*").unwrap();
        assert!(prefixed.is_match("user-1.v2"));
        assert!(!prefixed.is_match("user-12.v2"));
        assert!(!prefixed.is_match("xuser-1.v2"));
        assert!(!prefixed.is_match("user-1xv2"));
    }

    #[test]
    fn default_prefix() {
        assert_eq!(RedisBackend::default().prefix(), "linkdb");
    }
}
