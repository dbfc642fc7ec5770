//! Handles onto remote collections.
//!
//! This module provides:
//! - `CollectionHandle` - opaque, cheaply cloneable reference to one remote collection
//! - `Cursor` - a query against a collection that can be explained for profiling
//!
//! # Example
//! ```ignore
//! let items = manager.database("orders").and_then(|db| db.collection("items")).unwrap();
//! let plan = items.find("sku-*").explain().await?;
//! manager.perf_log(&items.find("sku-*")).await;
//! ```

use std::fmt;
use std::sync::Arc;

use crate::backend::{Connection, ExplainResult};
use crate::errors::BackendError;

/// Reference to one managed collection, identified by its database and exposed name.
#[derive(Clone)]
pub struct CollectionHandle {
    database: Arc<str>,
    name: Arc<str>,
    conn: Arc<dyn Connection>,
}

impl CollectionHandle {
    pub(crate) fn new(database: &str, name: &str, conn: Arc<dyn Connection>) -> Self {
        Self {
            database: Arc::from(database),
            name: Arc::from(name),
            conn,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `database.collection`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Whether both handles refer to the same remote collection.
    pub fn same_collection(&self, other: &CollectionHandle) -> bool {
        self.database == other.database && self.name == other.name
    }

    /// Open a cursor over the documents whose id matches `selector`.
    pub fn find(&self, selector: impl Into<String>) -> Cursor {
        Cursor {
            collection: self.clone(),
            selector: selector.into(),
        }
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("database", &self.database)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Cursor {
    collection: CollectionHandle,
    selector: String,
}

impl Cursor {
    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub async fn explain(&self) -> Result<ExplainResult, BackendError> {
        self.collection
            .connection()
            .explain(self.collection.name(), &self.selector)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::topology::ConnectTarget;

    #[tokio::test]
    async fn handles_compare_by_database_and_name() {
        let backend = MemoryBackend::new();
        let conn = backend.connect(&ConnectTarget::default(), "orders").await.unwrap();
        let items = CollectionHandle::new("orders", "items", conn.clone());
        let same = CollectionHandle::new("orders", "items", conn.clone());
        let other = CollectionHandle::new("crm", "items", conn);

        assert!(items.same_collection(&same));
        assert!(!items.same_collection(&other));
        assert_eq!(other.qualified_name(), "crm.items");
    }

    #[tokio::test]
    async fn cursor_explains_through_the_connection() {
        let backend = MemoryBackend::new();
        let expected = ExplainResult {
            millis: 12,
            n: 2,
            nscanned: 40,
        };
        backend.set_explain_result("items", expected);
        let conn = backend.connect(&ConnectTarget::default(), "orders").await.unwrap();
        let cursor = CollectionHandle::new("orders", "items", conn).find("sku-*");

        assert_eq!(cursor.selector(), "sku-*");
        assert_eq!(cursor.explain().await.unwrap(), expected);
    }
}
