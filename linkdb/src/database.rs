//! One connection to one named database and its provisioning pipeline.
//!
//! `initialize` runs the stages strictly in order, any failure ends the pipeline:
//!
//! 1. connect
//! 2. enumerate the remote collections
//! 3. register them (and hand their indexes to the [`IndexProvisioner`])
//! 4. diff the desired collections against the existing ones
//! 5. create the missing collections concurrently
//! 6. register the newly created collections
//!
//! Collections whose name starts with [`RESERVED_PREFIX`] are never managed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::RwLock;

use crate::backend::{Backend, Connection};
use crate::client::CollectionHandle;
use crate::errors::{LinkError, Stage};
use crate::indexes::IndexProvisioner;
use crate::logging::{LinkEvent, Logger};
use crate::topology::{CollectionsDef, ConnectTarget};

pub const RESERVED_PREFIX: &str = "system";

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

pub struct DatabaseClient {
    name: String,
    target: ConnectTarget,
    logger: Arc<dyn Logger>,
    conn: RwLock<Option<Arc<dyn Connection>>>,
    collections: RwLock<BTreeMap<String, CollectionHandle>>,
}

impl DatabaseClient {
    pub fn new(name: &str, target: ConnectTarget, logger: Arc<dyn Logger>) -> Result<Self, LinkError> {
        if name.trim().is_empty() {
            return Err(LinkError::InvalidArgument {
                message: "a database name must be provided to create a new database client".into(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            target,
            logger,
            conn: RwLock::new(None),
            collections: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    /// Whether stage 1 has completed at least once.
    pub fn is_connected(&self) -> bool {
        self.conn.read().is_some()
    }

    /// Connection usable for administrative calls such as listing databases.
    pub fn admin(&self) -> Option<Arc<dyn Connection>> {
        self.conn.read().clone()
    }

    pub fn collection(&self, name: &str) -> Option<CollectionHandle> {
        self.collections.read().get(name).cloned()
    }

    pub fn collections(&self) -> BTreeMap<String, CollectionHandle> {
        self.collections.read().clone()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Strip this database's qualifier from a remote collection name (`orders.items` -> `items`).
    pub fn normalize<'a>(&self, raw: &'a str) -> &'a str {
        raw.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(raw)
    }

    pub async fn initialize(
        &self,
        backend: &dyn Backend,
        desired: &CollectionsDef,
        provisioner: &IndexProvisioner,
    ) -> Result<(), LinkError> {
        self.logger.log(LinkEvent::PipelineStarted {
            database: self.name.clone(),
            collections: desired.keys().cloned().collect(),
        });

        let conn = self.connect(backend).await?;

        let raw = conn
            .list_collections()
            .await
            .map_err(|err| LinkError::backend(&self.name, Stage::Enumerate, err))?;
        self.logger.log(LinkEvent::ExistingCollections {
            database: self.name.clone(),
            collections: raw.clone(),
        });
        self.register(&conn, &raw, desired, provisioner)?;

        let existing: BTreeSet<&str> = raw.iter().map(|name| self.normalize(name)).collect();
        let mut missing = Vec::new();
        for name in desired.keys() {
            if existing.contains(name.as_str()) {
                continue;
            }
            if is_reserved(name) {
                self.logger.log(LinkEvent::ReservedNameSkipped { name: name.clone() });
                continue;
            }
            missing.push(name.as_str());
        }
        if missing.is_empty() {
            return Ok(());
        }
        self.logger.log(LinkEvent::MissingCollections {
            database: self.name.clone(),
            collections: missing.iter().map(|name| name.to_string()).collect(),
        });

        let created = try_join_all(missing.into_iter().map(|name| {
            let conn = conn.clone();
            async move {
                self.logger.log(LinkEvent::CreatingCollection {
                    database: self.name.clone(),
                    collection: name.to_string(),
                });
                conn.create_collection(name).await
            }
        }))
        .await
        .map_err(|err| LinkError::backend(&self.name, Stage::Create, err))?;

        self.register(&conn, &created, desired, provisioner)
    }

    async fn connect(&self, backend: &dyn Backend) -> Result<Arc<dyn Connection>, LinkError> {
        if let Some(conn) = self.admin() {
            return Ok(conn);
        }
        let conn = backend
            .connect(&self.target, &self.name)
            .await
            .map_err(|err| LinkError::backend(&self.name, Stage::Connect, err))?;
        self.logger.log(LinkEvent::ClientCreated {
            database: self.name.clone(),
            address: conn.address(),
        });
        *self.conn.write() = Some(conn.clone());
        Ok(conn)
    }

    /// Add `raw` collections to the handle map and issue their index ensures.
    fn register(
        &self,
        conn: &Arc<dyn Connection>,
        raw: &[String],
        desired: &CollectionsDef,
        provisioner: &IndexProvisioner,
    ) -> Result<(), LinkError> {
        let mut registered = Vec::new();
        {
            let mut collections = self.collections.write();
            for raw_name in raw {
                let name = self.normalize(raw_name);
                if is_reserved(name) {
                    continue;
                }
                if collections.contains_key(name) {
                    return Err(LinkError::DuplicateCollection {
                        database: self.name.clone(),
                        collection: name.to_string(),
                    });
                }
                let handle = CollectionHandle::new(&self.name, name, conn.clone());
                collections.insert(name.to_string(), handle.clone());
                registered.push(handle);
            }
        }

        for handle in &registered {
            if let Some(specs) = desired.get(handle.name()) {
                for spec in specs {
                    provisioner.ensure(handle, spec);
                }
            }
        }
        Ok(())
    }
}
