//! Background index builds.
//!
//! Index ensures are spawned and forgotten: their outcome is only logged and never turned into
//! a provisioning error, so a ready database does not imply its indexes exist yet.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::client::CollectionHandle;
use crate::logging::{LinkEvent, Logger};
use crate::topology::IndexSpec;

pub struct IndexProvisioner {
    logger: Arc<dyn Logger>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexProvisioner {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Issue a non-blocking index build for `collection`. Must be called within a tokio runtime.
    pub fn ensure(&self, collection: &CollectionHandle, spec: &IndexSpec) {
        let collection = collection.clone();
        let spec = spec.clone();
        let logger = self.logger.clone();

        let handle = tokio::spawn(async move {
            let outcome = collection.connection().ensure_index(collection.name(), &spec).await;
            let event = match outcome {
                Ok(index) => LinkEvent::IndexEnsured {
                    database: collection.database().to_string(),
                    collection: collection.name().to_string(),
                    index,
                },
                Err(err) => LinkEvent::IndexFailed {
                    database: collection.database().to_string(),
                    collection: collection.name().to_string(),
                    index: spec.name(),
                    error: err.to_string(),
                },
            };
            logger.log(event);
        });

        let mut pending = self.pending.lock();
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }

    /// Number of index builds that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().iter().filter(|task| !task.is_finished()).count()
    }

    /// Wait for every index build issued so far. Never called by the provisioning pipeline.
    pub async fn settle(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                return;
            }
            for task in batch {
                // a panicking build only loses its log line
                let _ = task.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::logging::MemoryLogger;
    use crate::topology::ConnectTarget;

    async fn handle(backend: &MemoryBackend, collection: &str) -> CollectionHandle {
        let conn = backend.connect(&ConnectTarget::default(), "orders").await.unwrap();
        CollectionHandle::new("orders", collection, conn)
    }

    #[tokio::test]
    async fn ensure_does_not_wait_for_the_build() {
        let backend = MemoryBackend::new();
        backend.set_index_delay(Duration::from_millis(200));
        let logger = Arc::new(MemoryLogger::new());
        let provisioner = IndexProvisioner::new(logger.clone());

        provisioner.ensure(&handle(&backend, "items").await, &IndexSpec::ascending("sku"));
        assert_eq!(logger.count("index_ensured"), 0);
        assert_eq!(provisioner.in_flight(), 1);

        provisioner.settle().await;
        assert_eq!(logger.count("index_ensured"), 1);
        assert_eq!(backend.indexes("orders", "items"), vec![IndexSpec::ascending("sku")]);
    }

    #[tokio::test]
    async fn failures_are_only_logged() {
        let backend = MemoryBackend::new();
        backend.fail_index("items");
        let logger = Arc::new(MemoryLogger::new());
        let provisioner = IndexProvisioner::new(logger.clone());

        provisioner.ensure(&handle(&backend, "items").await, &IndexSpec::descending("created"));
        provisioner.settle().await;

        assert_eq!(logger.count("index_failed"), 1);
        assert!(backend.indexes("orders", "items").is_empty());
        assert_eq!(backend.index_requests("orders", "items").len(), 1);
    }
}
