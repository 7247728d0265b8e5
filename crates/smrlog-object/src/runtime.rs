use std::sync::Arc;

use smrlog_log::{SharedLog, StreamView};
use smrlog_types::StreamId;
use tracing::debug;

use crate::config::ObjectConfig;
use crate::dispatch::DispatchTable;
use crate::error::{DispatchError, ObjectResult};
use crate::handle::ObjectHandle;
use crate::oracle::{AbortOracle, CommitAll};
use crate::replica::ObjectReplica;

/// Entry point for opening replicated objects on a shared log.
#[derive(Clone)]
pub struct ObjectRuntime {
    log: Arc<dyn SharedLog>,
    oracle: Arc<dyn AbortOracle>,
    config: ObjectConfig,
}

impl ObjectRuntime {
    pub fn new(log: Arc<dyn SharedLog>, oracle: Arc<dyn AbortOracle>, config: ObjectConfig) -> Self {
        Self { log, oracle, config }
    }

    /// A runtime whose transaction batches always commit.
    pub fn without_conflict_detection(log: Arc<dyn SharedLog>) -> Self {
        Self::new(log, Arc::new(CommitAll), ObjectConfig::default())
    }

    pub fn log(&self) -> &Arc<dyn SharedLog> {
        &self.log
    }

    pub fn oracle(&self) -> &Arc<dyn AbortOracle> {
        &self.oracle
    }

    pub fn config(&self) -> &ObjectConfig {
        &self.config
    }

    /// Open a fresh replica of `stream`, starting from `T::default()`.
    ///
    /// Each call creates an independent replica that starts unsynced; clone
    /// the returned handle to share one replica between threads.
    pub fn open<T>(&self, stream: StreamId, table: Arc<DispatchTable<T>>) -> ObjectResult<ObjectHandle<T>>
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        self.open_with(stream, table, T::default)
    }

    /// Open a fresh replica of `stream` whose state starts as `initial()`.
    ///
    /// Every client of a stream must use the same initial state, or their
    /// replicas diverge.
    pub fn open_with<T, F>(
        &self,
        stream: StreamId,
        table: Arc<DispatchTable<T>>,
        initial: F,
    ) -> ObjectResult<ObjectHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        if self.config.strict_classification {
            if let Some(name) = table.defaulted().first() {
                return Err(DispatchError::Unclassified { name: name.clone() }.into());
            }
        }

        debug!(%stream, object_type = table.type_name(), "open object");
        let replica = ObjectReplica::new(
            stream,
            table,
            Arc::new(initial),
            self.config.max_recorded_failures,
        );
        Ok(ObjectHandle::new(
            Arc::new(replica),
            StreamView::new(Arc::clone(&self.log), stream),
            Arc::clone(&self.oracle),
            self.config.clone(),
        ))
    }
}

impl std::fmt::Debug for ObjectRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRuntime")
            .field("config", &self.config)
            .finish()
    }
}
