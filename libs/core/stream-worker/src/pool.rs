//! Process-wide cache of queue handles.
//!
//! At most one [`StreamQueue`] exists per queue name, and all of them share
//! one [`SharedConnection`].

use crate::connection::SharedConnection;
use crate::keys::DEFAULT_PREFIX;
use crate::options::JobOptions;
use crate::queue::StreamQueue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct QueuePool {
    connection: Arc<SharedConnection>,
    prefix: String,
    options: JobOptions,
    queues: Mutex<HashMap<String, Arc<StreamQueue>>>,
}

impl QueuePool {
    pub fn new(connection: Arc<SharedConnection>) -> Self {
        Self {
            connection,
            prefix: DEFAULT_PREFIX.to_string(),
            options: JobOptions::default(),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Options applied to queues created from now on.
    pub fn with_default_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn connection(&self) -> &Arc<SharedConnection> {
        &self.connection
    }

    /// Handle for `name`, created on first request.
    pub fn queue(&self, name: &str) -> Arc<StreamQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);

        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = %name, "Created queue handle");
                Arc::new(StreamQueue::new(
                    name,
                    &self.prefix,
                    self.options.clone(),
                    self.connection.clone(),
                ))
            })
            .clone()
    }

    /// Names of the queues handed out so far, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every handle, then close the shared connection. Safe to repeat.
    pub async fn close(&self) {
        let dropped = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            let count = queues.len();
            queues.clear();
            count
        };

        if self.connection.close().await {
            info!(queues = dropped, "Queue pool closed");
        }
    }
}
