//! Named queues and their settings.
//!
//! Producers and workers ask for a queue by name and get the same instance
//! back. Per-queue settings come from TOML files, one per queue:
//!
//! ```toml
//! [queue]
//! name = "mail"
//! lease_secs = 120
//! policy = "hold_until_released"
//! ```

use super::{DEFAULT_LEASE, LeasePolicy, MemoryQueue, QueueStore, lease_from_secs};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct QueueFile {
    queue: QueueSettings,
}

/// How one named queue should behave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    #[serde(default)]
    pub policy: LeasePolicy,
}

fn default_lease_secs() -> i64 {
    DEFAULT_LEASE.as_secs() as i64
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lease_secs: default_lease_secs(),
            policy: LeasePolicy::default(),
        }
    }

    pub fn lease(&self) -> Result<Duration> {
        lease_from_secs(self.lease_secs)
    }

    /// Load every `.toml` file in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Vec<Self>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read queue settings dir {}: {e}", dir.display()))
        })?;

        let mut settings = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let file: QueueFile = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("bad queue settings {}: {e}", path.display()))
                })?;
                file.queue.lease().map_err(|e| {
                    Error::Config(format!("bad queue settings {}: {e}", path.display()))
                })?;
                settings.push(file.queue);
            }
        }
        settings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(settings)
    }
}

/// Hands out one [`MemoryQueue`] per name, creating it on first use.
pub struct QueueFactory<T> {
    clock: Arc<dyn Clock>,
    settings: HashMap<String, QueueSettings>,
    queues: Mutex<HashMap<String, Arc<MemoryQueue<T>>>>,
}

impl<T> QueueFactory<T>
where
    T: Clone + Send,
{
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            settings: HashMap::new(),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Register settings for queues created later. Queues already handed
    /// out keep the settings they were created with.
    pub fn with_settings(mut self, settings: impl IntoIterator<Item = QueueSettings>) -> Self {
        for s in settings {
            self.settings.insert(s.name.clone(), s);
        }
        self
    }

    /// Settings a queue with this name gets.
    pub fn settings_for(&self, name: &str) -> QueueSettings {
        self.settings
            .get(name)
            .cloned()
            .unwrap_or_else(|| QueueSettings::new(name))
    }

    /// Get the queue called `name`, creating it if this is the first ask.
    pub fn get(&self, name: &str) -> Result<Arc<MemoryQueue<T>>> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = queues.get(name) {
            return Ok(Arc::clone(queue));
        }

        let settings = self.settings_for(name);
        let queue = MemoryQueue::new(name)
            .with_clock(Arc::clone(&self.clock))
            .with_default_lease(settings.lease()?)
            .with_policy(settings.policy);
        queue.create_queue()?;
        let queue = Arc::new(queue);
        queues.insert(name.to_string(), Arc::clone(&queue));

        info!(
            queue = name,
            lease_secs = settings.lease_secs,
            policy = %settings.policy,
            "queue created"
        );
        Ok(queue)
    }

    /// Names of the queues created so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Empty the named queue and start its next epoch. The instance stays
    /// registered, so producers and consumers holding it keep sharing it.
    /// Returns `false` if no such queue had been created.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let queue = self
            .queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned();
        match queue {
            Some(queue) => {
                queue.delete_queue()?;
                info!(queue = name, epoch = queue.epoch(), "queue deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<T> Default for QueueFactory<T>
where
    T: Clone + Send,
{
    fn default() -> Self {
        Self::new()
    }
}
