//! Synchronized in-memory store used by the parallel runner.
//!
//! A dedicated owner thread holds every intermediate value and serves
//! get/put requests arriving over a channel. Workers never share the map
//! itself; they only hold a [`SharedMemoryDataSet`] proxy that sends
//! requests and waits for the reply.

use super::core::{value_kind, DataSet};
use crate::errors::DataSetError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::debug;

/// The owner thread is gone, so the request could not be served.
#[derive(Debug, Clone, Error)]
#[error("shared memory store is no longer running")]
pub struct StoreClosed;

enum StoreRequest {
    Load {
        name: String,
        reply: Sender<Option<Value>>,
    },
    Save {
        name: String,
        value: Value,
        reply: Sender<()>,
    },
    Exists {
        name: String,
        reply: Sender<bool>,
    },
    Release {
        name: String,
        reply: Sender<()>,
    },
    Keys {
        reply: Sender<Vec<String>>,
    },
    Shutdown,
}

/// Handle to the owner thread.
///
/// Dropping the last handle stops the thread.
#[derive(Debug)]
pub struct SharedMemoryStore {
    requests: Sender<StoreRequest>,
    owner: Mutex<Option<JoinHandle<()>>>,
}

impl SharedMemoryStore {
    /// Starts the owner thread.
    pub fn start() -> std::io::Result<Arc<Self>> {
        let (requests, inbox) = crossbeam_channel::unbounded();
        let owner = std::thread::Builder::new()
            .name("nodeflow-memory-store".to_string())
            .spawn(move || serve(&inbox))?;
        Ok(Arc::new(Self {
            requests,
            owner: Mutex::new(Some(owner)),
        }))
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> StoreRequest) -> Result<T, StoreClosed> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.requests.send(build(reply)).map_err(|_| StoreClosed)?;
        response.recv().map_err(|_| StoreClosed)
    }

    /// Returns a copy of the stored value.
    pub fn load(&self, name: &str) -> Result<Option<Value>, StoreClosed> {
        self.request(|reply| StoreRequest::Load {
            name: name.to_string(),
            reply,
        })
    }

    /// Stores a value, replacing any previous one.
    pub fn save(&self, name: &str, value: Value) -> Result<(), StoreClosed> {
        self.request(|reply| StoreRequest::Save {
            name: name.to_string(),
            value,
            reply,
        })
    }

    /// Whether a value is stored under `name`.
    pub fn exists(&self, name: &str) -> Result<bool, StoreClosed> {
        self.request(|reply| StoreRequest::Exists {
            name: name.to_string(),
            reply,
        })
    }

    /// Drops the value stored under `name`.
    pub fn release(&self, name: &str) -> Result<(), StoreClosed> {
        self.request(|reply| StoreRequest::Release {
            name: name.to_string(),
            reply,
        })
    }

    /// Names currently holding a value, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreClosed> {
        self.request(|reply| StoreRequest::Keys { reply })
    }
}

impl Drop for SharedMemoryStore {
    fn drop(&mut self) {
        let _ = self.requests.send(StoreRequest::Shutdown);
        if let Some(owner) = self.owner.lock().take() {
            let _ = owner.join();
        }
    }
}

fn serve(inbox: &Receiver<StoreRequest>) {
    let mut values: HashMap<String, Value> = HashMap::new();
    // Replies are best effort: a requester that went away no longer cares.
    while let Ok(request) = inbox.recv() {
        match request {
            StoreRequest::Load { name, reply } => {
                let _ = reply.send(values.get(&name).cloned());
            }
            StoreRequest::Save { name, value, reply } => {
                values.insert(name, value);
                let _ = reply.send(());
            }
            StoreRequest::Exists { name, reply } => {
                let _ = reply.send(values.contains_key(&name));
            }
            StoreRequest::Release { name, reply } => {
                values.remove(&name);
                let _ = reply.send(());
            }
            StoreRequest::Keys { reply } => {
                let mut keys: Vec<String> = values.keys().cloned().collect();
                keys.sort();
                let _ = reply.send(keys);
            }
            StoreRequest::Shutdown => break,
        }
    }
    debug!(remaining = values.len(), "Shared memory store stopped");
}

/// Proxy data set for one name in a [`SharedMemoryStore`].
#[derive(Debug, Clone)]
pub struct SharedMemoryDataSet {
    name: String,
    store: Arc<SharedMemoryStore>,
}

impl SharedMemoryDataSet {
    /// Creates a proxy for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<SharedMemoryStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl DataSet for SharedMemoryDataSet {
    fn type_name(&self) -> &'static str {
        "SharedMemoryDataSet"
    }

    fn describe(&self) -> BTreeMap<String, Value> {
        let mut desc = BTreeMap::new();
        desc.insert("name".to_string(), Value::String(self.name.clone()));
        if let Ok(Some(data)) = self.store.load(&self.name) {
            desc.insert("data".to_string(), Value::String(value_kind(&data).to_string()));
        }
        desc
    }

    fn load(&self) -> Result<Value, DataSetError> {
        self.store
            .load(&self.name)
            .map_err(|e| DataSetError::load(self.label(), e))?
            .ok_or_else(|| DataSetError::empty(self.label()))
    }

    fn save(&self, data: Value) -> Result<(), DataSetError> {
        self.store
            .save(&self.name, data)
            .map_err(|e| DataSetError::save(self.label(), e))
    }

    fn exists(&self) -> Result<bool, DataSetError> {
        self.store
            .exists(&self.name)
            .map_err(|e| DataSetError::exists(self.label(), e))
    }

    fn release(&self) {
        let _ = self.store.release(&self.name);
    }
}
