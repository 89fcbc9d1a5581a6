//! Endpoint abstraction.
//!
//! The endpoint is the externally visible read/write surface of a bridge.
//! A registry creates one when the bridge attaches and hands back a handle;
//! dropping the handle destroys the endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// The two entry points an endpoint exposes, plus cooperative cancellation.
pub trait ByteStream: Send + Sync {
    /// Blocks until bytes are available and returns at most `max_count`.
    fn read(&self, max_count: usize) -> Result<Vec<u8>>;

    /// Sends bytes, returning how many were accepted.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Interrupts a blocked `read`, or the next one if none is waiting.
    fn interrupt(&self);
}

/// Creates endpoints bound to a bridge.
pub trait EndpointRegistry {
    /// Handle that keeps the endpoint alive. Dropping it removes the endpoint.
    type Endpoint;

    /// Creates an endpoint named `name` that forwards to `stream`.
    fn create(&mut self, name: &str, stream: Arc<dyn ByteStream>) -> Result<Self::Endpoint>;
}

type Table = Arc<Mutex<HashMap<String, Arc<dyn ByteStream>>>>;

/// In-process registry: endpoints are looked up by name.
#[derive(Clone, Default)]
pub struct LocalRegistry {
    table: Table,
}

impl LocalRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stream registered under `name`.
    pub fn open(&self, name: &str) -> Option<Arc<dyn ByteStream>> {
        self.table.lock().get(name).cloned()
    }

    /// Returns true if an endpoint named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().contains_key(name)
    }

    /// Returns the number of live endpoints.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if no endpoint exists.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl EndpointRegistry for LocalRegistry {
    type Endpoint = LocalEndpoint;

    fn create(&mut self, name: &str, stream: Arc<dyn ByteStream>) -> Result<LocalEndpoint> {
        let mut table = self.table.lock();
        if table.contains_key(name) {
            return Err(Error::Endpoint(format!("endpoint '{}' already exists", name)));
        }
        table.insert(name.to_string(), stream);
        debug!("endpoint '{}' created", name);

        Ok(LocalEndpoint {
            name: name.to_string(),
            table: Arc::clone(&self.table),
        })
    }
}

/// Handle to an endpoint in a [`LocalRegistry`].
pub struct LocalEndpoint {
    name: String,
    table: Table,
}

impl LocalEndpoint {
    /// Returns the endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.table.lock().remove(&self.name);
        debug!("endpoint '{}' destroyed", self.name);
    }
}
