pub mod client_builder;
mod error;
mod memcached;
mod memory_client;
#[cfg(any(test, feature = "mock-server"))]
pub mod mock_server;
pub mod protocol;

use bytes::Bytes;
use key_value::OperationResult;
use tokio::sync::mpsc::UnboundedSender;

pub use client_builder::{BackendType, ClientBuilder, Credentials};
pub use error::ClientError;
pub use memcached::MemcachedConnection;
pub use memory_client::MemoryClient;

/// Where a client posts the outcome of every operation it issued.
pub type Completions = UnboundedSender<OperationResult>;

/// Fire-and-forget request issuance. Neither call waits for the server; the
/// outcome arrives later on the client's completion channel.
pub trait ClientOperations {
    fn get(&self, key: &str);
    fn set(&self, key: &str, value: &Bytes);
}

#[derive(Debug)]
pub enum Backend {
    Memcached(MemcachedConnection),
    Memory(MemoryClient),
}

#[derive(Debug)]
pub struct Client {
    inner: Backend,
}

impl Client {
    #[cfg(test)]
    pub(crate) fn backend(&self) -> &Backend {
        &self.inner
    }
}

impl ClientOperations for Client {
    fn get(&self, key: &str) {
        match &self.inner {
            Backend::Memcached(connection) => connection.get(key),
            Backend::Memory(client) => client.get(key),
        }
    }

    fn set(&self, key: &str, value: &Bytes) {
        match &self.inner {
            Backend::Memcached(connection) => connection.set(key, value),
            Backend::Memory(client) => client.set(key, value),
        }
    }
}
