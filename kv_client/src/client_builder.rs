use std::{fmt, time::Duration};

use crate::memcached::MemcachedConnection;
use crate::memory_client::MemoryClient;
use crate::{Backend, Client, ClientError, Completions};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8091;
pub const DEFAULT_BUCKET: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    #[default]
    Memcached,
    Memory,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientBuilder {
    backend_type: BackendType,
    host: String,
    port: u16,
    bucket: String,
    credentials: Option<Credentials>,
    connect_timeout: Duration,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            backend_type: BackendType::Memcached,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            bucket: DEFAULT_BUCKET.to_string(),
            credentials: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientBuilder {
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = backend_type;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Opens the connection. Every operation issued through the returned
    /// client later posts one result on `completions`.
    ///
    /// The memcached backend spawns local tasks, so this has to run inside a
    /// `tokio::task::LocalSet`.
    pub async fn connect(self, completions: Completions) -> Result<Client, ClientError> {
        let inner = match self.backend_type {
            BackendType::Memcached => Backend::Memcached(
                MemcachedConnection::connect(
                    &self.address(),
                    &self.bucket,
                    self.credentials.as_ref(),
                    self.connect_timeout,
                    completions,
                )
                .await?,
            ),
            BackendType::Memory => Backend::Memory(MemoryClient::new(completions)),
        };
        Ok(Client { inner })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use key_value::{Operation, OperationResult};
    use tokio::sync::mpsc;

    use super::*;
    use crate::ClientOperations;

    #[test]
    fn test_defaults() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.address(), "127.0.0.1:8091");
        assert_eq!(builder.backend_type, BackendType::Memcached);
        assert_eq!(builder.bucket, "default");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "loader".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("loader"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_memory_backend_connects_without_a_server() -> Result<(), ClientError> {
        let (completions, mut results) = mpsc::unbounded_channel();
        let client = ClientBuilder::default()
            .backend_type(BackendType::Memory)
            .host("unreachable.invalid")
            .connect(completions)
            .await?;
        assert!(matches!(client.backend(), Backend::Memory(_)));

        client.set("k", &Bytes::from_static(b"v"));
        assert_eq!(results.recv().await, Some(OperationResult::ok(Operation::Set)));
        Ok(())
    }
}
