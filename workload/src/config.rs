use std::{fmt, time::Duration};

use key_value::{ErrorKind, key_space::KeySpace};
use kv_client::{
    BackendType, ClientBuilder, Credentials,
    client_builder::{DEFAULT_BUCKET, DEFAULT_HOST, DEFAULT_PORT},
    protocol::{MAX_BODY_LEN, MAX_KEY_LEN, SET_EXTRAS_LEN},
};

use crate::error::WorkloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Processes when the platform can spawn them, threads otherwise.
    #[default]
    Auto,
    Process,
    Thread,
}

/// I/O multiplexing mechanism requested on the command line. The reactor
/// always runs on the platform's native one; this is only a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Select,
    Epoll,
    Kqueue,
}

impl Mechanism {
    pub fn native() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Mechanism::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )) {
            Mechanism::Kqueue
        } else {
            Mechanism::Select
        }
    }
}

impl Default for Mechanism {
    fn default() -> Self {
        Mechanism::native()
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::Select => f.write_str("select"),
            Mechanism::Epoll => f.write_str("epoll"),
            Mechanism::Kqueue => f.write_str("kqueue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub credentials: Option<Credentials>,
}

impl Target {
    /// Parses `host[:port]`. An empty host means localhost; a missing, zero or
    /// malformed port falls back to the default port. An empty bucket name
    /// means the default bucket.
    pub fn new(hostname: &str, bucket: &str) -> Self {
        let (host, port) = match hostname.rsplit_once(':') {
            Some((host, port)) => (host, port.trim().parse::<u16>().unwrap_or(0)),
            None => (hostname, 0),
        };
        let host = host.trim();
        Self {
            host: if host.is_empty() { DEFAULT_HOST } else { host }.to_string(),
            port: if port == 0 { DEFAULT_PORT } else { port },
            bucket: if bucket.is_empty() { DEFAULT_BUCKET } else { bucket }.to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::new("", "")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.bucket)
    }
}

/// Everything a run needs, fixed at startup and shared read-only by workers.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub operations: u64,
    pub concurrency: usize,
    /// Probability that a slot issues a GET.
    pub ratio: f64,
    pub size: usize,
    pub prefix: String,
    pub key_space: usize,
    pub slice: usize,
    pub tick: Duration,
    pub target: Target,
    pub verbose: bool,
    pub isolation: Isolation,
    pub mechanism: Mechanism,
    pub backend: BackendType,
    pub ignored_errors: Vec<ErrorKind>,
    pub connect_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            concurrency: 1,
            ratio: 0.5,
            size: 256,
            prefix: "em-couchbase:".to_string(),
            key_space: 10,
            slice: 1_000,
            tick: Duration::from_secs(1),
            target: Target::default(),
            verbose: false,
            isolation: Isolation::Auto,
            mechanism: Mechanism::native(),
            backend: BackendType::Memcached,
            ignored_errors: vec![ErrorKind::NotFound],
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.concurrency == 0 {
            return Err(WorkloadError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ratio) {
            return Err(WorkloadError::Config(format!(
                "ratio must be within [0, 1], got {}",
                self.ratio
            )));
        }
        if self.slice == 0 {
            return Err(WorkloadError::Config("slice must be at least 1".to_string()));
        }
        if self.tick.is_zero() {
            return Err(WorkloadError::Config("tick must be positive".to_string()));
        }
        if self.key_space == 0 {
            return Err(WorkloadError::Config(
                "key space must hold at least one key".to_string(),
            ));
        }

        let longest_key = self.longest_key();
        if longest_key.len() > MAX_KEY_LEN {
            return Err(WorkloadError::Config(format!(
                "keys like {longest_key:?} are {} bytes, the limit is {MAX_KEY_LEN}",
                longest_key.len()
            )));
        }
        let max_size = MAX_BODY_LEN - SET_EXTRAS_LEN - longest_key.len();
        if self.size > max_size {
            return Err(WorkloadError::Config(format!(
                "value size {} does not fit in one frame, the limit is {max_size}",
                self.size
            )));
        }
        Ok(())
    }

    // the highest worker index and slot have the most digits
    fn longest_key(&self) -> String {
        let worker = self.concurrency.saturating_sub(1);
        let slot = self.slice.min(self.key_space).saturating_sub(1);
        KeySpace::new(self.prefix.as_str(), worker, self.key_space).key(slot)
    }

    /// Operations each worker is responsible for: `ceil(operations / concurrency)`.
    pub fn per_worker_quota(&self) -> u64 {
        self.operations.div_ceil(self.concurrency.max(1) as u64)
    }

    pub fn client_builder(&self) -> ClientBuilder {
        ClientBuilder::default()
            .backend_type(self.backend)
            .host(self.target.host.clone())
            .port(self.target.port)
            .bucket(self.target.bucket.clone())
            .credentials(self.target.credentials.clone())
            .connect_timeout(self.connect_timeout)
    }
}
