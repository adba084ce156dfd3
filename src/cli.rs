use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use key_value::ErrorKind;
use kv_client::{BackendType, Credentials};
use workload::{Isolation, Mechanism, RunConfig, Target, WorkloadError};

/// Load generator for memcached-protocol key-value servers.
///
/// Spawns `concurrency` workers; every `tick` seconds each one fires `slice`
/// pipelined GET/SET requests until it has seen its share of `operations`
/// completions.
#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_flag = true)]
pub struct Cli {
    /// I/O multiplexing mechanism (the native one is always used)
    #[arg(short, long, value_enum, value_name = "MECHANISM")]
    pub mechanism: Option<MechanismArg>,

    /// Seconds between two batches
    #[arg(short, long, value_name = "SECONDS", default_value_t = 1.0)]
    pub tick: f64,

    /// Operations issued per tick
    #[arg(short = 'S', long, value_name = "NUM", default_value_t = 1000)]
    pub slice: usize,

    /// Key prefix
    #[arg(short = 'P', long, default_value = "em-couchbase:")]
    pub prefix: String,

    /// Number of workers
    #[arg(short, long, value_name = "NUM", default_value_t = 1)]
    pub concurrency: usize,

    /// Total number of operations, split across workers
    #[arg(short = 'n', long, value_name = "NUM", default_value_t = 10_000)]
    pub operations: u64,

    /// Probability that an operation is a GET
    #[arg(short, long, default_value_t = 0.5)]
    pub ratio: f64,

    /// Value size in bytes
    #[arg(short, long, value_name = "BYTES", default_value_t = 256)]
    pub size: usize,

    /// Server address
    #[arg(short, long, value_name = "HOST[:PORT]", default_value = "127.0.0.1:8091")]
    pub hostname: String,

    /// Bucket to select after authenticating
    #[arg(short, long, value_name = "NAME", default_value = "default")]
    pub bucket: String,

    /// SASL user name
    #[arg(short, long)]
    pub user: Option<String>,

    /// SASL password
    #[arg(short, long = "passwd", value_name = "PASSWD")]
    pub password: Option<String>,

    /// Print a progress marker per tick and per completion
    #[arg(short, long, overrides_with = "no_verbose")]
    pub verbose: bool,

    #[arg(long, overrides_with = "verbose")]
    pub no_verbose: bool,

    /// How workers are kept apart
    #[arg(long, value_enum, default_value_t = IsolationArg::Auto)]
    pub isolation: IsolationArg,

    /// Client backend; `memory` needs no server
    #[arg(long, value_enum, default_value_t = BackendArg::Memcached)]
    pub backend: BackendArg,

    /// Operation error that counts as success (repeatable)
    #[arg(long = "ignore-error", value_name = "KIND", default_value = "not-found")]
    pub ignore_errors: Vec<ErrorKind>,

    /// Distinct keys per worker
    #[arg(long, value_name = "NUM", default_value_t = 10)]
    pub keys: usize,

    /// Seconds allowed for connecting, authenticating and selecting the bucket
    #[arg(long, value_name = "SECONDS", default_value_t = 5.0)]
    pub connect_timeout: f64,

    /// Print help
    #[arg(short = '?', long, action = ArgAction::Help)]
    pub help: Option<bool>,

    #[arg(long = "worker-index", hide = true)]
    pub worker_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MechanismArg {
    Select,
    Epoll,
    Kqueue,
}

impl From<MechanismArg> for Mechanism {
    fn from(value: MechanismArg) -> Self {
        match value {
            MechanismArg::Select => Mechanism::Select,
            MechanismArg::Epoll => Mechanism::Epoll,
            MechanismArg::Kqueue => Mechanism::Kqueue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    Auto,
    Process,
    Thread,
}

impl From<IsolationArg> for Isolation {
    fn from(value: IsolationArg) -> Self {
        match value {
            IsolationArg::Auto => Isolation::Auto,
            IsolationArg::Process => Isolation::Process,
            IsolationArg::Thread => Isolation::Thread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Memcached,
    Memory,
}

impl From<BackendArg> for BackendType {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Memcached => BackendType::Memcached,
            BackendArg::Memory => BackendType::Memory,
        }
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration, WorkloadError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| WorkloadError::Config(format!("{flag} must be a non-negative number of seconds, got {value}")))
}

impl Cli {
    /// Builds and validates the run configuration.
    pub fn to_run_config(&self) -> Result<RunConfig, WorkloadError> {
        let credentials = self.user.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        });
        if credentials.is_none() && self.password.is_some() {
            return Err(WorkloadError::Config(
                "a password was given without a user".to_string(),
            ));
        }

        let config = RunConfig {
            operations: self.operations,
            concurrency: self.concurrency,
            ratio: self.ratio,
            size: self.size,
            prefix: self.prefix.clone(),
            key_space: self.keys,
            slice: self.slice,
            tick: seconds("tick", self.tick)?,
            target: Target::new(&self.hostname, &self.bucket).with_credentials(credentials),
            verbose: self.verbose && !self.no_verbose,
            isolation: self.isolation.into(),
            mechanism: self.mechanism.map(Mechanism::from).unwrap_or_else(Mechanism::native),
            backend: self.backend.into(),
            ignored_errors: self.ignore_errors.clone(),
            connect_timeout: seconds("connect timeout", self.connect_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }
}
