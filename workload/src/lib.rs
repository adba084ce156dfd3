pub mod classify;
pub mod config;
mod error;
pub mod isolation;
pub mod mix;
pub mod progress;
pub mod scheduler;
pub mod supervisor;
pub mod tracker;
pub mod worker;

pub use config::{Isolation, Mechanism, RunConfig, Target};
pub use error::WorkloadError;
pub use isolation::{ProcessIsolation, ThreadIsolation, WORKER_INDEX_FLAG};
pub use supervisor::{RunSummary, Supervisor};
pub use worker::{Worker, WorkerReport};
