use std::{
    ffi::OsString,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    thread,
};

use tokio::{
    process::{Child, Command},
    sync::oneshot,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::WorkloadError,
    worker::{Worker, WorkerReport},
};

/// Hidden flag that turns a re-executed copy of the binary into one worker.
pub const WORKER_INDEX_FLAG: &str = "--worker-index";

/// How a worker is kept apart from its siblings.
pub trait IsolationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn launch(&self, worker: Worker) -> Result<WorkerHandle, WorkloadError>;
}

/// Each worker gets a dedicated OS thread running its own event loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadIsolation;

impl IsolationStrategy for ThreadIsolation {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn launch(&self, worker: Worker) -> Result<WorkerHandle, WorkloadError> {
        let index = worker.index();
        let (tx, rx) = oneshot::channel();
        // a panicking worker drops `tx`, which the handle reports as a panic
        thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || {
                let _ = tx.send(worker.run_blocking());
            })
            .map_err(|source| WorkloadError::Spawn {
                worker: index,
                source,
            })?;
        Ok(WorkerHandle::Thread { worker: index, result: rx })
    }
}

/// Each worker is a fresh copy of this executable, started with the same
/// arguments plus `--worker-index n`.
#[derive(Debug, Clone)]
pub struct ProcessIsolation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessIsolation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `None` when this platform cannot start worker processes, or when the
    /// running executable cannot be located.
    pub fn for_current_exe(args: impl IntoIterator<Item = OsString>) -> Option<Self> {
        if !cfg!(any(unix, windows)) {
            return None;
        }
        match std::env::current_exe() {
            Ok(program) => Some(Self::new(program, args.into_iter().collect())),
            Err(error) => {
                debug!(%error, "cannot locate the running executable");
                None
            }
        }
    }

    fn command(&self, index: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(WORKER_INDEX_FLAG)
            .arg(index.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl IsolationStrategy for ProcessIsolation {
    fn name(&self) -> &'static str {
        "process"
    }

    fn launch(&self, worker: Worker) -> Result<WorkerHandle, WorkloadError> {
        let index = worker.index();
        let child = self
            .command(index)
            .spawn()
            .map_err(|source| WorkloadError::Spawn {
                worker: index,
                source,
            })?;
        debug!(worker = index, pid = child.id(), "worker process started");
        Ok(WorkerHandle::Process { worker: index, child })
    }
}

#[derive(Debug)]
pub enum WorkerHandle {
    Thread {
        worker: usize,
        result: oneshot::Receiver<Result<WorkerReport, WorkloadError>>,
    },
    Process {
        worker: usize,
        child: Child,
    },
}

impl WorkerHandle {
    #[cfg(test)]
    fn worker(&self) -> usize {
        match self {
            WorkerHandle::Thread { worker, .. } | WorkerHandle::Process { worker, .. } => *worker,
        }
    }

    /// Waits for the worker to terminate. Call at most once per handle.
    pub async fn wait(&mut self) -> WorkerExit {
        match self {
            WorkerHandle::Thread { worker, result } => match result.await {
                Ok(Ok(report)) => WorkerExit::Finished(report),
                Ok(Err(error)) => WorkerExit::Failed {
                    worker: *worker,
                    error,
                },
                Err(_) => WorkerExit::Failed {
                    worker: *worker,
                    error: WorkloadError::Panicked { worker: *worker },
                },
            },
            WorkerHandle::Process { worker, child } => match child.wait().await {
                Ok(status) => WorkerExit::Exited {
                    worker: *worker,
                    status,
                },
                Err(error) => WorkerExit::Failed {
                    worker: *worker,
                    error: WorkloadError::Runtime(error),
                },
            },
        }
    }

    /// Kills a worker process. Threads cannot be stopped from outside; they
    /// end with the process.
    pub async fn kill(&mut self) {
        if let WorkerHandle::Process { worker, child } = self {
            if let Err(error) = child.kill().await {
                debug!(worker = *worker, %error, "worker process already gone");
            }
        }
    }
}

#[derive(Debug)]
pub enum WorkerExit {
    Finished(WorkerReport),
    Failed { worker: usize, error: WorkloadError },
    Exited { worker: usize, status: ExitStatus },
}

impl WorkerExit {
    pub fn worker(&self) -> usize {
        match self {
            WorkerExit::Finished(report) => report.worker,
            WorkerExit::Failed { worker, .. } | WorkerExit::Exited { worker, .. } => *worker,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            WorkerExit::Finished(_) => true,
            WorkerExit::Failed { .. } => false,
            WorkerExit::Exited { status, .. } => status.success(),
        }
    }

    pub fn log(&self) {
        match self {
            WorkerExit::Finished(report) => report.log(),
            WorkerExit::Failed { worker, error } => {
                error!(worker = *worker, %error, "worker failed")
            }
            WorkerExit::Exited { worker, status } if status.success() => {
                info!(worker = *worker, "worker process exited")
            }
            WorkerExit::Exited { worker, status } => {
                warn!(worker = *worker, %status, "worker process exited abnormally")
            }
        }
    }
}
