use std::{future::Future, sync::Arc};

use tokio::signal;
use tracing::{info, warn};

use crate::{
    config::{Isolation, Mechanism, RunConfig},
    isolation::{IsolationStrategy, ProcessIsolation, ThreadIsolation, WorkerExit, WorkerHandle},
    worker::Worker,
};

#[derive(Debug)]
pub struct RunSummary {
    pub exits: Vec<WorkerExit>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.exits.iter().filter(|exit| !exit.is_success()).count()
    }
}

/// Starts one worker per unit of concurrency and waits for all of them.
pub struct Supervisor {
    config: Arc<RunConfig>,
    strategy: Box<dyn IsolationStrategy>,
}

impl Supervisor {
    /// `processes` is `None` when worker processes cannot be started; without it
    /// every isolation preference ends up on threads.
    pub fn new(config: RunConfig, processes: Option<ProcessIsolation>) -> Self {
        let native = Mechanism::native();
        if config.mechanism != native {
            warn!(requested = %config.mechanism, using = %native, "I/O mechanism not available, using the native one");
        }

        let strategy: Box<dyn IsolationStrategy> = match (config.isolation, processes) {
            (Isolation::Thread, _) => Box::new(ThreadIsolation),
            (Isolation::Auto | Isolation::Process, Some(processes)) => Box::new(processes),
            (Isolation::Process, None) => {
                warn!("worker processes are not supported here, falling back to threads");
                Box::new(ThreadIsolation)
            }
            (Isolation::Auto, None) => Box::new(ThreadIsolation),
        };

        Self {
            config: Arc::new(config),
            strategy,
        }
    }

    pub fn isolation(&self) -> &'static str {
        self.strategy.name()
    }

    /// Runs until every worker has terminated or the user interrupts.
    pub async fn run(self) -> RunSummary {
        self.run_until(async {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "cannot listen for interrupts");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until(self, interrupt: impl Future<Output = ()>) -> RunSummary {
        let config = &self.config;
        info!(
            workers = config.concurrency,
            quota = config.per_worker_quota(),
            target = %config.target,
            isolation = self.isolation(),
            "starting workers"
        );

        let mut exits = Vec::with_capacity(config.concurrency);
        let mut handles = Vec::with_capacity(config.concurrency);
        for index in 0..config.concurrency {
            match self.strategy.launch(Worker::new(index, config.clone())) {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    let exit = WorkerExit::Failed {
                        worker: index,
                        error,
                    };
                    exit.log();
                    exits.push(exit);
                }
            }
        }

        let interrupted = {
            let join = join_all(&mut handles, &mut exits);
            tokio::pin!(join, interrupt);
            tokio::select! {
                _ = &mut join => false,
                _ = &mut interrupt => true,
            }
        };

        if interrupted {
            info!("Caught SIGINT. Terminating...");
            for handle in handles.iter_mut() {
                handle.kill().await;
            }
        }

        exits.sort_by_key(WorkerExit::worker);
        RunSummary { exits, interrupted }
    }
}

async fn join_all(handles: &mut [WorkerHandle], exits: &mut Vec<WorkerExit>) {
    for handle in handles.iter_mut() {
        let exit = handle.wait().await;
        exit.log();
        exits.push(exit);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kv_client::BackendType;

    use super::*;

    fn memory_config(concurrency: usize) -> RunConfig {
        RunConfig {
            operations: 30,
            concurrency,
            slice: 4,
            tick: Duration::from_millis(1),
            backend: BackendType::Memory,
            isolation: Isolation::Thread,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn test_all_thread_workers_finish() {
        let supervisor = Supervisor::new(memory_config(3), None);
        assert_eq!(supervisor.isolation(), "thread");

        let summary = supervisor.run_until(std::future::pending()).await;

        assert!(!summary.interrupted);
        assert_eq!(summary.failed(), 0);
        let workers: Vec<usize> = summary.exits.iter().map(WorkerExit::worker).collect();
        assert_eq!(workers, [0, 1, 2]);
        for exit in &summary.exits {
            match exit {
                WorkerExit::Finished(report) => {
                    assert_eq!(report.quota, 10);
                    assert_eq!(report.completed, 11);
                    assert!(report.issued >= report.quota);
                }
                other => panic!("unexpected exit: {other:?}"),
            }
        }
    }

    #[test]
    fn test_process_preference_falls_back_to_threads() {
        let config = RunConfig {
            isolation: Isolation::Process,
            ..memory_config(1)
        };
        assert_eq!(Supervisor::new(config, None).isolation(), "thread");

        let config = RunConfig {
            isolation: Isolation::Auto,
            ..memory_config(1)
        };
        let processes = ProcessIsolation::new("/bin/true", Vec::new());
        assert_eq!(Supervisor::new(config, Some(processes)).isolation(), "process");
    }

    #[tokio::test]
    async fn test_interrupt_ends_the_run_promptly() {
        let config = RunConfig {
            operations: 1_000_000,
            slice: 1,
            tick: Duration::from_secs(60),
            ..memory_config(2)
        };

        let started = std::time::Instant::now();
        let summary = Supervisor::new(config, None)
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await;

        assert!(summary.interrupted);
        assert!(summary.exits.is_empty());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_kills_worker_processes() {
        let config = RunConfig {
            isolation: Isolation::Process,
            ..memory_config(2)
        };
        let processes = ProcessIsolation::new("/bin/sh", vec!["-c".into(), "sleep 30".into()]);

        let started = std::time::Instant::now();
        let summary = Supervisor::new(config, Some(processes))
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(summary.interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
