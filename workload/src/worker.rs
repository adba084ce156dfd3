use std::{sync::Arc, time::Duration};

use key_value::key_space::{KeySpace, payload};
use tokio::{
    runtime,
    sync::mpsc,
    task::LocalSet,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    classify::Outcome,
    config::RunConfig,
    error::WorkloadError,
    mix::OperationMix,
    progress::{ProgressMarkers, TICK_MARKER},
    scheduler::BatchScheduler,
    tracker::{CompletionTracker, QuotaState},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    pub worker: usize,
    pub quota: u64,
    pub ticks: u64,
    pub issued: u64,
    pub completed: u64,
    pub successes: u64,
    pub ignored: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl WorkerReport {
    fn record(&mut self, outcome: &Outcome) {
        self.completed += 1;
        match outcome {
            Outcome::Success(_) => self.successes += 1,
            Outcome::Ignorable(..) => self.ignored += 1,
            Outcome::Reportable(..) => self.errors += 1,
        }
    }

    pub fn ops_per_sec(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.completed as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        info!(
            worker = self.worker,
            quota = self.quota,
            ticks = self.ticks,
            issued = self.issued,
            completed = self.completed,
            successes = self.successes,
            ignored = self.ignored,
            errors = self.errors,
            elapsed_ms = self.elapsed.as_millis() as u64,
            ops_per_sec = format!("{:.1}", self.ops_per_sec()),
            "worker finished"
        );
    }
}

/// One isolated unit of load: a single connection driven through its quota
/// by a periodic timer, on a single-threaded event loop.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    quota: u64,
    config: Arc<RunConfig>,
    markers: ProgressMarkers,
}

impl Worker {
    pub fn new(index: usize, config: Arc<RunConfig>) -> Self {
        Self {
            index,
            quota: config.per_worker_quota(),
            markers: ProgressMarkers::stderr(config.verbose),
            config,
        }
    }

    pub fn with_markers(mut self, markers: ProgressMarkers) -> Self {
        self.markers = markers;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> String {
        format!("kvload: worker #{}", self.index)
    }

    /// Runs the worker on the current thread. The client's connection tasks
    /// are local to this worker, so everything it does is serialized.
    pub async fn run(self) -> Result<WorkerReport, WorkloadError> {
        let span = info_span!("worker", worker = self.index);
        LocalSet::new().run_until(self.drive()).instrument(span).await
    }

    /// Runs the worker to completion on a fresh current-thread runtime.
    pub fn run_blocking(self) -> Result<WorkerReport, WorkloadError> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run())
    }

    async fn drive(mut self) -> Result<WorkerReport, WorkloadError> {
        let started = Instant::now();
        let config = self.config.clone();
        let (completions, mut results) = mpsc::unbounded_channel();

        let client = match config.client_builder().connect(completions).await {
            Ok(client) => client,
            Err(source) => {
                error!(address = %config.target, error = %source, "connection failed");
                return Err(WorkloadError::Connect {
                    worker: self.index,
                    target: config.target.to_string(),
                    source,
                });
            }
        };
        debug!(address = %config.target, quota = self.quota, "connected");

        let mut tracker = CompletionTracker::new(self.quota);
        let mut mix = OperationMix::new(config.ratio);
        let mut scheduler = BatchScheduler::new(
            KeySpace::new(config.prefix.clone(), self.index, config.key_space),
            config.slice,
            payload(&self.identity(), config.size),
        );
        let mut report = WorkerReport {
            worker: self.index,
            quota: self.quota,
            ..WorkerReport::default()
        };

        let mut timer = time::interval_at(started + config.tick, config.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                result = results.recv() => {
                    let Some(result) = result else {
                        warn!("completion channel closed");
                        break;
                    };
                    let outcome = Outcome::classify(&result, &config.ignored_errors);
                    report.record(&outcome);
                    self.markers.mark(outcome.marker());
                    if tracker.record_completion() == QuotaState::Exhausted {
                        break;
                    }
                }
                _ = timer.tick() => {
                    self.markers.mark(TICK_MARKER);
                    scheduler.fire(&client, &mut mix);
                }
            }
        }

        // stops the timer and closes the connection; late completions are abandoned
        drop(timer);
        drop(client);

        report.ticks = scheduler.ticks();
        report.issued = scheduler.issued();
        report.elapsed = started.elapsed();
        debug!(remaining = tracker.remaining(), "quota exhausted");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use key_value::ErrorKind;
    use kv_client::{BackendType, mock_server::MockServer};
    use tokio::net::TcpListener;

    use super::*;
    use crate::{config::Target, progress::tests::SharedBuffer};

    fn memory_config(operations: u64, concurrency: usize, ratio: f64, slice: usize) -> RunConfig {
        RunConfig {
            operations,
            concurrency,
            ratio,
            slice,
            tick: Duration::from_millis(100),
            backend: BackendType::Memory,
            ..RunConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_workers_split_ten_sets() -> Result<(), WorkloadError> {
        let config = Arc::new(memory_config(10, 2, 0.0, 5));

        for index in 0..2 {
            let report = Worker::new(index, config.clone()).run().await?;
            assert_eq!(report.worker, index);
            assert_eq!(report.quota, 5);
            // five completions leave the counter at zero; the stop needs a sixth
            assert_eq!(report.ticks, 2);
            assert_eq!(report.issued, 10);
            assert_eq!(report.completed, 6);
            assert_eq!(report.successes, 6);
            assert_eq!(report.errors, 0);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_issues_at_least_the_quota_and_stops_within_a_tick() -> Result<(), WorkloadError> {
        for (operations, slice) in [(0, 1), (1, 1), (7, 3), (9, 3), (1000, 64)] {
            let config = Arc::new(memory_config(operations, 1, 0.5, slice));
            let report = Worker::new(0, config).run().await?;

            assert!(report.issued >= report.quota);
            assert_eq!(report.completed, report.quota + 1);
            // the tick that pushed the count below zero is the last one
            let needed_ticks = (report.quota + 1).div_ceil(slice as u64);
            assert_eq!(report.ticks, needed_ticks);
            assert_eq!(report.issued, needed_ticks * slice as u64);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_waits_a_full_tick() -> Result<(), WorkloadError> {
        let config = Arc::new(RunConfig {
            tick: Duration::from_secs(3),
            ..memory_config(0, 1, 0.0, 1)
        });
        let report = Worker::new(0, config).run().await?;
        assert_eq!(report.ticks, 1);
        assert!(report.elapsed >= Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_keys_are_ignorable() -> Result<(), WorkloadError> {
        let markers = SharedBuffer::default();
        let config = Arc::new(memory_config(2, 1, 1.0, 3));

        let report = Worker::new(0, config)
            .with_markers(ProgressMarkers::to_writer(markers.clone()))
            .run()
            .await?;

        assert_eq!(report.ignored, 3);
        assert_eq!(report.errors, 0);
        assert_eq!(report.completed, 3);
        assert_eq!(markers.contents(), ".ggg");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_failures_are_reported() -> Result<(), WorkloadError> {
        let markers = SharedBuffer::default();
        let config = Arc::new(RunConfig {
            ignored_errors: vec![ErrorKind::Exists],
            ..memory_config(1, 1, 1.0, 2)
        });

        let report = Worker::new(0, config)
            .with_markers(ProgressMarkers::to_writer(markers.clone()))
            .run()
            .await?;

        assert_eq!(report.errors, 2);
        assert_eq!(report.ignored, 0);
        assert_eq!(markers.contents(), ".EE");
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal_to_the_worker() -> Result<(), WorkloadError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        drop(listener);

        let markers = SharedBuffer::default();
        let config = Arc::new(RunConfig {
            target: Target::new(&address, "default"),
            connect_timeout: Duration::from_secs(2),
            ..RunConfig::default()
        });

        let outcome = Worker::new(4, config)
            .with_markers(ProgressMarkers::to_writer(markers.clone()))
            .run()
            .await;

        assert!(matches!(outcome, Err(WorkloadError::Connect { worker: 4, .. })));
        assert_eq!(markers.contents(), "");
        Ok(())
    }

    #[tokio::test]
    async fn test_drives_a_memcached_server() -> Result<(), WorkloadError> {
        let server = MockServer::start().await?;
        let config = Arc::new(RunConfig {
            operations: 50,
            slice: 20,
            ratio: 0.3,
            tick: Duration::from_millis(10),
            target: Target::new(&server.address().to_string(), "default"),
            ..RunConfig::default()
        });

        let report = Worker::new(0, config).run().await?;

        assert_eq!(report.completed, 51);
        assert_eq!(report.errors, 0);
        assert!(report.issued >= 60);
        assert_eq!(report.issued % 20, 0);
        assert!(server.requests() >= 51);
        Ok(())
    }

    #[test]
    fn test_run_blocking_on_own_runtime() -> Result<(), WorkloadError> {
        let config = Arc::new(RunConfig {
            tick: Duration::from_millis(1),
            ..memory_config(20, 1, 0.0, 8)
        });
        let report = Worker::new(0, config).run_blocking()?;
        assert_eq!(report.completed, 21);
        assert_eq!(report.ticks, 3);
        Ok(())
    }
}
