//! Scheduler: runs the scanner and worker on fixed intervals
//!
//! Each job is a single task driven by its own interval, so a job never
//! overlaps itself; ticks missed while a pass runs are skipped. The jobs
//! share the store lock and nothing else. On shutdown a job finishes the
//! pass it is in before its task exits.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use eyre::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::metrics;
use crate::scanner::Scanner;
use crate::watcher::Watcher;
use crate::worker::Worker;

/// Passes between heartbeat logs
const HEARTBEAT_EVERY: u64 = 10;

pub struct Scheduler {
    scanner: Scanner,
    worker: Worker,
    watcher: Option<Watcher>,
    scan_interval: Duration,
    work_interval: Duration,
    metrics_textfile: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(
        scanner: Scanner,
        worker: Worker,
        watcher: Option<Watcher>,
        config: &SchedulerConfig,
        metrics_textfile: Option<PathBuf>,
    ) -> Self {
        Self {
            scanner,
            worker,
            watcher,
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            work_interval: Duration::from_secs(config.work_interval_secs),
            metrics_textfile,
        }
    }

    /// One scanner pass followed by one worker pass, before any interval
    pub async fn bootstrap(&self) {
        info!("Bootstrapping: one scanner pass, then one worker pass");
        run_scanner(&self.scanner, self.metrics_textfile.as_ref()).await;
        run_worker(&self.worker, self.metrics_textfile.as_ref()).await;
    }

    /// Bootstrap, then run every job until `shutdown` fires
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        self.bootstrap().await;

        info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            work_interval_secs = self.work_interval.as_secs(),
            watcher = self.watcher.is_some(),
            "Scheduler starting"
        );
        metrics::UP.set(1.0);

        let Scheduler {
            scanner,
            worker,
            watcher,
            scan_interval,
            work_interval,
            metrics_textfile,
        } = self;

        let (watcher_shutdown_tx, watcher_shutdown_rx) = mpsc::channel::<()>(1);
        let watcher_task = watcher.map(|watcher| {
            tokio::spawn(async move {
                if let Err(e) = watcher.run(watcher_shutdown_rx).await {
                    error!(error = %e, "Event watcher stopped with error");
                }
            })
        });

        // Jobs check for shutdown only between passes, so a pass that has
        // started always finishes and saves
        let (stop_tx, stop_rx) = watch::channel(false);

        let scanner_textfile = metrics_textfile.clone();
        let mut scanner_task = tokio::spawn(run_job(
            "scanner",
            scan_interval,
            stop_rx.clone(),
            move || {
                let scanner = scanner.clone();
                let textfile = scanner_textfile.clone();
                async move { run_scanner(&scanner, textfile.as_ref()).await }
            },
        ));

        let worker_textfile = metrics_textfile;
        let mut worker_task = tokio::spawn(run_job(
            "worker",
            work_interval,
            stop_rx,
            move || {
                let worker = worker.clone();
                let textfile = worker_textfile.clone();
                async move { run_worker(&worker, textfile.as_ref()).await }
            },
        ));

        let result = tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, waiting for running passes to finish");
                Ok(())
            }
            joined = &mut scanner_task => {
                error!("Scanner task exited unexpectedly");
                joined.map_err(|e| eyre::eyre!("scanner task panicked: {}", e))
            }
            joined = &mut worker_task => {
                error!("Worker task exited unexpectedly");
                joined.map_err(|e| eyre::eyre!("worker task panicked: {}", e))
            }
        };

        let _ = stop_tx.send(true);
        for (job, task) in [("scanner", scanner_task), ("worker", worker_task)] {
            if task.is_finished() {
                continue;
            }
            if let Err(e) = task.await {
                error!(job, error = %e, "Job task failed while stopping");
            }
        }
        let _ = watcher_shutdown_tx.send(()).await;
        if let Some(task) = watcher_task {
            let _ = task.await;
        }

        metrics::UP.set(0.0);
        result
    }
}

/// Run `pass` on every tick of `period` until `stop` turns true.
///
/// The first tick is skipped since bootstrap already ran both jobs.
async fn run_job<F, Fut>(
    job: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    pass: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut passes = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        passes += 1;
        if passes % HEARTBEAT_EVERY == 1 {
            info!(job, passes, "Scheduler heartbeat");
        }
        pass().await;
    }

    info!(job, passes, "Job stopped");
}

async fn run_scanner(scanner: &Scanner, textfile: Option<&PathBuf>) {
    if let Err(e) = scanner.run_pass().await {
        error!(job = "scanner", error = %format!("{:#}", e), "Scanner pass failed");
        metrics::record_pass_failure("scanner");
    }
    write_metrics(textfile);
}

async fn run_worker(worker: &Worker, textfile: Option<&PathBuf>) {
    if let Err(e) = worker.run_pass().await {
        error!(job = "worker", error = %format!("{:#}", e), "Worker pass failed");
        metrics::record_pass_failure("worker");
    }
    write_metrics(textfile);
}

fn write_metrics(textfile: Option<&PathBuf>) {
    if let Some(path) = textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
        }
    }
}
