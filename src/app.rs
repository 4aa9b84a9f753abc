use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::collector::Collector;
use crate::config::{ConfigLoader, MAX_SCAN_INTERVAL_SECONDS, ResolvedConfig};
use crate::domain::RunDescriptor;
use crate::error::CollectorError;
use crate::interop::QualityMetricsDecoder;
use crate::locator::{RunLocator, ScanEntry};
use crate::record::RunRecord;
use crate::store::OutputStore;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub runs_ready: usize,
    pub runs_pending: usize,
    pub runs_skipped_unrecognized: usize,
    pub runs_skipped_existing: usize,
    pub runs_collected: Vec<String>,
    pub interrupted: bool,
}

/// The polling loop. Config is reloaded before each run and never while one
/// is being collected; shutdown requests are honoured between runs.
pub struct App<Q: QualityMetricsDecoder> {
    config_path: Option<PathBuf>,
    config: ResolvedConfig,
    quality: Q,
    shutdown: Arc<AtomicBool>,
}

impl<Q: QualityMetricsDecoder> App<Q> {
    pub fn new(config_path: Option<PathBuf>, config: ResolvedConfig, quality: Q) -> Self {
        Self {
            config_path,
            config,
            quality,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Setting the returned flag makes the loop stop after the current run.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn reload_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match ConfigLoader::resolve(Some(path.as_path())) {
            Ok(config) => {
                tracing::debug!(event_type = "config_loaded", config_file = %path.display());
                self.config = config;
            }
            Err(err) => tracing::error!(
                event_type = "load_config_failed",
                config_file = %path.display(),
                error = %err,
            ),
        }
    }

    pub fn run(&mut self, once: bool) -> Result<(), CollectorError> {
        loop {
            let started = Instant::now();
            let summary = self.scan_once()?;
            tracing::info!(
                event_type = "scan_complete",
                scan_duration_seconds = started.elapsed().as_secs_f64(),
                num_runs_collected = summary.runs_collected.len(),
                num_runs_pending = summary.runs_pending,
                num_runs_skipped_existing = summary.runs_skipped_existing,
            );
            if once || summary.interrupted || self.shutdown_requested() {
                break;
            }
            self.sleep_until_next_scan();
            if self.shutdown_requested() {
                break;
            }
        }
        if self.shutdown_requested() {
            tracing::info!(event_type = "exit_after_shutdown_request");
        }
        Ok(())
    }

    pub fn scan_once(&mut self) -> Result<ScanSummary, CollectorError> {
        self.reload_config();
        if self.config.output_directory.is_none() {
            tracing::warn!(event_type = "output_directory_not_configured");
        }

        let locator = RunLocator::new(
            self.config.run_parent_dirs.clone(),
            self.config.completion_marker.clone(),
        );
        let mut summary = ScanSummary::default();
        let mut ready = Vec::new();
        for entry in locator.scan() {
            match entry {
                ScanEntry::Ready(run) => ready.push(run),
                ScanEntry::Pending(_) => summary.runs_pending += 1,
                ScanEntry::Skipped(_) => summary.runs_skipped_unrecognized += 1,
            }
        }
        summary.runs_ready = ready.len();

        for run in ready {
            if self.shutdown_requested() {
                summary.interrupted = true;
                break;
            }
            self.reload_config();

            let store = self.store()?;
            if self.config.skip_existing
                && store.as_ref().is_some_and(|store| store.has_run(run.run_id.as_str()))
            {
                tracing::debug!(
                    event_type = "sequencing_run_already_collected",
                    sequencing_run_id = %run.run_id,
                );
                summary.runs_skipped_existing += 1;
                continue;
            }

            let record = self.collect(&run);
            if let Some(store) = &store {
                if let Err(err) = store.write(&record, self.config.write_csv_summaries) {
                    tracing::error!(
                        event_type = "write_run_data_failed",
                        sequencing_run_id = %run.run_id,
                        error = %err,
                    );
                    continue;
                }
            }
            summary.runs_collected.push(record.sequencing_run_id);
        }
        Ok(summary)
    }

    pub fn collect(&self, run: &RunDescriptor) -> RunRecord {
        Collector::new(&self.config, &self.quality).collect(run)
    }

    /// Collects a single run directory regardless of its completion marker.
    pub fn collect_dir(&self, run_dir: &Path) -> Result<RunRecord, CollectorError> {
        if !run_dir.is_dir() {
            return Err(CollectorError::MissingArtifact {
                kind: "run directory",
                path: run_dir.to_path_buf(),
            });
        }
        let run = RunDescriptor::from_dir(run_dir, &self.config.completion_marker)?;
        if !run.ready {
            tracing::warn!(
                event_type = "sequencing_run_not_ready",
                sequencing_run_id = %run.run_id,
            );
        }
        Ok(self.collect(&run))
    }

    pub fn store(&self) -> Result<Option<OutputStore>, CollectorError> {
        self.config
            .output_directory
            .as_deref()
            .map(OutputStore::new)
            .transpose()
    }

    fn sleep_until_next_scan(&self) {
        let interval = scan_interval(self.config.scan_interval_seconds);
        // No deadline means waiting for shutdown only.
        let deadline = Instant::now().checked_add(interval);
        tracing::debug!(
            event_type = "sleeping_until_next_scan",
            scan_interval_seconds = interval.as_secs_f64(),
        );
        while !self.shutdown_requested() {
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    SHUTDOWN_POLL.min(deadline - now)
                }
                None => SHUTDOWN_POLL,
            };
            thread::sleep(pause);
        }
    }
}

fn scan_interval(seconds: f64) -> Duration {
    let max = Duration::from_secs(MAX_SCAN_INTERVAL_SECONDS as u64);
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).map_or(max, |interval| interval.min(max))
}
