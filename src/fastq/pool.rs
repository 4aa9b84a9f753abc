//! Bounded worker pool for per-file FASTQ statistics.
//!
//! Jobs flow to workers over a bounded channel and results flow back over
//! another. Workers share nothing; the caller reduces results by library id
//! once every worker has joined.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;

use crate::domain::Mate;
use crate::error::CollectorError;

use super::{FastqStatsRecord, LibraryFastqStats, combine_mates, compute};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqJob {
    pub path: PathBuf,
    pub library_id: String,
    pub mate: Mate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FastqResult {
    pub library_id: String,
    pub mate: Mate,
    pub stats: FastqStatsRecord,
}

impl FastqJob {
    fn run(self) -> FastqResult {
        let stats = compute(&self.path);
        FastqResult {
            library_id: self.library_id,
            mate: self.mate,
            stats,
        }
    }
}

/// Runs every job and returns the results in completion order. With one
/// worker (or fewer jobs than two) the jobs run on the calling thread.
pub fn run_jobs(jobs: Vec<FastqJob>, workers: usize) -> Result<Vec<FastqResult>, CollectorError> {
    let started = Instant::now();
    let num_jobs = jobs.len();
    tracing::info!(
        event_type = "collect_fastq_stats_start",
        num_fastq_stats_inputs = num_jobs,
        workers,
    );

    let results = if workers <= 1 || num_jobs < 2 {
        jobs.into_iter().map(FastqJob::run).collect()
    } else {
        run_parallel(jobs, workers.min(num_jobs))?
    };

    tracing::info!(
        event_type = "collect_fastq_stats_complete",
        fastq_files_stats_collected = results.len(),
        collect_fastq_stats_duration_seconds = started.elapsed().as_secs_f64(),
    );
    Ok(results)
}

fn run_parallel(jobs: Vec<FastqJob>, workers: usize) -> Result<Vec<FastqResult>, CollectorError> {
    let (job_tx, job_rx) = bounded::<FastqJob>(workers * 2);
    let (result_tx, result_rx) = bounded::<FastqResult>(workers * 2);

    thread::scope(|scope| {
        // Jobs go in from their own thread while this one drains results.
        let feeder = scope.spawn(move || {
            for job in jobs {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            handles.push(scope.spawn(move || {
                for job in job_rx.iter() {
                    if result_tx.send(job.run()).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(job_rx);
        drop(result_tx);

        let results: Vec<FastqResult> = result_rx.iter().collect();

        let panicked = std::iter::once(feeder)
            .chain(handles)
            .map(|handle| handle.join())
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            return Err(CollectorError::WorkerPool(format!(
                "{panicked} fastq statistics thread(s) panicked"
            )));
        }
        Ok(results)
    })
}

/// Groups mate results by library id and combines each pair.
pub fn reduce_by_library(results: Vec<FastqResult>) -> BTreeMap<String, LibraryFastqStats> {
    let mut mates: BTreeMap<String, (Option<FastqStatsRecord>, Option<FastqStatsRecord>)> =
        BTreeMap::new();
    for result in results {
        let entry = mates.entry(result.library_id).or_default();
        match result.mate {
            Mate::R1 => entry.0 = Some(result.stats),
            Mate::R2 => entry.1 = Some(result.stats),
        }
    }
    mates
        .into_iter()
        .map(|(library_id, (r1, r2))| (library_id, combine_mates(r1, r2)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fastq(dir: &std::path::Path, name: &str, quals: &[&str]) -> PathBuf {
        let mut text = String::new();
        for (idx, qual) in quals.iter().enumerate() {
            let seq = "A".repeat(qual.len());
            text.push_str(&format!("@r{idx}\n{seq}\n+\n{qual}\n"));
        }
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn jobs(dir: &std::path::Path) -> Vec<FastqJob> {
        let mut jobs = Vec::new();
        for lib in ["LIB-1", "LIB-2", "LIB-3"] {
            let r1 = write_fastq(dir, &format!("{lib}_R1.fastq"), &["IIIIIIIIII", "IIIII+++++"]);
            let r2 = write_fastq(dir, &format!("{lib}_R2.fastq"), &["++++++++++"]);
            jobs.push(FastqJob {
                path: r1,
                library_id: lib.to_string(),
                mate: Mate::R1,
            });
            jobs.push(FastqJob {
                path: r2,
                library_id: lib.to_string(),
                mate: Mate::R2,
            });
        }
        jobs
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let temp = tempfile::tempdir().unwrap();
        let sequential = reduce_by_library(run_jobs(jobs(temp.path()), 1).unwrap());
        let parallel = reduce_by_library(run_jobs(jobs(temp.path()), 4).unwrap());
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.len(), 3);

        let lib = &parallel["LIB-2"];
        assert_eq!(lib.num_reads, Some(3));
        assert_eq!(lib.num_bases, Some(30));
        assert_eq!(lib.q30_percent, Some(50.0));
    }

    #[test]
    fn missing_file_yields_absent_mate() {
        let temp = tempfile::tempdir().unwrap();
        let r1 = write_fastq(temp.path(), "LIB-9_R1.fastq", &["IIIIIIIIII"]);
        let results = run_jobs(
            vec![
                FastqJob {
                    path: r1,
                    library_id: "LIB-9".to_string(),
                    mate: Mate::R1,
                },
                FastqJob {
                    path: temp.path().join("LIB-9_R2.fastq.gz"),
                    library_id: "LIB-9".to_string(),
                    mate: Mate::R2,
                },
            ],
            2,
        )
        .unwrap();
        let libs = reduce_by_library(results);
        let lib = &libs["LIB-9"];
        assert_eq!(lib.num_bases, Some(10));
        assert_eq!(lib.q30_percent, Some(100.0));
        assert_eq!(lib.r2.as_ref().and_then(|r2| r2.num_reads), None);
    }
}
