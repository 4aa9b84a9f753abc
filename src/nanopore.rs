//! MinKNOW run output: artifact discovery, the JSON run report, and the
//! `final_summary_*.txt` key/value file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollectorError;

pub const FASTQ_PASS_DIR: &str = "fastq_pass";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NanoporeArtifacts {
    pub samplesheet: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub final_summary: Option<PathBuf>,
    pub fastq_dir: Option<PathBuf>,
}

impl NanoporeArtifacts {
    pub fn locate(run_dir: &Path) -> Result<Self, CollectorError> {
        let mut names: Vec<String> = fs::read_dir(run_dir)
            .map_err(|err| CollectorError::Filesystem(format!("read {}: {err}", run_dir.display())))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let pick = |prefix: &str, suffix: &str| -> Option<PathBuf> {
            let matches: Vec<&String> = names
                .iter()
                .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
                .collect();
            if matches.len() > 1 {
                tracing::warn!(
                    event_type = "multiple_nanopore_artifacts",
                    run_dir = %run_dir.display(),
                    pattern = %format!("{prefix}*{suffix}"),
                    chosen = %matches[0],
                );
            }
            matches.first().map(|name| run_dir.join(name))
        };

        let fastq_dir = run_dir.join(FASTQ_PASS_DIR);
        Ok(Self {
            samplesheet: pick("sample_sheet", ".csv"),
            report: pick("report_", ".json"),
            final_summary: pick("final_summary_", ".txt"),
            fastq_dir: fastq_dir.is_dir().then_some(fastq_dir),
        })
    }
}

/// Parses an RFC 3339 UTC timestamp with any number of fractional digits,
/// truncates it to microseconds and expresses it in `tz`.
pub fn normalize_timestamp(raw: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let utc = parsed.with_timezone(&Utc).trunc_subsecs(6);
    Some(utc.with_timezone(&tz).fixed_offset())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRun {
    pub acquisition_run_id: Option<String>,
    pub timestamp_acquisition_started: Option<DateTime<FixedOffset>>,
    pub timestamp_acquisition_ended: Option<DateTime<FixedOffset>>,
    pub num_reads_total: Option<u64>,
    pub num_reads_passed_filter: Option<u64>,
    pub num_reads_skipped: Option<u64>,
    pub percent_reads_passed_filter: Option<f64>,
    pub num_bases_total: Option<u64>,
    pub num_bases_passed_filter: Option<u64>,
    pub percent_bases_passed_filter: Option<f64>,
    pub startup_state: Option<String>,
    pub state: Option<String>,
    pub finishing_state: Option<String>,
    pub stop_reason: Option<String>,
    pub basecalling_config_filename: Option<String>,
    pub purpose: Option<String>,
    pub events_to_base_ratio: Option<f64>,
    pub sample_rate: Option<u64>,
    pub channel_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunYield {
    pub num_reads_total: Option<u64>,
    pub num_reads_passed_filter: Option<u64>,
    pub yield_bases: Option<u64>,
    pub yield_gigabases: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NanoporeRunIdentity {
    pub instrument_id: Option<String>,
    pub flowcell_id: Option<String>,
    pub flowcell_product_code: Option<String>,
    pub flowcell_channel_count: Option<u64>,
    pub protocol_id: Option<String>,
    pub protocol_run_id: Option<String>,
    pub timestamp_run_started: Option<DateTime<FixedOffset>>,
    pub timestamp_run_ended: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    path: PathBuf,
    root: Value,
}

impl RunReport {
    pub fn parse_file(path: &Path) -> Result<Self, CollectorError> {
        let content = fs::read_to_string(path).map_err(|err| CollectorError::RunReport {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse_str(&content, path)
    }

    pub fn parse_str(content: &str, path: &Path) -> Result<Self, CollectorError> {
        let root: Value = serde_json::from_str(content).map_err(|err| CollectorError::RunReport {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if !root.is_object() {
            return Err(CollectorError::RunReport {
                path: path.to_path_buf(),
                message: "report root is not an object".to_string(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self, tz: Tz) -> NanoporeRunIdentity {
        let protocol = self.root.get("protocol_run_info");
        let flow_cell = protocol.and_then(|p| p.get("flow_cell"));
        NanoporeRunIdentity {
            instrument_id: string_at(&self.root, &["host", "serial"]),
            flowcell_id: flow_cell.and_then(|f| string_at(f, &["flow_cell_id"])),
            flowcell_product_code: flow_cell.and_then(|f| string_at(f, &["product_code"])),
            flowcell_channel_count: flow_cell.and_then(|f| u64_at(f, &["channel_count"])),
            protocol_id: protocol.and_then(|p| string_at(p, &["protocol_id"])),
            protocol_run_id: protocol.and_then(|p| string_at(p, &["run_id"])),
            timestamp_run_started: protocol
                .and_then(|p| string_at(p, &["start_time"]))
                .and_then(|raw| normalize_timestamp(&raw, tz)),
            timestamp_run_ended: protocol
                .and_then(|p| string_at(p, &["end_time"]))
                .and_then(|raw| normalize_timestamp(&raw, tz)),
        }
    }

    fn acquisition_infos(&self) -> impl Iterator<Item = &Value> {
        self.root
            .get("acquisitions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|acq| acq.get("acquisition_run_info"))
    }

    /// One entry per acquisition. Each field decodes on its own, so a bad
    /// value nulls only that field.
    pub fn acquisitions(&self, tz: Tz) -> Vec<AcquisitionRun> {
        self.acquisition_infos()
            .map(|info| {
                let ys = |key: &str| u64_at(info, &["yield_summary", key]);
                let cfg = |key: &str| info.get("config_summary").and_then(|c| c.get(key));

                let num_reads_total = ys("read_count");
                let num_reads_passed_filter = ys("basecalled_pass_read_count");
                let bases_passed = ys("basecalled_pass_bases");
                let bases_failed = ys("basecalled_fail_bases");
                let num_bases_total = match (bases_passed, bases_failed) {
                    (Some(pass), Some(fail)) => pass.checked_add(fail),
                    _ => None,
                };

                AcquisitionRun {
                    acquisition_run_id: string_at(info, &["run_id"]),
                    timestamp_acquisition_started: string_at(info, &["start_time"])
                        .and_then(|raw| normalize_timestamp(&raw, tz)),
                    timestamp_acquisition_ended: string_at(info, &["end_time"])
                        .and_then(|raw| normalize_timestamp(&raw, tz)),
                    num_reads_total,
                    num_reads_passed_filter,
                    num_reads_skipped: ys("basecalled_skipped_read_count"),
                    percent_reads_passed_filter: ratio_percent(num_reads_passed_filter, num_reads_total),
                    num_bases_total,
                    num_bases_passed_filter: bases_passed,
                    percent_bases_passed_filter: ratio_percent(bases_passed, num_bases_total),
                    startup_state: string_at(info, &["startup_state"]),
                    state: string_at(info, &["state"]),
                    finishing_state: string_at(info, &["finishing_state"]),
                    stop_reason: string_at(info, &["stop_reason"]),
                    basecalling_config_filename: cfg("basecalling_config_filename")
                        .and_then(as_string),
                    purpose: cfg("purpose").and_then(as_string),
                    events_to_base_ratio: cfg("events_to_base_ratio").and_then(as_f64),
                    sample_rate: cfg("sample_rate").and_then(as_u64),
                    channel_count: cfg("channel_count").and_then(as_u64),
                }
            })
            .collect()
    }

    /// Sums read and pass-filter base counts over every acquisition. A sum
    /// that overflows is reported as null.
    pub fn run_yield(&self) -> RunYield {
        let yield_bases = self.sum_yield("basecalled_pass_bases");
        RunYield {
            num_reads_total: self.sum_yield("read_count"),
            num_reads_passed_filter: self.sum_yield("basecalled_pass_read_count"),
            yield_bases,
            yield_gigabases: yield_bases.map(|bases| bases as f64 / 1e9),
        }
    }

    fn sum_yield(&self, key: &str) -> Option<u64> {
        let mut values = self
            .acquisition_infos()
            .filter_map(|info| u64_at(info, &["yield_summary", key]))
            .peekable();
        values.peek()?;
        values.try_fold(0u64, u64::checked_add)
    }
}

/// Zero totals report 0.0 rather than null, matching MinKNOW's own summary.
fn ratio_percent(part: Option<u64>, whole: Option<u64>) -> Option<f64> {
    match (part, whole) {
        (Some(_), Some(0)) => Some(0.0),
        (Some(part), Some(whole)) => Some(part as f64 / whole as f64 * 100.0),
        _ => None,
    }
}

fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(*key))
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    value_at(value, path).and_then(as_string)
}

fn u64_at(value: &Value, path: &[&str]) -> Option<u64> {
    value_at(value, path).and_then(as_u64)
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// MinKNOW writes 64-bit counters as JSON strings.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

/// `key=value` lines from `final_summary_*.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalSummary(BTreeMap<String, String>);

impl FinalSummary {
    pub fn parse_file(path: &Path) -> Result<Self, CollectorError> {
        let content = fs::read_to_string(path).map_err(|err| CollectorError::FileUnreadable {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Self::parse_str(&content))
    }

    pub fn parse_str(content: &str) -> Self {
        Self(
            content
                .lines()
                .filter_map(|line| line.trim().split_once('='))
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .filter(|(key, _)| !key.is_empty())
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn instrument_id(&self) -> Option<&str> {
        self.get("instrument")
    }

    pub fn flowcell_id(&self) -> Option<&str> {
        self.get("flow_cell_id")
    }

    pub fn protocol_id(&self) -> Option<&str> {
        self.get("protocol")
    }
}
