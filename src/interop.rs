//! Run-level quality summary.
//!
//! Decoding the binary InterOp files is left to an external decoder behind
//! [`QualityMetricsDecoder`]. The decoder hands back vendor-named columns;
//! this module maps them onto [`QualitySummary`] and fills in the derived
//! percentages.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollectorError;
use crate::fastq::round4;

/// Vendor summary row keyed by the decoder's column names
/// (`"Cluster Count"`, `"% >= Q30"`, ...).
pub type MetricsRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQualityMetrics {
    /// Run-level summary over non-index reads.
    pub nonindex: MetricsRow,
    /// One row per lane, in lane order.
    pub lanes: Vec<MetricsRow>,
}

pub trait QualityMetricsDecoder: Send + Sync {
    fn decode(&self, run_dir: &Path) -> Result<RawQualityMetrics, CollectorError>;
}

/// Used when no InterOp decoder is available; every run gets an empty
/// quality summary.
pub struct NoQualityMetrics;

impl QualityMetricsDecoder for NoQualityMetrics {
    fn decode(&self, _run_dir: &Path) -> Result<RawQualityMetrics, CollectorError> {
        Ok(RawQualityMetrics::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub cluster_count: Option<u64>,
    pub cluster_count_passed_filter: Option<u64>,
    pub percent_clusters_passed_filter: Option<f64>,
    pub cluster_density: Option<f64>,
    pub cluster_density_passed_filter: Option<f64>,
    pub error_rate: Option<f64>,
    pub first_cycle_intensity: Option<f64>,
    pub percent_aligned: Option<f64>,
    pub q30_percent: Option<f64>,
    pub percent_occupied: Option<f64>,
    pub projected_yield_gigabases: Option<f64>,
    pub yield_gigabases: Option<f64>,
    pub num_reads: Option<u64>,
    pub num_reads_passed_filter: Option<u64>,
    pub percent_reads_passed_filter: Option<f64>,
}

impl QualitySummary {
    pub fn from_raw(raw: &RawQualityMetrics) -> Self {
        let row = &raw.nonindex;
        let mut summary = QualitySummary {
            cluster_count: integer(row, "Cluster Count"),
            cluster_count_passed_filter: integer(row, "Cluster Count Pf"),
            error_rate: float(row, "Error Rate"),
            first_cycle_intensity: float(row, "First Cycle Intensity"),
            percent_aligned: float(row, "% Aligned"),
            q30_percent: float(row, "% >= Q30"),
            percent_occupied: float(row, "% Occupied"),
            projected_yield_gigabases: float(row, "Projected Yield G"),
            yield_gigabases: float(row, "Yield G"),
            num_reads: integer(row, "Reads"),
            num_reads_passed_filter: integer(row, "Reads Pf"),
            ..QualitySummary::default()
        };

        summary.percent_reads_passed_filter =
            percent_of(summary.num_reads_passed_filter, summary.num_reads);
        summary.percent_clusters_passed_filter =
            percent_of(summary.cluster_count_passed_filter, summary.cluster_count);

        // Lane densities arrive per mm²; report them in thousands.
        if let Some(lane) = raw.lanes.first() {
            summary.cluster_density = float(lane, "Density").map(|v| round4(v / 1000.0));
            summary.cluster_density_passed_filter =
                float(lane, "Density Pf").map(|v| round4(v / 1000.0));
        }
        summary
    }

    pub fn is_empty(&self) -> bool {
        *self == QualitySummary::default()
    }
}

/// Runs the decoder and converts its output. Decoder failures are logged and
/// produce an empty summary.
pub fn summarize(decoder: &dyn QualityMetricsDecoder, run_dir: &Path) -> QualitySummary {
    match decoder.decode(run_dir) {
        Ok(raw) => QualitySummary::from_raw(&raw),
        Err(err) => {
            tracing::error!(
                event_type = "quality_metrics_decode_failed",
                run_dir = %run_dir.display(),
                error = %err,
            );
            QualitySummary::default()
        }
    }
}

fn percent_of(part: Option<u64>, whole: Option<u64>) -> Option<f64> {
    match (part, whole) {
        (Some(part), Some(whole)) if whole > 0 => Some(part as f64 / whole as f64 * 100.0),
        _ => None,
    }
}

fn integer(row: &MetricsRow, column: &str) -> Option<u64> {
    let value = row.get(column)?;
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() {
        log_conversion(column, value);
    }
    parsed
}

fn float(row: &MetricsRow, column: &str) -> Option<f64> {
    let value = row.get(column)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite());
    if parsed.is_none() {
        log_conversion(column, value);
    }
    parsed.map(round4)
}

fn log_conversion(column: &str, value: &Value) {
    let err = CollectorError::ValueConversion {
        field: column.to_string(),
        value: value.to_string(),
    };
    tracing::debug!(event_type = "quality_metric_conversion_failed", error = %err);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct FixedMetrics(RawQualityMetrics);

    impl QualityMetricsDecoder for FixedMetrics {
        fn decode(&self, _run_dir: &Path) -> Result<RawQualityMetrics, CollectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingMetrics;

    impl QualityMetricsDecoder for FailingMetrics {
        fn decode(&self, run_dir: &Path) -> Result<RawQualityMetrics, CollectorError> {
            Err(CollectorError::MissingArtifact {
                kind: "InterOp",
                path: run_dir.join("InterOp"),
            })
        }
    }

    fn row(value: Value) -> MetricsRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn derives_percentages_and_lane_density() {
        let raw = RawQualityMetrics {
            nonindex: row(json!({
                "Cluster Count": 1000,
                "Cluster Count Pf": 900,
                "Reads": 2000,
                "Reads Pf": 1500,
                "% >= Q30": 91.234567,
                "Error Rate": "NaN",
                "Yield G": "7.5",
            })),
            lanes: vec![row(json!({"Density": 1234567.0, "Density Pf": 1000000.0}))],
        };
        let summary = summarize(&FixedMetrics(raw), Path::new("/runs/x"));
        assert_eq!(summary.percent_clusters_passed_filter, Some(90.0));
        assert_eq!(summary.percent_reads_passed_filter, Some(75.0));
        assert_eq!(summary.q30_percent, Some(91.2346));
        assert_eq!(summary.error_rate, None);
        assert_eq!(summary.yield_gigabases, Some(7.5));
        assert_eq!(summary.cluster_density, Some(1234.567));
        assert_eq!(summary.cluster_density_passed_filter, Some(1000.0));
    }

    #[test]
    fn zero_denominator_leaves_percent_null() {
        let raw = RawQualityMetrics {
            nonindex: row(json!({"Reads": 0, "Reads Pf": 0})),
            lanes: Vec::new(),
        };
        let summary = QualitySummary::from_raw(&raw);
        assert_eq!(summary.percent_reads_passed_filter, None);
        assert_eq!(summary.cluster_density, None);
    }

    #[test]
    fn decoder_failure_is_empty_summary() {
        assert!(summarize(&FailingMetrics, Path::new("/runs/x")).is_empty());
        assert!(summarize(&NoQualityMetrics, Path::new("/runs/x")).is_empty());
    }
}
