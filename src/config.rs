use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

pub const DEFAULT_CONFIG_FILE: &str = "seqrun-collector.json";
pub const DEFAULT_SCAN_INTERVAL_SECONDS: f64 = 3600.0;
/// Longest accepted pause between scans (30 days); larger values are clamped.
pub const MAX_SCAN_INTERVAL_SECONDS: f64 = 30.0 * 24.0 * 3600.0;
pub const DEFAULT_LOCAL_TIMEZONE: &str = "America/Vancouver";
pub const DEFAULT_COMPLETION_MARKER: &str = "upload_complete.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub run_parent_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default)]
    pub project_id_translation_file: Option<PathBuf>,
    #[serde(default)]
    pub collect_fastq_stats: Option<bool>,
    #[serde(default, alias = "num_fastq_stats_collection_processes")]
    pub num_fastq_stats_workers: Option<usize>,
    #[serde(default)]
    pub scan_interval_seconds: Option<f64>,
    #[serde(default)]
    pub local_timezone: Option<String>,
    #[serde(default)]
    pub skip_existing: Option<bool>,
    #[serde(default)]
    pub write_csv_summaries: Option<bool>,
    #[serde(default)]
    pub completion_marker: Option<String>,
}

/// Samplesheet project id → canonical project id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectIdTranslation(HashMap<String, String>);

impl ProjectIdTranslation {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self(entries)
    }

    /// Untranslated ids map to themselves.
    pub fn translate(&self, project_id: &str) -> String {
        self.0
            .get(project_id)
            .cloned()
            .unwrap_or_else(|| project_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a two-column CSV. A first row whose columns look like a header
    /// (`samplesheet_project_id`, `translated_project_id`) is skipped.
    pub fn load(path: &Path) -> Result<Self, CollectorError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|err| CollectorError::TranslationTable {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let mut entries = HashMap::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|err| CollectorError::TranslationTable {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
            let (Some(from), Some(to)) = (record.get(0), record.get(1)) else {
                continue;
            };
            if idx == 0 && from.ends_with("project_id") && to.ends_with("project_id") {
                continue;
            }
            if from.is_empty() || from.starts_with('#') {
                continue;
            }
            entries.insert(from.to_string(), to.to_string());
        }
        Ok(Self(entries))
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub run_parent_dirs: Vec<PathBuf>,
    pub output_directory: Option<PathBuf>,
    pub project_id_translation: ProjectIdTranslation,
    pub collect_fastq_stats: bool,
    pub num_fastq_stats_workers: usize,
    pub scan_interval_seconds: f64,
    pub local_timezone: Tz,
    pub skip_existing: bool,
    pub write_csv_summaries: bool,
    pub completion_marker: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            run_parent_dirs: Vec::new(),
            output_directory: None,
            project_id_translation: ProjectIdTranslation::default(),
            collect_fastq_stats: false,
            num_fastq_stats_workers: 1,
            scan_interval_seconds: DEFAULT_SCAN_INTERVAL_SECONDS,
            local_timezone: chrono_tz::America::Vancouver,
            skip_existing: true,
            write_csv_summaries: true,
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, CollectorError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CollectorError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CollectorError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CollectorError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CollectorError> {
        let local_timezone = parse_timezone(
            config
                .local_timezone
                .as_deref()
                .unwrap_or(DEFAULT_LOCAL_TIMEZONE),
        )?;

        let project_id_translation = match &config.project_id_translation_file {
            Some(path) if path.exists() => ProjectIdTranslation::load(path)?,
            Some(path) => {
                tracing::warn!(
                    event_type = "project_id_translation_file_missing",
                    path = %path.display(),
                );
                ProjectIdTranslation::default()
            }
            None => ProjectIdTranslation::default(),
        };

        let scan_interval_seconds = match config.scan_interval_seconds {
            Some(seconds) if seconds.is_finite() && seconds > MAX_SCAN_INTERVAL_SECONDS => {
                tracing::warn!(
                    event_type = "scan_interval_clamped",
                    scan_interval_seconds = seconds,
                    max_scan_interval_seconds = MAX_SCAN_INTERVAL_SECONDS,
                );
                MAX_SCAN_INTERVAL_SECONDS
            }
            Some(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds,
            _ => DEFAULT_SCAN_INTERVAL_SECONDS,
        };

        Ok(ResolvedConfig {
            run_parent_dirs: config.run_parent_dirs,
            output_directory: config.output_directory,
            project_id_translation,
            collect_fastq_stats: config.collect_fastq_stats.unwrap_or(false),
            num_fastq_stats_workers: config.num_fastq_stats_workers.unwrap_or(1).max(1),
            scan_interval_seconds,
            local_timezone,
            skip_existing: config.skip_existing.unwrap_or(true),
            write_csv_summaries: config.write_csv_summaries.unwrap_or(true),
            completion_marker: config
                .completion_marker
                .unwrap_or_else(|| DEFAULT_COMPLETION_MARKER.to_string()),
        })
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, CollectorError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CollectorError::InvalidTimeZone(name.to_string()))
}
