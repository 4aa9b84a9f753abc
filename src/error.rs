use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CollectorError {
    #[error("unrecognized sequencing run id: {0}")]
    UnrecognizedRunId(String),

    #[error("missing {kind}: {}", path.display())]
    MissingArtifact { kind: &'static str, path: PathBuf },

    #[error("failed to parse samplesheet {}: {message}", path.display())]
    SampleSheetParse { path: PathBuf, message: String },

    #[error("samplesheet {} does not match the {dialect} schema: {violations:?}", path.display())]
    SchemaViolation {
        path: PathBuf,
        dialect: &'static str,
        violations: Vec<String>,
    },

    #[error("invalid value for {field}: {value}")]
    ValueConversion { field: String, value: String },

    #[error("unable to read {}: {message}", path.display())]
    FileUnreadable { path: PathBuf, message: String },

    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("missing config file seqrun-collector.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to load project id translation table {}: {message}", path.display())]
    TranslationTable { path: PathBuf, message: String },

    #[error("failed to decode run report {}: {message}", path.display())]
    RunReport { path: PathBuf, message: String },

    #[error("failed to decode RunInfo.xml at {}: {message}", path.display())]
    RunInfo { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("fastq statistics worker failed: {0}")]
    WorkerPool(String),
}
