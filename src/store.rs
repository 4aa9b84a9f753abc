use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use tempfile::Builder;

use crate::domain::{InstrumentFamily, InstrumentType};
use crate::error::CollectorError;
use crate::record::{PlatformDetails, RunRecord};

/// Collected runs on disk, laid out as
/// `<root>/<illumina|nanopore>/<run_id>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRun {
    pub json: Utf8PathBuf,
    pub csv: Vec<Utf8PathBuf>,
}

impl OutputStore {
    pub fn new(root: &Path) -> Result<Self, CollectorError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).map_err(|path| {
            CollectorError::Filesystem(format!("output path is not UTF-8: {}", path.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn run_dir(&self, record: &RunRecord) -> Utf8PathBuf {
        self.root
            .join(instrument_dir(record.instrument_type))
            .join(&record.sequencing_run_id)
    }

    /// Whether any instrument type already holds output for `run_id`.
    pub fn has_run(&self, run_id: &str) -> bool {
        [InstrumentType::Illumina, InstrumentType::Nanopore]
            .into_iter()
            .any(|kind| self.root.join(instrument_dir(kind)).join(run_id).is_dir())
    }

    pub fn write(&self, record: &RunRecord, write_csv: bool) -> Result<WrittenRun, CollectorError> {
        let dir = self.run_dir(record);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| CollectorError::Filesystem(err.to_string()))?;

        let json = dir.join(format!("{}.json", record.sequencing_run_id));
        let mut content = serde_json::to_vec_pretty(record)
            .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        write_bytes_atomic(&json, &content)?;

        let mut csv = Vec::new();
        if write_csv {
            let summary = dir.join(format!("{}_run_summary.csv", record.sequencing_run_id));
            write_csv_atomic(&summary, [RunSummaryRow::from(record)])?;
            csv.push(summary);

            let libraries = dir.join(format!("{}_sequenced_libraries.csv", record.sequencing_run_id));
            write_csv_atomic(&libraries, LibraryRow::rows(record))?;
            csv.push(libraries);
        }

        tracing::info!(
            event_type = "run_data_written",
            sequencing_run_id = %record.sequencing_run_id,
            output_file = %json,
            num_csv_files = csv.len(),
        );
        Ok(WrittenRun { json, csv })
    }
}

fn instrument_dir(kind: InstrumentType) -> &'static str {
    match kind {
        InstrumentType::Illumina => "illumina",
        InstrumentType::Nanopore => "nanopore",
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CollectorError> {
    let parent = path
        .parent()
        .ok_or_else(|| CollectorError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".seqrun-collector")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    Ok(())
}

fn write_csv_atomic<T: Serialize>(
    path: &Utf8Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), CollectorError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    }
    let content = writer
        .into_inner()
        .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

#[derive(Debug, Serialize)]
struct RunSummaryRow<'a> {
    sequencing_run_id: &'a str,
    instrument_type: InstrumentType,
    instrument_model: InstrumentFamily,
    instrument_id: Option<&'a str>,
    flowcell_id: Option<&'a str>,
    run_date: Option<NaiveDate>,
    experiment_name: Option<&'a str>,
    num_cycles_r1: Option<u32>,
    num_cycles_r2: Option<u32>,
    q30_percent: Option<f64>,
    num_demultiplexings: Option<usize>,
    num_acquisition_runs: Option<usize>,
    num_reads_total: Option<u64>,
    yield_gigabases: Option<f64>,
}

impl<'a> From<&'a RunRecord> for RunSummaryRow<'a> {
    fn from(record: &'a RunRecord) -> Self {
        let mut row = RunSummaryRow {
            sequencing_run_id: &record.sequencing_run_id,
            instrument_type: record.instrument_type,
            instrument_model: record.instrument_model,
            instrument_id: record.instrument_id.as_deref(),
            flowcell_id: record.flowcell_id.as_deref(),
            run_date: record.run_date,
            experiment_name: record.experiment_name.as_deref(),
            num_cycles_r1: None,
            num_cycles_r2: None,
            q30_percent: None,
            num_demultiplexings: None,
            num_acquisition_runs: None,
            num_reads_total: None,
            yield_gigabases: None,
        };
        match &record.details {
            PlatformDetails::Illumina(details) => {
                row.num_cycles_r1 = details.read_cycles.num_cycles_r1;
                row.num_cycles_r2 = details.read_cycles.num_cycles_r2;
                row.q30_percent = details.quality.q30_percent;
                row.num_demultiplexings = Some(details.demultiplexings.len());
            }
            PlatformDetails::Nanopore(details) => {
                row.num_acquisition_runs = Some(details.acquisition_runs.len());
                row.num_reads_total = details.run_yield.num_reads_total;
                row.yield_gigabases = details.run_yield.yield_gigabases;
            }
        }
        row
    }
}

#[derive(Debug, Default, Serialize)]
struct LibraryRow<'a> {
    sequencing_run_id: &'a str,
    demultiplexing_id: Option<&'a str>,
    library_id: Option<&'a str>,
    project_id_samplesheet: Option<&'a str>,
    project_id_translated: Option<&'a str>,
    index: Option<&'a str>,
    index2: Option<&'a str>,
    barcode: Option<&'a str>,
    sample_number: Option<u32>,
    fastq_filename_r1: Option<&'a str>,
    fastq_filename_r2: Option<&'a str>,
    num_reads: Option<u64>,
    num_bases: Option<u64>,
    q30_percent: Option<f64>,
    q30_percent_last_25_bases: Option<f64>,
}

impl<'a> LibraryRow<'a> {
    fn rows(record: &'a RunRecord) -> Vec<Self> {
        let run_id = record.sequencing_run_id.as_str();
        match &record.details {
            PlatformDetails::Illumina(details) => details
                .demultiplexings
                .iter()
                .flat_map(|demux| {
                    demux.sequenced_libraries.iter().map(move |library| {
                        let stats = library.fastq_stats.as_ref();
                        LibraryRow {
                            sequencing_run_id: run_id,
                            demultiplexing_id: Some(demux.demultiplexing_id.as_str()),
                            library_id: Some(library.library_id.as_str()),
                            project_id_samplesheet: library.project_id_samplesheet.as_deref(),
                            project_id_translated: library.project_id_translated.as_deref(),
                            index: library.index.as_deref(),
                            index2: library.index2.as_deref(),
                            sample_number: library.sample_number,
                            fastq_filename_r1: library.fastq_filename_r1.as_deref(),
                            fastq_filename_r2: library.fastq_filename_r2.as_deref(),
                            num_reads: stats.and_then(|s| s.num_reads),
                            num_bases: stats.and_then(|s| s.num_bases),
                            q30_percent: stats.and_then(|s| s.q30_percent),
                            q30_percent_last_25_bases: stats.and_then(|s| s.q30_percent_last_25_bases),
                            ..LibraryRow::default()
                        }
                    })
                })
                .collect(),
            PlatformDetails::Nanopore(details) => details
                .sequenced_libraries
                .iter()
                .map(|library| LibraryRow {
                    sequencing_run_id: run_id,
                    library_id: library.library_id.as_deref(),
                    project_id_samplesheet: library.project_id_samplesheet.as_deref(),
                    project_id_translated: library.project_id_translated.as_deref(),
                    barcode: library.barcode.as_deref(),
                    ..LibraryRow::default()
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunDescriptor;
    use crate::record::{DemultiplexingOutput, RunRecordBuilder, SequencedLibrary};

    fn illumina_record() -> RunRecord {
        let run = RunDescriptor {
            run_id: "201130_M00325_0001_000000000-ABCDE".parse().unwrap(),
            run_dir: "/runs/201130_M00325_0001_000000000-ABCDE".into(),
            ready: true,
        };
        let mut builder = RunRecordBuilder::new(&run);
        builder.demultiplexing(DemultiplexingOutput {
            demultiplexing_id: DemultiplexingOutput::demultiplexing_id(run.run_id.as_str(), 1),
            demultiplexing_num: 1,
            samplesheet_path: None,
            fastq_dir_path: None,
            timestamp_demultiplexing_started: None,
            sequenced_libraries: vec![SequencedLibrary {
                library_id: "LIB001".to_string(),
                project_id_samplesheet: Some("P1".to_string()),
                project_id_translated: Some("PRJ-1".to_string()),
                ..SequencedLibrary::default()
            }],
        });
        builder.build()
    }

    #[test]
    fn layout_paths() {
        let temp = tempfile::tempdir().unwrap();
        let store = OutputStore::new(temp.path()).unwrap();
        let record = illumina_record();
        assert!(store.run_dir(&record).ends_with("illumina/201130_M00325_0001_000000000-ABCDE"));
        assert!(!store.has_run(&record.sequencing_run_id));
    }

    #[test]
    fn write_json_and_csv() {
        let temp = tempfile::tempdir().unwrap();
        let store = OutputStore::new(temp.path()).unwrap();
        let record = illumina_record();

        let written = store.write(&record, true).unwrap();
        assert!(store.has_run(&record.sequencing_run_id));
        assert_eq!(written.csv.len(), 2);

        let json = fs::read_to_string(written.json.as_std_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["sequencing_run_id"], "201130_M00325_0001_000000000-ABCDE");
        assert_eq!(parsed["demultiplexings"][0]["sequenced_libraries"][0]["library_id"], "LIB001");

        let libraries = fs::read_to_string(written.csv[1].as_std_path()).unwrap();
        let mut lines = libraries.lines();
        assert!(lines.next().unwrap().starts_with("sequencing_run_id,demultiplexing_id,library_id"));
        assert_eq!(
            lines.next().unwrap(),
            "201130_M00325_0001_000000000-ABCDE,201130_M00325_0001_000000000-ABCDE-DEMUX-1,LIB001,P1,PRJ-1,,,,,,,,,,"
        );

        let leftovers: Vec<_> = fs::read_dir(store.run_dir(&record).as_std_path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".seqrun-collector"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
