use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::{InstrumentFamily, InstrumentType, RunDescriptor};
use crate::fastq::LibraryFastqStats;
use crate::interop::QualitySummary;
use crate::nanopore::{AcquisitionRun, NanoporeRunIdentity, RunYield};
use crate::runinfo::ReadCycles;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequencedLibrary {
    pub library_id: String,
    pub project_id_samplesheet: Option<String>,
    pub project_id_translated: Option<String>,
    pub index: Option<String>,
    pub index2: Option<String>,
    pub fastq_filename_r1: Option<String>,
    pub fastq_filename_r2: Option<String>,
    pub sample_number: Option<u32>,
    pub fastq_stats: Option<LibraryFastqStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemultiplexingOutput {
    pub demultiplexing_id: String,
    pub demultiplexing_num: u32,
    /// Relative to the run directory.
    pub samplesheet_path: Option<PathBuf>,
    /// Relative to the run directory.
    pub fastq_dir_path: Option<PathBuf>,
    pub timestamp_demultiplexing_started: Option<String>,
    pub sequenced_libraries: Vec<SequencedLibrary>,
}

impl DemultiplexingOutput {
    pub fn demultiplexing_id(run_id: &str, num: u32) -> String {
        format!("{run_id}-DEMUX-{num}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NanoporeLibrary {
    pub alias: Option<String>,
    pub library_id: Option<String>,
    pub project_id_samplesheet: Option<String>,
    pub project_id_translated: Option<String>,
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IlluminaDetails {
    #[serde(flatten)]
    pub quality: QualitySummary,
    #[serde(flatten)]
    pub read_cycles: ReadCycles,
    pub demultiplexings: Vec<DemultiplexingOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NanoporeDetails {
    pub flowcell_product_code: Option<String>,
    pub flowcell_channel_count: Option<u64>,
    pub protocol_id: Option<String>,
    pub protocol_run_id: Option<String>,
    pub timestamp_run_started: Option<DateTime<FixedOffset>>,
    pub timestamp_run_ended: Option<DateTime<FixedOffset>>,
    #[serde(flatten)]
    pub run_yield: RunYield,
    pub acquisition_runs: Vec<AcquisitionRun>,
    pub sequenced_libraries: Vec<NanoporeLibrary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformDetails {
    Illumina(IlluminaDetails),
    Nanopore(NanoporeDetails),
}

/// One normalized record per completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub sequencing_run_id: String,
    pub instrument_type: InstrumentType,
    pub instrument_model: InstrumentFamily,
    pub instrument_id: Option<String>,
    pub flowcell_id: Option<String>,
    pub run_date: Option<NaiveDate>,
    pub experiment_name: Option<String>,
    #[serde(flatten)]
    pub details: PlatformDetails,
}

impl RunRecord {
    pub fn illumina(&self) -> Option<&IlluminaDetails> {
        match &self.details {
            PlatformDetails::Illumina(details) => Some(details),
            PlatformDetails::Nanopore(_) => None,
        }
    }

    pub fn nanopore(&self) -> Option<&NanoporeDetails> {
        match &self.details {
            PlatformDetails::Nanopore(details) => Some(details),
            PlatformDetails::Illumina(_) => None,
        }
    }
}

/// Assembles a [`RunRecord`] from its sources. Identity comes from the run id;
/// every later merge overwrites the fields it supplies a value for.
#[derive(Debug, Clone)]
pub struct RunRecordBuilder {
    record: RunRecord,
}

impl RunRecordBuilder {
    pub fn new(run: &RunDescriptor) -> Self {
        let family = run.family();
        let details = match family.instrument_type() {
            InstrumentType::Illumina => PlatformDetails::Illumina(IlluminaDetails::default()),
            InstrumentType::Nanopore => PlatformDetails::Nanopore(NanoporeDetails::default()),
        };
        Self {
            record: RunRecord {
                sequencing_run_id: run.run_id.as_str().to_string(),
                instrument_type: family.instrument_type(),
                instrument_model: family,
                instrument_id: run.run_id.instrument_id().map(str::to_string),
                flowcell_id: run.run_id.flowcell_id().map(str::to_string),
                run_date: run.run_id.run_date(),
                experiment_name: None,
                details,
            },
        }
    }

    pub fn experiment_name(&mut self, name: Option<&str>) -> &mut Self {
        if let Some(name) = name {
            self.record.experiment_name = Some(name.to_string());
        }
        self
    }

    pub fn instrument_id(&mut self, id: Option<&str>) -> &mut Self {
        if let Some(id) = id {
            self.record.instrument_id = Some(id.to_string());
        }
        self
    }

    pub fn flowcell_id(&mut self, id: Option<&str>) -> &mut Self {
        if let Some(id) = id {
            self.record.flowcell_id = Some(id.to_string());
        }
        self
    }

    pub fn quality_summary(&mut self, quality: QualitySummary) -> &mut Self {
        if let PlatformDetails::Illumina(details) = &mut self.record.details {
            details.quality = quality;
        }
        self
    }

    pub fn read_cycles(&mut self, cycles: ReadCycles) -> &mut Self {
        if let PlatformDetails::Illumina(details) = &mut self.record.details {
            if cycles.num_cycles_r1.is_some() {
                details.read_cycles.num_cycles_r1 = cycles.num_cycles_r1;
            }
            if cycles.num_cycles_r2.is_some() {
                details.read_cycles.num_cycles_r2 = cycles.num_cycles_r2;
            }
        }
        self
    }

    pub fn demultiplexing(&mut self, output: DemultiplexingOutput) -> &mut Self {
        if let PlatformDetails::Illumina(details) = &mut self.record.details {
            details.demultiplexings.push(output);
        }
        self
    }

    pub fn nanopore_identity(&mut self, identity: NanoporeRunIdentity) -> &mut Self {
        self.instrument_id(identity.instrument_id.as_deref());
        self.flowcell_id(identity.flowcell_id.as_deref());
        if let PlatformDetails::Nanopore(details) = &mut self.record.details {
            replace_some(&mut details.flowcell_product_code, identity.flowcell_product_code);
            replace_some(&mut details.flowcell_channel_count, identity.flowcell_channel_count);
            replace_some(&mut details.protocol_id, identity.protocol_id);
            replace_some(&mut details.protocol_run_id, identity.protocol_run_id);
            replace_some(&mut details.timestamp_run_started, identity.timestamp_run_started);
            replace_some(&mut details.timestamp_run_ended, identity.timestamp_run_ended);
        }
        self
    }

    pub fn protocol_id(&mut self, protocol_id: Option<&str>) -> &mut Self {
        if let PlatformDetails::Nanopore(details) = &mut self.record.details {
            replace_some(&mut details.protocol_id, protocol_id.map(str::to_string));
        }
        self
    }

    pub fn acquisitions(&mut self, runs: Vec<AcquisitionRun>, run_yield: RunYield) -> &mut Self {
        if let PlatformDetails::Nanopore(details) = &mut self.record.details {
            details.acquisition_runs = runs;
            details.run_yield = run_yield;
        }
        self
    }

    pub fn nanopore_libraries(&mut self, libraries: Vec<NanoporeLibrary>) -> &mut Self {
        if let PlatformDetails::Nanopore(details) = &mut self.record.details {
            details.sequenced_libraries = libraries;
        }
        self
    }

    pub fn build(self) -> RunRecord {
        self.record
    }
}

fn replace_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn descriptor(run_id: &str) -> RunDescriptor {
        RunDescriptor {
            run_id: run_id.parse().unwrap(),
            run_dir: Path::new("/runs").join(run_id),
            ready: true,
        }
    }

    #[test]
    fn identity_from_run_id() {
        let record = RunRecordBuilder::new(&descriptor("201130_M00325_0001_000000000-ABCDE")).build();
        assert_eq!(record.instrument_id.as_deref(), Some("M00325"));
        assert_eq!(record.flowcell_id.as_deref(), Some("000000000-ABCDE"));
        assert_eq!(record.run_date, NaiveDate::from_ymd_opt(2020, 11, 30));
        assert!(record.illumina().is_some());
    }

    #[test]
    fn later_sources_win_only_with_values() {
        let mut builder = RunRecordBuilder::new(&descriptor("201201_VH00123_2_AAAAAAAAA"));
        builder
            .experiment_name(Some("first"))
            .experiment_name(Some("second"))
            .experiment_name(None)
            .read_cycles(ReadCycles {
                num_cycles_r1: Some(151),
                num_cycles_r2: None,
            });
        let record = builder.build();
        assert_eq!(record.experiment_name.as_deref(), Some("second"));
        assert_eq!(record.illumina().unwrap().read_cycles.num_cycles_r1, Some(151));
    }

    #[test]
    fn nanopore_record_serializes_flat() {
        let mut builder =
            RunRecordBuilder::new(&descriptor("20230501_1702_X3_FAV12345_3f1c2b7e"));
        builder.nanopore_identity(NanoporeRunIdentity {
            instrument_id: Some("GXB01234".to_string()),
            ..NanoporeRunIdentity::default()
        });
        let record = builder.build();
        assert_eq!(record.flowcell_id.as_deref(), Some("FAV12345"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["instrument_id"], "GXB01234");
        assert_eq!(json["instrument_type"], "NANOPORE");
        assert!(json["acquisition_runs"].is_array());
        assert!(json.get("demultiplexings").is_none());
    }
}
