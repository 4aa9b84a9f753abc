//! Samplesheet parsing for the Illumina legacy and cloud dialects and the
//! flat Nanopore sheet.
//!
//! The dialect is chosen from the run's [`InstrumentFamily`], never by
//! sniffing file content. All dialects produce the same shape: a map of
//! lowercase section name to a list of records, where each record maps a
//! snake_case field name to its raw string value. Key/value sections
//! (`header`, `settings`, `bclconvert_settings`, ...) hold exactly one record.

pub mod schema;
pub mod sections;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::InstrumentFamily;
use crate::error::CollectorError;

use self::schema::LEGACY_SCHEMA;
use self::sections::{SectionKind, SectionScanner, StopRule, normalize_key};

pub type Record = BTreeMap<String, String>;

pub const DATA_SECTION: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetDialect {
    /// MiSeq-style: `[Header]`, `[Reads]`, `[Settings]`, `[Data]`.
    Legacy,
    /// NextSeq 1000/2000-style: `[BCLConvert_Data]`, `[Cloud_Data]`, ...
    Cloud,
    /// MinKNOW sample sheet: a plain CSV table.
    Nanopore,
}

impl From<InstrumentFamily> for SheetDialect {
    fn from(family: InstrumentFamily) -> Self {
        match family {
            InstrumentFamily::MiSeqLike => SheetDialect::Legacy,
            InstrumentFamily::NextSeqLike => SheetDialect::Cloud,
            InstrumentFamily::GridIonLike | InstrumentFamily::PromethIonLike => {
                SheetDialect::Nanopore
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSheet {
    pub path: PathBuf,
    pub dialect: SheetDialect,
    pub sections: BTreeMap<String, Vec<Record>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

impl SampleSheet {
    pub fn section(&self, name: &str) -> &[Record] {
        self.sections
            .get(name)
            .map(|records| records.as_slice())
            .unwrap_or(&[])
    }

    pub fn field(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .first()
            .and_then(|record| record.get(key))
            .map(|value| value.as_str())
    }

    pub fn experiment_name(&self) -> Option<&str> {
        let value = match self.dialect {
            SheetDialect::Legacy => self.field("header", "experiment_name"),
            SheetDialect::Cloud => self.field("header", "run_name"),
            SheetDialect::Nanopore => self
                .section(DATA_SECTION)
                .first()
                .and_then(|record| record.get("experiment_id"))
                .map(|value| value.as_str()),
        };
        value.filter(|value| !value.is_empty())
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

pub struct SampleSheetParser;

impl SampleSheetParser {
    pub fn parse_file(path: &Path, family: InstrumentFamily) -> Result<SampleSheet, CollectorError> {
        let text = fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CollectorError::MissingArtifact {
                    kind: "samplesheet",
                    path: path.to_path_buf(),
                }
            } else {
                CollectorError::SampleSheetParse {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })?;
        Self::parse_str(&text, SheetDialect::from(family), path)
    }

    pub fn parse_str(
        text: &str,
        dialect: SheetDialect,
        path: &Path,
    ) -> Result<SampleSheet, CollectorError> {
        match dialect {
            SheetDialect::Legacy => Ok(Self::parse_sectioned(text, dialect, StopRule::NextHeader, path)),
            SheetDialect::Cloud => Ok(Self::parse_sectioned(
                text,
                dialect,
                StopRule::NextHeaderOrBlank,
                path,
            )),
            SheetDialect::Nanopore => Self::parse_nanopore(text, path),
        }
    }

    fn parse_sectioned(text: &str, dialect: SheetDialect, stop: StopRule, path: &Path) -> SampleSheet {
        let mut sections = BTreeMap::new();
        for raw in SectionScanner::new(stop).scan(text) {
            let name = raw.name.to_ascii_lowercase();
            let records = SectionKind::for_section(&name).build(&raw.lines);
            if sections.contains_key(&name) {
                tracing::warn!(
                    event_type = "samplesheet_duplicate_section",
                    samplesheet_path = %path.display(),
                    section = %name,
                );
            }
            sections.insert(name, records);
        }

        let mut sheet = SampleSheet {
            path: path.to_path_buf(),
            dialect,
            sections,
            validation_errors: Vec::new(),
        };

        if dialect == SheetDialect::Legacy {
            let violations = LEGACY_SCHEMA.validate(&sheet);
            if !violations.is_empty() {
                let err = CollectorError::SchemaViolation {
                    path: path.to_path_buf(),
                    dialect: LEGACY_SCHEMA.dialect,
                    violations: violations.clone(),
                };
                tracing::error!(
                    event_type = "samplesheet_validation_failed",
                    samplesheet_path = %path.display(),
                    error = %err,
                );
                sheet.validation_errors = violations;
            }
        }
        sheet
    }

    /// MinKNOW sheets carry `<library_id>_<project_id>` in the `alias`
    /// column; only the first underscore separates the two.
    fn parse_nanopore(text: &str, path: &Path) -> Result<SampleSheet, CollectorError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let parse_err = |err: csv::Error| CollectorError::SampleSheetParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        };

        let headers: Vec<String> = reader
            .headers()
            .map_err(parse_err)?
            .iter()
            .map(normalize_key)
            .collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(parse_err)?;
            if row.iter().all(|value| value.is_empty()) {
                continue;
            }
            let mut record: Record = headers
                .iter()
                .zip(row.iter())
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect();
            if let Some((library_id, project_id)) = record
                .get("alias")
                .and_then(|alias| alias.split_once('_'))
                .map(|(library, project)| (library.to_string(), project.to_string()))
            {
                record.insert("library_id".to_string(), library_id);
                record.insert("project_id".to_string(), project_id);
            }
            records.push(record);
        }

        let mut sections = BTreeMap::new();
        sections.insert(DATA_SECTION.to_string(), records);
        Ok(SampleSheet {
            path: path.to_path_buf(),
            dialect: SheetDialect::Nanopore,
            sections,
            validation_errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = "\
[Header],,,
IEMFileVersion,4,,
Experiment Name,run-42,,
Date,2020-11-30,,
,,,
[Reads],,,
151,,,
151,,,
,,,
[Settings],,,
Adapter,CTGTCTCTTATACACATCT,,
,,,
[Data],,,
Sample_ID,Sample_Name,Sample_Project,index,index2
S1,LIB_001,P-01,ACGTACGT,TTGGCCAA
S2,LIB_002,P-02,GGGGAAAA,CCCCTTTT
,,,,
";

    const CLOUD: &str = "\
[Header]
FileFormatVersion,2
RunName,NS-run-7
InstrumentPlatform,NextSeq1k2k

[Reads]
Read1Cycles,151
Read2Cycles,151
Index1Cycles,10

[BCLConvert_Settings]
SoftwareVersion,3.7.4

[BCLConvert_Data]
Sample_ID,Index,Index2
LIB-100,ACGTACGTAA,TTTTCCCCGG
LIB-101,GGGGAAAACC,AAAACCCCGG

[Cloud_Data]
Sample_ID,ProjectName,LibraryName
LIB-100,proj_a,LIB-100_ACGTACGTAA
LIB-101,proj_b,LIB-101_GGGGAAAACC
";

    #[test]
    fn parse_legacy_sheet() {
        let sheet = SampleSheetParser::parse_str(LEGACY, SheetDialect::Legacy, Path::new("SampleSheetUsed.csv"))
            .unwrap();
        assert!(sheet.is_valid(), "{:?}", sheet.validation_errors);
        assert_eq!(sheet.field("header", "iem_file_version"), Some("4"));
        assert_eq!(sheet.experiment_name(), Some("run-42"));
        assert_eq!(sheet.field("reads", "read2_cycles"), Some("151"));
        assert_eq!(sheet.field("settings", "adapter"), Some("CTGTCTCTTATACACATCT"));
        let data = sheet.section(DATA_SECTION);
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["sample_name"], "LIB_001");
        assert_eq!(data[1]["sample_project"], "P-02");
    }

    #[test]
    fn legacy_sheet_without_data_is_returned_with_violations() {
        let text = "[Header]\nExperiment Name,x\n[Reads]\n151\n";
        let sheet =
            SampleSheetParser::parse_str(text, SheetDialect::Legacy, Path::new("s.csv")).unwrap();
        assert!(!sheet.is_valid());
        assert_eq!(sheet.experiment_name(), Some("x"));
        assert!(sheet.section(DATA_SECTION).is_empty());
    }

    #[test]
    fn parse_cloud_sheet() {
        let sheet =
            SampleSheetParser::parse_str(CLOUD, SheetDialect::Cloud, Path::new("SampleSheet.csv"))
                .unwrap();
        assert_eq!(sheet.experiment_name(), Some("NS-run-7"));
        assert_eq!(sheet.field("reads", "index1_cycles"), Some("10"));
        assert_eq!(sheet.field("bclconvert_settings", "software_version"), Some("3.7.4"));
        let data = sheet.section("bclconvert_data");
        assert_eq!(data.len(), 2);
        assert_eq!(data[1]["index2"], "AAAACCCCGG");
        let cloud = sheet.section("cloud_data");
        assert_eq!(cloud[0]["project_name"], "proj_a");
    }

    #[test]
    fn parse_nanopore_sheet_splits_alias() {
        let text = "flow_cell_id,kit,sample_id,experiment_id,barcode,alias\n\
                    FAV12345,SQK-NBD114-24,s1,exp-1,barcode01,LIB001_PROJ_A\n\
                    FAV12345,SQK-NBD114-24,s2,exp-1,barcode02,noproject\n";
        let sheet =
            SampleSheetParser::parse_str(text, SheetDialect::Nanopore, Path::new("sample_sheet.csv"))
                .unwrap();
        let data = sheet.section(DATA_SECTION);
        assert_eq!(data[0]["library_id"], "LIB001");
        assert_eq!(data[0]["project_id"], "PROJ_A");
        assert!(!data[1].contains_key("library_id"));
        assert_eq!(sheet.experiment_name(), Some("exp-1"));
    }
}
