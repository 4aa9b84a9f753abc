//! Decodes `RunInfo.xml` into per-read cycle counts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize, de};

use crate::error::CollectorError;

pub const RUN_INFO_FILE: &str = "RunInfo.xml";

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    #[serde(rename = "Version", default)]
    pub version: Option<u32>,
    #[serde(rename = "Run")]
    pub run: Run,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Run {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Flowcell", default)]
    pub flowcell: String,
    #[serde(rename = "Instrument", default)]
    pub instrument: String,
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "Reads")]
    pub reads: Reads,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Reads {
    #[serde(rename = "Read", default)]
    pub read: Vec<Read>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Read {
    #[serde(rename = "Number")]
    pub number: u32,
    #[serde(rename = "NumCycles")]
    pub num_cycles: u32,
    #[serde(rename = "IsIndexedRead", deserialize_with = "bool_from_yn")]
    pub is_indexed_read: bool,
}

fn bool_from_yn<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: de::Deserializer<'de>,
{
    match String::deserialize(deserializer)?.as_ref() {
        "Y" => Ok(true),
        "N" => Ok(false),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"Y or N",
        )),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCycles {
    pub num_cycles_r1: Option<u32>,
    pub num_cycles_r2: Option<u32>,
}

impl RunInfo {
    pub fn parse_file(path: &Path) -> Result<Self, CollectorError> {
        let xml = fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CollectorError::MissingArtifact {
                    kind: "RunInfo.xml",
                    path: path.to_path_buf(),
                }
            } else {
                CollectorError::RunInfo {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })?;
        Self::parse_str(&xml, path)
    }

    pub fn parse_str(xml: &str, path: &Path) -> Result<Self, CollectorError> {
        serde_xml_rs::from_str(xml).map_err(|err| CollectorError::RunInfo {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Read 1 is the first non-index read. Read 2 is the highest-numbered
    /// non-index read after it (read 4 on dual-index paired runs).
    pub fn read_cycles(&self) -> ReadCycles {
        let mut cycles = ReadCycles::default();
        let mut r2_number = 0;
        for read in self.run.reads.read.iter().filter(|read| !read.is_indexed_read) {
            if read.number == 1 {
                cycles.num_cycles_r1 = Some(read.num_cycles);
            } else if read.number > r2_number {
                r2_number = read.number;
                cycles.num_cycles_r2 = Some(read.num_cycles);
            }
        }
        cycles
    }
}

/// Cycle counts for a run directory. A missing or malformed file is logged
/// and yields empty cycle counts.
pub fn read_cycles_for_run(run_dir: &Path) -> ReadCycles {
    let path = run_dir.join(RUN_INFO_FILE);
    match RunInfo::parse_file(&path) {
        Ok(run_info) => run_info.read_cycles(),
        Err(err) => {
            tracing::error!(
                event_type = "invalid_runinfo",
                runinfo_path = %path.display(),
                error = %err,
            );
            ReadCycles::default()
        }
    }
}
