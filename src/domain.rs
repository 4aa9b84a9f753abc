use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

static MISEQ_RUN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}_M\d{5}_\d+_\d{9}-[A-Z0-9]{5}$").unwrap());
static NEXTSEQ_RUN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}_VH\d{5}_\d+_[A-Z0-9]{9,}$").unwrap());
static GRIDION_RUN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{8}_\d{4}_X[1-5]_[A-Z0-9]+_[a-z0-9]{8}$").unwrap()
});
static PROMETHION_RUN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{8}_\d{4}_P2S_[0-9]{5}-\d_[A-Z0-9]+_[a-z0-9]{8}$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    Illumina,
    Nanopore,
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentType::Illumina => write!(f, "illumina"),
            InstrumentType::Nanopore => write!(f, "nanopore"),
        }
    }
}

/// Closed set of instrument families a run directory can belong to.
///
/// Classification happens once, from the run id, and every later step
/// dispatches on this value instead of re-matching the run id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum InstrumentFamily {
    #[serde(rename = "MISEQ")]
    #[value(name = "miseq")]
    MiSeqLike,
    #[serde(rename = "NEXTSEQ")]
    #[value(name = "nextseq")]
    NextSeqLike,
    #[serde(rename = "GRIDION")]
    #[value(name = "gridion")]
    GridIonLike,
    #[serde(rename = "PROMETHION")]
    #[value(name = "promethion")]
    PromethIonLike,
}

impl InstrumentFamily {
    pub const ALL: [InstrumentFamily; 4] = [
        InstrumentFamily::MiSeqLike,
        InstrumentFamily::NextSeqLike,
        InstrumentFamily::GridIonLike,
        InstrumentFamily::PromethIonLike,
    ];

    pub fn classify(run_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.run_id_pattern().is_match(run_id))
    }

    pub fn instrument_type(self) -> InstrumentType {
        match self {
            InstrumentFamily::MiSeqLike | InstrumentFamily::NextSeqLike => InstrumentType::Illumina,
            InstrumentFamily::GridIonLike | InstrumentFamily::PromethIonLike => {
                InstrumentType::Nanopore
            }
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            InstrumentFamily::MiSeqLike => "MISEQ",
            InstrumentFamily::NextSeqLike => "NEXTSEQ",
            InstrumentFamily::GridIonLike => "GRIDION",
            InstrumentFamily::PromethIonLike => "PROMETHION",
        }
    }

    fn run_id_pattern(self) -> &'static Regex {
        match self {
            InstrumentFamily::MiSeqLike => &MISEQ_RUN_ID,
            InstrumentFamily::NextSeqLike => &NEXTSEQ_RUN_ID,
            InstrumentFamily::GridIonLike => &GRIDION_RUN_ID,
            InstrumentFamily::PromethIonLike => &PROMETHION_RUN_ID,
        }
    }
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    id: String,
    family: InstrumentFamily,
}

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> InstrumentFamily {
        self.family
    }

    fn components(&self) -> Vec<&str> {
        self.id.split('_').collect()
    }

    /// Date encoded in the leading `YYMMDD` or `YYYYMMDD` component.
    pub fn run_date(&self) -> Option<NaiveDate> {
        self.components()
            .first()
            .and_then(|prefix| run_date_from_prefix(prefix))
    }

    /// Illumina run ids carry the instrument serial as their second component.
    /// Nanopore ids do not encode it, so it has to come from the run report.
    pub fn instrument_id(&self) -> Option<&str> {
        match self.family.instrument_type() {
            InstrumentType::Illumina => self.components().get(1).copied(),
            InstrumentType::Nanopore => None,
        }
    }

    pub fn flowcell_id(&self) -> Option<&str> {
        let components = self.components();
        match self.family.instrument_type() {
            InstrumentType::Illumina => components.last().copied(),
            InstrumentType::Nanopore => components
                .len()
                .checked_sub(2)
                .and_then(|idx| components.get(idx).copied()),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for RunId {
    type Err = CollectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches('/');
        let family = InstrumentFamily::classify(trimmed)
            .ok_or_else(|| CollectorError::UnrecognizedRunId(value.to_string()))?;
        Ok(Self {
            id: trimmed.to_string(),
            family,
        })
    }
}

pub fn run_date_from_prefix(prefix: &str) -> Option<NaiveDate> {
    if !prefix.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let (year, rest) = match prefix.len() {
        6 => (2000 + prefix[0..2].parse::<i32>().ok()?, &prefix[2..]),
        8 => (prefix[0..4].parse::<i32>().ok()?, &prefix[4..]),
        _ => return None,
    };
    let month = rest[0..2].parse::<u32>().ok()?;
    let day = rest[2..4].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// A run directory that has been classified by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDescriptor {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub ready: bool,
}

impl RunDescriptor {
    pub fn from_dir(run_dir: &Path, completion_marker: &str) -> Result<Self, CollectorError> {
        let name = run_dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CollectorError::UnrecognizedRunId(run_dir.display().to_string()))?;
        let run_id: RunId = name.parse()?;
        let run_dir = std::path::absolute(run_dir)
            .map_err(|err| CollectorError::Filesystem(err.to_string()))?;
        let ready = run_dir.join(completion_marker).exists();
        Ok(Self {
            run_id,
            run_dir,
            ready,
        })
    }

    pub fn family(&self) -> InstrumentFamily {
        self.run_id.family()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mate {
    R1,
    R2,
}

impl Mate {
    pub fn as_str(self) -> &'static str {
        match self {
            Mate::R1 => "R1",
            Mate::R2 => "R2",
        }
    }
}

impl fmt::Display for Mate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classify_miseq_run() {
        let run_id: RunId = "201130_M00325_0001_000000000-ABCDE".parse().unwrap();
        assert_eq!(run_id.family(), InstrumentFamily::MiSeqLike);
        assert_eq!(run_id.instrument_id(), Some("M00325"));
        assert_eq!(run_id.flowcell_id(), Some("000000000-ABCDE"));
        assert_eq!(run_id.run_date(), NaiveDate::from_ymd_opt(2020, 11, 30));
    }

    #[test]
    fn classify_nextseq_run() {
        let run_id: RunId = "201130_VH00123_1_ABCDEFGHIJ".parse().unwrap();
        assert_eq!(run_id.family(), InstrumentFamily::NextSeqLike);
        assert_eq!(run_id.instrument_id(), Some("VH00123"));
    }

    #[test]
    fn classify_nanopore_runs() {
        let gridion: RunId = "20230314_1821_X1_FAV12345_abcdef12".parse().unwrap();
        assert_eq!(gridion.family(), InstrumentFamily::GridIonLike);
        assert_eq!(gridion.flowcell_id(), Some("FAV12345"));
        assert_eq!(gridion.instrument_id(), None);
        assert_eq!(gridion.run_date(), NaiveDate::from_ymd_opt(2023, 3, 14));

        let promethion: RunId = "20230314_1821_P2S_01234-1_PAQ12345_abcdef12".parse().unwrap();
        assert_eq!(promethion.family(), InstrumentFamily::PromethIonLike);
        assert_eq!(promethion.flowcell_id(), Some("PAQ12345"));
    }

    #[test]
    fn unrecognized_run_id() {
        let err = "not_a_run".parse::<RunId>().unwrap_err();
        assert_matches!(err, CollectorError::UnrecognizedRunId(_));
    }

    #[test]
    fn run_date_rejects_invalid_calendar_values() {
        assert_eq!(run_date_from_prefix("201332"), None);
        assert_eq!(run_date_from_prefix("20201131"), None);
        assert_eq!(run_date_from_prefix("2011"), None);
        assert_eq!(
            run_date_from_prefix("20240229"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }
}
