//! Demultiplexing output discovery.
//!
//! Each instrument family has an ordered list of directory layouts. The first
//! layout that finds anything wins, so MiSeq runs re-demultiplexed by newer
//! software are read from `Alignment_N/` and older runs fall back to
//! `Data/Intensities/BaseCalls`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::domain::InstrumentFamily;

static TIMESTAMP_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+_\d").unwrap());

pub const DRAGEN_START_LABEL: &str = "DRAGEN START";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxLayout {
    /// `Alignment_<n>/<timestamp>/`, one per demultiplexing.
    MiSeqAlignment,
    /// `Data/Intensities/BaseCalls`, always demultiplexing 1.
    MiSeqBaseCalls,
    /// `Analysis/<n>/`, one per demultiplexing.
    CloudAnalysis,
}

pub fn layouts_for(family: InstrumentFamily) -> &'static [DemuxLayout] {
    match family {
        InstrumentFamily::MiSeqLike => &[DemuxLayout::MiSeqAlignment, DemuxLayout::MiSeqBaseCalls],
        InstrumentFamily::NextSeqLike => &[DemuxLayout::CloudAnalysis],
        InstrumentFamily::GridIonLike | InstrumentFamily::PromethIonLike => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemultiplexLocation {
    pub num: u32,
    pub layout: DemuxLayout,
    pub output_dir: PathBuf,
    pub samplesheet: Option<PathBuf>,
    pub fastq_dir: Option<PathBuf>,
    pub started: Option<String>,
}

pub struct DemultiplexOutputResolver;

impl DemultiplexOutputResolver {
    /// Every demultiplexing of the run, ordered by ordinal.
    pub fn resolve(run_dir: &Path, family: InstrumentFamily) -> Vec<DemultiplexLocation> {
        for layout in layouts_for(family) {
            let mut found = layout.locate(run_dir);
            if found.is_empty() {
                continue;
            }
            found.sort_by_key(|(num, _)| *num);
            return found
                .into_iter()
                .map(|(num, output_dir)| DemultiplexLocation {
                    num,
                    layout: *layout,
                    samplesheet: layout.samplesheet(&output_dir),
                    fastq_dir: layout.fastq_dir(&output_dir),
                    started: layout.start_timestamp(&output_dir),
                    output_dir,
                })
                .collect();
        }
        Vec::new()
    }
}

impl DemuxLayout {
    fn locate(self, run_dir: &Path) -> Vec<(u32, PathBuf)> {
        match self {
            DemuxLayout::MiSeqBaseCalls => {
                vec![(1, run_dir.join("Data").join("Intensities").join("BaseCalls"))]
            }
            DemuxLayout::MiSeqAlignment => subdirs(run_dir)
                .into_iter()
                .filter_map(|dir| {
                    let name = dir_name(&dir)?;
                    let num: u32 = name.strip_prefix("Alignment_")?.parse().ok()?;
                    let mut stamped: Vec<PathBuf> = subdirs(&dir)
                        .into_iter()
                        .filter(|sub| dir_name(sub).is_some_and(|n| TIMESTAMP_DIR.is_match(&n)))
                        .collect();
                    if stamped.len() > 1 {
                        tracing::warn!(
                            event_type = "multiple_demultiplexing_timestamp_dirs",
                            alignment_dir = %dir.display(),
                            num_found = stamped.len(),
                        );
                    }
                    if stamped.is_empty() {
                        return None;
                    }
                    Some((num, stamped.swap_remove(0)))
                })
                .collect(),
            DemuxLayout::CloudAnalysis => subdirs(&run_dir.join("Analysis"))
                .into_iter()
                .filter_map(|dir| {
                    let num: Option<u32> = dir_name(&dir)?.parse().ok();
                    if num.is_none() {
                        tracing::debug!(
                            event_type = "analysis_dir_skipped",
                            directory = %dir.display(),
                        );
                    }
                    Some((num?, dir))
                })
                .collect(),
        }
    }

    fn samplesheet(self, output_dir: &Path) -> Option<PathBuf> {
        let candidate = match self {
            DemuxLayout::MiSeqAlignment | DemuxLayout::MiSeqBaseCalls => {
                let alignment = output_dir.join("Alignment");
                if alignment.is_dir() {
                    alignment.join("SampleSheetUsed.csv")
                } else {
                    output_dir.join("SampleSheetUsed.csv")
                }
            }
            DemuxLayout::CloudAnalysis => {
                let data = output_dir.join("Data");
                let mut sheets: Vec<PathBuf> = fs::read_dir(&data)
                    .into_iter()
                    .flatten()
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        dir_name(path).is_some_and(|name| {
                            name.starts_with("SampleSheet") && name.ends_with(".csv")
                        })
                    })
                    .collect();
                sheets.sort();
                sheets.into_iter().next()?
            }
        };
        candidate.is_file().then_some(candidate)
    }

    fn fastq_dir(self, output_dir: &Path) -> Option<PathBuf> {
        let dir = match self {
            DemuxLayout::MiSeqBaseCalls => output_dir.to_path_buf(),
            DemuxLayout::MiSeqAlignment => output_dir.join("Fastq"),
            DemuxLayout::CloudAnalysis => output_dir.join("Data").join("fastq"),
        };
        dir.is_dir().then_some(dir)
    }

    /// Only the cloud layout records when demultiplexing began, in the DRAGEN
    /// event log.
    fn start_timestamp(self, output_dir: &Path) -> Option<String> {
        match self {
            DemuxLayout::CloudAnalysis => {
                dragen_start_time(&output_dir.join("Data").join("dmx_dragen_events.csv"))
            }
            DemuxLayout::MiSeqAlignment | DemuxLayout::MiSeqBaseCalls => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DragenEvent {
    label: String,
    time: String,
}

pub fn dragen_start_time(events_path: &Path) -> Option<String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(events_path)
        .ok()?;
    let mut started = None;
    for event in reader.deserialize::<DragenEvent>() {
        match event {
            Ok(event) if event.label == DRAGEN_START_LABEL => started = Some(event.time),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    event_type = "dragen_events_unreadable",
                    path = %events_path.display(),
                    error = %err,
                );
                break;
            }
        }
    }
    started
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|name| name.to_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn miseq_legacy_basecalls() {
        let temp = tempfile::tempdir().unwrap();
        let basecalls = temp.path().join("Data/Intensities/BaseCalls");
        touch(&basecalls.join("Alignment/SampleSheetUsed.csv"));

        let found = DemultiplexOutputResolver::resolve(temp.path(), InstrumentFamily::MiSeqLike);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].num, 1);
        assert_eq!(found[0].layout, DemuxLayout::MiSeqBaseCalls);
        assert_eq!(found[0].samplesheet, Some(basecalls.join("Alignment/SampleSheetUsed.csv")));
        assert_eq!(found[0].fastq_dir, Some(basecalls.clone()));
        assert_eq!(found[0].started, None);
    }

    #[test]
    fn miseq_redemultiplexed_outputs_are_all_kept() {
        let temp = tempfile::tempdir().unwrap();
        touch(&temp.path().join("Alignment_2/20201202_101010/SampleSheetUsed.csv"));
        touch(&temp.path().join("Alignment_1/20201201_090909/SampleSheetUsed.csv"));
        fs::create_dir_all(temp.path().join("Alignment_1/20201201_090909/Fastq")).unwrap();
        fs::create_dir_all(temp.path().join("Data/Intensities/BaseCalls")).unwrap();

        let found = DemultiplexOutputResolver::resolve(temp.path(), InstrumentFamily::MiSeqLike);
        assert_eq!(found.iter().map(|d| d.num).collect::<Vec<_>>(), vec![1, 2]);
        assert!(found.iter().all(|d| d.layout == DemuxLayout::MiSeqAlignment));
        assert!(found[0].fastq_dir.is_some());
        assert!(found[1].fastq_dir.is_none());
        assert!(found[1].samplesheet.is_some());
    }

    #[test]
    fn cloud_analysis_with_dragen_start() {
        let temp = tempfile::tempdir().unwrap();
        let analysis = temp.path().join("Analysis/1");
        touch(&analysis.join("Data/SampleSheet.csv"));
        fs::create_dir_all(analysis.join("Data/fastq")).unwrap();
        fs::write(
            analysis.join("Data/dmx_dragen_events.csv"),
            "time,thread,label,info\n\
             2022-03-10T20:46:19Z,1,DRAGEN START,x\n\
             2022-03-10T20:50:00Z,1,DRAGEN END,y\n",
        )
        .unwrap();
        fs::create_dir_all(temp.path().join("Analysis/tmp")).unwrap();
        fs::create_dir_all(temp.path().join("Analysis/2")).unwrap();

        let found = DemultiplexOutputResolver::resolve(temp.path(), InstrumentFamily::NextSeqLike);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].started.as_deref(), Some("2022-03-10T20:46:19Z"));
        assert!(found[0].samplesheet.is_some());
        assert!(found[0].fastq_dir.is_some());
        assert_eq!(found[1].samplesheet, None);
        assert_eq!(found[1].fastq_dir, None);
        assert_eq!(found[1].started, None);
    }

    #[test]
    fn nanopore_has_no_demultiplexing_layouts() {
        let temp = tempfile::tempdir().unwrap();
        assert!(DemultiplexOutputResolver::resolve(temp.path(), InstrumentFamily::GridIonLike).is_empty());
    }
}
