//! Library identity: which samplesheet field holds the real library id, the
//! translated project id, and the FASTQ files demultiplexing wrote for it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ProjectIdTranslation;
use crate::domain::Mate;
use crate::record::{NanoporeLibrary, SequencedLibrary};
use crate::samplesheet::{DATA_SECTION, Record, SampleSheet, SheetDialect};

static ORDINAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(S\d+|\d+)$").unwrap());
static SAMPLE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_S(\d+)_").unwrap());

/// Instrument software fills a blank id field with an ordinal such as `S3`.
pub fn is_ordinal(value: &str) -> bool {
    ORDINAL_ID.is_match(value.trim())
}

/// Picks the operator-chosen library id out of `sample_id` / `sample_name`
/// and normalizes underscores to hyphens, as FASTQ file names do.
pub fn resolve_library_id(sample_id: Option<&str>, sample_name: Option<&str>) -> Option<String> {
    let id = sample_id.map(str::trim).unwrap_or("");
    let name = sample_name.map(str::trim).unwrap_or("");

    let chosen = if is_ordinal(id) && !name.is_empty() && !is_ordinal(name) {
        name
    } else if id.is_empty() != name.is_empty() {
        if id.is_empty() { name } else { id }
    } else if !name.is_empty() {
        name
    } else {
        id
    };

    (!chosen.is_empty()).then(|| chosen.replace('_', "-"))
}

pub fn sample_number_from_filename(filename: &str) -> Option<u32> {
    SAMPLE_NUMBER
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

fn non_empty(record: &Record, key: &str) -> Option<String> {
    record
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub struct LibraryIdentityResolver<'a> {
    translation: &'a ProjectIdTranslation,
}

impl<'a> LibraryIdentityResolver<'a> {
    pub fn new(translation: &'a ProjectIdTranslation) -> Self {
        Self { translation }
    }

    /// Libraries listed in an Illumina samplesheet. Ids are unique within one
    /// sheet; a repeated id keeps its first position and takes the later row.
    pub fn illumina_libraries(&self, sheet: &SampleSheet) -> Vec<SequencedLibrary> {
        let libraries = match sheet.dialect {
            SheetDialect::Legacy => self.legacy_libraries(sheet),
            SheetDialect::Cloud => self.cloud_libraries(sheet),
            SheetDialect::Nanopore => Vec::new(),
        };

        let mut order: Vec<String> = Vec::new();
        let mut by_id: BTreeMap<String, SequencedLibrary> = BTreeMap::new();
        for library in libraries {
            if !by_id.contains_key(&library.library_id) {
                order.push(library.library_id.clone());
            } else {
                tracing::warn!(
                    event_type = "duplicate_library_id",
                    samplesheet_path = %sheet.path.display(),
                    library_id = %library.library_id,
                );
            }
            by_id.insert(library.library_id.clone(), library);
        }
        order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }

    fn legacy_libraries(&self, sheet: &SampleSheet) -> Vec<SequencedLibrary> {
        sheet
            .section(DATA_SECTION)
            .iter()
            .filter_map(|row| {
                let library_id = resolve_library_id(
                    row.get("sample_id").map(String::as_str),
                    row.get("sample_name").map(String::as_str),
                )?;
                Some(self.library(library_id, non_empty(row, "sample_project"), row))
            })
            .collect()
    }

    /// BCLConvert_Data lists the libraries; Cloud_Data supplies each one's
    /// project, matched on `sample_id`.
    fn cloud_libraries(&self, sheet: &SampleSheet) -> Vec<SequencedLibrary> {
        let projects: BTreeMap<String, String> = sheet
            .section("cloud_data")
            .iter()
            .filter_map(|row| Some((non_empty(row, "sample_id")?, non_empty(row, "project_name")?)))
            .collect();

        sheet
            .section("bclconvert_data")
            .iter()
            .filter_map(|row| {
                let sample_id = non_empty(row, "sample_id")?;
                let library_id = resolve_library_id(
                    Some(sample_id.as_str()),
                    row.get("sample_name").map(String::as_str),
                )?;
                let project = projects.get(&sample_id).cloned();
                Some(self.library(library_id, project, row))
            })
            .collect()
    }

    fn library(&self, library_id: String, project: Option<String>, row: &Record) -> SequencedLibrary {
        SequencedLibrary {
            library_id,
            project_id_translated: project.as_deref().map(|p| self.translation.translate(p)),
            project_id_samplesheet: project,
            index: non_empty(row, "index"),
            index2: non_empty(row, "index2"),
            ..SequencedLibrary::default()
        }
    }

    pub fn nanopore_libraries(&self, sheet: &SampleSheet) -> Vec<NanoporeLibrary> {
        sheet
            .section(DATA_SECTION)
            .iter()
            .map(|row| {
                let project = non_empty(row, "project_id");
                NanoporeLibrary {
                    alias: non_empty(row, "alias"),
                    library_id: non_empty(row, "library_id").map(|id| id.replace('_', "-")),
                    project_id_translated: project.as_deref().map(|p| self.translation.translate(p)),
                    project_id_samplesheet: project,
                    barcode: non_empty(row, "barcode"),
                }
            })
            .collect()
    }
}

/// FASTQ files for one library in a demultiplexing output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryFastqs {
    pub r1: Option<PathBuf>,
    pub r2: Option<PathBuf>,
}

impl LibraryFastqs {
    pub fn get(&self, mate: Mate) -> Option<&Path> {
        match mate {
            Mate::R1 => self.r1.as_deref(),
            Mate::R2 => self.r2.as_deref(),
        }
    }
}

/// Sorted listing of a FASTQ directory, matched against
/// `<library_id>_*_R1_*.fastq.gz` and `..._R2_...`.
#[derive(Debug, Clone, Default)]
pub struct FastqDirectory {
    dir: PathBuf,
    names: Vec<String>,
}

impl FastqDirectory {
    pub fn read(dir: &Path) -> std::io::Result<Self> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".fastq.gz"))
            .collect();
        names.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            names,
        })
    }

    pub fn find(&self, library_id: &str) -> LibraryFastqs {
        LibraryFastqs {
            r1: self.find_mate(library_id, Mate::R1),
            r2: self.find_mate(library_id, Mate::R2),
        }
    }

    fn find_mate(&self, library_id: &str, mate: Mate) -> Option<PathBuf> {
        let prefix = format!("{library_id}_");
        let marker = format!("_{mate}_");
        self.names
            .iter()
            .find(|name| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| format!("_{rest}").contains(&marker))
            })
            .map(|name| self.dir.join(name))
    }

    /// Fills in file names and sample numbers for each library.
    pub fn attach(&self, libraries: &mut [SequencedLibrary]) -> BTreeMap<String, LibraryFastqs> {
        let mut found = BTreeMap::new();
        for library in libraries.iter_mut() {
            let fastqs = self.find(&library.library_id);
            let r1_name = fastqs.r1.as_deref().and_then(file_name);
            library.sample_number = r1_name.as_deref().and_then(sample_number_from_filename);
            library.fastq_filename_r1 = r1_name;
            library.fastq_filename_r2 = fastqs.r2.as_deref().and_then(file_name);
            found.insert(library.library_id.clone(), fastqs);
        }
        found
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::samplesheet::SampleSheetParser;

    #[test]
    fn ordinal_ids_defer_to_the_other_field() {
        assert_eq!(resolve_library_id(Some("S1"), Some("LIB001")), Some("LIB001".to_string()));
        assert_eq!(resolve_library_id(Some("7"), Some("LIB_007")), Some("LIB-007".to_string()));
        assert_eq!(resolve_library_id(Some("LIB002"), Some("")), Some("LIB002".to_string()));
        assert_eq!(resolve_library_id(Some(""), Some("LIB003")), Some("LIB003".to_string()));
        assert_eq!(resolve_library_id(Some("LIB004"), Some("S4")), Some("S4".to_string()));
        assert_eq!(resolve_library_id(Some("A"), Some("B")), Some("B".to_string()));
        assert_eq!(resolve_library_id(Some("S1"), Some("S2")), Some("S2".to_string()));
        assert_eq!(resolve_library_id(Some("LIB_005"), None), Some("LIB-005".to_string()));
        assert_eq!(resolve_library_id(Some(""), Some("")), None);
    }

    #[test]
    fn sample_number_parsing() {
        assert_eq!(sample_number_from_filename("LIB-001_S12_L001_R1_001.fastq.gz"), Some(12));
        assert_eq!(sample_number_from_filename("LIB-001_S007_R1_001.fastq.gz"), Some(7));
        assert_eq!(sample_number_from_filename("Undetermined.fastq.gz"), None);
    }

    #[test]
    fn legacy_sheet_libraries_are_translated() {
        let text = "[Header]\nExperiment Name,e\n[Reads]\n151\n151\n[Data]\n\
                    Sample_ID,Sample_Name,Sample_Project,index,index2\n\
                    S1,LIB_001,mysterious_project,AAAA,CCCC\n\
                    LIB002,,P-0002,GGGG,\n";
        let sheet =
            SampleSheetParser::parse_str(text, SheetDialect::Legacy, Path::new("s.csv")).unwrap();
        let translation = ProjectIdTranslation::new(HashMap::from([(
            "mysterious_project".to_string(),
            "P-0042".to_string(),
        )]));
        let libraries = LibraryIdentityResolver::new(&translation).illumina_libraries(&sheet);
        assert_eq!(libraries.len(), 2);
        assert_eq!(libraries[0].library_id, "LIB-001");
        assert_eq!(libraries[0].project_id_samplesheet.as_deref(), Some("mysterious_project"));
        assert_eq!(libraries[0].project_id_translated.as_deref(), Some("P-0042"));
        assert_eq!(libraries[1].library_id, "LIB002");
        assert_eq!(libraries[1].project_id_translated.as_deref(), Some("P-0002"));
        assert_eq!(libraries[1].index2, None);
    }

    #[test]
    fn cloud_sheet_merges_cloud_data_projects() {
        let text = "[BCLConvert_Data]\nSample_ID,Index,Index2\nLIB-100,AAAA,CCCC\nLIB-101,GGGG,TTTT\n\n\
                    [Cloud_Data]\nSample_ID,ProjectName\nLIB-100,proj_a\n";
        let sheet =
            SampleSheetParser::parse_str(text, SheetDialect::Cloud, Path::new("s.csv")).unwrap();
        let translation = ProjectIdTranslation::default();
        let libraries = LibraryIdentityResolver::new(&translation).illumina_libraries(&sheet);
        assert_eq!(libraries[0].project_id_samplesheet.as_deref(), Some("proj_a"));
        assert_eq!(libraries[0].project_id_translated.as_deref(), Some("proj_a"));
        assert_eq!(libraries[1].project_id_samplesheet, None);
        assert_eq!(libraries[1].index.as_deref(), Some("GGGG"));
    }

    #[test]
    fn fastq_discovery_takes_first_sorted_match() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            "LIB-1_S3_L001_R1_001.fastq.gz",
            "LIB-1_S3_L001_R2_001.fastq.gz",
            "LIB-1_S3_L002_R1_001.fastq.gz",
            "LIB-10_S4_L001_R1_001.fastq.gz",
            "LIB-1_S3_L001_I1_001.fastq.gz",
        ] {
            fs::write(temp.path().join(name), b"").unwrap();
        }
        let dir = FastqDirectory::read(temp.path()).unwrap();
        let mut libraries = vec![
            SequencedLibrary {
                library_id: "LIB-1".to_string(),
                ..SequencedLibrary::default()
            },
            SequencedLibrary {
                library_id: "LIB-10".to_string(),
                ..SequencedLibrary::default()
            },
        ];
        let found = dir.attach(&mut libraries);
        assert_eq!(libraries[0].fastq_filename_r1.as_deref(), Some("LIB-1_S3_L001_R1_001.fastq.gz"));
        assert_eq!(libraries[0].fastq_filename_r2.as_deref(), Some("LIB-1_S3_L001_R2_001.fastq.gz"));
        assert_eq!(libraries[0].sample_number, Some(3));
        assert_eq!(libraries[1].sample_number, Some(4));
        assert_eq!(libraries[1].fastq_filename_r2, None);
        assert!(found["LIB-1"].get(Mate::R1).is_some());
    }
}
