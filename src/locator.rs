use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::RunDescriptor;
use crate::error::CollectorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    /// Recognized run whose completion marker is present.
    Ready(RunDescriptor),
    /// Recognized run that is still being written.
    Pending(RunDescriptor),
    /// Name matched none of the run id conventions.
    Skipped(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RunLocator {
    parent_dirs: Vec<PathBuf>,
    completion_marker: String,
}

impl RunLocator {
    pub fn new(parent_dirs: Vec<PathBuf>, completion_marker: impl Into<String>) -> Self {
        Self {
            parent_dirs,
            completion_marker: completion_marker.into(),
        }
    }

    /// Starts a fresh pass over every parent directory. Each call is
    /// independent, so scanning is restartable and has no side effects.
    pub fn scan(&self) -> RunScan<'_> {
        RunScan {
            locator: self,
            parents: self.parent_dirs.iter(),
            current: Vec::new().into_iter(),
        }
    }

    pub fn ready_runs(&self) -> impl Iterator<Item = RunDescriptor> + '_ {
        self.scan().filter_map(|entry| match entry {
            ScanEntry::Ready(run) => Some(run),
            _ => None,
        })
    }

    fn classify(&self, path: &Path) -> Option<ScanEntry> {
        match RunDescriptor::from_dir(path, &self.completion_marker) {
            Ok(run) if !path.is_dir() => {
                tracing::debug!(
                    event_type = "sequencing_run_not_a_directory",
                    sequencing_run_id = %run.run_id,
                );
                None
            }
            Ok(run) if run.ready => {
                tracing::debug!(
                    event_type = "sequencing_run_found",
                    sequencing_run_id = %run.run_id,
                );
                Some(ScanEntry::Ready(run))
            }
            Ok(run) => {
                tracing::debug!(
                    event_type = "sequencing_run_not_ready",
                    sequencing_run_id = %run.run_id,
                    completion_marker = %self.completion_marker,
                );
                Some(ScanEntry::Pending(run))
            }
            Err(CollectorError::UnrecognizedRunId(_)) => {
                tracing::info!(
                    event_type = "sequencing_run_skipped",
                    directory = %path.display(),
                );
                Some(ScanEntry::Skipped(path.to_path_buf()))
            }
            Err(err) => {
                tracing::warn!(
                    event_type = "sequencing_run_unreadable",
                    directory = %path.display(),
                    error = %err,
                );
                None
            }
        }
    }
}

pub struct RunScan<'a> {
    locator: &'a RunLocator,
    parents: std::slice::Iter<'a, PathBuf>,
    current: std::vec::IntoIter<PathBuf>,
}

impl RunScan<'_> {
    fn advance_parent(&mut self) -> bool {
        for parent in self.parents.by_ref() {
            match list_subdirs(parent) {
                Ok(entries) => {
                    self.current = entries.into_iter();
                    return true;
                }
                Err(err) => {
                    tracing::warn!(
                        event_type = "run_parent_dir_unreadable",
                        run_parent_dir = %parent.display(),
                        error = %err,
                    );
                }
            }
        }
        false
    }
}

impl Iterator for RunScan<'_> {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(path) = self.current.next() {
                if let Some(entry) = self.locator.classify(&path) {
                    return Some(entry);
                }
                continue;
            }
            if !self.advance_parent() {
                return None;
            }
        }
    }
}

fn list_subdirs(parent: &Path) -> Result<Vec<PathBuf>, CollectorError> {
    let entries = fs::read_dir(parent).map_err(|err| {
        CollectorError::Filesystem(format!("read {}: {err}", parent.display()))
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CollectorError::Filesystem(err.to_string()))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_classifies_and_filters_ready_runs() {
        let temp = tempfile::tempdir().unwrap();
        let ready = temp.path().join("201130_M00325_0001_000000000-ABCDE");
        let pending = temp.path().join("201201_VH00123_2_AAAAAAAAA");
        let junk = temp.path().join("scratch");
        for dir in [&ready, &pending, &junk] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(ready.join("upload_complete.json"), b"{}").unwrap();

        let locator = RunLocator::new(vec![temp.path().to_path_buf()], "upload_complete.json");
        let entries: Vec<ScanEntry> = locator.scan().collect();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().any(|e| matches!(e, ScanEntry::Skipped(p) if p == &junk)));
        assert!(entries.iter().any(|e| matches!(e, ScanEntry::Pending(_))));

        let runs: Vec<RunDescriptor> = locator.ready_runs().collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id.as_str(), "201130_M00325_0001_000000000-ABCDE");
        assert!(runs[0].ready);
    }

    #[test]
    fn missing_parent_is_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let locator = RunLocator::new(
            vec![temp.path().join("does-not-exist"), temp.path().to_path_buf()],
            "upload_complete.json",
        );
        assert_eq!(locator.scan().count(), 0);
    }
}
