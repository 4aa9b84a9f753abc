//! Turns one ready run directory into a [`RunRecord`].
//!
//! Collection never fails as a whole: missing or broken artifacts are logged
//! and the affected part of the record is left empty.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ResolvedConfig;
use crate::demux::{DemultiplexLocation, DemultiplexOutputResolver};
use crate::domain::{InstrumentType, Mate, RunDescriptor};
use crate::fastq::pool::{FastqJob, reduce_by_library, run_jobs};
use crate::interop::{QualityMetricsDecoder, summarize};
use crate::library::{FastqDirectory, LibraryFastqs, LibraryIdentityResolver};
use crate::nanopore::{FinalSummary, NanoporeArtifacts, RunReport};
use crate::record::{DemultiplexingOutput, RunRecord, RunRecordBuilder, SequencedLibrary};
use crate::runinfo::read_cycles_for_run;
use crate::samplesheet::{SampleSheet, SampleSheetParser};

pub struct Collector<'a> {
    config: &'a ResolvedConfig,
    quality: &'a dyn QualityMetricsDecoder,
}

impl<'a> Collector<'a> {
    pub fn new(config: &'a ResolvedConfig, quality: &'a dyn QualityMetricsDecoder) -> Self {
        Self { config, quality }
    }

    pub fn collect(&self, run: &RunDescriptor) -> RunRecord {
        let started = Instant::now();
        tracing::info!(
            event_type = "collect_run_start",
            sequencing_run_id = %run.run_id,
            run_dir = %run.run_dir.display(),
        );

        let record = match run.family().instrument_type() {
            InstrumentType::Illumina => self.collect_illumina(run),
            InstrumentType::Nanopore => self.collect_nanopore(run),
        };

        tracing::info!(
            event_type = "collect_run_complete",
            sequencing_run_id = %run.run_id,
            collect_run_duration_seconds = started.elapsed().as_secs_f64(),
        );
        record
    }

    fn collect_illumina(&self, run: &RunDescriptor) -> RunRecord {
        let mut builder = RunRecordBuilder::new(run);
        builder
            .quality_summary(summarize(self.quality, &run.run_dir))
            .read_cycles(read_cycles_for_run(&run.run_dir));

        let locations = DemultiplexOutputResolver::resolve(&run.run_dir, run.family());
        if locations.is_empty() {
            tracing::warn!(
                event_type = "no_demultiplexing_outputs_found",
                sequencing_run_id = %run.run_id,
            );
        }
        for location in &locations {
            let (output, sheet) = self.collect_demultiplexing(run, location);
            if let Some(sheet) = &sheet {
                builder.experiment_name(sheet.experiment_name());
            }
            builder.demultiplexing(output);
        }
        builder.build()
    }

    fn collect_demultiplexing(
        &self,
        run: &RunDescriptor,
        location: &DemultiplexLocation,
    ) -> (DemultiplexingOutput, Option<SampleSheet>) {
        let mut output = DemultiplexingOutput {
            demultiplexing_id: DemultiplexingOutput::demultiplexing_id(run.run_id.as_str(), location.num),
            demultiplexing_num: location.num,
            samplesheet_path: location.samplesheet.as_deref().map(|p| relative_to(p, &run.run_dir)),
            fastq_dir_path: location.fastq_dir.as_deref().map(|p| relative_to(p, &run.run_dir)),
            timestamp_demultiplexing_started: location.started.clone(),
            sequenced_libraries: Vec::new(),
        };

        let Some(samplesheet_path) = &location.samplesheet else {
            tracing::warn!(
                event_type = "failed_to_find_samplesheet",
                sequencing_run_id = %run.run_id,
                demultiplexing_id = %output.demultiplexing_id,
                output_dir = %location.output_dir.display(),
            );
            return (output, None);
        };

        let sheet = match SampleSheetParser::parse_file(samplesheet_path, run.family()) {
            Ok(sheet) => sheet,
            Err(err) => {
                tracing::error!(
                    event_type = "failed_to_parse_samplesheet",
                    sequencing_run_id = %run.run_id,
                    demultiplexing_id = %output.demultiplexing_id,
                    error = %err,
                );
                return (output, None);
            }
        };

        let resolver = LibraryIdentityResolver::new(&self.config.project_id_translation);
        let mut libraries = resolver.illumina_libraries(&sheet);

        if let Some(fastq_dir) = &location.fastq_dir {
            match FastqDirectory::read(fastq_dir) {
                Ok(listing) => {
                    let fastqs = listing.attach(&mut libraries);
                    if self.config.collect_fastq_stats {
                        self.attach_fastq_stats(run, &mut libraries, fastqs);
                    }
                }
                Err(err) => tracing::warn!(
                    event_type = "fastq_dir_unreadable",
                    fastq_dir = %fastq_dir.display(),
                    error = %err,
                ),
            }
        }

        output.sequenced_libraries = libraries;
        (output, Some(sheet))
    }

    fn attach_fastq_stats(
        &self,
        run: &RunDescriptor,
        libraries: &mut [SequencedLibrary],
        fastqs: std::collections::BTreeMap<String, LibraryFastqs>,
    ) {
        let jobs: Vec<FastqJob> = fastqs
            .into_iter()
            .flat_map(|(library_id, files)| {
                [Mate::R1, Mate::R2].into_iter().filter_map(move |mate| {
                    files.get(mate).map(|path| FastqJob {
                        path: path.to_path_buf(),
                        library_id: library_id.clone(),
                        mate,
                    })
                })
            })
            .collect();
        if jobs.is_empty() {
            return;
        }

        let results = match run_jobs(jobs, self.config.num_fastq_stats_workers) {
            Ok(results) => results,
            Err(err) => {
                tracing::error!(
                    event_type = "collect_fastq_stats_failed",
                    sequencing_run_id = %run.run_id,
                    error = %err,
                );
                return;
            }
        };

        let mut by_library = reduce_by_library(results);
        for library in libraries.iter_mut() {
            library.fastq_stats = by_library.remove(&library.library_id);
        }
    }

    fn collect_nanopore(&self, run: &RunDescriptor) -> RunRecord {
        let mut builder = RunRecordBuilder::new(run);
        let artifacts = match NanoporeArtifacts::locate(&run.run_dir) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                tracing::error!(
                    event_type = "run_dir_unreadable",
                    sequencing_run_id = %run.run_id,
                    error = %err,
                );
                return builder.build();
            }
        };

        match &artifacts.samplesheet {
            Some(path) => match SampleSheetParser::parse_file(path, run.family()) {
                Ok(sheet) => {
                    let resolver = LibraryIdentityResolver::new(&self.config.project_id_translation);
                    builder
                        .experiment_name(sheet.experiment_name())
                        .nanopore_libraries(resolver.nanopore_libraries(&sheet));
                }
                Err(err) => tracing::error!(
                    event_type = "failed_to_parse_samplesheet",
                    sequencing_run_id = %run.run_id,
                    error = %err,
                ),
            },
            None => tracing::error!(
                event_type = "failed_to_find_samplesheet",
                sequencing_run_id = %run.run_id,
                run_dir = %run.run_dir.display(),
            ),
        }

        if let Some(path) = &artifacts.final_summary {
            match FinalSummary::parse_file(path) {
                Ok(summary) => {
                    builder
                        .instrument_id(summary.instrument_id())
                        .flowcell_id(summary.flowcell_id())
                        .protocol_id(summary.protocol_id());
                }
                Err(err) => tracing::warn!(
                    event_type = "failed_to_parse_final_summary",
                    sequencing_run_id = %run.run_id,
                    error = %err,
                ),
            }
        }

        let Some(report_path) = &artifacts.report else {
            tracing::error!(
                event_type = "failed_to_find_report_json",
                sequencing_run_id = %run.run_id,
                run_dir = %run.run_dir.display(),
            );
            return builder.build();
        };

        match RunReport::parse_file(report_path) {
            Ok(report) => {
                tracing::debug!(
                    event_type = "report_json_parsed",
                    sequencing_run_id = %run.run_id,
                    report_file = %report.path().display(),
                );
                let tz = self.config.local_timezone;
                builder
                    .nanopore_identity(report.identity(tz))
                    .acquisitions(report.acquisitions(tz), report.run_yield());
            }
            Err(err) => tracing::error!(
                event_type = "failed_to_parse_report_json",
                sequencing_run_id = %run.run_id,
                error = %err,
            ),
        }
        builder.build()
    }
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
