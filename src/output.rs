use std::io::{self, Write};

use serde::Serialize;

use crate::app::ScanSummary;
use crate::fastq::FastqStatsRecord;
use crate::record::RunRecord;
use crate::samplesheet::SampleSheet;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(record: &RunRecord) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_fastq_stats(stats: &FastqStatsRecord) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_samplesheet(sheet: &SampleSheet) -> io::Result<()> {
        Self::print_json(sheet)
    }

    pub fn print_scan(summary: &ScanSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
