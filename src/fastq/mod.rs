//! Per-file read and quality statistics computed straight from the FASTQ
//! stream, plus the read-pair aggregation used for library-level figures.

pub mod pool;

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use md5::{Digest, Md5};
use needletail::errors::ParseErrorKind;
use needletail::parse_fastx_reader;
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

pub const PHRED_OFFSET: u8 = 33;
pub const Q30: u8 = 30;
pub const TAIL_WINDOW: usize = 25;

const GZ_BUF_SIZE: usize = 1 << 20;
const MD5_CHUNK_SIZE: usize = 8192;

/// Statistics for a single FASTQ file. Every field is `None` when the file
/// could not be read; rates are also `None` when their denominator is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FastqStatsRecord {
    pub filename: Option<String>,
    pub num_reads: Option<u64>,
    pub num_bases: Option<u64>,
    pub num_bases_q30: Option<u64>,
    pub q30_percent: Option<f64>,
    pub num_bases_last_25: Option<u64>,
    pub num_bases_q30_last_25: Option<u64>,
    pub q30_percent_last_25_bases: Option<f64>,
    pub min_read_length: Option<u64>,
    pub max_read_length: Option<u64>,
    pub mean_read_length: Option<f64>,
    pub md5: Option<String>,
    pub file_size_mb: Option<f64>,
}

impl FastqStatsRecord {
    /// The record used when a file cannot be opened or decoded.
    pub fn unreadable(path: &Path) -> Self {
        Self {
            filename: file_name(path),
            ..Self::default()
        }
    }

    pub fn is_readable(&self) -> bool {
        self.num_reads.is_some() && self.num_bases.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    reads: u64,
    bases: u64,
    bases_q30: u64,
    tail_positions: u64,
    tail_q30: u64,
    min_len: Option<u64>,
    max_len: Option<u64>,
}

impl Tally {
    fn add_read(&mut self, len: usize, qual: Option<&[u8]>) {
        let len = len as u64;
        self.reads += 1;
        self.bases += len;
        self.min_len = Some(self.min_len.map_or(len, |min| min.min(len)));
        self.max_len = Some(self.max_len.map_or(len, |max| max.max(len)));

        let Some(qual) = qual else {
            return;
        };
        self.bases_q30 += count_q30(qual);
        let tail = &qual[qual.len().saturating_sub(TAIL_WINDOW)..];
        self.tail_positions += tail.len() as u64;
        self.tail_q30 += count_q30(tail);
    }

    fn into_record(self, path: &Path, md5: String, size_bytes: u64) -> FastqStatsRecord {
        let mean_read_length = (self.reads > 0).then(|| round4(self.bases as f64 / self.reads as f64));
        FastqStatsRecord {
            filename: file_name(path),
            num_reads: Some(self.reads),
            num_bases: Some(self.bases),
            num_bases_q30: Some(self.bases_q30),
            q30_percent: percent(self.bases_q30, self.bases),
            num_bases_last_25: Some(self.tail_positions),
            num_bases_q30_last_25: Some(self.tail_q30),
            q30_percent_last_25_bases: percent(self.tail_q30, self.tail_positions),
            min_read_length: self.min_len,
            max_read_length: self.max_len,
            mean_read_length,
            md5: Some(md5),
            file_size_mb: Some(round4(size_bytes as f64 / 1024.0 / 1024.0)),
        }
    }
}

fn count_q30(qual: &[u8]) -> u64 {
    qual.iter()
        .filter(|&&q| q.saturating_sub(PHRED_OFFSET) >= Q30)
        .count() as u64
}

/// Computes statistics for one file. Never fails: unreadable input is logged
/// and reported as an all-null record.
pub fn compute(path: &Path) -> FastqStatsRecord {
    match try_compute(path) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(
                event_type = "fastq_unreadable",
                fastq_path = %path.display(),
                error = %err,
            );
            FastqStatsRecord::unreadable(path)
        }
    }
}

pub fn try_compute(path: &Path) -> Result<FastqStatsRecord, CollectorError> {
    let unreadable = |message: String| CollectorError::FileUnreadable {
        path: path.to_path_buf(),
        message,
    };

    let tally = tally_reads(path)?;
    let md5 = file_md5(path).map_err(|err| unreadable(err.to_string()))?;
    let size_bytes = std::fs::metadata(path)
        .map_err(|err| unreadable(err.to_string()))?
        .len();
    Ok(tally.into_record(path, md5, size_bytes))
}

fn tally_reads(path: &Path) -> Result<Tally, CollectorError> {
    let unreadable = |message: String| CollectorError::FileUnreadable {
        path: path.to_path_buf(),
        message,
    };

    let stream = open_fastq(path).map_err(|err| unreadable(err.to_string()))?;
    let mut tally = Tally::default();
    let mut reader = match parse_fastx_reader(stream) {
        Ok(reader) => reader,
        Err(err) if matches!(err.kind, ParseErrorKind::EmptyFile) => return Ok(tally),
        Err(err) => return Err(unreadable(err.to_string())),
    };

    while let Some(record) = reader.next() {
        let record = record.map_err(|err| unreadable(err.to_string()))?;
        tally.add_read(record.num_bases(), record.qual());
    }
    Ok(tally)
}

/// Opens a plain or gzip-compressed file, deciding by magic bytes rather
/// than extension.
fn open_fastq(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let sniffed = read_prefix(&mut file, &mut magic)?;
    file.rewind()?;

    if sniffed == magic.len() && magic == [0x1F, 0x8B] {
        Ok(Box::new(BufReader::with_capacity(
            GZ_BUF_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Checksum of the file as stored on disk (compressed bytes for `.gz`).
pub fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut chunk = [0u8; MD5_CHUNK_SIZE];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn percent(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| round4(numerator as f64 / denominator as f64 * 100.0))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// Library-level figures for a read pair, alongside the per-mate records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryFastqStats {
    pub r1: Option<FastqStatsRecord>,
    pub r2: Option<FastqStatsRecord>,
    pub num_reads: Option<u64>,
    pub num_bases: Option<u64>,
    pub q30_percent: Option<f64>,
    pub q30_percent_last_25_bases: Option<f64>,
}

/// Combines the two mates of a library. Counts add up. The Q30 rate is
/// weighted by each mate's base count and the last-25 rate by `25 * reads`.
/// A missing or unreadable mate is left out of every figure.
pub fn combine_mates(r1: Option<FastqStatsRecord>, r2: Option<FastqStatsRecord>) -> LibraryFastqStats {
    let mates: Vec<&FastqStatsRecord> = [r1.as_ref(), r2.as_ref()]
        .into_iter()
        .flatten()
        .filter(|mate| mate.is_readable())
        .collect();

    let mut combined = LibraryFastqStats::default();
    if !mates.is_empty() {
        combined.num_reads = Some(mates.iter().filter_map(|m| m.num_reads).sum());
        combined.num_bases = Some(mates.iter().filter_map(|m| m.num_bases).sum());
        combined.q30_percent = weighted_rate(
            mates
                .iter()
                .map(|m| (m.num_bases.unwrap_or(0) as f64, m.q30_percent)),
        );
        combined.q30_percent_last_25_bases = weighted_rate(mates.iter().map(|m| {
            (
                (TAIL_WINDOW as u64 * m.num_reads.unwrap_or(0)) as f64,
                m.q30_percent_last_25_bases,
            )
        }));
    }
    combined.r1 = r1;
    combined.r2 = r2;
    combined
}

/// Every contributing rate must be present; a mate with zero weight is
/// ignored rather than nulling the result.
fn weighted_rate(parts: impl Iterator<Item = (f64, Option<f64>)>) -> Option<f64> {
    let mut total_weight = 0.0;
    let mut weighted_sum = 0.0;
    for (weight, rate) in parts {
        if weight == 0.0 {
            continue;
        }
        let rate = rate?;
        total_weight += weight;
        weighted_sum += weight * rate;
    }
    (total_weight > 0.0).then(|| round4(weighted_sum / total_weight))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    // 42 bases: 28 at 'I' (Q40) and 14 at '+' (Q10).
    const SINGLE_READ: &str = "@read1\nACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTAC\n+\nIIIIIIIIIIIIIIIIIIIIIIIIIIII++++++++++++++\n";

    fn mate(bases: u64, reads: u64, q30: f64, last25: f64) -> FastqStatsRecord {
        FastqStatsRecord {
            num_reads: Some(reads),
            num_bases: Some(bases),
            q30_percent: Some(q30),
            q30_percent_last_25_bases: Some(last25),
            ..FastqStatsRecord::default()
        }
    }

    #[test]
    fn single_read_statistics() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("LIB001_S1_L001_R1_001.fastq");
        std::fs::write(&path, SINGLE_READ).unwrap();

        let record = compute(&path);
        assert_eq!(record.filename.as_deref(), Some("LIB001_S1_L001_R1_001.fastq"));
        assert_eq!(record.num_reads, Some(1));
        assert_eq!(record.num_bases, Some(42));
        assert_eq!(record.num_bases_q30, Some(28));
        assert_eq!(record.q30_percent, Some(66.6667));
        assert_eq!(record.min_read_length, Some(42));
        assert_eq!(record.max_read_length, Some(42));
        assert_eq!(record.mean_read_length, Some(42.0));
        // Last 25 positions: 11 at Q40, 14 at Q10.
        assert_eq!(record.num_bases_last_25, Some(25));
        assert_eq!(record.num_bases_q30_last_25, Some(11));
        assert_eq!(record.q30_percent_last_25_bases, Some(44.0));
        assert_eq!(record.md5.as_ref().map(|m| m.len()), Some(32));
    }

    #[test]
    fn gzip_input_matches_plain() {
        let temp = tempfile::tempdir().unwrap();
        let plain = temp.path().join("plain.fastq");
        let gz = temp.path().join("reads.fastq.gz");
        std::fs::write(&plain, SINGLE_READ).unwrap();
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(SINGLE_READ.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let a = compute(&plain);
        let b = compute(&gz);
        assert_eq!(a.num_bases_q30, b.num_bases_q30);
        assert_eq!(a.q30_percent, b.q30_percent);
        assert_ne!(a.md5, b.md5);
    }

    #[test]
    fn short_reads_use_actual_tail_positions() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("short.fastq");
        std::fs::write(&path, "@r\nACGTACGTAC\n+\nIIIII+++++\n").unwrap();
        let record = compute(&path);
        assert_eq!(record.num_bases_last_25, Some(10));
        assert_eq!(record.q30_percent_last_25_bases, Some(50.0));
    }

    #[test]
    fn empty_file_has_null_rates() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty.fastq");
        std::fs::write(&path, "").unwrap();
        let record = compute(&path);
        assert_eq!(record.num_reads, Some(0));
        assert_eq!(record.q30_percent, None);
        assert_eq!(record.q30_percent_last_25_bases, None);
        assert_eq!(record.mean_read_length, None);
    }

    #[test]
    fn missing_file_is_all_null() {
        let record = compute(Path::new("/nonexistent/reads.fastq.gz"));
        assert_eq!(record, FastqStatsRecord::unreadable(Path::new("reads.fastq.gz")));
        assert!(!record.is_readable());
    }

    #[test]
    fn mates_are_weighted_by_bases() {
        let combined = combine_mates(
            Some(mate(100, 1, 90.0, 90.0)),
            Some(mate(100, 1, 80.0, 80.0)),
        );
        assert_eq!(combined.num_reads, Some(2));
        assert_eq!(combined.num_bases, Some(200));
        assert_eq!(combined.q30_percent, Some(85.0));

        let skewed = combine_mates(
            Some(mate(300, 2, 90.0, 70.0)),
            Some(mate(100, 6, 50.0, 30.0)),
        );
        assert_eq!(skewed.q30_percent, Some(80.0));
        assert_eq!(skewed.q30_percent_last_25_bases, Some(40.0));
    }

    #[test]
    fn unreadable_mate_is_absent() {
        let combined = combine_mates(
            Some(mate(100, 1, 90.0, 90.0)),
            Some(FastqStatsRecord::unreadable(Path::new("r2.fastq.gz"))),
        );
        assert_eq!(combined.num_bases, Some(100));
        assert_eq!(combined.q30_percent, Some(90.0));
        assert!(combined.r2.is_some());

        let nothing = combine_mates(None, None);
        assert_eq!(nothing.num_reads, None);
        assert_eq!(nothing.q30_percent, None);
    }
}
