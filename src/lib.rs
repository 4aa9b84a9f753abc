//! Collection of run identity, demultiplexing outputs and read-quality
//! metrics from Illumina and Oxford Nanopore run directories.

pub mod app;
pub mod collector;
pub mod config;
pub mod demux;
pub mod domain;
pub mod error;
pub mod fastq;
pub mod interop;
pub mod library;
pub mod locator;
pub mod nanopore;
pub mod output;
pub mod record;
pub mod runinfo;
pub mod samplesheet;
pub mod store;
