use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use seqrun_collector::app::App;
use seqrun_collector::config::{ConfigLoader, DEFAULT_CONFIG_FILE, ResolvedConfig};
use seqrun_collector::domain::InstrumentFamily;
use seqrun_collector::error::CollectorError;
use seqrun_collector::fastq;
use seqrun_collector::interop::NoQualityMetrics;
use seqrun_collector::output::JsonOutput;
use seqrun_collector::samplesheet::SampleSheetParser;

#[derive(Parser)]
#[command(name = "seqrun-collector")]
#[command(about = "Collect run and library metrics from sequencing run directories")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./seqrun-collector.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides RUST_LOG, e.g. `info` or `seqrun_collector=debug`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Poll run directories and collect every completed run")]
    Scan(ScanArgs),
    #[command(about = "Collect a single run directory and print its record")]
    Collect(CollectArgs),
    #[command(about = "Print read and quality statistics for one FASTQ file")]
    FastqStats(FastqStatsArgs),
    #[command(about = "Print the parsed sections of a samplesheet")]
    Samplesheet(SamplesheetArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Run a single scan and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args)]
struct CollectArgs {
    run_dir: PathBuf,

    /// Print only, do not write to the output directory
    #[arg(long)]
    no_write: bool,
}

#[derive(Args)]
struct FastqStatsArgs {
    fastq: PathBuf,
}

#[derive(Args)]
struct SamplesheetArgs {
    path: PathBuf,

    #[arg(long, value_enum)]
    family: InstrumentFamily,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CollectorError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CollectorError) -> u8 {
    match error {
        CollectorError::MissingConfig
        | CollectorError::ConfigRead(_)
        | CollectorError::MissingArtifact { .. } => 2,
        CollectorError::UnrecognizedRunId(_) => 3,
        _ => 1,
    }
}

fn init_logging(level: Option<&str>, format: LogFormat) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.log_format);

    match cli.command {
        Commands::Scan(args) => run_scan(cli.config, args),
        Commands::Collect(args) => run_collect(cli.config, args),
        Commands::FastqStats(args) => {
            let stats = fastq::try_compute(&args.fastq)?;
            JsonOutput::print_fastq_stats(&stats).into_diagnostic()
        }
        Commands::Samplesheet(args) => {
            let sheet = SampleSheetParser::parse_file(&args.path, args.family)?;
            JsonOutput::print_samplesheet(&sheet).into_diagnostic()
        }
    }
}

fn run_scan(config_path: Option<PathBuf>, args: ScanArgs) -> miette::Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = ConfigLoader::resolve(Some(config_path.as_path()))?;
    tracing::info!(
        event_type = "config_loaded",
        config_file = %config_path.display(),
        num_run_parent_dirs = config.run_parent_dirs.len(),
    );

    let mut app = App::new(Some(config_path), config, NoQualityMetrics);
    let shutdown = app.shutdown_flag();
    ctrlc::set_handler(move || {
        tracing::info!(event_type = "quit_when_safe_enabled");
        shutdown.store(true, Ordering::SeqCst);
    })
    .into_diagnostic()?;

    app.run(args.once)?;
    Ok(())
}

fn run_collect(config_path: Option<PathBuf>, args: CollectArgs) -> miette::Result<()> {
    let config = match ConfigLoader::resolve(config_path.as_deref()) {
        Ok(config) => config,
        Err(CollectorError::MissingConfig) => ResolvedConfig::default(),
        Err(err) => return Err(err.into()),
    };

    let app = App::new(None, config, NoQualityMetrics);
    let record = app.collect_dir(&args.run_dir)?;
    if !args.no_write {
        match app.store()? {
            Some(store) => {
                store.write(&record, app.config().write_csv_summaries)?;
            }
            None => tracing::warn!(event_type = "output_directory_not_configured"),
        }
    }
    JsonOutput::print_run(&record).into_diagnostic()
}
