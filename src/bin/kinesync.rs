//! Kinesync CLI - Command-line interface for phase-synchronized EMG analysis
//!
//! Commands:
//! - stats: per-channel mean/max between two landmarks
//! - max-mean: sliding-window max-of-means over a file or a phase
//! - phases: phase-bucket statistics over the configured phase labels
//! - normalize: divide an EMG file by reference values
//! - check-manifest: parse and validate a phase manifest

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kinesync::assembler::{sanitize_file_component, Table};
use kinesync::{
    output_file_name, AnalysisConfig, AnalysisError, AnalysisRequest, ErrorKind, OutputFormat,
    PhaseAnalyzer, TimeRange, KINESYNC_VERSION,
};

/// Kinesync - phase-synchronized EMG analysis
#[derive(Parser)]
#[command(name = "kinesync")]
#[command(version = KINESYNC_VERSION)]
#[command(about = "Align EMG with motion and force recordings and summarise movement phases", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Decimal places in output (overrides config)
    #[arg(long, global = true)]
    precision: Option<usize>,

    /// Output format (overrides config)
    #[arg(long, global = true)]
    format: Option<FormatArg>,

    /// Do not prefix CSV output with a byte order mark
    #[arg(long, global = true)]
    no_bom: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-channel mean and max between two landmarks
    Stats {
        #[command(flatten)]
        phase: PhaseArgs,

        /// Output file (use - for stdout); defaults to <subject>_<start>-<end>_statistics.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sliding-window max-of-means per channel
    MaxMean {
        /// Window width in samples
        #[arg(short, long)]
        window: usize,

        /// EMG file to scan; when absent, the phase options select the data
        #[arg(long)]
        emg: Option<PathBuf>,

        /// Range start in EMG seconds (file mode)
        #[arg(long, default_value = "0")]
        range_start: f64,

        /// Range end in EMG seconds, 0 for end of file (file mode)
        #[arg(long, default_value = "0")]
        range_end: f64,

        /// Phase manifest (phase mode)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Folder holding the recordings named in the manifest (phase mode)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Start landmark (phase mode)
        #[arg(long)]
        start: Option<String>,

        /// End landmark (phase mode)
        #[arg(long)]
        end: Option<String>,

        /// 0-based manifest row (phase mode)
        #[arg(long, default_value = "0")]
        subject: usize,

        /// Output file (use - for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Phase-bucket statistics over the configured phase labels
    Phases {
        /// Phase manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Folder holding the recordings named in the manifest
        #[arg(long)]
        data: PathBuf,

        /// 0-based manifest row
        #[arg(long, default_value = "0")]
        subject: usize,

        /// Output file (use - for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Divide every sample of an EMG file by per-channel reference values
    Normalize {
        /// EMG file to normalize
        #[arg(short, long)]
        input: PathBuf,

        /// Reference file (header row, then one row of divisors)
        #[arg(short, long)]
        reference: PathBuf,

        /// Output file (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Parse and validate a phase manifest
    CheckManifest {
        /// Phase manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Also load every recording and report landmark coverage
        #[arg(long)]
        data: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct PhaseArgs {
    /// Phase manifest
    #[arg(long)]
    manifest: PathBuf,

    /// Folder holding the recordings named in the manifest
    #[arg(long)]
    data: PathBuf,

    /// Start landmark (P0, P1, P2, S, C, D, T0, T, O, L)
    #[arg(long)]
    start: String,

    /// End landmark
    #[arg(long)]
    end: String,

    /// 0-based manifest row
    #[arg(long, default_value = "0")]
    subject: usize,
}

impl PhaseArgs {
    fn request(&self) -> AnalysisRequest {
        AnalysisRequest {
            manifest_path: self.manifest.clone(),
            data_folder: self.data.clone(),
            start_phase: self.start.clone(),
            end_phase: self.end.clone(),
            subject_index: self.subject,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// Comma-separated values
    Csv,
    /// JSON document with request metadata
    Json,
    /// Excel workbook
    Xlsx,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Xlsx => OutputFormat::Xlsx,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<AnalysisConfig, KinesyncCliError> {
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(precision) = cli.precision {
        config.precision = precision;
    }
    if let Some(format) = cli.format {
        config.output_format = format.into();
    }
    if cli.no_bom {
        config.bom_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn analyzer(config: AnalysisConfig) -> Result<PhaseAnalyzer, KinesyncCliError> {
    let analyzer = PhaseAnalyzer::new(config)?;
    if atty::is(atty::Stream::Stderr) {
        let progress = |done: usize, total: usize| {
            eprint!("\r{done}/{total} channels");
            if done == total {
                eprintln!();
            }
        };
        Ok(analyzer.with_progress(Arc::new(progress)))
    } else {
        Ok(analyzer)
    }
}

fn run(cli: Cli) -> Result<(), KinesyncCliError> {
    let config = load_config(&cli)?;
    let analyzer = analyzer(config)?;

    match cli.command {
        Commands::Stats { phase, output } => cmd_stats(&analyzer, &phase, output),

        Commands::MaxMean {
            window,
            emg,
            range_start,
            range_end,
            manifest,
            data,
            start,
            end,
            subject,
            output,
        } => match (emg, manifest, data, start, end) {
            (Some(emg), _, _, _, _) => {
                let range = (range_start != 0.0 || range_end != 0.0)
                    .then(|| TimeRange::new(range_start, range_end));
                let report = analyzer.max_mean_file(&emg, window, range)?;
                let table = analyzer.assembler().max_mean_table(&report);
                let stem = emg
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "emg".to_string());
                let default = default_name(&stem, "max-mean", &analyzer);
                write_table(&analyzer, &table, output.unwrap_or(default))
            }
            (None, Some(manifest), Some(data), Some(start), Some(end)) => {
                let phase = PhaseArgs {
                    manifest,
                    data,
                    start,
                    end,
                    subject,
                };
                let report = analyzer.max_mean_for_phase(&phase.request(), window)?;
                let table = analyzer.assembler().max_mean_table(&report);
                let label = format!("{}-{}", phase.start, phase.end);
                let default = default_name(&label, "max-mean", &analyzer);
                write_table(&analyzer, &table, output.unwrap_or(default))
            }
            _ => Err(KinesyncCliError::Usage(
                "max-mean needs --emg, or all of --manifest, --data, --start and --end".to_string(),
            )),
        },

        Commands::Phases {
            manifest,
            data,
            subject,
            output,
        } => {
            let stats = analyzer.phase_breakdown(&manifest, &data, subject)?;
            let table = analyzer.assembler().phase_stats_table(&stats);
            let subject_name = analyzer
                .load_manifest(&manifest)?
                .subject(subject)?
                .subject
                .clone();
            let default = default_name(&subject_name, "phases", &analyzer);
            write_table(&analyzer, &table, output.unwrap_or(default))
        }

        Commands::Normalize {
            input,
            reference,
            output,
        } => {
            let stream = analyzer.normalize_files(&input, &reference)?;
            let table = analyzer.assembler().stream_table(&stream);
            write_table(&analyzer, &table, output)
        }

        Commands::CheckManifest {
            manifest,
            data,
            json,
        } => cmd_check_manifest(&analyzer, &manifest, data.as_deref(), json),
    }
}

fn cmd_stats(
    analyzer: &PhaseAnalyzer,
    phase: &PhaseArgs,
    output: Option<PathBuf>,
) -> Result<(), KinesyncCliError> {
    let stats = analyzer.analyze(&phase.request())?;
    let table = analyzer.assembler().interval_stats_table(&stats);
    let default = PathBuf::from(output_file_name(
        &stats.subject,
        &stats.start_phase,
        &stats.end_phase,
        analyzer.config().output_format,
    ));
    write_table(analyzer, &table, output.unwrap_or(default))
}

fn cmd_check_manifest(
    analyzer: &PhaseAnalyzer,
    manifest_path: &Path,
    data: Option<&Path>,
    json: bool,
) -> Result<(), KinesyncCliError> {
    let manifest = analyzer.load_manifest(manifest_path)?;

    let mut report = ManifestReport {
        subjects: manifest.len(),
        entries: Vec::with_capacity(manifest.len()),
    };
    for record in &manifest.subjects {
        let uncovered = match data {
            Some(folder) => Some(
                analyzer
                    .load_recording(record, folder)?
                    .uncovered
                    .iter()
                    .map(|l| l.to_string())
                    .collect(),
            ),
            None => None,
        };
        report.entries.push(ManifestEntry {
            subject: record.subject.clone(),
            emg_file: record.emg_file.clone(),
            emg_motion_offset: record.emg_motion_offset,
            uncovered_landmarks: uncovered,
        });
    }

    let mut stdout = io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        writeln!(stdout, "Manifest: {} ({} subjects)", manifest_path.display(), report.subjects)?;
        for entry in &report.entries {
            write!(
                stdout,
                "  {:<16} emg={} offset={}",
                entry.subject, entry.emg_file, entry.emg_motion_offset
            )?;
            match &entry.uncovered_landmarks {
                Some(list) if list.is_empty() => writeln!(stdout, "  coverage ok")?,
                Some(list) => writeln!(stdout, "  uncovered: {}", list.join(", "))?,
                None => writeln!(stdout)?,
            }
        }
    }
    Ok(())
}

fn default_name(stem: &str, suffix: &str, analyzer: &PhaseAnalyzer) -> PathBuf {
    PathBuf::from(format!(
        "{}_{suffix}.{}",
        sanitize_file_component(stem),
        analyzer.config().output_format.extension()
    ))
}

fn write_table(analyzer: &PhaseAnalyzer, table: &Table, output: PathBuf) -> Result<(), KinesyncCliError> {
    let config = analyzer.config();
    let bytes = analyzer
        .assembler()
        .encode(table, config.output_format, config.bom_enabled)?;

    if output.to_string_lossy() == "-" {
        io::stdout().write_all(&bytes)?;
    } else {
        fs::write(&output, bytes)?;
        tracing::info!(path = %output.display(), "wrote output");
    }
    Ok(())
}

#[derive(Debug)]
enum KinesyncCliError {
    Analysis(AnalysisError),
    Io(io::Error),
    Json(serde_json::Error),
    Usage(String),
}

impl From<AnalysisError> for KinesyncCliError {
    fn from(e: AnalysisError) -> Self {
        KinesyncCliError::Analysis(e)
    }
}

impl From<io::Error> for KinesyncCliError {
    fn from(e: io::Error) -> Self {
        KinesyncCliError::Io(e)
    }
}

impl From<serde_json::Error> for KinesyncCliError {
    fn from(e: serde_json::Error) -> Self {
        KinesyncCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<KinesyncCliError> for CliError {
    fn from(e: KinesyncCliError) -> Self {
        match e {
            KinesyncCliError::Analysis(e) => {
                let hint = match e.kind() {
                    ErrorKind::InputValidation => "Check arguments and configuration values",
                    ErrorKind::FileFormat => "Check the file layout (header rows, delimiter, column count)",
                    ErrorKind::FileTooLarge => "Raise max_file_bytes in the configuration",
                    ErrorKind::Parse => "Check numeric cells in the input",
                    ErrorKind::PhaseLookup => "Check landmark names, order and manifest values",
                    ErrorKind::InsufficientData => "Use a smaller window or a wider range",
                    ErrorKind::DivisionByZero => "Fix the zero entry in the reference file",
                    ErrorKind::Cancelled => "The request was cancelled",
                    ErrorKind::Io => "Check file paths and permissions",
                };
                CliError {
                    code: e.kind().as_str().to_uppercase(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            KinesyncCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            KinesyncCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            KinesyncCliError::Usage(msg) => CliError {
                code: "USAGE".to_string(),
                message: msg,
                hint: Some("Run 'kinesync max-mean --help'".to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct ManifestReport {
    subjects: usize,
    entries: Vec<ManifestEntry>,
}

#[derive(Serialize)]
struct ManifestEntry {
    subject: String,
    emg_file: String,
    emg_motion_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    uncovered_landmarks: Option<Vec<String>>,
}
