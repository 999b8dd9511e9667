use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use glob::glob;
use sharklayer_core::{
    DissectionInput, Encoding, PacketParser, PacketSummary, ParserOptions, Report, analyze_input,
    parser_for,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SHARKLAYER_LOG";

#[derive(Parser, Debug)]
#[command(name = "sharklayer")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SHARKLAYER_BUILD_COMMIT"), ")"))]
#[command(
    about = "Normalize tshark JSON, PDML and EK output into packets, layers and sessions.",
    long_about = None,
    after_help = "Examples:\n  sharklayer analyse capture.json -o report.json\n  sharklayer analyze capture.pdml --stdout --pretty\n  sharklayer layers capture.ndjson"
)]
struct Cli {
    /// Log decoding details to stderr (overridden by SHARKLAYER_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a dissection file and write a versioned JSON report.
    #[command(alias = "analyze")]
    #[command(
        after_help = "Examples:\n  sharklayer analyse capture.json -o report.json\n  sharklayer analyze 'captures/*.pdml' --stdout"
    )]
    Analyse {
        #[command(flatten)]
        input: InputArgs,

        /// Output report path (JSON)
        #[arg(short = 'o', long, required_unless_present = "stdout")]
        report: Option<PathBuf>,

        /// Write JSON report to stdout
        #[arg(long, conflicts_with = "report")]
        stdout: bool,

        /// Pretty-print JSON output
        #[arg(long, conflicts_with = "compact")]
        pretty: bool,

        /// Compact JSON output (default)
        #[arg(long)]
        compact: bool,

        /// Suppress non-error output
        #[arg(long)]
        quiet: bool,
    },
    /// Print the layers and fields of every packet.
    Layers {
        #[command(flatten)]
        input: InputArgs,

        /// One summary line per packet instead of the full listing
        #[arg(long)]
        summary: bool,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Path to tshark output (-T json, -T pdml or -T ek)
    input: PathBuf,

    /// Input encoding; inferred from the content, then the extension
    #[arg(long, value_name = "json|xml|ek")]
    format: Option<Encoding>,

    /// Keep byte positions and raw offsets where the encoding has them
    #[arg(long)]
    include_raw: bool,

    /// PDML lookups return raw values instead of field containers
    #[arg(long)]
    raw_mode: bool,
}

impl InputArgs {
    fn options(&self) -> ParserOptions {
        ParserOptions::new()
            .with_include_raw(self.include_raw)
            .with_raw_mode(self.raw_mode)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Analyse {
            input,
            report,
            stdout,
            pretty,
            compact,
            quiet,
        } => cmd_analyse(input, report, stdout, pretty, compact, quiet),
        Commands::Layers { input, summary } => cmd_layers(input, summary),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

fn cmd_analyse(
    args: InputArgs,
    report: Option<PathBuf>,
    stdout: bool,
    pretty: bool,
    compact: bool,
    quiet: bool,
) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&args.input)?;
    validate_input_file(&resolved_input)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;

    let report = if stdout {
        None
    } else {
        Some(report.ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?)
    };
    if let Some(report_path) = report.as_ref() {
        ensure_distinct_output(report_path, &input_abs)?;
    }

    let input = load_input(&resolved_input, args.format)?;
    debug!(
        path = %resolved_input.display(),
        encoding = %input.encoding,
        bytes = input.data.len(),
        "loaded dissection input"
    );
    let rep = analyze_input(
        &resolved_input.display().to_string(),
        &input,
        &args.options(),
    );
    let json = serialize_report(&rep, pretty, compact)?;

    let Some(report) = report else {
        print!("{}", json);
        if !quiet {
            print_decode_errors(&rep);
        }
        return Ok(());
    };

    if let Some(parent) = report.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(&report, json)
        .with_context(|| format!("Failed to write report: {}", report.display()))?;

    if !quiet {
        print_decode_errors(&rep);
        eprintln!("OK: report written -> {}", report.display());
    }
    Ok(())
}

fn cmd_layers(args: InputArgs, summary: bool) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&args.input)?;
    validate_input_file(&resolved_input)?;
    let input = load_input(&resolved_input, args.format)?;
    let parser = parser_for(input.encoding, args.options());

    let mut failures = 0usize;
    for result in PacketParser::parse_units(parser.as_ref(), &input.data) {
        match result {
            Ok(packet) if summary => println!("{}", PacketSummary::from_packet(&packet)),
            Ok(packet) => println!("{packet}"),
            Err(err) => {
                failures += 1;
                eprintln!("warning: {err}");
            }
        }
    }
    if failures > 0 {
        return Err(CliError::new(
            format!("{failures} unit(s) failed to decode"),
            Some(format!(
                "check that the file is complete {} output",
                input.encoding
            )),
        ));
    }
    Ok(())
}

fn load_input(path: &Path, format: Option<Encoding>) -> Result<DissectionInput, CliError> {
    DissectionInput::open(path, format).map_err(|err| {
        CliError::new(
            err.to_string(),
            Some("use --format json|xml|ek to set the encoding".to_string()),
        )
    })
}

fn ensure_distinct_output(report_path: &Path, input_abs: &Path) -> Result<(), CliError> {
    let parent = match report_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // A directory that does not exist yet cannot hold the input.
    if !parent.exists() {
        return Ok(());
    }
    let report_dir = fs::canonicalize(parent)
        .with_context(|| format!("Failed to resolve output path: {}", report_path.display()))?;
    let file_name = report_path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid report path: {}", report_path.display()))?;
    if report_dir.join(file_name) == input_abs {
        return Err(CliError::new(
            format!(
                "report path must differ from input: {}",
                report_path.display()
            ),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn serialize_report(rep: &Report, pretty: bool, compact: bool) -> Result<String, CliError> {
    if pretty && compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn print_decode_errors(rep: &Report) {
    if rep.decode_errors.is_empty() {
        return;
    }
    eprintln!("Decode errors:");
    for error in &rep.decode_errors {
        match error.unit {
            Some(unit) => eprintln!("  unit {}: {}", unit, error.message),
            None => eprintln!("  {}", error.message),
        }
    }
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("pass tshark output written with -T json, -T pdml or -T ek".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("pass a single dissection file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let mut matches = Vec::new();
    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern".to_string()),
        ));
    }
    if matches.len() > 1 {
        let listed = matches
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let more = if matches.len() > 3 { ", ..." } else { "" };
        return Err(CliError::new(
            format!(
                "multiple files match pattern '{}' ({} matches); matches: {}{}",
                pattern,
                matches.len(),
                listed,
                more
            ),
            Some("pass a single dissection file, or run once per file".to_string()),
        ));
    }

    Ok(matches.remove(0))
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
