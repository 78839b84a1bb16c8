use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use bmr_extract::{
    ExtractOptions, ExtractionReport, OutputFormat, PageOutcome, PageSelection, classify_document,
    extract_document, write_csv, write_csv_to_string, write_json, write_json_to_string,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const TEMPLATE_DIR_ENV: &str = "BMR_TEMPLATE_DIR";
const DEFAULT_TEMPLATE_DIR: &str = "templates";

#[derive(Debug, Parser)]
#[command(
    name = "bmr-extract",
    version,
    about = "Classify batch manufacturing record pages and extract their fields"
)]
struct Cli {
    /// Enable debug logging and list every warning.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the classification of every page as JSON lines.
    Classify(ClassifyArgs),
    /// Extract template fields and write CSV or JSON output.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    /// Directory of per-page markdown files, or a form-feed separated text file.
    #[arg(short, long)]
    input: PathBuf,

    /// Page selection like 1-3,5.
    #[arg(long)]
    pages: Option<String>,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Directory of per-page markdown files, or a form-feed separated text file.
    #[arg(short, long)]
    input: PathBuf,

    /// Output path; standard output when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: csv or json.
    #[arg(long, default_value = "csv")]
    format: String,

    /// Template directory (falls back to $BMR_TEMPLATE_DIR, then ./templates).
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Page selection like 1-3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Output delimiter character for CSV.
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Do not carry empty header values over from earlier pages.
    #[arg(long)]
    no_inherit: bool,

    /// Fail on malformed templates instead of skipping them.
    #[arg(long)]
    strict_templates: bool,
}

fn parse_pages(pages: Option<&str>) -> Result<Option<PageSelection>> {
    pages
        .map(PageSelection::from_str)
        .transpose()
        .context("failed to parse --pages")
}

fn parse_options(args: &ExtractArgs) -> Result<ExtractOptions> {
    if !args.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }

    Ok(ExtractOptions {
        pages: parse_pages(args.pages.as_deref())?,
        inherit_headers: !args.no_inherit,
        strict_templates: args.strict_templates,
        delimiter: args.delimiter as u8,
    })
}

fn template_dir(args: &ExtractArgs) -> PathBuf {
    args.templates
        .clone()
        .or_else(|| std::env::var_os(TEMPLATE_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR))
}

fn write_output(
    report: &ExtractionReport,
    format: OutputFormat,
    output: Option<&Path>,
    delimiter: u8,
) -> Result<()> {
    match (format, output) {
        (OutputFormat::Csv, Some(path)) => write_csv(path, report, delimiter)
            .with_context(|| format!("failed to write '{}'", path.display())),
        (OutputFormat::Json, Some(path)) => write_json(path, report)
            .with_context(|| format!("failed to write '{}'", path.display())),
        (OutputFormat::Csv, None) => {
            print!("{}", write_csv_to_string(report, delimiter)?);
            Ok(())
        }
        (OutputFormat::Json, None) => {
            println!("{}", write_json_to_string(report)?);
            Ok(())
        }
    }
}

fn log_report(report: &ExtractionReport, verbose: bool) {
    if report.warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", report.warnings.len());
    if verbose {
        for warning in &report.warnings {
            eprintln!(
                "  - {:?} page={:?} field={:?}: {}",
                warning.code, warning.page, warning.field, warning.message
            );
        }
    }
}

fn run_classify(args: &ClassifyArgs) -> Result<Vec<PageOutcome>> {
    let options = ExtractOptions {
        pages: parse_pages(args.pages.as_deref())?,
        ..ExtractOptions::default()
    };
    let outcomes = classify_document(&args.input, &options)
        .with_context(|| format!("failed to classify '{}'", args.input.display()))?;
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    Ok(outcomes)
}

fn run_extract(args: &ExtractArgs) -> Result<ExtractionReport> {
    let options = parse_options(args)?;
    let format = OutputFormat::from_str(&args.format).context("failed to parse --format")?;
    let templates = template_dir(args);

    let report = extract_document(&args.input, &templates, &options).with_context(|| {
        format!(
            "failed to extract '{}' with templates from '{}'",
            args.input.display(),
            templates.display()
        )
    })?;
    write_output(&report, format, args.output.as_deref(), options.delimiter)?;
    Ok(report)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "bmr_extract=debug"
    } else {
        "bmr_extract=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let outcome = match &cli.command {
        Commands::Classify(args) => run_classify(args).map(|_| ExitCode::SUCCESS),
        Commands::Extract(args) => run_extract(args).map(|report| {
            log_report(&report, cli.verbose);
            if report.field_count > 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }),
    };

    outcome.unwrap_or_else(|error| {
        eprintln!("error: {error:#}");
        ExitCode::from(1)
    })
}
