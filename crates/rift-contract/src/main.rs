//! Rift Contract Runner CLI
//!
//! Loads declarative suites, runs every selected case against the live API
//! and prints a report. Exits 0 when every case passed, 1 when any case did
//! not, and 2 when suites or configuration could not be loaded.
//!
//! Usage:
//!   rift-contract <PATH>... [OPTIONS]

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use regex::Regex;
use rift_contract::config::ConfigFile;
use rift_contract::suite::UnitKind;
use rift_contract::{
    collect_units, load_all, Credentials, PlannedRequest, RenderOptions, RunSettings, Runner,
    Selection, Unit,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Loaded when present and no `--config` is given.
const DEFAULT_CONFIG: &str = "rift-contract.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Rift Contract Runner - Run declarative HTTP contract suites
#[derive(Parser, Debug)]
#[command(name = "rift-contract")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Suite files or directories containing suite files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Configuration file with credentials and settings
    #[arg(short, long, env = "RIFT_CONTRACT_CONFIG")]
    config: Option<PathBuf>,

    /// Set a credential, overriding the configuration file
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    set: Vec<(String, String)>,

    /// Only run units whose id (or a step id) matches this regex
    #[arg(short, long)]
    filter: Option<String>,

    /// Only run units carrying this tag (repeatable)
    #[arg(short, long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Maximum number of units running concurrently
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    workers: Option<u64>,

    /// Request timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Stop scheduling new units after this many seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Override every suite's base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Do not retry connection failures and timeouts
    #[arg(long)]
    no_retry: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// List selected units and exit
    #[arg(long)]
    list: bool,

    /// Build every request and print it without sending anything
    #[arg(long)]
    dry_run: bool,

    /// Show curl commands for failing cases (and in dry runs)
    #[arg(short = 'C', long)]
    show_curl: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{RED}{BOLD}error:{RESET} {e:#}");
            2
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let (credentials, settings) = load_configuration(&args)?;
    let suites = load_all(&args.paths)?;

    let pattern = args
        .filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --filter pattern")?;
    let selection = Selection {
        pattern,
        tags: args.tags.clone(),
    };
    let units = selection.apply(collect_units(&suites));

    if args.list {
        print_units(&units);
        return Ok(0);
    }

    let runner = Runner::with_reqwest(settings, credentials).context("failed to build HTTP client")?;
    let color = args.output == OutputFormat::Text && !args.no_color && std::io::stdout().is_terminal();

    if args.dry_run {
        let planned = runner.plan(&units);
        print_plan(&planned, args.show_curl, color);
        let invalid = planned.iter().any(|p| p.request.is_err());
        return Ok(if invalid { 1 } else { 0 });
    }

    if units.is_empty() {
        tracing::warn!("no units matched the selection");
    }

    if args.output == OutputFormat::Text {
        let (bold, cyan, dim, reset) = paint(color);
        println!("{bold}{cyan}Rift Contract Runner{reset}");
        println!("{dim}━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━{reset}");
        println!(
            "{dim}Running:{reset} {bold}{}{reset} unit(s) from {} suite(s)\n",
            units.len(),
            suites.len()
        );
    }

    let report = runner.run(units).await;

    match args.output {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!(
            "{}",
            report.render_text(&RenderOptions {
                color,
                show_curl: args.show_curl,
                verbose: args.verbose > 0,
            })
        ),
    }

    Ok(if report.success() { 0 } else { 1 })
}

/// Settings precedence: defaults, then the config file, then flags.
fn load_configuration(args: &Args) -> Result<(Credentials, RunSettings)> {
    let mut settings = RunSettings::default();
    let mut credentials = Credentials::new();

    let default_path = Path::new(DEFAULT_CONFIG);
    let config_path = match &args.config {
        Some(path) => Some(path.as_path()),
        None if default_path.is_file() => Some(default_path),
        None => None,
    };

    if let Some(path) = config_path {
        let file = ConfigFile::from_file(path)?;
        credentials = file.credentials(path)?;
        file.apply_to(&mut settings);
        tracing::info!(
            "loaded {} credential(s) from {}",
            credentials.len(),
            path.display()
        );
    }

    credentials.extend(args.set.iter().cloned());

    if let Some(workers) = args.workers {
        settings.workers = workers as usize;
    }
    if let Some(secs) = args.timeout {
        settings.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.deadline {
        settings.deadline = Some(Duration::from_secs(secs));
    }
    if let Some(base_url) = &args.base_url {
        settings.base_url = Some(base_url.clone());
    }
    if args.no_retry {
        settings.retry_connect_failures = false;
    }

    Ok((credentials, settings))
}

fn paint(color: bool) -> (&'static str, &'static str, &'static str, &'static str) {
    if color {
        (BOLD, CYAN, DIM, RESET)
    } else {
        ("", "", "", "")
    }
}

fn print_units(units: &[Unit]) {
    for unit in units {
        println!("{}", unit.id);
        if let UnitKind::Sequence(sequence) = &unit.kind {
            for step in &sequence.steps {
                println!("  {}", sequence.step_id(step));
            }
        }
    }
}

fn print_plan(planned: &[PlannedRequest], show_curl: bool, color: bool) {
    let (bold, cyan, dim, reset) = paint(color);
    let (green, red) = if color { (GREEN, RED) } else { ("", "") };

    for entry in planned {
        match &entry.request {
            Ok(request) if show_curl => {
                println!("{cyan}DRY-RUN{reset} {bold}{}{reset}", entry.id);
                println!("   {dim}{}{reset}", request.to_curl());
            }
            Ok(request) => {
                println!(
                    "{cyan}DRY-RUN{reset} {bold}{}{reset} {green}{}{reset} {}",
                    entry.id, request.method, request.url
                );
            }
            Err(e) => println!("{red}ERR{reset}     {bold}{}{reset}: {e}", entry.id),
        }
    }
}
