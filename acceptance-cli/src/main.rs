//! Acceptance CLI Application
//!
//! Command-line interface for evaluating simulation runs against acceptance
//! queries. It uses the acceptance-query library and adds:
//! - Test configuration loading (JSON/TOML scopes)
//! - Parallel evaluation of all runs of a scope
//! - Success-rate records (`rates.csv`) for the report generator
//! - Determinism checks between reruns

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod config;
mod harness;
mod report;

use acceptance_query::{parse, read_export, EvaluationConfig, QueryExecutor};
use harness::{Determinism, ScopeEvaluation};
use report::RATES_FILE;

/// Acceptance query runner for simulation end-to-end tests
#[derive(Parser, Debug)]
#[command(name = "acceptance-cli")]
#[command(about = "Evaluate simulation runs against acceptance queries", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every run of a specialized scope and write rates.csv
    Check {
        /// Test configuration file (.json or .toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Scope to evaluate
        #[arg(short, long)]
        scope: String,

        /// Directory holding Cyclics_Run_NNN.csv files
        #[arg(short, long, value_name = "DIR")]
        artifacts: PathBuf,

        /// Event table (default: <artifacts>/events.csv)
        #[arg(short, long, value_name = "FILE")]
        events: Option<PathBuf>,

        /// Additional directory receiving a copy of rates.csv
        #[arg(long, value_name = "DIR")]
        results: Option<PathBuf>,

        /// Dump joined tables of every run into a timestamped directory
        #[arg(long)]
        debug: bool,
    },

    /// Evaluate one query against a single run
    Evaluate {
        /// Acceptance query
        #[arg(long)]
        query: String,

        /// Simulator CSV export of the run
        #[arg(long, value_name = "FILE")]
        export: PathBuf,

        /// Event table
        #[arg(short, long, value_name = "FILE")]
        events: Option<PathBuf>,

        /// Run id used to select events
        #[arg(long, default_value_t = 0)]
        run_id: i64,

        /// Test configuration providing column types
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Directory for the joined-table dump
        #[arg(long, value_name = "DIR")]
        dump_dir: Option<PathBuf>,
    },

    /// Parse a query and print it as JSON
    Parse {
        /// Acceptance query
        query: String,
    },

    /// Check that a rerun reproduced the base run
    Determinism {
        /// Export of the base run
        base: PathBuf,

        /// Export of the rerun with the same seed
        rerun: PathBuf,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Acceptance CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using acceptance-query library v{}", acceptance_query::VERSION);

    match args.command {
        Command::Check {
            config,
            scope,
            artifacts,
            events,
            results,
            debug,
        } => check_scope(&config, &scope, &artifacts, events, results, debug),
        Command::Evaluate {
            query,
            export,
            events,
            run_id,
            config,
            dump_dir,
        } => evaluate_run(&query, &export, events.as_deref(), run_id, config.as_deref(), dump_dir),
        Command::Parse { query } => print_query(&query),
        Command::Determinism { base, rerun } => check_determinism(&base, &rerun),
    }
}

/// Evaluate all runs of a specialized scope
fn check_scope(
    config_path: &Path,
    scope_name: &str,
    artifacts: &Path,
    events: Option<PathBuf>,
    results: Option<PathBuf>,
    debug: bool,
) -> Result<()> {
    log::info!("Loading configuration from: {:?}", config_path);
    let test_config = config::load_config(config_path)?;
    let (scope, specialized) = test_config.specialized_scope(scope_name)?;

    // a malformed query fails before any run is read
    let query = parse(&specialized.query)
        .with_context(|| format!("Invalid query in scope {}", scope_name))?;
    log::info!("Query: {}", query.raw_text);

    let events_path = events.unwrap_or_else(|| artifacts.join("events.csv"));
    let events = harness::load_events(Some(&events_path))?;

    let mut evaluation_config = test_config.evaluation_config();
    if debug {
        let dir = harness::debug_dump_dir(artifacts);
        log::info!("Dumping joined tables to {:?}", dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create debug directory: {:?}", dir))?;
        let path = dir.join("events.csv");
        events
            .to_table()
            .and_then(|table| table.write_csv_path(&path))
            .with_context(|| format!("Failed to dump event table: {:?}", path))?;
        evaluation_config = evaluation_config.with_debug_dump_dir(dir);
    }
    let executor = QueryExecutor::new(evaluation_config);

    let evaluation = ScopeEvaluation {
        artifacts,
        invocations: scope.base_config.invocations,
        query: &query,
        events: &events,
        executor: &executor,
    };
    let record = evaluation.rate(specialized.success_rate);

    record.write_to(&artifacts.join(RATES_FILE))?;
    if let Some(results) = results {
        record.write_to(&results.join(RATES_FILE))?;
    }

    if !record.passed() {
        bail!(
            "Success rate [Actual {:.2}% | Expected {:.2}%] Failed RunIds {:?}",
            record.actual * 100.0,
            record.expected.value() * 100.0,
            record.failed_runs
        );
    }
    println!(
        "✓ {}: {:.2}% of {} runs passed",
        scope_name,
        record.actual * 100.0,
        scope.base_config.invocations
    );
    Ok(())
}

/// Evaluate one run and print the verdict as JSON
fn evaluate_run(
    raw_query: &str,
    export: &Path,
    events: Option<&Path>,
    run_id: i64,
    config_path: Option<&Path>,
    dump_dir: Option<PathBuf>,
) -> Result<()> {
    let mut evaluation_config = match config_path {
        Some(path) => config::load_config(path)?.evaluation_config(),
        None => EvaluationConfig::new(),
    };
    if let Some(dir) = dump_dir {
        evaluation_config = evaluation_config.with_debug_dump_dir(dir);
    }

    let query = parse(raw_query).context("Invalid query")?;
    let signals = read_export(export, &evaluation_config.explicit_types)
        .with_context(|| format!("Failed to read simulation output: {:?}", export))?;
    let events = harness::load_events(events)?;

    let executor = QueryExecutor::new(evaluation_config);
    let verdict = executor
        .verdict(&signals, &events, run_id, &query)
        .with_context(|| format!("Failed to evaluate run {}", run_id))?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

/// Print the parsed query
fn print_query(raw_query: &str) -> Result<()> {
    let query = parse(raw_query).context("Invalid query")?;
    println!("{}", serde_json::to_string_pretty(&query)?);
    Ok(())
}

/// Compare a base run and its rerun
fn check_determinism(base: &Path, rerun: &Path) -> Result<()> {
    match harness::compare_runs(base, rerun)? {
        Determinism::Identical => println!("✓ {:?} and {:?} are identical", base, rerun),
        Determinism::Equivalent => println!(
            "✓ {:?} and {:?} differ in formatting only",
            base, rerun
        ),
        Determinism::Different(difference) => {
            bail!("{:?} and {:?} do not match: {}", base, rerun, difference)
        }
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
