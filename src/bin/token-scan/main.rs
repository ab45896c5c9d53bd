//! Token Scan CLI
//!
//! Counts every row of a Scylla/Cassandra table by scanning the token ring
//! in parallel.
//!
//! # Configuration
//!
//! Settings are read from:
//! 1. `--config` / `TOKEN_SCAN_CONFIG` (path to TOML file)
//! 2. `./token-scan.toml` in current directory
//! 3. Default configuration
//!
//! `TOKEN_SCAN_*` environment variables and then command-line flags are
//! applied on top.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use token_scan::config::{ApplicationConfig, DispatchKind};
use token_scan::session::{ClusterTopology, ScyllaConnector};
use token_scan::{metrics, Error, FailureMode, ScanCoordinator, ScanError, ScanResult};
use tokio::signal;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "token-scan")]
#[command(version)]
#[command(about = "Parallel full-table row count over the token ring", long_about = None)]
struct Cli {
    /// Logical partitions (default: nodes × cores × 3)
    #[arg(short = 'n', long = "num-queries")]
    num_queries: Option<u64>,

    /// Workers, each holding one session (default: CPU count)
    #[arg(short = 'p', long)]
    processes: Option<usize>,

    /// Log every range query and its row count
    #[arg(short = 'd', long)]
    verbosity: bool,

    /// Path to configuration file (overrides TOKEN_SCAN_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Query units per logical partition
    #[arg(long)]
    granularity: Option<u64>,

    /// Batch this many ranges per unit, queried concurrently
    #[arg(long)]
    batch_concurrency: Option<usize>,

    /// Contact point (`host:port`), may be repeated
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Keyspace to scan
    #[arg(long)]
    keyspace: Option<String>,

    /// Table to scan
    #[arg(long)]
    table: Option<String>,

    /// Re-dispatches allowed per range
    #[arg(long)]
    retries: Option<u32>,

    /// Finish the scan and list ranges that could not be read
    #[arg(long)]
    partial: bool,

    /// Print Prometheus metrics to stderr when the scan ends
    #[arg(long)]
    metrics: bool,
}

/// Resolve configuration source: CLI flag, env var, local file, defaults
fn load_config(cli: &Cli) -> token_scan::Result<ApplicationConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TOKEN_SCAN_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from("token-scan.toml");
            local.exists().then_some(local)
        });

    match path {
        Some(path) => ApplicationConfig::from_file_with_env(path),
        None => Ok(ApplicationConfig::from_env()),
    }
}

/// Apply command-line overrides
fn apply_cli(config: &mut ApplicationConfig, cli: &Cli) {
    if let Some(n) = cli.num_queries {
        config.scan.partitions = Some(n);
    }
    if let Some(p) = cli.processes {
        config.scan.pool_size = p;
    }
    if let Some(g) = cli.granularity {
        config.scan.granularity = g;
    }
    if let Some(c) = cli.batch_concurrency {
        config.scan.dispatch = DispatchKind::Batched;
        config.scan.batch_concurrency = c;
    }
    if !cli.hosts.is_empty() {
        config.cluster.contact_points = cli.hosts.clone();
    }
    if let Some(ks) = &cli.keyspace {
        config.cluster.keyspace = ks.clone();
    }
    if let Some(table) = &cli.table {
        config.cluster.table = table.clone();
    }
    if let Some(r) = cli.retries {
        config.retry.max_retries = r;
    }
    if cli.partial {
        config.retry.failure_mode = FailureMode::ReportPartial;
    }
    if cli.verbosity {
        config.logging.verbose = true;
    }
}

fn init_tracing(config: &ApplicationConfig) {
    let level = if config.logging.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_result(result: &ScanResult) {
    println!("Scanned {} rows", result.total_rows);
    println!("Elapsed: {:.3}s", result.elapsed.as_secs_f64());
    println!(
        "Throughput: {:.1} queries/s ({} queries, {} partitions, {} workers)",
        result.queries_per_second(),
        result.queries,
        result.partitions,
        result.pool_size
    );

    if !result.failed_ranges.is_empty() {
        println!("Un-scanned ranges: {}", result.failed_ranges.len());
        for failed in &result.failed_ranges {
            println!(
                "  {} after {} attempt(s): {}",
                failed.range, failed.attempts, failed.error
            );
        }
    }
}

/// Prometheus text for everything recorded during the scan
fn metrics_report() -> String {
    metrics::gather_metrics().unwrap_or_else(|e| format!("# {}\n", e))
}

async fn run(config: ApplicationConfig) -> token_scan::Result<ScanResult> {
    config.validate()?;
    debug!(
        "Configuration: contact_points={:?}, keyspace={}, table={}",
        config.cluster.contact_points, config.cluster.keyspace, config.cluster.table
    );

    let connector = Arc::new(ScyllaConnector::new(&config.cluster)?);
    let topology: Arc<dyn ClusterTopology> = connector.clone();
    let coordinator =
        ScanCoordinator::new(connector, config.scan_config()).with_topology(topology);

    let interrupted = async {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, closing sessions");
        }
    };
    coordinator
        .run_scan_until(config.scan.partitions, config.scan.pool_size, interrupted)
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        },
    };
    apply_cli(&mut config, &cli);
    init_tracing(&config);

    info!("Starting token-scan v{}", env!("CARGO_PKG_VERSION"));

    let code = match run(config).await {
        Ok(result) => {
            print_result(&result);
            if result.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        },
        Err(Error::Scan(ScanError::Cancelled { outstanding })) => {
            error!(outstanding, "Scan cancelled");
            ExitCode::from(130)
        },
        Err(e) => {
            error!(error = %e, "Scan failed");
            eprintln!("Scan failed: {}", e);
            ExitCode::FAILURE
        },
    };

    if cli.metrics {
        eprint!("{}", metrics_report());
    }
    code
}
