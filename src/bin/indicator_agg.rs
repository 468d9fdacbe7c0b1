//! indicator-agg
//!
//! 在指标存储上跑一遍完整的分层聚合并打印吞吐量报告。
//!
//! 退出码：0 完成；1 致命错误（层级有环、配置、I/O）；2 有指标因损坏被跳过。

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use indicator_agg_engine::config::HierarchyConfig;
use indicator_agg_engine::profiler::{ProfileSettings, RunMode, RunReport, ThroughputProfiler};
use indicator_agg_engine::store::IndicatorStore;
use indicator_agg_engine::threshold::{Boundary, CoverageThreshold};
use indicator_agg_engine::{AggError, Result};

/// Hierarchical indicator aggregation
#[derive(Parser)]
#[command(name = "indicator-agg")]
#[command(version)]
#[command(about = "Coverage-threshold aggregation of indicators over a classification hierarchy")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate every selected indicator and report throughput
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Indicator store root directory
    #[arg(long)]
    store: PathBuf,

    /// Hierarchy / run configuration (YAML)
    #[arg(long)]
    hierarchy: PathBuf,

    /// Coverage threshold ("2/3", "0.6", "60%"); overrides the config file
    #[arg(long)]
    threshold: Option<CoverageThreshold>,

    /// Require coverage strictly above the threshold
    #[arg(long)]
    exclusive: bool,

    /// Write aggregates to this store (measure-and-persist mode)
    #[arg(long)]
    persist: Option<PathBuf>,

    /// Wall-clock budget; no new indicator starts after it expires
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Worker threads (defaults to one per core)
    #[arg(long)]
    workers: Option<usize>,
}

const EXIT_OK:      u8 = 0;
const EXIT_FATAL:   u8 = 1;
const EXIT_CORRUPT: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(args),
    };
    match &result {
        Ok(report) => println!("{report}"),
        Err(e) => {
            error!(error = %e, "aggregation run failed");
            eprintln!("error: {e}");
        }
    }
    ExitCode::from(exit_code(&result))
}

/// 0 完成；1 致命错误；2 有指标因损坏被跳过
fn exit_code(result: &Result<RunReport>) -> u8 {
    match result {
        Err(_)                                           => EXIT_FATAL,
        Ok(report) if !report.skipped_corrupt.is_empty() => EXIT_CORRUPT,
        Ok(_)                                            => EXIT_OK,
    }
}

fn run(args: RunArgs) -> Result<RunReport> {
    let cfg       = HierarchyConfig::from_path(&args.hierarchy)?;
    let hierarchy = cfg.build_hierarchy()?;

    let mut settings = ProfileSettings::from_config(&cfg)?;
    if let Some(t) = args.threshold {
        settings.threshold = t.with_boundary(settings.threshold.boundary());
    }
    if args.exclusive {
        settings.threshold = settings.threshold.with_boundary(Boundary::Exclusive);
    }
    settings.budget  = args.budget_secs.map(Duration::from_secs);
    settings.workers = args.workers;
    if let Some(dir) = args.persist {
        ensure_distinct(&args.store, &dir)?;
        settings.mode = RunMode::MeasureAndPersist(dir);
    }

    if !args.store.is_dir() {
        return Err(AggError::NotFound(format!("store directory {}", args.store.display())));
    }
    let store  = IndicatorStore::open(&args.store)?;
    ThroughputProfiler::new(&hierarchy, settings).run(&store)
}

/// 聚合结果不能写回输入存储，否则会覆盖原始指标
fn ensure_distinct(store: &Path, persist: &Path) -> Result<()> {
    let same = match (store.canonicalize(), persist.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => store == persist,
    };
    if same {
        return Err(AggError::Config(format!(
            "persist directory {} must differ from the input store",
            persist.display()
        )));
    }
    Ok(())
}
