//! trapped: command-line driver for the trapped-orders research pipeline.
//!
//! # Usage
//!
//! Build range bars from a tick file, then clean them:
//! ```sh
//! trapped bars --ticks data/raw/ticks.txt --out data/processed/range_candles.csv
//! trapped clean --input data/processed/range_candles.csv --out data/processed/clean.csv
//! ```
//!
//! Scan one parameter set, sweep the grid, or measure validation windows:
//! ```sh
//! trapped scan --bars data/processed/clean.csv --out data/results/triggers.csv --slot 09:00-15:30
//! trapped grid --bars data/processed/clean.csv --out-dir data/results --yes
//! trapped windows --bars data/processed/clean.csv --out data/results/windows.json
//! ```

mod report;

use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use trapped_backtest::{
    GridRow, GridSearch, Identikit, PatternScanner, ScanSummary, WindowAnalyzer,
};
use trapped_core::{Config, TimeSlot};
use trapped_ingestion::{
    read_clean_bars, read_raw_bars, read_ticks, write_clean_bars, write_raw_bars, BarCleaner,
    RangeBarBuilder,
};

/// Trapped-order research pipeline.
#[derive(Parser, Debug)]
#[command(name = "trapped")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (missing sections take defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Aggregate a tick file into raw range bars
    Bars {
        /// Tick file (datetime;last;bid;ask;volume)
        #[arg(long)]
        ticks: PathBuf,

        /// Output CSV of raw bars
        #[arg(long)]
        out: PathBuf,

        /// Override instrument.tick_size
        #[arg(long)]
        tick_size: Option<f64>,

        /// Override instrument.range_ticks
        #[arg(long)]
        range_ticks: Option<u32>,
    },

    /// Normalize a raw bar table
    Clean {
        /// Raw bar CSV
        #[arg(long)]
        input: PathBuf,

        /// Output CSV of cleaned bars
        #[arg(long)]
        out: PathBuf,
    },

    /// Classify and backtest triggered bars for one parameter set
    Scan {
        /// Cleaned bar CSV
        #[arg(long)]
        bars: PathBuf,

        /// Output CSV of trigger records
        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        n_extremes: Option<usize>,

        #[arg(long)]
        vol: Option<f64>,

        #[arg(long)]
        aggression: Option<f64>,

        #[arg(long)]
        exhaustion: Option<f64>,

        /// Time slot (HH:MM-HH:MM or ALL)
        #[arg(long, default_value = "ALL")]
        slot: String,
    },

    /// Sweep the parameter grid
    Grid {
        /// Cleaned bar CSV
        #[arg(long)]
        bars: PathBuf,

        /// Directory for grid_results.csv and grid_results.json
        #[arg(long)]
        out_dir: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Measure validation-window statistics
    Windows {
        /// Cleaned bar CSV
        #[arg(long)]
        bars: PathBuf,

        /// Output JSON report
        #[arg(long)]
        out: PathBuf,
    },
}

/// JSON form of a grid run.
#[derive(Serialize)]
struct GridOutput<'a> {
    combinations: usize,
    identikit: Option<Identikit>,
    best_time_slot: Option<TimeSlot>,
    rows: &'a [GridRow],
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/n): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn run_bars(
    config: &Config,
    ticks_path: &Path,
    out: &Path,
    tick_size: Option<f64>,
    range_ticks: Option<u32>,
) -> Result<()> {
    ensure_exists(ticks_path)?;
    let mut instrument = config.instrument.clone();
    if let Some(tick_size) = tick_size {
        instrument.tick_size = tick_size;
    }
    if let Some(range_ticks) = range_ticks {
        instrument.range_ticks = range_ticks;
    }

    let (ticks, read_stats) = read_ticks(ticks_path)
        .with_context(|| format!("Failed to read ticks from {}", ticks_path.display()))?;
    if read_stats.dropped > 0 {
        warn!("Dropped {} malformed tick rows", read_stats.dropped);
    }
    info!(
        "Aggregating {} ticks into {}-tick range bars ({} points)",
        ticks.len(),
        instrument.range_ticks,
        instrument.range_size()
    );

    let mut builder = RangeBarBuilder::new(instrument.range_size())?;
    let mut bars = builder.push_all(&ticks);
    bars.extend(builder.finish());

    ensure_parent(out)?;
    let written = write_raw_bars(out, &bars)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    report::print_bar_build(&read_stats, &builder, written);
    info!("Raw bars written to {}", out.display());
    Ok(())
}

fn run_clean(config: &Config, input: &Path, out: &Path) -> Result<()> {
    ensure_exists(input)?;
    let records = read_raw_bars(input)
        .with_context(|| format!("Failed to read raw bars from {}", input.display()))?;

    let mut cleaner = BarCleaner::new(&config.cleaner, config.instrument.tick_size);
    let bars = cleaner.clean_records(&records);
    ensure_parent(out)?;
    write_clean_bars(out, &bars).with_context(|| format!("Failed to write {}", out.display()))?;

    report::print_clean(cleaner.stats());
    info!("Cleaned bars written to {}", out.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_scan(
    config: &Config,
    bars_path: &Path,
    out: &Path,
    n_extremes: Option<usize>,
    vol: Option<f64>,
    aggression: Option<f64>,
    exhaustion: Option<f64>,
    slot: &str,
) -> Result<()> {
    ensure_exists(bars_path)?;
    let mut params = config.trigger;
    params.n_extremes = n_extremes.unwrap_or(params.n_extremes);
    params.vol_threshold = vol.unwrap_or(params.vol_threshold);
    params.aggression_threshold = aggression.unwrap_or(params.aggression_threshold);
    params.exhaustion_threshold = exhaustion.unwrap_or(params.exhaustion_threshold);
    params.validate()?;
    let slot: TimeSlot = slot.parse()?;

    let bars = read_clean_bars(bars_path)
        .with_context(|| format!("Failed to read bars from {}", bars_path.display()))?;
    info!("Scanning {} bars ({})", bars.len(), slot);

    let scanner = PatternScanner::new(config.reversal.clone());
    let records = scanner.scan_records(&bars, &params, slot);
    write_csv(out, &records)?;

    match ScanSummary::from_records(&records, config.grid.fixed_stop_loss) {
        Some(summary) => report::print_scan_summary(&params, slot, &summary),
        None => println!("no results"),
    }
    info!("Trigger records written to {}", out.display());
    Ok(())
}

fn run_grid(config: &Config, bars_path: &Path, out_dir: &Path, yes: bool) -> Result<()> {
    ensure_exists(bars_path)?;
    let search = GridSearch::new(config.grid.clone(), config.reversal.clone());
    if search.is_empty() {
        anyhow::bail!("Grid has no combinations; check the grid section of the config");
    }

    let bars = read_clean_bars(bars_path)
        .with_context(|| format!("Failed to read bars from {}", bars_path.display()))?;
    println!("{} combinations over {} bars", search.len(), bars.len());
    if !yes && !confirm("Run the full grid search?")? {
        println!("Aborted");
        return Ok(());
    }

    let grid_report = search.run_with_progress(&bars, |done, total, _| {
        if done % 10 == 0 || done == total {
            info!("Grid progress: {}/{}", done, total);
        }
    });

    if grid_report.is_empty() {
        println!("no results");
        return Ok(());
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let csv_path = out_dir.join("grid_results.csv");
    let json_path = out_dir.join("grid_results.json");
    write_csv(&csv_path, &grid_report.csv_rows())?;
    let top_n = config.grid.top_n;
    write_json(
        &json_path,
        &GridOutput {
            combinations: grid_report.combinations,
            identikit: grid_report.identikit(top_n),
            best_time_slot: grid_report.best_time_slot(top_n),
            rows: grid_report.rows(),
        },
    )?;

    report::print_grid_report(&grid_report, top_n);
    info!(
        "Grid results written to {} and {}",
        csv_path.display(),
        json_path.display()
    );
    Ok(())
}

fn run_windows(config: &Config, bars_path: &Path, out: &Path) -> Result<()> {
    ensure_exists(bars_path)?;
    let bars = read_clean_bars(bars_path)
        .with_context(|| format!("Failed to read bars from {}", bars_path.display()))?;

    let analyzer = WindowAnalyzer::new(
        config.window_analysis.clone(),
        config.reversal.stop_tolerance,
    );
    let window_report = analyzer.report(&bars, chrono::Local::now().naive_local())?;
    write_json(out, &window_report)?;

    report::print_window_report(&window_report);
    info!("Window recommendations written to {}", out.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(false).init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Bars {
            ticks,
            out,
            tick_size,
            range_ticks,
        } => run_bars(&config, &ticks, &out, tick_size, range_ticks),
        Commands::Clean { input, out } => run_clean(&config, &input, &out),
        Commands::Scan {
            bars,
            out,
            n_extremes,
            vol,
            aggression,
            exhaustion,
            slot,
        } => run_scan(
            &config, &bars, &out, n_extremes, vol, aggression, exhaustion, &slot,
        ),
        Commands::Grid { bars, out_dir, yes } => run_grid(&config, &bars, &out_dir, yes),
        Commands::Windows { bars, out } => run_windows(&config, &bars, &out),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
