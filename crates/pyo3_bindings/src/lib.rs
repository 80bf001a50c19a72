//! PyO3 bindings for the trapped-orders pipeline.
//!
//! Exposes the Rust core to Python notebooks:
//! - Range bar aggregation and cleaning
//! - Price statistics decoding
//! - Trigger scanning with the reversal backtest

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use trapped_backtest::{PatternScanner, ReversalEngine, TriggerRecord as RustTriggerRecord};
use trapped_core::config::{ReversalConfig, TriggerConfig};
use trapped_core::{
    Error as RustError, RangeBar as RustRangeBar, Tick as RustTick, TimeSlot,
    Timestamp, TriggerPosition,
};
use trapped_ingestion::timefmt::{parse_timestamp, BAR_TIME_FORMAT};

fn to_py_err(err: RustError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn parse_time(text: &str) -> PyResult<Timestamp> {
    parse_timestamp(text).ok_or_else(|| PyValueError::new_err(format!("unrecognized timestamp '{text}'")))
}

fn format_time(ts: &Timestamp) -> String {
    ts.format(BAR_TIME_FORMAT).to_string()
}

fn parse_position(text: &str) -> PyResult<TriggerPosition> {
    match text.to_ascii_uppercase().as_str() {
        "HIGH" => Ok(TriggerPosition::High),
        "LOW" => Ok(TriggerPosition::Low),
        "BOTH" => Ok(TriggerPosition::Both),
        "NEUTRAL" => Ok(TriggerPosition::Neutral),
        other => Err(PyValueError::new_err(format!("unknown trigger position '{other}'"))),
    }
}

// ============================================================================
// Python-exposed Types
// ============================================================================

/// A single trade with the quote at execution.
#[pyclass(name = "Tick")]
#[derive(Clone)]
pub struct PyTick {
    inner: RustTick,
}

#[pymethods]
impl PyTick {
    #[new]
    fn new(time: &str, price: f64, bid: f64, ask: f64, volume: f64) -> PyResult<Self> {
        Ok(PyTick {
            inner: RustTick {
                time: parse_time(time)?,
                price,
                bid,
                ask,
                volume,
            },
        })
    }

    #[getter]
    fn time(&self) -> String {
        format_time(&self.inner.time)
    }

    #[getter]
    fn price(&self) -> f64 {
        self.inner.price
    }

    #[getter]
    fn bid(&self) -> f64 {
        self.inner.bid
    }

    #[getter]
    fn ask(&self) -> f64 {
        self.inner.ask
    }

    #[getter]
    fn volume(&self) -> f64 {
        self.inner.volume
    }

    /// +1 buy, -1 sell, 0 inside the spread.
    #[getter]
    fn side(&self) -> i8 {
        self.inner.side().sign()
    }

    fn __repr__(&self) -> String {
        format!(
            "Tick(time={}, price={}, bid={}, ask={}, volume={})",
            self.time(),
            self.inner.price,
            self.inner.bid,
            self.inner.ask,
            self.inner.volume
        )
    }
}

/// A fixed-range bar with its per-price volume profile.
#[pyclass(name = "RangeBar")]
#[derive(Clone)]
pub struct PyRangeBar {
    inner: RustRangeBar,
}

impl From<RustRangeBar> for PyRangeBar {
    fn from(bar: RustRangeBar) -> Self {
        PyRangeBar { inner: bar }
    }
}

#[pymethods]
impl PyRangeBar {
    #[getter]
    fn open_time(&self) -> String {
        format_time(&self.inner.open_time)
    }

    #[getter]
    fn close_time(&self) -> String {
        format_time(&self.inner.close_time)
    }

    #[getter]
    fn open(&self) -> f64 {
        self.inner.open
    }

    #[getter]
    fn high(&self) -> f64 {
        self.inner.high
    }

    #[getter]
    fn low(&self) -> f64 {
        self.inner.low
    }

    #[getter]
    fn close(&self) -> f64 {
        self.inner.close
    }

    #[getter]
    fn volume(&self) -> f64 {
        self.inner.volume
    }

    #[getter]
    fn delta(&self) -> f64 {
        self.inner.delta
    }

    #[getter]
    fn direction(&self) -> i8 {
        self.inner.direction.sign()
    }

    #[getter]
    fn is_phantom(&self) -> bool {
        self.inner.is_phantom()
    }

    /// `(price, volume, bid_volume, ask_volume)` from the lowest price up.
    fn levels(&self) -> Vec<(f64, f64, f64, f64)> {
        self.inner
            .levels
            .iter()
            .map(|(price, s)| (price.into_inner(), s.volume, s.bid_volume, s.ask_volume))
            .collect()
    }

    fn __repr__(&self) -> String {
        format!(
            "RangeBar(open_time={}, o={}, h={}, l={}, c={}, volume={}, delta={})",
            self.open_time(),
            self.inner.open,
            self.inner.high,
            self.inner.low,
            self.inner.close,
            self.inner.volume,
            self.inner.delta
        )
    }
}

/// One triggered bar with its backtest outcome.
#[pyclass(name = "TriggerRecord")]
#[derive(Clone)]
pub struct PyTriggerRecord {
    #[pyo3(get)]
    pub bar_index: usize,
    #[pyo3(get)]
    pub open_time: String,
    #[pyo3(get)]
    pub close_time: String,
    #[pyo3(get)]
    pub high: f64,
    #[pyo3(get)]
    pub low: f64,
    #[pyo3(get)]
    pub close: f64,
    #[pyo3(get)]
    pub volume: f64,
    #[pyo3(get)]
    pub delta: f64,
    #[pyo3(get)]
    pub trigger_position: String,
    #[pyo3(get)]
    pub is_divergent: bool,
    #[pyo3(get)]
    pub imbalance_high: Vec<u32>,
    #[pyo3(get)]
    pub imbalance_low: Vec<u32>,
    #[pyo3(get)]
    pub imbalance_coherence: String,
    #[pyo3(get)]
    pub has_exhaustion: bool,
    #[pyo3(get)]
    pub exhaustion_type: String,
    #[pyo3(get)]
    pub exhaustion_ratio: f64,
    #[pyo3(get)]
    pub has_reversal: bool,
    #[pyo3(get)]
    pub before_window: Option<usize>,
    #[pyo3(get)]
    pub after_window: Option<usize>,
    #[pyo3(get)]
    pub max_excursion: f64,
    #[pyo3(get)]
    pub excursion_bars: usize,
    #[pyo3(get)]
    pub stop_status: String,
    #[pyo3(get)]
    pub trade_direction: String,
}

impl From<RustTriggerRecord> for PyTriggerRecord {
    fn from(r: RustTriggerRecord) -> Self {
        PyTriggerRecord {
            bar_index: r.bar_index,
            open_time: format_time(&r.open_time),
            close_time: format_time(&r.close_time),
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            delta: r.delta,
            trigger_position: r.trigger_position.as_str().to_string(),
            is_divergent: r.is_divergent,
            imbalance_high: vec![
                r.imbalance_high_x2,
                r.imbalance_high_x3,
                r.imbalance_high_x4,
                r.imbalance_high_x5,
            ],
            imbalance_low: vec![
                r.imbalance_low_x2,
                r.imbalance_low_x3,
                r.imbalance_low_x4,
                r.imbalance_low_x5,
            ],
            imbalance_coherence: r.imbalance_coherence.as_str().to_string(),
            has_exhaustion: r.has_exhaustion,
            exhaustion_type: r.exhaustion_type.as_str().to_string(),
            exhaustion_ratio: r.exhaustion_ratio,
            has_reversal: r.has_reversal,
            before_window: r.before_window,
            after_window: r.after_window,
            max_excursion: r.max_excursion,
            excursion_bars: r.excursion_bars,
            stop_status: r.stop_status.map_or("NONE", |s| s.as_str()).to_string(),
            trade_direction: r.trade_direction.map_or("NONE", |d| d.as_str()).to_string(),
        }
    }
}

#[pymethods]
impl PyTriggerRecord {
    fn __repr__(&self) -> String {
        format!(
            "TriggerRecord(bar_index={}, position={}, divergent={}, reversal={}, excursion={:.2})",
            self.bar_index,
            self.trigger_position,
            self.is_divergent,
            self.has_reversal,
            self.max_excursion
        )
    }
}

// ============================================================================
// Python-exposed Engine Classes
// ============================================================================

/// Directional reversal backtest over a bar table.
#[pyclass]
pub struct PyReversalEngine {
    inner: ReversalEngine,
}

#[pymethods]
impl PyReversalEngine {
    #[new]
    #[pyo3(signature = (validation_windows=None, stop_tolerance=None, min_trailing_bars=None))]
    fn new(
        validation_windows: Option<Vec<usize>>,
        stop_tolerance: Option<f64>,
        min_trailing_bars: Option<usize>,
    ) -> PyResult<Self> {
        let defaults = ReversalConfig::default();
        let config = ReversalConfig {
            validation_windows: validation_windows.unwrap_or(defaults.validation_windows),
            stop_tolerance: stop_tolerance.unwrap_or(defaults.stop_tolerance),
            min_trailing_bars: min_trailing_bars.unwrap_or(defaults.min_trailing_bars),
        };
        config.validate().map_err(to_py_err)?;
        Ok(PyReversalEngine {
            inner: ReversalEngine::new(config),
        })
    }

    /// Backtest the bar at `idx`.
    ///
    /// Returns `(before_window, after_window, max_excursion, excursion_bars,
    /// stop_status, trade_direction)`, or `None` when no trade results.
    fn run(
        &self,
        bars: Vec<PyRangeBar>,
        idx: usize,
        position: &str,
    ) -> PyResult<Option<(usize, usize, f64, usize, String, String)>> {
        let position = parse_position(position)?;
        let bars: Vec<RustRangeBar> = bars.into_iter().map(|b| b.inner).collect();
        Ok(self.inner.run(&bars, idx, position).map(|r| {
            (
                r.before_window,
                r.after_window,
                r.max_excursion,
                r.excursion_bars,
                r.stop_status.as_str().to_string(),
                r.trade_direction.as_str().to_string(),
            )
        }))
    }

    /// Reason the bar at `idx` yields no trade, or `None` if it does.
    fn rejection(&self, bars: Vec<PyRangeBar>, idx: usize, position: &str) -> PyResult<Option<String>> {
        let position = parse_position(position)?;
        let bars: Vec<RustRangeBar> = bars.into_iter().map(|b| b.inner).collect();
        Ok(self.inner.evaluate(&bars, idx, position).err().map(|r| r.to_string()))
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Aggregate ticks into range bars of `range_size` points.
#[pyfunction]
fn build_range_bars(ticks: Vec<PyTick>, range_size: f64) -> PyResult<Vec<PyRangeBar>> {
    let ticks: Vec<RustTick> = ticks.into_iter().map(|t| t.inner).collect();
    let bars = trapped_ingestion::build_range_bars(&ticks, range_size).map_err(to_py_err)?;
    Ok(bars.into_iter().map(PyRangeBar::from).collect())
}

/// Merge duplicate price levels and recompute volume and delta.
///
/// Uses the default cleaner settings, so prices are not snapped to the tick
/// grid and phantom bars are kept.
#[pyfunction]
fn clean_bars(bars: Vec<PyRangeBar>) -> Vec<PyRangeBar> {
    let bars: Vec<RustRangeBar> = bars.into_iter().map(|b| b.inner).collect();
    trapped_ingestion::clean_bars(&bars)
        .into_iter()
        .map(PyRangeBar::from)
        .collect()
}

/// Decode a serialized price statistics field.
///
/// Returns `(price, volume, bid_volume, ask_volume)` sorted by price. An
/// unparseable field decodes as an empty list unless `strict` is set, in
/// which case it raises `ValueError`.
#[pyfunction]
#[pyo3(signature = (text, strict=false))]
fn decode_price_stats(text: &str, strict: bool) -> PyResult<Vec<(f64, f64, f64, f64)>> {
    let levels = if strict {
        trapped_ingestion::decode_levels(text).map_err(to_py_err)?
    } else {
        trapped_ingestion::decode_levels_lossy(text)
    };
    Ok(levels
        .iter()
        .map(|(price, s)| (price.into_inner(), s.volume, s.bid_volume, s.ask_volume))
        .collect())
}

/// Scan cleaned bars for triggers and backtest each one.
#[pyfunction]
#[pyo3(signature = (bars, n_extremes=3, vol_threshold=0.3, aggression_threshold=0.6, exhaustion_threshold=0.1, time_slot="ALL"))]
fn scan(
    bars: Vec<PyRangeBar>,
    n_extremes: usize,
    vol_threshold: f64,
    aggression_threshold: f64,
    exhaustion_threshold: f64,
    time_slot: &str,
) -> PyResult<Vec<PyTriggerRecord>> {
    let params = TriggerConfig {
        n_extremes,
        vol_threshold,
        aggression_threshold,
        exhaustion_threshold,
    };
    params.validate().map_err(to_py_err)?;
    let slot: TimeSlot = time_slot.parse().map_err(to_py_err)?;

    let bars: Vec<RustRangeBar> = bars.into_iter().map(|b| b.inner).collect();
    let scanner = PatternScanner::default();
    Ok(scanner
        .scan_records(&bars, &params, slot)
        .into_iter()
        .map(PyTriggerRecord::from)
        .collect())
}

// ============================================================================
// Module Definition
// ============================================================================

/// Trapped Orders Core - Rust range bar pipeline for Python.
#[pymodule]
fn trapped_orders_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Types
    m.add_class::<PyTick>()?;
    m.add_class::<PyRangeBar>()?;
    m.add_class::<PyTriggerRecord>()?;

    // Engine classes
    m.add_class::<PyReversalEngine>()?;

    // Functions
    m.add_function(wrap_pyfunction!(build_range_bars, m)?)?;
    m.add_function(wrap_pyfunction!(clean_bars, m)?)?;
    m.add_function(wrap_pyfunction!(decode_price_stats, m)?)?;
    m.add_function(wrap_pyfunction!(scan, m)?)?;

    Ok(())
}
