//! Concurrent grid of harmonic processors.
//!
//! A [`ProcessorGrid`] owns `width × height` cells. Cell `id` sits at column `id % width`
//! and row `id / width`. Each column is served by one worker lane, a named OS thread that
//! owns the `height` processors of that column outright; no processor state is shared
//! between threads.
//!
//! ```text
//!  caller ──dispatch/compute──► mpsc ──► lane 0 ─┐
//!                               mpsc ──► lane 1 ─┼─► SweepAggregator ──► broadcast<HeatMap>
//!                               mpsc ──► lane N ─┘         (one lock)
//! ```
//!
//! Commands travel over unbounded channels, so the caller never waits on a lane. The only
//! shared mutable state is the [`SweepAggregator`], which collects one SNR per cell and
//! emits exactly one normalized [`HeatMap`] per completed sweep. Every compute command
//! carries the id of the sweep it belongs to; starting a new sweep abandons the one in
//! flight, and its late reports are dropped.
use crate::core::{CellEvent, ColorChannel, Sample};
use crate::data::processor::{HarmonicProcessor, ProcessorConfig, EVENT_CAPACITY};
use crate::data::reference::ReferenceThresholds;
use crate::error::{AppResult, PpgError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the heat map channel.
const MAP_CAPACITY: usize = 64;

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of columns, one worker lane each.
    pub width: usize,
    /// Cells per column.
    pub height: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 4,
            height: 4,
        }
    }
}

impl GridConfig {
    /// Total number of cells.
    pub fn cells(&self) -> usize {
        self.width * self.height
    }

    /// Rejects empty grids.
    pub fn validate(&self) -> AppResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PpgError::Configuration(format!(
                "grid must have at least one cell (got {}x{})",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Normalized SNR map of one completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatMap {
    /// Row-major values in `[0, 1]`.
    pub values: Vec<f64>,
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
    /// Largest finite value before normalization.
    pub max: f64,
    /// Smallest finite value before normalization.
    pub min: f64,
}

/// Maps `values` onto `[0, 1]` with `(v - min) / (max - min)`.
///
/// Bounds with `max <= min` (or non-finite bounds) produce an all-zero map, and non-finite
/// values normalize to 0.
pub fn normalize(values: &[f64], min: f64, max: f64) -> Vec<f64> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return vec![0.0; values.len()];
    }
    let range = max - min;
    values
        .iter()
        .map(|&v| if v.is_finite() { (v - min) / range } else { 0.0 })
        .collect()
}

#[derive(Debug)]
struct SweepState {
    sweep: u64,
    values: Vec<f64>,
    reported: Vec<bool>,
    update_count: usize,
}

impl SweepState {
    fn new(cells: usize) -> Self {
        Self {
            sweep: 0,
            values: vec![0.0; cells],
            reported: vec![false; cells],
            update_count: 0,
        }
    }

    fn restart(&mut self) {
        self.reported.fill(false);
        self.update_count = 0;
    }

    /// Finite bounds of the sweep, starting from `(+inf, -inf)`.
    fn bounds(&self) -> (f64, f64) {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            })
    }
}

/// Completion barrier collecting one value per cell per sweep.
#[derive(Debug)]
pub struct SweepAggregator {
    width: usize,
    height: usize,
    state: Mutex<SweepState>,
    maps: broadcast::Sender<HeatMap>,
}

impl SweepAggregator {
    /// Creates an aggregator for a `width × height` grid publishing on `maps`.
    pub fn new(width: usize, height: usize, maps: broadcast::Sender<HeatMap>) -> Self {
        Self {
            width,
            height,
            state: Mutex::new(SweepState::new(width * height)),
            maps,
        }
    }

    /// Opens a new sweep and returns its id.
    ///
    /// Cells that already reported to an unfinished sweep must report again; reports tagged
    /// with an older id are discarded.
    pub fn begin_sweep(&self) -> u64 {
        let mut state = self.state.lock();
        if state.update_count > 0 {
            warn!(
                sweep = state.sweep,
                reported = state.update_count,
                "sweep superseded before completion"
            );
        }
        state.sweep += 1;
        state.restart();
        state.sweep
    }

    /// Id of the sweep currently collecting reports.
    pub fn sweep(&self) -> u64 {
        self.state.lock().sweep
    }

    /// Records `value` for `cell` in the current sweep.
    ///
    /// The report that completes a sweep normalizes the map, publishes it and resets the
    /// counters before the lock is released; the map is also returned to that caller.
    /// A cell reporting twice in one sweep replaces its value without advancing the barrier.
    pub fn report(&self, cell: u32, value: f64) -> Option<HeatMap> {
        let mut state = self.state.lock();
        let sweep = state.sweep;
        self.record(&mut state, sweep, cell, value)
    }

    /// Records `value` for `cell` if `sweep` is still the current sweep.
    pub fn report_for(&self, sweep: u64, cell: u32, value: f64) -> Option<HeatMap> {
        let mut state = self.state.lock();
        if sweep != state.sweep {
            debug!(sweep, current = state.sweep, cell, "dropping report from stale sweep");
            return None;
        }
        self.record(&mut state, sweep, cell, value)
    }

    fn record(
        &self,
        state: &mut SweepState,
        sweep: u64,
        cell: u32,
        value: f64,
    ) -> Option<HeatMap> {
        let total = self.width * self.height;
        let index = cell as usize;
        if index >= total {
            warn!(cell, total, "ignoring report for unknown cell");
            return None;
        }

        state.values[index] = value;
        if !state.reported[index] {
            state.reported[index] = true;
            state.update_count += 1;
        }
        if state.update_count < total {
            return None;
        }

        let (min, max) = state.bounds();
        let map = HeatMap {
            values: normalize(&state.values, min, max),
            width: self.width,
            height: self.height,
            max,
            min,
        };
        debug!(sweep, max, min, "sweep complete");
        // No subscribers is fine; the map is still returned.
        let _ = self.maps.send(map.clone());
        state.restart();
        Some(map)
    }

    /// Cells that have reported in the current sweep.
    pub fn update_count(&self) -> usize {
        self.state.lock().update_count
    }
}

/// Per-cell setting applied by every lane to all of its processors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellSetting {
    /// See [`HarmonicProcessor::set_channel_mode`].
    ChannelMode(ColorChannel),
    /// See [`HarmonicProcessor::set_pca_enabled`].
    Pca(bool),
    /// See [`HarmonicProcessor::set_reference_thresholds`].
    Thresholds(ReferenceThresholds),
}

impl CellSetting {
    fn apply(self, processor: &mut HarmonicProcessor) {
        match self {
            CellSetting::ChannelMode(channel) => processor.set_channel_mode(channel),
            CellSetting::Pca(enabled) => processor.set_pca_enabled(enabled),
            CellSetting::Thresholds(thresholds) => processor.set_reference_thresholds(thresholds),
        }
    }
}

#[derive(Debug)]
enum LaneCommand {
    Enroll { row: usize, sample: Sample },
    Compute { sweep: u64 },
    Configure(CellSetting),
    Shutdown,
}

#[derive(Debug)]
struct Lane {
    column: usize,
    commands: mpsc::Sender<LaneCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Lane {
    fn spawn(
        column: usize,
        cells: Vec<HarmonicProcessor>,
        aggregator: Arc<SweepAggregator>,
    ) -> AppResult<Self> {
        let (commands, inbox) = mpsc::channel::<LaneCommand>();
        let handle = std::thread::Builder::new()
            .name(format!("harmonic-lane-{column}"))
            .spawn(move || run_lane(column, cells, inbox, aggregator))
            .map_err(PpgError::LaneSpawn)?;
        Ok(Self {
            column,
            commands,
            handle: Some(handle),
        })
    }

    fn send(&self, command: LaneCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PpgError::LaneClosed(self.column))
    }
}

fn run_lane(
    column: usize,
    mut cells: Vec<HarmonicProcessor>,
    inbox: mpsc::Receiver<LaneCommand>,
    aggregator: Arc<SweepAggregator>,
) {
    info!(column, cells = cells.len(), "lane started");
    while let Ok(command) = inbox.recv() {
        match command {
            LaneCommand::Enroll { row, sample } => {
                let Some(cell) = cells.get_mut(row) else {
                    warn!(column, row, "enroll for unknown row");
                    continue;
                };
                if let Err(err) = cell.enroll(&sample) {
                    warn!(column, cell = cell.id(), %err, "sample rejected");
                }
            }
            LaneCommand::Compute { sweep } => {
                for cell in &mut cells {
                    let outcome = cell.compute_frequency();
                    aggregator.report_for(sweep, cell.id(), outcome.snr());
                }
            }
            LaneCommand::Configure(setting) => {
                for cell in &mut cells {
                    setting.apply(cell);
                }
            }
            LaneCommand::Shutdown => break,
        }
    }
    debug!(column, "lane stopped");
}

/// Owner of all cells, their lanes and the sweep aggregator.
#[derive(Debug)]
pub struct ProcessorGrid {
    config: GridConfig,
    lanes: Vec<Lane>,
    next_cell: AtomicUsize,
    aggregator: Arc<SweepAggregator>,
    maps: broadcast::Sender<HeatMap>,
    cell_events: broadcast::Sender<CellEvent>,
    closed: bool,
}

impl ProcessorGrid {
    /// Builds every processor and starts one lane per column.
    pub fn new(config: GridConfig, processor: &ProcessorConfig) -> AppResult<Self> {
        config.validate()?;
        processor.validate()?;

        let (maps, _) = broadcast::channel(MAP_CAPACITY);
        let (cell_events, _) = broadcast::channel(EVENT_CAPACITY);
        let aggregator = Arc::new(SweepAggregator::new(
            config.width,
            config.height,
            maps.clone(),
        ));

        let mut grid = Self {
            config,
            lanes: Vec::with_capacity(config.width),
            next_cell: AtomicUsize::new(0),
            aggregator,
            maps,
            cell_events,
            closed: false,
        };

        for column in 0..config.width {
            let cells = (0..config.height)
                .map(|row| {
                    let id = (row * config.width + column) as u32;
                    HarmonicProcessor::new(id, processor.clone())
                        .map(|p| p.with_event_sender(grid.cell_events.clone()))
                })
                .collect::<AppResult<Vec<_>>>()?;
            // An early return drops `grid`, which joins the lanes started so far.
            let lane = Lane::spawn(column, cells, Arc::clone(&grid.aggregator))?;
            grid.lanes.push(lane);
        }

        info!(
            width = config.width,
            height = config.height,
            "processor grid started"
        );
        Ok(grid)
    }

    /// Grid dimensions.
    pub fn config(&self) -> GridConfig {
        self.config
    }

    /// Routes `sample` to the next cell in round-robin order and returns that cell's id.
    pub fn dispatch(&self, sample: Sample) -> AppResult<u32> {
        sample.validate()?;
        let total = self.config.cells();
        let cell = match self
            .next_cell
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % total))
        {
            Ok(previous) | Err(previous) => previous,
        };
        let column = cell % self.config.width;
        let row = cell / self.config.width;
        self.lane(column)?.send(LaneCommand::Enroll { row, sample })?;
        Ok(cell as u32)
    }

    /// Starts a sweep: every cell computes a frequency-domain estimate and the results
    /// arrive as one [`HeatMap`]. Returns the sweep id.
    ///
    /// A sweep still in flight is abandoned; only the newest sweep can produce a map.
    pub fn broadcast_compute(&self) -> AppResult<u64> {
        // A closed grid must not advance the sweep counter.
        if self.closed {
            return Err(PpgError::LaneClosed(0));
        }
        let sweep = self.aggregator.begin_sweep();
        self.broadcast(|| LaneCommand::Compute { sweep })?;
        Ok(sweep)
    }

    /// Switches every cell's channel mode.
    pub fn set_channel_mode(&self, channel: ColorChannel) -> AppResult<()> {
        self.configure(CellSetting::ChannelMode(channel))
    }

    /// Enables or disables the principal component path on every cell.
    pub fn set_pca_enabled(&self, enabled: bool) -> AppResult<()> {
        self.configure(CellSetting::Pca(enabled))
    }

    /// Replaces every cell's plausibility band.
    pub fn set_reference_thresholds(&self, thresholds: ReferenceThresholds) -> AppResult<()> {
        self.configure(CellSetting::Thresholds(thresholds))
    }

    /// Queues `setting` behind any pending work on every lane.
    pub fn configure(&self, setting: CellSetting) -> AppResult<()> {
        self.broadcast(|| LaneCommand::Configure(setting))
    }

    /// Receives one [`HeatMap`] per completed sweep.
    pub fn subscribe_maps(&self) -> broadcast::Receiver<HeatMap> {
        self.maps.subscribe()
    }

    /// Receives observational events from every cell.
    pub fn subscribe_cells(&self) -> broadcast::Receiver<CellEvent> {
        self.cell_events.subscribe()
    }

    /// Records a value for `cell` in the current sweep.
    pub fn aggregate(&self, cell: u32, value: f64) -> Option<HeatMap> {
        self.aggregator.report(cell, value)
    }

    /// Cells that have reported in the current sweep.
    pub fn update_count(&self) -> usize {
        self.aggregator.update_count()
    }

    /// Stops every lane and waits for all of them to exit. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for lane in &self.lanes {
            // A lane that already exited has nothing left to stop.
            let _ = lane.send(LaneCommand::Shutdown);
        }
        for lane in &mut self.lanes {
            if let Some(handle) = lane.handle.take() {
                if handle.join().is_err() {
                    warn!(column = lane.column, "lane panicked");
                }
            }
        }
        info!("processor grid stopped");
    }

    fn lane(&self, column: usize) -> AppResult<&Lane> {
        if self.closed {
            return Err(PpgError::LaneClosed(column));
        }
        self.lanes.get(column).ok_or(PpgError::LaneClosed(column))
    }

    fn broadcast(&self, command: impl Fn() -> LaneCommand) -> AppResult<()> {
        for column in 0..self.lanes.len() {
            self.lane(column)?.send(command())?;
        }
        Ok(())
    }
}

impl Drop for ProcessorGrid {
    fn drop(&mut self) {
        self.shutdown();
    }
}
