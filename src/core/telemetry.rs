//! Per-stage timing telemetry.
//!
//! Each stage worker measures how long the phases of a tick take (input
//! receive, secondary refresh, user logic, output fan-out) and smooths the
//! samples with an exponentially weighted moving average. The smoothed
//! values are published through a shared [`StageStats`] handle so host
//! programs can observe a running stage without touching its worker.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Smoothing factor applied to every timing series.
pub(crate) const EWMA_ALPHA: f64 = 0.2;

/// Seed value for a timing series before the first real sample (5 ms).
pub(crate) const EWMA_SEED: f64 = 0.005;

/// Exponentially weighted moving average over timing samples.
#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    value: f64,
    alpha: f64,
}

impl Ewma {
    pub fn new(initial: f64, alpha: f64) -> Self {
        Self {
            value: initial,
            alpha,
        }
    }

    /// Fold a new sample in and return the updated average.
    pub fn update(&mut self, sample: f64) -> f64 {
        self.value = (1.0 - self.alpha) * self.value + self.alpha * sample;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Lifecycle of a stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    /// Constructed but not yet started.
    Created = 0,
    /// Executing its tick loop.
    Running = 1,
    /// Stop observed; closing wires and running teardown.
    Draining = 2,
    /// The worker has exited.
    Stopped = 3,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StageState::Running,
            2 => StageState::Draining,
            3 => StageState::Stopped,
            _ => StageState::Created,
        }
    }
}

/// Shared, lock-free view of a stage worker's timings and lifecycle.
///
/// All timing values are smoothed seconds.
#[derive(Debug)]
pub struct StageStats {
    get_time: AtomicU64,
    secondary_time: AtomicU64,
    run_time: AtomicU64,
    post_time: AtomicU64,
    ticks: AtomicU64,
    state: AtomicU8,
}

impl StageStats {
    pub(crate) fn new() -> Self {
        Self {
            get_time: AtomicU64::new(EWMA_SEED.to_bits()),
            secondary_time: AtomicU64::new(EWMA_SEED.to_bits()),
            run_time: AtomicU64::new(EWMA_SEED.to_bits()),
            post_time: AtomicU64::new(EWMA_SEED.to_bits()),
            ticks: AtomicU64::new(0),
            state: AtomicU8::new(StageState::Created as u8),
        }
    }

    /// Smoothed time spent waiting on the primary input wire.
    pub fn get_time(&self) -> f64 {
        f64::from_bits(self.get_time.load(Ordering::Relaxed))
    }

    /// Smoothed time spent polling secondary input wires.
    pub fn secondary_time(&self) -> f64 {
        f64::from_bits(self.secondary_time.load(Ordering::Relaxed))
    }

    /// Smoothed time spent inside the user `run` hook.
    pub fn run_time(&self) -> f64 {
        f64::from_bits(self.run_time.load(Ordering::Relaxed))
    }

    /// Smoothed time spent fanning output out to wires.
    pub fn post_time(&self) -> f64 {
        f64::from_bits(self.post_time.load(Ordering::Relaxed))
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_get_time(&self, value: f64) {
        self.get_time.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_secondary_time(&self, value: f64) {
        self.secondary_time.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_run_time(&self, value: f64) {
        self.run_time.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_post_time(&self, value: f64) {
        self.post_time.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn bump_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
