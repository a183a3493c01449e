//! Per-channel worker pool
//!
//! Jobs are numbered `0..n` and run on a dedicated rayon pool sized per
//! request. Results are collected in job order, so output order never depends
//! on completion order.
//!
//! The first failing job cancels its siblings. Later errors are dropped.
//!
//! Each job holds a slot from an [`AdmissionGate`] while it runs. The default
//! gate watches the process resident set and shrinks the number of slots as
//! memory fills up; it only delays work, it never drops it.

use crate::error::AnalysisError;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Hard cap on pool size
pub const MAX_POOL_WORKERS: usize = 16;

/// Pressure ratio at which the gate halves the worker count
pub const ELEVATED_PRESSURE: f64 = 0.80;

/// Pressure ratio at which the gate quarters the worker count
pub const CRITICAL_PRESSURE: f64 = 0.90;

/// `min(hardware parallelism, 16)`
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_POOL_WORKERS)
}

/// Cooperative cancellation flag shared by the jobs of one request
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is cancelled when it, `self` or any ancestor of `self` is
    /// cancelled. Cancelling the child leaves the parent untouched.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|a| a.load(Ordering::SeqCst))
    }
}

/// Throttles job starts
pub trait AdmissionGate: Send + Sync {
    /// Block until a job slot is free and take it.
    ///
    /// Returns `false`, holding no slot, when `cancel` fires first.
    fn acquire(&self, cancel: &CancelToken) -> bool;
    /// Give back a slot taken by [`acquire`](Self::acquire)
    fn release(&self, elapsed: Duration);
    /// Number of workers worth spawning, given the caller's upper bound
    fn optimal_worker_count(&self, requested: usize) -> usize;
}

/// Gate that admits everything immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGate;

impl AdmissionGate for NoopGate {
    fn acquire(&self, cancel: &CancelToken) -> bool {
        !cancel.is_cancelled()
    }
    fn release(&self, _elapsed: Duration) {}
    fn optimal_worker_count(&self, requested: usize) -> usize {
        requested.max(1)
    }
}

/// Receives `(completed, total)` as channel jobs finish
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Progress sink that discards updates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Resident memory against the budget it is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub resident_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySample {
    pub fn ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes as f64 / self.limit_bytes as f64
    }
}

/// Source of resident-memory estimates
pub trait MemoryProbe: Send + Sync {
    /// `None` when no estimate is available on this platform
    fn sample(&self) -> Option<MemorySample>;
}

/// Reads `/proc/self/statm` and `/proc/meminfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe {
    /// Budget in bytes; physical memory when unset
    pub limit_bytes: Option<u64>,
}

const PAGE_SIZE: u64 = 4096;

impl MemoryProbe for ProcMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        let limit_bytes = match self.limit_bytes {
            Some(limit) => limit,
            None => {
                let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
                let total_kb: u64 = meminfo
                    .lines()
                    .find_map(|l| l.strip_prefix("MemTotal:"))?
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .ok()?;
                total_kb * 1024
            }
        };
        Some(MemorySample {
            resident_bytes: resident_pages * PAGE_SIZE,
            limit_bytes,
        })
    }
}

/// Memory pressure band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Below 80 %: all workers
    #[default]
    Normal,
    /// 80-90 %: half the workers
    Elevated,
    /// Above 90 %: a quarter of the workers
    Critical,
}

impl PressureLevel {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > CRITICAL_PRESSURE {
            PressureLevel::Critical
        } else if ratio >= ELEVATED_PRESSURE {
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        }
    }

    /// Workers allowed at this level out of `max`, never below one
    pub fn allowed(&self, max: usize) -> usize {
        let allowed = match self {
            PressureLevel::Normal => max,
            PressureLevel::Elevated => max / 2,
            PressureLevel::Critical => max / 4,
        };
        allowed.max(1)
    }
}

/// Counters kept by [`MemoryPressureGate`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct GateStats {
    pub level: PressureLevel,
    pub last_ratio: f64,
    pub samples: u64,
    pub started: u64,
    pub completed: u64,
    pub throttled_waits: u64,
    pub busy: Duration,
}

/// Admission gate driven by resident-memory pressure
pub struct MemoryPressureGate {
    probe: Box<dyn MemoryProbe>,
    stats: Mutex<GateStats>,
    active: AtomicUsize,
    max_workers: usize,
    poll_interval: Duration,
}

impl MemoryPressureGate {
    pub fn new(probe: Box<dyn MemoryProbe>, max_workers: usize) -> Self {
        Self {
            probe,
            stats: Mutex::new(GateStats::default()),
            active: AtomicUsize::new(0),
            max_workers: max_workers.max(1),
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Gate over this process's resident set
    pub fn for_process(limit_bytes: Option<u64>, max_workers: usize) -> Self {
        Self::new(Box::new(ProcMemoryProbe { limit_bytes }), max_workers)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stats(&self) -> GateStats {
        self.stats.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn sample_level(&self) -> PressureLevel {
        let sample = self.probe.sample();
        let mut stats = self.stats.lock();
        stats.samples += 1;
        if let Some(sample) = sample {
            stats.last_ratio = sample.ratio();
            let level = PressureLevel::from_ratio(stats.last_ratio);
            if level != stats.level {
                debug!(?level, ratio = stats.last_ratio, "memory pressure level changed");
            }
            stats.level = level;
        }
        stats.level
    }
}

impl AdmissionGate for MemoryPressureGate {
    fn acquire(&self, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let allowed = self.sample_level().allowed(self.max_workers);
            let taken = self
                .active
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                    (active < allowed).then_some(active + 1)
                })
                .is_ok();
            if taken {
                self.stats.lock().started += 1;
                return true;
            }
            self.stats.lock().throttled_waits += 1;
            thread::sleep(self.poll_interval);
        }
    }

    fn release(&self, elapsed: Duration) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut stats = self.stats.lock();
        stats.completed += 1;
        stats.busy += elapsed;
    }

    fn optimal_worker_count(&self, requested: usize) -> usize {
        self.sample_level().allowed(requested.min(self.max_workers))
    }
}

/// Bounded pool running numbered jobs on rayon worker threads
pub struct WorkerPool {
    workers: usize,
    gate: Arc<dyn AdmissionGate>,
    progress: Arc<dyn ProgressSink>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_POOL_WORKERS),
            gate: Arc::new(NoopGate),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job(0..jobs)` and return results in job order.
    ///
    /// Returns the first job error, or `Cancelled` when `cancel` fired before
    /// every job finished.
    pub fn run<T, F>(&self, jobs: usize, cancel: &CancelToken, job: F) -> Result<Vec<T>, AnalysisError>
    where
        T: Send,
        F: Fn(usize) -> Result<T, AnalysisError> + Sync,
    {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        if jobs == 0 {
            return Ok(Vec::new());
        }

        let workers = self.gate.optimal_worker_count(self.workers.min(jobs)).clamp(1, jobs);
        debug!(jobs, workers, "dispatching channel jobs");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("kinesync-worker-{i}"))
            .build()
            .map_err(|e| AnalysisError::Io(io::Error::other(e)))?;

        let siblings = cancel.child();
        let first_error: Mutex<Option<AnalysisError>> = Mutex::new(None);
        let completed = AtomicUsize::new(0);
        let gate = self.gate.as_ref();
        let progress = self.progress.as_ref();

        let collected = pool.install(|| {
            (0..jobs)
                .into_par_iter()
                .map(|id| {
                    if !gate.acquire(&siblings) {
                        return Err(AnalysisError::Cancelled);
                    }
                    let started = Instant::now();
                    let result = job(id);
                    gate.release(started.elapsed());
                    match result {
                        Ok(value) => {
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            progress.on_progress(done, jobs);
                            Ok(value)
                        }
                        Err(e) => {
                            first_error.lock().get_or_insert(e);
                            siblings.cancel();
                            Err(AnalysisError::Cancelled)
                        }
                    }
                })
                .collect::<Result<Vec<T>, AnalysisError>>()
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => collected,
        }
    }
}
