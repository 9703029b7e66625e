/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core reservation data structures.
//!
//! The reservation pipeline moves through three representations:
//!
//! ```text
//! caller  ──(Timespec C, T)──►  TaskParams  ──(admission)──►  Reservation
//!                                 ↑ validated, ns                ↑ shared with its
//!                                   immutable copy                 enforcement timer
//! ```
//!
//! # Ownership model
//! A [`Reservation`] is held behind an `Arc` by the Global Reservation Index
//! and by exactly one armed enforcement timer.  The owner thread is referred
//! to only by its [`ThreadId`]; the record never keeps the thread alive.
//!
//! All durations are integer nanoseconds and all utilizations are
//! [`Permille`] values, so every admission decision is reproducible
//! bit-for-bit across platforms.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::watch;

use crate::analysis::math::permille;
use crate::sync::lock;

/// Kernel thread identifier (`pid_t` of the thread, i.e. its TID).
pub type ThreadId = i32;

/// Nanoseconds per second.
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per millisecond.
pub const NSEC_PER_MSEC: u64 = 1_000_000;

// ── Timespec ──────────────────────────────────────────────────────────────────

/// Duration as supplied by a caller, in `struct timespec` layout.
///
/// Kept signed so that negative budgets and periods can be *detected* and
/// rejected with `EINVAL` instead of being unrepresentable at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Build from whole milliseconds, mirroring how the control tool splits
    /// `C` and `T` into seconds and nanoseconds.
    pub const fn from_millis(ms: i64) -> Self {
        Self {
            sec: ms / 1_000,
            nsec: (ms % 1_000) * NSEC_PER_MSEC as i64,
        }
    }

    /// `true` if either field is negative.
    pub fn is_negative(&self) -> bool {
        self.sec < 0 || self.nsec < 0
    }

    /// Convert to nanoseconds.
    ///
    /// Returns `None` for negative values, a non-normalised `nsec`
    /// (≥ 1 s), or a value that does not fit in `u64`.
    pub fn to_nanos(self) -> Option<u64> {
        if self.is_negative() || self.nsec as u64 >= NSEC_PER_SEC {
            return None;
        }
        (self.sec as u64)
            .checked_mul(NSEC_PER_SEC)?
            .checked_add(self.nsec as u64)
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

// ── Permille ──────────────────────────────────────────────────────────────────

/// Utilization scaled ×1000 (parts-per-thousand).
///
/// `Permille::FULL` is one whole processor.  Values above `FULL` are legal
/// and represent an overloaded processor or an overrunning period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Permille(pub u64);

impl Permille {
    pub const ZERO: Permille = Permille(0);
    pub const FULL: Permille = Permille(1_000);

    /// `execution / period`, scaled ×1000 and rounded **up**.
    ///
    /// Rounding up means a reservation is never charged less than it asks
    /// for, so the capacity checks stay conservative.  A zero period yields
    /// zero.
    pub fn of(execution_ns: u64, period_ns: u64) -> Self {
        Permille(permille(execution_ns, period_ns))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Permille) -> Permille {
        Permille(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Permille) -> Permille {
        Permille(self.0.saturating_sub(other.0))
    }
}

/// Fixed-point rendering with exactly three decimals (`750` → `"0.750"`),
/// which is precisely enough to reconstruct the integer.
impl fmt::Display for Permille {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1_000, self.0 % 1_000)
    }
}

/// Error returned when a rendered utilization cannot be parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed utilization '{0}' (expected <int>.<3 digits>)")]
pub struct ParsePermilleError(pub String);

impl FromStr for Permille {
    type Err = ParsePermilleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePermilleError(s.to_string());
        let (whole, frac) = s.trim().split_once('.').ok_or_else(err)?;
        if frac.len() != 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let whole: u64 = whole.parse().map_err(|_| err())?;
        let frac: u64 = frac.parse().map_err(|_| err())?;
        whole
            .checked_mul(1_000)
            .and_then(|w| w.checked_add(frac))
            .map(Permille)
            .ok_or_else(err)
    }
}

// ── TaskParams ────────────────────────────────────────────────────────────────

/// Validated `(C, T)` pair in nanoseconds.
///
/// `budget_ns ≤ period_ns` is **not** enforced here: an over-budget pair is
/// simply unschedulable and is rejected by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskParams {
    pub budget_ns: u64,
    pub period_ns: u64,
}

impl TaskParams {
    pub const fn new(budget_ns: u64, period_ns: u64) -> Self {
        Self {
            budget_ns,
            period_ns,
        }
    }

    /// Convenience constructor used by tests and the workload driver.
    pub const fn from_millis(budget_ms: u64, period_ms: u64) -> Self {
        Self::new(budget_ms * NSEC_PER_MSEC, period_ms * NSEC_PER_MSEC)
    }

    /// `C / T` in permille.
    pub fn utilization(&self) -> Permille {
        Permille::of(self.budget_ns, self.period_ns)
    }
}

// ── CpuRequest ────────────────────────────────────────────────────────────────

/// Placement requested by the caller of `set_reservation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuRequest {
    /// Let the active partition policy choose a processor.
    #[default]
    Auto,
    /// Pin to this processor index; only the schedulability test runs.
    Pinned(usize),
}

impl CpuRequest {
    /// Parse the raw processor argument of the control interface.
    ///
    /// `-1` selects automatic placement; any other negative value is
    /// invalid and yields `None`.
    pub fn from_raw(cpu: i64) -> Option<Self> {
        match cpu {
            -1 => Some(CpuRequest::Auto),
            c if c >= 0 => Some(CpuRequest::Pinned(c as usize)),
            _ => None,
        }
    }
}

impl fmt::Display for CpuRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuRequest::Auto => f.write_str("auto"),
            CpuRequest::Pinned(cpu) => write!(f, "{cpu}"),
        }
    }
}

// ── Samples and period reports ────────────────────────────────────────────────

/// One monitoring data point: utilization measured over one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilizationSample {
    pub period_index: u64,
    pub utilization: Permille,
}

impl fmt::Display for UtilizationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.period_index, self.utilization)
    }
}

/// Outcome of closing one accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodReport {
    pub period_index: u64,
    pub execution_ns: u64,
    pub budget_ns: u64,
    pub utilization: Permille,
    pub overrun: bool,
}

/// Value published to threads suspended in `end_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobBoundary {
    /// The accounting window numbered `.0` has just opened.
    Period(u64),
    /// The reservation was torn down.
    Cancelled,
}

// ── Reservation ───────────────────────────────────────────────────────────────

/// Accounting fields of a reservation.  Always read and written together
/// under the reservation's accounting lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accounting {
    pub budget_ns: u64,
    pub period_ns: u64,
    /// Execution consumed in the current period.
    pub accumulated_ns: u64,
    /// Number of period boundaries seen so far.
    pub period_index: u64,
    /// Processor the reservation is bound to.
    pub cpu: usize,
    pub has_reservation: bool,
}

/// Per-thread reservation record shared between the manager and the
/// thread's enforcement timer.
#[derive(Debug)]
pub struct Reservation {
    tid: ThreadId,
    accounting: Mutex<Accounting>,
    /// Written only while `samples` is held, so a flag flip and the matching
    /// history change are seen together.
    monitoring: AtomicBool,
    /// Separate from `accounting` so that export reads never stall a timer.
    samples: Mutex<Vec<UtilizationSample>>,
    boundary: watch::Sender<JobBoundary>,
}

impl Reservation {
    pub fn new(tid: ThreadId, params: TaskParams, cpu: usize, monitoring: bool) -> Self {
        let (boundary, _) = watch::channel(JobBoundary::Period(0));
        Self {
            tid,
            accounting: Mutex::new(Accounting {
                budget_ns: params.budget_ns,
                period_ns: params.period_ns,
                accumulated_ns: 0,
                period_index: 0,
                cpu,
                has_reservation: true,
            }),
            monitoring: AtomicBool::new(monitoring),
            samples: Mutex::new(Vec::new()),
            boundary,
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn params(&self) -> TaskParams {
        let acc = lock(&self.accounting);
        TaskParams::new(acc.budget_ns, acc.period_ns)
    }

    pub fn accounting(&self) -> Accounting {
        *lock(&self.accounting)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.accounting).has_reservation
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Add consumed execution to the current window.
    pub fn charge(&self, execution_ns: u64) {
        let mut acc = lock(&self.accounting);
        acc.accumulated_ns = acc.accumulated_ns.saturating_add(execution_ns);
    }

    /// Re-bind an existing record to new parameters after its previous timer
    /// has been disarmed.  Accumulated execution restarts from zero; the
    /// period counter and sample history carry on.
    pub fn rebind(&self, params: TaskParams, cpu: usize, monitoring: bool) {
        {
            let mut acc = lock(&self.accounting);
            acc.budget_ns = params.budget_ns;
            acc.period_ns = params.period_ns;
            acc.accumulated_ns = 0;
            acc.cpu = cpu;
            acc.has_reservation = true;
        }
        self.set_monitoring(monitoring);
    }

    /// Turn sample collection on or off.  Turning it off discards the
    /// history.
    pub fn set_monitoring(&self, enabled: bool) {
        let mut samples = lock(&self.samples);
        self.monitoring.store(enabled, Ordering::SeqCst);
        if !enabled {
            samples.clear();
        }
    }

    pub fn samples(&self) -> Vec<UtilizationSample> {
        lock(&self.samples).clone()
    }

    /// Close the accounting window that just ended: measure it, record a
    /// sample when monitoring, and reset the accumulator.
    ///
    /// The period counter advances whether or not monitoring is on.
    pub fn close_period(&self) -> PeriodReport {
        let report = {
            let mut acc = lock(&self.accounting);
            let execution_ns = acc.accumulated_ns;
            let report = PeriodReport {
                period_index: acc.period_index,
                execution_ns,
                budget_ns: acc.budget_ns,
                utilization: Permille::of(execution_ns, acc.period_ns),
                overrun: execution_ns > acc.budget_ns,
            };
            acc.period_index += 1;
            acc.accumulated_ns = 0;
            report
        };

        let mut samples = lock(&self.samples);
        if self.monitoring_enabled() {
            samples.push(UtilizationSample {
                period_index: report.period_index,
                utilization: report.utilization,
            });
        }
        report
    }

    /// Resume any thread suspended in `end_job`.
    pub fn open_period(&self, period_index: u64) {
        self.boundary.send_replace(JobBoundary::Period(period_index));
    }

    /// Subscribe to period boundaries.  The current value is marked seen, so
    /// the receiver only wakes on the *next* boundary.
    pub fn subscribe(&self) -> watch::Receiver<JobBoundary> {
        self.boundary.subscribe()
    }

    /// Teardown: clear the contract, drop the history and release waiters.
    pub fn release(&self) {
        {
            let mut acc = lock(&self.accounting);
            acc.budget_ns = 0;
            acc.period_ns = 0;
            acc.accumulated_ns = 0;
            acc.has_reservation = false;
        }
        {
            let mut samples = lock(&self.samples);
            self.monitoring.store(false, Ordering::SeqCst);
            samples.clear();
        }
        self.boundary.send_replace(JobBoundary::Cancelled);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
