/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-reservation enforcement timer.
//!
//! Each active reservation owns one tokio task that sleeps for a period,
//! closes the accounting window, and sleeps again:
//!
//! ```text
//!            ┌──────── re-arm ────────┐
//!            ▼                        │
//!  arm ──► Armed ──(period elapses)──► Accounting ──┘
//!            │
//!            └──(disarm: stop + join)──► Disarmed
//! ```
//!
//! The accounting step is synchronous and never awaits, so once
//! [`EnforcementTimer::disarm`] returns no fire for that reservation can
//! still be running.  Replacing or cancelling a reservation always disarms
//! its timer first, so one reservation never has two accounting passes in
//! flight.
//!
//! # Re-arm anchor
//! With [`TimerAnchor::Now`] the next boundary is measured from the moment
//! the accounting step finishes, so boundaries drift later by the callback
//! latency every period.  [`TimerAnchor::Deadline`] measures from the ideal
//! previous boundary instead and does not drift.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::host::ThreadHost;
use crate::reservation::{PeriodReport, Reservation, ThreadId};

/// Where the next period boundary is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerAnchor {
    /// From the moment the previous fire completed.
    #[default]
    Now,
    /// From the previous ideal deadline.
    Deadline,
}

/// Handle to one armed enforcement task.
#[derive(Debug)]
pub struct EnforcementTimer {
    tid: ThreadId,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl EnforcementTimer {
    /// Start enforcing `reservation`; the first boundary is one period from
    /// now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<H: ThreadHost>(
        reservation: Arc<Reservation>,
        host: Arc<H>,
        anchor: TimerAnchor,
    ) -> Self {
        let tid = reservation.tid();
        let period = Duration::from_nanos(reservation.params().period_ns);
        let first = Instant::now() + period;
        let (stop, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(run(reservation, host, anchor, period, first, stop_rx));
        debug!(tid, period_ns = period.as_nanos() as u64, ?anchor, "enforcement timer armed");

        Self {
            tid,
            stop: Some(stop),
            handle,
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Stop the timer and wait until its task has exited.
    pub async fn disarm(mut self) {
        if let Some(stop) = self.stop.take() {
            // The task may already be gone (e.g. runtime shutdown); nothing to stop then.
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                error!(tid = self.tid, "enforcement timer panicked: {e}");
            }
        }
        debug!(tid = self.tid, "enforcement timer disarmed");
    }
}

impl Drop for EnforcementTimer {
    /// A timer dropped without `disarm` is aborted rather than leaked.
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.handle.abort();
        }
    }
}

async fn run<H: ThreadHost>(
    reservation: Arc<Reservation>,
    host: Arc<H>,
    anchor: TimerAnchor,
    period: Duration,
    first: Instant,
    mut stop: oneshot::Receiver<()>,
) {
    let mut deadline = first;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = sleep_until(deadline) => {}
        }

        fire(&reservation, host.as_ref());

        deadline = match anchor {
            TimerAnchor::Now => Instant::now() + period,
            TimerAnchor::Deadline => deadline + period,
        };
    }
}

/// One period boundary: account, notify on overrun, resume a suspended
/// owner.
pub fn fire<H: ThreadHost + ?Sized>(reservation: &Reservation, host: &H) -> PeriodReport {
    let tid = reservation.tid();
    let report = reservation.close_period();

    if report.overrun {
        warn!(
            tid,
            period = report.period_index,
            execution_ns = report.execution_ns,
            budget_ns = report.budget_ns,
            "budget overrun"
        );
        // Nobody waits on this synchronously; a lost notification is only logged.
        if let Err(e) = host.notify_overrun(tid) {
            warn!(tid, "overrun notification not delivered: {e}");
        }
    }

    reservation.open_period(report.period_index + 1);

    debug!(
        tid,
        period = report.period_index,
        execution_ns = report.execution_ns,
        utilization = %report.utilization,
        "period closed"
    );
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────
