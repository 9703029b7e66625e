/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Reservation Manager: the control operations of the framework.
//!
//! [`ReservationManager`] is the explicitly constructed scheduler context.
//! It holds the partition policy, the Processor Bucket Table, the Global
//! Reservation Index and the armed enforcement timers.  Independent instances
//! share nothing.
//!
//! # Locking
//!
//! | Lock | Guards | Kind |
//! |---|---|---|
//! | `timers` | armed timers; serialises set / cancel / teardown | `tokio::sync::Mutex` (held across timer joins) |
//! | `partitioner` | policy + Next-Fit cursor | `std::sync::Mutex` |
//! | `index` | Global Reservation Index | `std::sync::RwLock` |
//! | `buckets` | Processor Bucket Table | `std::sync::RwLock` |
//!
//! Locks are always taken in the order above.  No std guard is ever held
//! across an `.await`.  Enforcement timers take none of these locks: they
//! touch only their own [`Reservation`].
//!
//! # Example
//! ```rust,ignore
//! let host = Arc::new(SimHost::new(4));
//! let manager = ReservationManager::new(host, &FrameworkConfig::default());
//! let cpu = manager
//!     .set_reservation(101, Timespec::from_millis(250), Timespec::from_millis(500), CpuRequest::Auto)
//!     .await?;
//! ```

pub mod error;

pub use error::ReserveError;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis;
use crate::config::FrameworkConfig;
use crate::enforcement::{EnforcementTimer, TimerAnchor};
use crate::host::{Affinity, ThreadHost};
use crate::partition::bucket::{BucketEntry, BucketTable};
use crate::partition::{PartitionPolicy, Partitioner};
use crate::reservation::{
    Accounting, CpuRequest, JobBoundary, Permille, Reservation, TaskParams, ThreadId, Timespec,
    UtilizationSample,
};
use crate::sync::{lock, read, write};

// ── Result types ──────────────────────────────────────────────────────────────

/// One row of the status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRow {
    pub tid: ThreadId,
    pub pid: i32,
    pub priority: i32,
    pub cpu: usize,
    pub name: String,
}

/// Why a thread suspended in [`ReservationManager::end_job`] was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResume {
    /// A new period began; the value is its index.
    NextPeriod(u64),
    /// The reservation was torn down while the thread was waiting.
    Cancelled,
}

// ── ReservationManager ────────────────────────────────────────────────────────

pub struct ReservationManager<H: ThreadHost> {
    host: Arc<H>,
    processors: usize,
    anchor: TimerAnchor,
    timers: tokio::sync::Mutex<HashMap<ThreadId, EnforcementTimer>>,
    partitioner: Mutex<Partitioner>,
    index: RwLock<HashMap<ThreadId, Arc<Reservation>>>,
    buckets: RwLock<BucketTable>,
    monitoring: AtomicBool,
}

impl<H: ThreadHost> ReservationManager<H> {
    /// Build a manager from an already validated configuration.
    pub fn new(host: Arc<H>, config: &FrameworkConfig) -> Self {
        info!(
            processors = config.processors,
            policy = %config.policy,
            strict = config.strict_admission,
            "reservation manager initialised"
        );
        Self {
            host,
            processors: config.processors,
            anchor: config.timer_anchor,
            timers: tokio::sync::Mutex::new(HashMap::new()),
            partitioner: Mutex::new(Partitioner::new(config.policy, config.strict_admission)),
            index: RwLock::new(HashMap::new()),
            buckets: RwLock::new(BucketTable::new(config.processors)),
            monitoring: AtomicBool::new(config.monitoring),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn processors(&self) -> usize {
        self.processors
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Control operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create or replace the reservation of `tid` and return the processor
    /// it was bound to.
    ///
    /// Nothing changes unless the call succeeds.  On success the thread is
    /// pinned to the chosen processor, the bucket is charged, and a fresh
    /// period-`T` enforcement timer is running.
    ///
    /// A previous timer for the same thread is fully stopped before admission
    /// runs.  If the replacement is rejected the old reservation keeps its
    /// parameters and gets a new timer whose first boundary is one period
    /// from the rejection.
    ///
    /// # Errors
    /// `EINVAL` for bad durations or processor ids, `ESRCH` for an unknown
    /// thread, `EBUSY` when admission control rejects the request, `ENOMEM`
    /// if bookkeeping cannot grow.
    pub async fn set_reservation(
        &self,
        tid: ThreadId,
        budget: Timespec,
        period: Timespec,
        cpu: CpuRequest,
    ) -> Result<usize, ReserveError> {
        let params = validate_params(budget, period)?;
        if let CpuRequest::Pinned(requested) = cpu {
            if requested >= self.processors {
                return Err(ReserveError::CpuOutOfRange {
                    cpu: requested,
                    processors: self.processors,
                });
            }
        }
        if self.host.lookup(tid).is_none() {
            return Err(ReserveError::NoSuchThread(tid));
        }

        let mut timers = self.timers.lock().await;
        timers
            .try_reserve(1)
            .map_err(|_| ReserveError::OutOfMemory { tid })?;

        if let Some(previous) = timers.remove(&tid) {
            previous.disarm().await;
        }

        let chosen = match self.admit(tid, params, cpu) {
            Ok(chosen) => chosen,
            Err(e) => {
                warn!(tid, request = %cpu, utilization = %params.utilization(), "reservation rejected: {e}");
                let existing = read(&self.index).get(&tid).cloned();
                if let Some(existing) = existing {
                    debug!(tid, "re-arming the reservation that was not replaced");
                    timers.insert(
                        tid,
                        EnforcementTimer::arm(existing, Arc::clone(&self.host), self.anchor),
                    );
                }
                return Err(e);
            }
        };

        let reservation = self.install(tid, params, chosen);
        timers.insert(
            tid,
            EnforcementTimer::arm(reservation, Arc::clone(&self.host), self.anchor),
        );

        info!(
            tid,
            cpu = chosen,
            budget = %budget,
            period = %period,
            utilization = %params.utilization(),
            "reservation set"
        );
        Ok(chosen)
    }

    /// Tear down the reservation of `tid`.
    ///
    /// Returns only after the enforcement timer has stopped.  A thread
    /// suspended in `end_job` is resumed with [`JobResume::Cancelled`].
    ///
    /// # Errors
    /// `ESRCH` for an unknown thread, `EINVAL` if it holds no reservation.
    pub async fn cancel_reservation(&self, tid: ThreadId) -> Result<(), ReserveError> {
        if self.host.lookup(tid).is_none() {
            return Err(ReserveError::NoSuchThread(tid));
        }
        if self.teardown(tid).await {
            info!(tid, "reservation cancelled");
            Ok(())
        } else {
            Err(ReserveError::NoReservation(tid))
        }
    }

    /// Give up the rest of the current period's budget and sleep until the
    /// next period boundary.
    ///
    /// The wait has no timeout and nothing but the reservation's own
    /// boundary or its teardown ends it.  Unused budget is discarded.
    ///
    /// # Errors
    /// [`ReserveError::NoActiveJob`] (`ENOENT`) if `tid` holds no
    /// reservation; the caller is not suspended.
    pub async fn end_job(&self, tid: ThreadId) -> Result<JobResume, ReserveError> {
        let mut boundary = {
            let index = read(&self.index);
            let reservation = index
                .get(&tid)
                .filter(|r| r.is_active())
                .ok_or(ReserveError::NoActiveJob(tid))?;
            reservation.subscribe()
        };

        debug!(tid, "job ended early, suspending until next period");
        // A closed channel means the record itself is gone.
        if boundary.changed().await.is_err() {
            return Ok(JobResume::Cancelled);
        }
        let resume = match *boundary.borrow_and_update() {
            JobBoundary::Period(index) => JobResume::NextPeriod(index),
            JobBoundary::Cancelled => JobResume::Cancelled,
        };
        debug!(tid, ?resume, "resumed");
        Ok(resume)
    }

    pub fn partition_policy(&self) -> PartitionPolicy {
        lock(&self.partitioner).policy()
    }

    /// Switch the partition policy.  Only allowed while no reservation is
    /// active; the Next-Fit cursor is reset.
    ///
    /// # Errors
    /// `EBUSY` while any reservation exists.
    pub fn set_partition_policy(&self, policy: PartitionPolicy) -> Result<(), ReserveError> {
        let mut partitioner = lock(&self.partitioner);
        let index = read(&self.index);
        let buckets = read(&self.buckets);
        // A concurrent admission commits its bucket before its index entry.
        if !index.is_empty() || !buckets.is_idle() {
            let assigned: usize = buckets.iter().map(|(_, b)| b.assigned().len()).sum();
            let active = index.len().max(assigned);
            return Err(ReserveError::ReservationsActive { active });
        }
        partitioner.set_policy(policy);
        info!(policy = %policy, strict = partitioner.is_strict(), "partition policy changed");
        Ok(())
    }

    /// [`set_partition_policy`](Self::set_partition_policy) by name.
    ///
    /// # Errors
    /// `EINVAL` for an unknown name, `EBUSY` while reservations exist.
    pub fn set_partition_policy_named(&self, name: &str) -> Result<(), ReserveError> {
        self.set_partition_policy(name.parse()?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounting and monitoring
    // ─────────────────────────────────────────────────────────────────────────

    /// Charge `executed` CPU time to the current period of `tid`.
    ///
    /// Returns `false` if the thread holds no reservation.
    pub fn account_execution(&self, tid: ThreadId, executed: Duration) -> bool {
        let index = read(&self.index);
        match index.get(&tid) {
            Some(reservation) => {
                let ns = u64::try_from(executed.as_nanos()).unwrap_or(u64::MAX);
                reservation.charge(ns);
                true
            }
            None => false,
        }
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Flip the global monitoring switch and apply it to every active
    /// reservation.  Disabling discards all histories.
    pub fn set_monitoring(&self, enabled: bool) {
        let index = write(&self.index);
        self.monitoring.store(enabled, Ordering::SeqCst);
        for reservation in index.values() {
            reservation.set_monitoring(enabled);
        }
        info!(enabled, reservations = index.len(), "monitoring switched");
    }

    /// Utilization samples of `tid` collected since monitoring was enabled.
    ///
    /// # Errors
    /// `EINVAL` if `tid` holds no reservation.
    pub fn utilization_history(
        &self,
        tid: ThreadId,
    ) -> Result<Vec<UtilizationSample>, ReserveError> {
        let reservation = read(&self.index)
            .get(&tid)
            .cloned()
            .ok_or(ReserveError::NoReservation(tid))?;
        Ok(reservation.samples())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    /// Active reservations, sorted by thread id.  Threads the host no longer
    /// knows are left out.
    pub fn list_reservations(&self) -> Vec<ReservationRow> {
        let mut rows: Vec<ReservationRow> = read(&self.index)
            .values()
            .filter_map(|r| {
                let info = self.host.lookup(r.tid())?;
                Some(ReservationRow {
                    tid: info.tid,
                    pid: info.pid,
                    priority: info.priority,
                    cpu: r.accounting().cpu,
                    name: info.name,
                })
            })
            .collect();
        rows.sort_by_key(|row| row.tid);
        rows
    }

    pub fn processor_utilization(&self) -> Vec<Permille> {
        read(&self.buckets).utilization_snapshot()
    }

    /// Bucket table snapshot, mainly for invariant checks.
    pub fn buckets(&self) -> BucketTable {
        read(&self.buckets).clone()
    }

    pub fn accounting(&self, tid: ThreadId) -> Option<Accounting> {
        read(&self.index).get(&tid).map(|r| r.accounting())
    }

    pub fn active_reservations(&self) -> usize {
        read(&self.index).len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Clean up after a thread that exited.  Unlike `cancel_reservation` the
    /// thread need not exist any more.  Returns `true` if a reservation was
    /// torn down.
    pub async fn release_thread(&self, tid: ThreadId) -> bool {
        let released = self.teardown(tid).await;
        if released {
            info!(tid, "reservation released on thread exit");
        }
        released
    }

    /// Disarm every timer and drop every reservation.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.disarm().await;
        }

        let reservations: Vec<Arc<Reservation>> = {
            let mut index = write(&self.index);
            let mut buckets = write(&self.buckets);
            buckets.clear();
            index.drain().map(|(_, r)| r).collect()
        };
        for reservation in reservations {
            reservation.release();
            self.restore_affinity(reservation.tid());
        }
        info!(count, "reservation manager shut down");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Admission control and bucket commit, all under the partition, index
    /// and bucket locks.  On any error the table is left exactly as it was.
    fn admit(
        &self,
        tid: ThreadId,
        params: TaskParams,
        request: CpuRequest,
    ) -> Result<usize, ReserveError> {
        let mut partitioner = lock(&self.partitioner);
        let mut index = write(&self.index);
        let mut buckets = write(&self.buckets);

        // The entry being replaced must not count against its successor.
        let previous = buckets.remove(tid);

        let outcome = self
            .place(&mut partitioner, &buckets, tid, params, request)
            .and_then(|cpu| {
                buckets
                    .reserve_slot(cpu)
                    .map_err(|_| ReserveError::OutOfMemory { tid })?;
                if !index.contains_key(&tid) {
                    index
                        .try_reserve(1)
                        .map_err(|_| ReserveError::OutOfMemory { tid })?;
                }
                self.host
                    .set_affinity(tid, Affinity::Single(cpu))
                    .map_err(|source| ReserveError::Affinity { tid, source })?;
                Ok(cpu)
            });

        match outcome {
            Ok(cpu) => {
                buckets.insert(cpu, BucketEntry::new(tid, params));
                Ok(cpu)
            }
            Err(e) => {
                if let Some((cpu, entry)) = previous {
                    buckets.insert(cpu, entry);
                }
                Err(e)
            }
        }
    }

    fn place(
        &self,
        partitioner: &mut Partitioner,
        buckets: &BucketTable,
        tid: ThreadId,
        params: TaskParams,
        request: CpuRequest,
    ) -> Result<usize, ReserveError> {
        match request {
            CpuRequest::Pinned(cpu) => {
                let bucket = buckets.get(cpu).ok_or(ReserveError::CpuOutOfRange {
                    cpu,
                    processors: buckets.len(),
                })?;
                analysis::check(&bucket.with_candidate(params))
                    .map_err(|reason| ReserveError::NotSchedulable { tid, cpu, reason })?;
                Ok(cpu)
            }
            CpuRequest::Auto => {
                partitioner
                    .assign(buckets, params)
                    .ok_or(ReserveError::NoProcessorAvailable {
                        tid,
                        policy: partitioner.policy(),
                    })
            }
        }
    }

    /// Create the record, or re-bind the existing one, and publish it in the
    /// index.
    fn install(&self, tid: ThreadId, params: TaskParams, cpu: usize) -> Arc<Reservation> {
        let mut index = write(&self.index);
        let monitoring = self.monitoring.load(Ordering::SeqCst);
        match index.get(&tid) {
            Some(existing) => {
                existing.rebind(params, cpu, monitoring);
                Arc::clone(existing)
            }
            None => {
                let reservation = Arc::new(Reservation::new(tid, params, cpu, monitoring));
                index.insert(tid, Arc::clone(&reservation));
                reservation
            }
        }
    }

    /// Shared by cancel and thread-exit cleanup.  Returns `false` if
    /// `tid` had no reservation.
    async fn teardown(&self, tid: ThreadId) -> bool {
        let mut timers = self.timers.lock().await;
        let Some(timer) = timers.remove(&tid) else {
            return false;
        };
        timer.disarm().await;

        let reservation = {
            let mut index = write(&self.index);
            let mut buckets = write(&self.buckets);
            buckets.remove(tid);
            index.remove(&tid)
        };
        if let Some(reservation) = reservation {
            reservation.release();
        }
        self.restore_affinity(tid);
        true
    }

    fn restore_affinity(&self, tid: ThreadId) {
        if let Err(e) = self.host.set_affinity(tid, Affinity::All) {
            debug!(tid, "affinity not restored: {e}");
        }
    }
}

/// Turn the caller's `(C, T)` into nanoseconds, rejecting negative,
/// malformed and zero-period values.
fn validate_params(budget: Timespec, period: Timespec) -> Result<TaskParams, ReserveError> {
    let budget_ns = budget.to_nanos().ok_or(ReserveError::InvalidDuration {
        field: "budget",
        value: budget,
    })?;
    let period_ns = period.to_nanos().ok_or(ReserveError::InvalidDuration {
        field: "period",
        value: period,
    })?;
    if period_ns == 0 {
        return Err(ReserveError::ZeroPeriod);
    }
    Ok(TaskParams::new(budget_ns, period_ns))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimHost;
    use crate::manager::error::{EBUSY, EINVAL, ENOENT, ESRCH};
    use crate::reservation::NSEC_PER_MSEC;

    // ── Test helpers ──────────────────────────────────────────────────────────

    fn manager_with(config: FrameworkConfig) -> ReservationManager<SimHost> {
        let host = Arc::new(SimHost::new(config.processors));
        for tid in 1..=16 {
            host.spawn(tid, &format!("worker-{tid}"));
        }
        ReservationManager::new(host, &config)
    }

    fn manager() -> ReservationManager<SimHost> {
        manager_with(FrameworkConfig::default())
    }

    fn ms(v: i64) -> Timespec {
        Timespec::from_millis(v)
    }

    async fn set(
        m: &ReservationManager<SimHost>,
        tid: ThreadId,
        c: i64,
        t: i64,
        cpu: CpuRequest,
    ) -> Result<usize, ReserveError> {
        m.set_reservation(tid, ms(c), ms(t), cpu).await
    }

    fn assert_buckets_consistent(m: &ReservationManager<SimHost>) {
        let table = m.buckets();
        for (cpu, bucket) in table.iter() {
            let sum = bucket
                .assigned()
                .iter()
                .fold(Permille::ZERO, |acc, e| acc.saturating_add(e.params.utilization()));
            assert_eq!(bucket.running_utilization(), sum, "cpu {cpu}");
        }
    }

    // ── set_reservation ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn single_reservation_is_admitted_and_pinned() {
        let m = manager();
        let cpu = set(&m, 1, 250, 500, CpuRequest::Auto).await.unwrap();
        assert_eq!(cpu, 0);
        assert_eq!(m.processor_utilization()[0], Permille(500));
        assert_eq!(m.host().affinity(1), Some(Affinity::Single(0)));
        assert_eq!(m.active_reservations(), 1);
        assert_buckets_consistent(&m);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overloading_pinned_reservation_is_busy() {
        let m = manager();
        set(&m, 1, 300, 500, CpuRequest::Pinned(0)).await.unwrap();
        let err = set(&m, 2, 300, 500, CpuRequest::Pinned(0)).await.unwrap_err();
        assert!(matches!(err, ReserveError::NotSchedulable { cpu: 0, .. }));
        assert_eq!(err.errno(), EBUSY);
        // the rejected thread was not touched
        assert_eq!(m.host().affinity(2), Some(Affinity::All));
        assert_eq!(m.processor_utilization()[0], Permille(600));
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_fit_reports_no_processor_when_full() {
        let m = manager();
        for (tid, cpu) in (1..=4).zip(0..4) {
            set(&m, tid, 700, 1_000, CpuRequest::Pinned(cpu)).await.unwrap();
        }
        let err = set(&m, 5, 400, 1_000, CpuRequest::Auto).await.unwrap_err();
        assert!(matches!(err, ReserveError::NoProcessorAvailable { tid: 5, .. }));
        assert_eq!(err.errno(), EBUSY);
        assert_eq!(m.processor_utilization(), vec![Permille(700); 4]);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_arguments_are_rejected_before_any_change() {
        let m = manager();
        let neg = m
            .set_reservation(1, Timespec::new(-1, 0), ms(500), CpuRequest::Auto)
            .await
            .unwrap_err();
        assert_eq!(neg.errno(), EINVAL);

        let neg_period = m
            .set_reservation(1, ms(10), Timespec::new(0, -1), CpuRequest::Auto)
            .await
            .unwrap_err();
        assert!(matches!(neg_period, ReserveError::InvalidDuration { field: "period", .. }));

        let zero = set(&m, 1, 0, 0, CpuRequest::Auto).await.unwrap_err();
        assert!(matches!(zero, ReserveError::ZeroPeriod));

        let cpu = set(&m, 1, 10, 100, CpuRequest::Pinned(4)).await.unwrap_err();
        assert!(matches!(cpu, ReserveError::CpuOutOfRange { cpu: 4, processors: 4 }));

        assert_eq!(m.active_reservations(), 0);
        assert!(m.buckets().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_thread_is_esrch() {
        let m = manager();
        let err = set(&m, 999, 10, 100, CpuRequest::Auto).await.unwrap_err();
        assert_eq!(err.errno(), ESRCH);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_reservation_moves_its_capacity() {
        let m = manager();
        set(&m, 1, 600, 1_000, CpuRequest::Pinned(0)).await.unwrap();
        // 600‰ → 900‰ on the same processor only fits if the old entry is excluded
        set(&m, 1, 900, 1_000, CpuRequest::Pinned(0)).await.unwrap();
        assert_eq!(m.processor_utilization()[0], Permille(900));
        assert_eq!(m.active_reservations(), 1);

        set(&m, 1, 100, 1_000, CpuRequest::Pinned(2)).await.unwrap();
        assert_eq!(m.processor_utilization()[0], Permille::ZERO);
        assert_eq!(m.processor_utilization()[2], Permille(100));
        assert_eq!(m.host().affinity(1), Some(Affinity::Single(2)));
        assert_buckets_consistent(&m);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_replacement_keeps_old_reservation_running() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Pinned(1)).await.unwrap();
        let err = set(&m, 1, 300, 200, CpuRequest::Pinned(1)).await.unwrap_err();
        assert!(err.is_admission_rejection());

        assert_eq!(m.processor_utilization()[1], Permille(500));
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(m.accounting(1).unwrap().period_index, 2);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_keeps_a_single_timer() {
        let m = manager();
        set(&m, 1, 50, 100, CpuRequest::Pinned(0)).await.unwrap();
        set(&m, 1, 50, 100, CpuRequest::Pinned(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        // one timer → three boundaries, not six
        assert_eq!(m.accounting(1).unwrap().period_index, 3);
        m.shutdown().await;
    }

    // ── cancel_reservation ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cancel_restores_utilization_exactly() {
        let m = manager();
        set(&m, 1, 1, 3, CpuRequest::Pinned(0)).await.unwrap();
        let before = m.processor_utilization();

        set(&m, 2, 2, 7, CpuRequest::Pinned(0)).await.unwrap();
        m.cancel_reservation(2).await.unwrap();

        assert_eq!(m.processor_utilization(), before);
        assert_eq!(m.host().affinity(2), Some(Affinity::All));
        assert_buckets_consistent(&m);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_cancel_reports_no_reservation() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Auto).await.unwrap();
        m.cancel_reservation(1).await.unwrap();
        let after_first = m.buckets().utilization_snapshot();

        let err = m.cancel_reservation(1).await.unwrap_err();
        assert!(matches!(err, ReserveError::NoReservation(1)));
        assert_eq!(err.errno(), EINVAL);
        assert_eq!(m.buckets().utilization_snapshot(), after_first);
        assert_eq!(m.active_reservations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unknown_thread_is_esrch() {
        let m = manager();
        assert_eq!(m.cancel_reservation(404).await.unwrap_err().errno(), ESRCH);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_reservation_stops_enforcing() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Auto).await.unwrap();
        m.cancel_reservation(1).await.unwrap();

        assert!(!m.account_execution(1, Duration::from_millis(500)));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(m.host().overruns(1), 0);
        assert!(m.accounting(1).is_none());
    }

    // ── Enforcement ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn overrun_is_detected_and_sampled() {
        let m = manager();
        m.set_monitoring(true);
        set(&m, 1, 100, 200, CpuRequest::Auto).await.unwrap();

        assert!(m.account_execution(1, Duration::from_millis(150)));
        tokio::time::sleep(Duration::from_millis(201)).await;

        assert_eq!(m.host().overruns(1), 1);
        assert_eq!(
            m.utilization_history(1).unwrap(),
            vec![UtilizationSample {
                period_index: 0,
                utilization: Permille(750)
            }]
        );
        assert_eq!(m.accounting(1).unwrap().accumulated_ns, 0);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn within_budget_is_not_an_overrun() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Auto).await.unwrap();
        m.account_execution(1, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(201)).await;
        assert_eq!(m.host().overruns(1), 0);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_for_exited_thread_is_only_logged() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Auto).await.unwrap();
        m.account_execution(1, Duration::from_millis(150));
        m.host().exit_thread(1);
        tokio::time::sleep(Duration::from_millis(201)).await;
        assert_eq!(m.accounting(1).unwrap().period_index, 1);
        assert!(m.release_thread(1).await);
        assert!(!m.release_thread(1).await);
    }

    // ── end_job ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn end_job_without_reservation_is_distinguished() {
        let m = manager();
        let err = m.end_job(3).await.unwrap_err();
        assert!(matches!(err, ReserveError::NoActiveJob(3)));
        assert_eq!(err.errno(), ENOENT);
    }

    #[tokio::test(start_paused = true)]
    async fn end_job_sleeps_until_next_boundary() {
        let m = Arc::new(manager());
        set(&m, 1, 50, 100, CpuRequest::Auto).await.unwrap();
        m.account_execution(1, Duration::from_millis(10));

        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.end_job(1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(waiter.await.unwrap().unwrap(), JobResume::NextPeriod(1));
        // budget left over in period 0 is not carried forward
        assert_eq!(m.accounting(1).unwrap().accumulated_ns, 0);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resumes_suspended_thread() {
        let m = Arc::new(manager());
        set(&m, 1, 50, 10_000, CpuRequest::Auto).await.unwrap();

        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.end_job(1).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!waiter.is_finished());
        m.cancel_reservation(1).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), JobResume::Cancelled);
    }

    // ── Partition policy ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn policy_change_refused_while_reserved() {
        let m = manager();
        set(&m, 1, 10, 100, CpuRequest::Auto).await.unwrap();
        let err = m.set_partition_policy(PartitionPolicy::WorstFit).unwrap_err();
        assert!(matches!(err, ReserveError::ReservationsActive { active: 1 }));
        assert_eq!(err.errno(), EBUSY);
        assert_eq!(m.partition_policy(), PartitionPolicy::FirstFit);

        m.cancel_reservation(1).await.unwrap();
        m.set_partition_policy(PartitionPolicy::WorstFit).unwrap();
        assert_eq!(m.partition_policy(), PartitionPolicy::WorstFit);
    }

    #[tokio::test(start_paused = true)]
    async fn policy_by_name() {
        let m = manager();
        m.set_partition_policy_named("nf").unwrap();
        assert_eq!(m.partition_policy(), PartitionPolicy::NextFit);
        let err = m.set_partition_policy_named("edf").unwrap_err();
        assert_eq!(err.errno(), EINVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn worst_fit_spreads_reservations() {
        let m = manager();
        m.set_partition_policy(PartitionPolicy::WorstFit).unwrap();
        let mut cpus = Vec::new();
        for tid in 1..=4 {
            cpus.push(set(&m, tid, 100, 1_000, CpuRequest::Auto).await.unwrap());
        }
        assert_eq!(cpus, vec![0, 1, 2, 3]);
        assert_buckets_consistent(&m);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_fit_packs_reservations() {
        let m = manager();
        let mut cpus = Vec::new();
        for tid in 1..=3 {
            cpus.push(set(&m, tid, 100, 1_000, CpuRequest::Auto).await.unwrap());
        }
        assert_eq!(cpus, vec![0, 0, 0]);
        m.shutdown().await;
    }

    // ── Monitoring ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn monitoring_flag_is_copied_at_creation() {
        let m = manager_with(FrameworkConfig {
            monitoring: true,
            ..FrameworkConfig::default()
        });
        set(&m, 1, 10, 100, CpuRequest::Auto).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(m.utilization_history(1).unwrap().len(), 2);

        m.set_monitoring(false);
        assert!(m.utilization_history(1).unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(m.utilization_history(1).unwrap().is_empty());

        m.set_monitoring(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let history = m.utilization_history(1).unwrap();
        assert_eq!(history.len(), 1);
        // the period counter kept running while monitoring was off
        assert_eq!(history[0].period_index, 3);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn history_of_unreserved_thread_is_einval() {
        let m = manager();
        assert_eq!(m.utilization_history(1).unwrap_err().errno(), EINVAL);
    }

    // ── Status ────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn listing_is_sorted_and_complete() {
        let m = manager();
        set(&m, 3, 10, 100, CpuRequest::Pinned(1)).await.unwrap();
        set(&m, 2, 10, 100, CpuRequest::Pinned(0)).await.unwrap();

        let rows = m.list_reservations();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tid, 2);
        assert_eq!(rows[0].cpu, 0);
        assert_eq!(rows[1].name, "worker-3");
        assert_eq!(rows[1].cpu, 1);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_everything() {
        let m = manager();
        set(&m, 1, 10, 100, CpuRequest::Auto).await.unwrap();
        set(&m, 2, 10, 100, CpuRequest::Auto).await.unwrap();
        m.shutdown().await;

        assert_eq!(m.active_reservations(), 0);
        assert!(m.buckets().is_idle());
        assert_eq!(m.host().affinity(1), Some(Affinity::All));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_greater_than_period_is_unschedulable() {
        let m = manager();
        let err = set(&m, 1, 600, 500, CpuRequest::Pinned(0)).await.unwrap_err();
        assert!(err.is_admission_rejection());
        let err = set(&m, 1, 600, 500, CpuRequest::Auto).await.unwrap_err();
        assert!(err.is_admission_rejection());
    }

    #[tokio::test(start_paused = true)]
    async fn rounded_up_capacity_separates_auto_from_pinned() {
        // 1ms/3ms is charged 334‰, so three of them book 1002‰.  Automatic
        // placement applies the capacity check; pinned placement only runs
        // the schedulability test, which accepts R = 3ms ≤ T = 3ms.
        let m = manager_with(FrameworkConfig {
            processors: 1,
            ..FrameworkConfig::default()
        });
        set(&m, 1, 1, 3, CpuRequest::Pinned(0)).await.unwrap();
        set(&m, 2, 1, 3, CpuRequest::Pinned(0)).await.unwrap();

        let err = set(&m, 3, 1, 3, CpuRequest::Auto).await.unwrap_err();
        assert!(matches!(err, ReserveError::NoProcessorAvailable { tid: 3, .. }));

        assert_eq!(set(&m, 3, 1, 3, CpuRequest::Pinned(0)).await.unwrap(), 0);
        assert_eq!(m.processor_utilization(), vec![Permille(1_002)]);
        assert_buckets_consistent(&m);
        m.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_replacement_is_re_armed() {
        let m = manager();
        set(&m, 1, 100, 200, CpuRequest::Pinned(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // rejected at t=150; the old (100, 200) contract keeps running
        let err = set(&m, 1, 300, 200, CpuRequest::Pinned(0)).await.unwrap_err();
        assert!(err.is_admission_rejection());
        assert_eq!(m.accounting(1).unwrap().budget_ns, 100 * NSEC_PER_MSEC);
        assert_eq!(m.host().affinity(1), Some(Affinity::Single(0)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(m.accounting(1).unwrap().period_index, 0);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(m.accounting(1).unwrap().period_index, 1);
        m.shutdown().await;
    }

    // ── Concurrent control operations ─────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pinned_admissions_stay_schedulable() {
        let m = Arc::new(manager());

        // 200ms every 1s: exactly five fit on one processor (R = 1000ms).
        let mut tasks = tokio::task::JoinSet::new();
        for tid in 1..=12 {
            let m = Arc::clone(&m);
            tasks.spawn(async move { set(&m, tid, 200, 1_000, CpuRequest::Pinned(0)).await });
        }
        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(cpu) => {
                    assert_eq!(cpu, 0);
                    admitted += 1;
                }
                Err(e) => assert!(e.is_admission_rejection(), "{e}"),
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(m.active_reservations(), 5);
        assert_buckets_consistent(&m);

        let table = m.buckets();
        let bucket = table.get(0).unwrap();
        assert_eq!(bucket.assigned().len(), 5);
        let task_set: Vec<TaskParams> = bucket.assigned().iter().map(|e| e.params).collect();
        assert_eq!(analysis::check(&task_set), Ok(()));
        m.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn policy_change_never_overtakes_an_admission() {
        use std::sync::atomic::AtomicUsize;

        let m = Arc::new(manager());
        let admitted = Arc::new(AtomicBool::new(false));
        let changed = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for tid in 1..=8 {
            let m = Arc::clone(&m);
            let admitted = Arc::clone(&admitted);
            tasks.spawn(async move {
                set(&m, tid, 10, 1_000, CpuRequest::Auto).await.unwrap();
                admitted.store(true, Ordering::SeqCst);
                // nothing is ever cancelled, so the table can no longer be idle
                assert!(m.set_partition_policy(PartitionPolicy::BestFit).is_err());
            });
        }
        for round in 0..32 {
            let m = Arc::clone(&m);
            let admitted = Arc::clone(&admitted);
            let changed = Arc::clone(&changed);
            tasks.spawn(async move {
                let policy = PartitionPolicy::ALL[round % PartitionPolicy::ALL.len()];
                let seen_admission = admitted.load(Ordering::SeqCst);
                match m.set_partition_policy(policy) {
                    Ok(()) => {
                        assert!(!seen_admission, "policy changed after an admission");
                        changed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert_eq!(e.errno(), EBUSY),
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(m.active_reservations(), 8);
        assert_buckets_consistent(&m);
        assert!(m.set_partition_policy(PartitionPolicy::FirstFit).is_err());
        m.shutdown().await;
    }

    #[test]
    fn validate_params_converts_to_nanoseconds() {
        let p = validate_params(ms(250), ms(500)).unwrap();
        assert_eq!(p.budget_ns, 250 * NSEC_PER_MSEC);
        assert_eq!(p.period_ns, 500 * NSEC_PER_MSEC);
    }
}
