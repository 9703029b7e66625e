/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Processor Bucket Table: per-processor running utilization and the
//! reservations placed there.
//!
//! Each [`BucketEntry`] stores the utilization it was admitted with, and
//! removal subtracts exactly that stored value.  `running_utilization`
//! therefore always equals the sum over `assigned`, and an admit/cancel pair
//! restores it bit-for-bit.

use std::collections::TryReserveError;

use crate::reservation::{Permille, TaskParams, ThreadId};

// ── BucketEntry ───────────────────────────────────────────────────────────────

/// One reservation as seen by its processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketEntry {
    pub tid: ThreadId,
    pub params: TaskParams,
    pub utilization: Permille,
}

impl BucketEntry {
    pub fn new(tid: ThreadId, params: TaskParams) -> Self {
        Self {
            tid,
            params,
            utilization: params.utilization(),
        }
    }
}

// ── ProcessorBucket ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProcessorBucket {
    running: Permille,
    assigned: Vec<BucketEntry>,
}

impl ProcessorBucket {
    pub fn running_utilization(&self) -> Permille {
        self.running
    }

    /// Capacity left before the processor is fully booked.  Zero when
    /// already at or above 1000‰.
    pub fn remaining(&self) -> Permille {
        Permille::FULL.saturating_sub(self.running)
    }

    /// `true` if adding `utilization` keeps the bucket at or below 1000‰.
    pub fn fits(&self, utilization: Permille) -> bool {
        self.running.saturating_add(utilization) <= Permille::FULL
    }

    pub fn assigned(&self) -> &[BucketEntry] {
        &self.assigned
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// The task set this processor would run if `candidate` joined it.
    pub fn with_candidate(&self, candidate: TaskParams) -> Vec<TaskParams> {
        self.assigned
            .iter()
            .map(|e| e.params)
            .chain(std::iter::once(candidate))
            .collect()
    }

    fn insert(&mut self, entry: BucketEntry) {
        self.running = self.running.saturating_add(entry.utilization);
        self.assigned.push(entry);
    }

    fn remove(&mut self, tid: ThreadId) -> Option<BucketEntry> {
        let pos = self.assigned.iter().position(|e| e.tid == tid)?;
        let entry = self.assigned.remove(pos);
        self.running = self.running.saturating_sub(entry.utilization);
        Some(entry)
    }
}

// ── BucketTable ───────────────────────────────────────────────────────────────

/// Fixed-size table with one [`ProcessorBucket`] per usable processor.
#[derive(Debug, Clone)]
pub struct BucketTable {
    buckets: Vec<ProcessorBucket>,
}

impl BucketTable {
    pub fn new(processors: usize) -> Self {
        Self {
            buckets: vec![ProcessorBucket::default(); processors],
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// `true` when no processor has any reservation assigned.
    pub fn is_idle(&self) -> bool {
        self.buckets.iter().all(ProcessorBucket::is_empty)
    }

    pub fn get(&self, cpu: usize) -> Option<&ProcessorBucket> {
        self.buckets.get(cpu)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ProcessorBucket)> {
        self.buckets.iter().enumerate()
    }

    /// Processor currently holding `tid`, if any.
    pub fn locate(&self, tid: ThreadId) -> Option<usize> {
        self.buckets
            .iter()
            .position(|b| b.assigned.iter().any(|e| e.tid == tid))
    }

    /// Make room for one more entry on `cpu` so the following
    /// [`insert`](Self::insert) cannot fail to allocate.
    ///
    /// Out-of-range `cpu` values are ignored here; `insert` is the one that
    /// refuses them.
    pub fn reserve_slot(&mut self, cpu: usize) -> Result<(), TryReserveError> {
        match self.buckets.get_mut(cpu) {
            Some(bucket) => bucket.assigned.try_reserve(1),
            None => Ok(()),
        }
    }

    /// Place `entry` on `cpu`.  Returns `false` (and changes nothing) if
    /// `cpu` is out of range.
    pub fn insert(&mut self, cpu: usize, entry: BucketEntry) -> bool {
        match self.buckets.get_mut(cpu) {
            Some(bucket) => {
                bucket.insert(entry);
                true
            }
            None => false,
        }
    }

    /// Remove `tid` from whichever bucket holds it.
    pub fn remove(&mut self, tid: ThreadId) -> Option<(usize, BucketEntry)> {
        self.buckets
            .iter_mut()
            .enumerate()
            .find_map(|(cpu, b)| b.remove(tid).map(|entry| (cpu, entry)))
    }

    /// Running utilization of every processor, in index order.
    pub fn utilization_snapshot(&self) -> Vec<Permille> {
        self.buckets.iter().map(|b| b.running).collect()
    }

    /// Drop every assignment.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.assigned.clear();
            bucket.running = Permille::ZERO;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
