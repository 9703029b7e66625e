/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bin-packing placement of reservations onto processors.
//!
//! [`Partitioner`] owns the process-wide [`PartitionPolicy`] and the Next-Fit
//! cursor, and picks a processor for a candidate `(C, T)` given the current
//! [`BucketTable`].  It never mutates the table; committing the choice is the
//! caller's job.
//!
//! # Policies
//!
//! | Policy | Candidate processors | Choice | Runs analyzer |
//! |---|---|---|---|
//! | First-Fit (`FF`) | `running + u ≤ 1000` | lowest index | yes |
//! | Next-Fit (`NF`) | same, scanned from the one after the last pick | first hit | yes |
//! | Best-Fit (`BF`) | `remaining ≥ u` | smallest remaining | only when strict |
//! | Worst-Fit (`WF`) | `remaining ≥ u` | largest remaining | only when strict |
//! | List-Scheduling (`LST`) | `remaining ≥ u` and analyzer accepts | smallest running | yes |
//!
//! Ties always go to the lowest processor index, so placement is
//! deterministic.

pub mod bucket;

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::analysis;
use crate::reservation::TaskParams;
use bucket::{BucketTable, ProcessorBucket};

// ── PartitionPolicy ───────────────────────────────────────────────────────────

/// Bin-packing heuristic used for automatic placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum PartitionPolicy {
    #[default]
    FirstFit,
    NextFit,
    BestFit,
    WorstFit,
    ListScheduling,
}

impl PartitionPolicy {
    pub const ALL: [PartitionPolicy; 5] = [
        PartitionPolicy::FirstFit,
        PartitionPolicy::NextFit,
        PartitionPolicy::BestFit,
        PartitionPolicy::WorstFit,
        PartitionPolicy::ListScheduling,
    ];

    /// Short name used by the control interface.
    pub fn name(self) -> &'static str {
        match self {
            PartitionPolicy::FirstFit => "FF",
            PartitionPolicy::NextFit => "NF",
            PartitionPolicy::BestFit => "BF",
            PartitionPolicy::WorstFit => "WF",
            PartitionPolicy::ListScheduling => "LST",
        }
    }

    /// Best-Fit and Worst-Fit are capacity-only heuristics unless strict
    /// admission is enabled.
    pub fn runs_analysis(self, strict: bool) -> bool {
        match self {
            PartitionPolicy::BestFit | PartitionPolicy::WorstFit => strict,
            _ => true,
        }
    }
}

impl fmt::Display for PartitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned for a policy name that is not one of `FF NF BF WF LST`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown partition policy '{0}' (valid: FF, NF, BF, WF, LST)")]
pub struct UnknownPolicy(pub String);

impl FromStr for PartitionPolicy {
    type Err = UnknownPolicy;

    /// Accepts the short names and the spelled-out forms, case-insensitively
    /// (`"ff"`, `"first-fit"`, `"first_fit"` …).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalised.as_str() {
            "ff" | "first-fit" => Ok(PartitionPolicy::FirstFit),
            "nf" | "next-fit" => Ok(PartitionPolicy::NextFit),
            "bf" | "best-fit" => Ok(PartitionPolicy::BestFit),
            "wf" | "worst-fit" => Ok(PartitionPolicy::WorstFit),
            "lst" | "list" | "list-scheduling" => Ok(PartitionPolicy::ListScheduling),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl TryFrom<String> for PartitionPolicy {
    type Error = UnknownPolicy;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── Partitioner ───────────────────────────────────────────────────────────────

/// Selected policy plus the Next-Fit cursor.
#[derive(Debug, Clone)]
pub struct Partitioner {
    policy: PartitionPolicy,
    /// Last processor chosen by Next-Fit.
    cursor: Option<usize>,
    /// Hardened mode: every policy re-checks schedulability.
    strict: bool,
}

impl Partitioner {
    pub fn new(policy: PartitionPolicy, strict: bool) -> Self {
        Self {
            policy,
            cursor: None,
            strict,
        }
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Swap the policy and forget the Next-Fit cursor.
    pub fn set_policy(&mut self, policy: PartitionPolicy) {
        self.policy = policy;
        self.cursor = None;
    }

    /// Choose a processor for `candidate`, or `None` if no processor can take
    /// it under the current policy.
    pub fn assign(&mut self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        let choice = match self.policy {
            PartitionPolicy::FirstFit => self.first_fit(table, candidate),
            PartitionPolicy::NextFit => self.next_fit(table, candidate),
            PartitionPolicy::BestFit => self.best_fit(table, candidate),
            PartitionPolicy::WorstFit => self.worst_fit(table, candidate),
            PartitionPolicy::ListScheduling => self.list_scheduling(table, candidate),
        };
        debug!(
            policy = %self.policy,
            utilization = %candidate.utilization(),
            cpu = ?choice,
            "partition decision"
        );
        choice
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────────

    fn first_fit(&self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        table
            .iter()
            .find(|(_, bucket)| self.fits_and_admits(bucket, candidate))
            .map(|(cpu, _)| cpu)
    }

    fn next_fit(&mut self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        let n = table.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor.map_or(0, |last| (last + 1) % n);

        let cpu = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&cpu| {
                table
                    .get(cpu)
                    .is_some_and(|bucket| self.fits_and_admits(bucket, candidate))
            })?;

        self.cursor = Some(cpu);
        Some(cpu)
    }

    fn best_fit(&self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        self.capacity_candidates(table, candidate)
            .min_by_key(|&(cpu, bucket)| (bucket.remaining(), cpu))
            .map(|(cpu, _)| cpu)
    }

    fn worst_fit(&self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        // Reverse the index so that, among equal capacities, the lowest
        // index still wins the max.
        self.capacity_candidates(table, candidate)
            .max_by_key(|&(cpu, bucket)| (bucket.remaining(), std::cmp::Reverse(cpu)))
            .map(|(cpu, _)| cpu)
    }

    fn list_scheduling(&self, table: &BucketTable, candidate: TaskParams) -> Option<usize> {
        let utilization = candidate.utilization();
        table
            .iter()
            .filter(|(_, bucket)| bucket.remaining() >= utilization)
            .filter(|(_, bucket)| admits(bucket, candidate))
            .min_by_key(|&(cpu, bucket)| (bucket.running_utilization(), cpu))
            .map(|(cpu, _)| cpu)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Capacity test plus the schedulability test (First/Next-Fit).
    fn fits_and_admits(&self, bucket: &ProcessorBucket, candidate: TaskParams) -> bool {
        bucket.fits(candidate.utilization()) && admits(bucket, candidate)
    }

    /// Processors with enough remaining capacity for Best/Worst-Fit.  In
    /// strict mode the analyzer filters them as well.
    fn capacity_candidates<'a>(
        &'a self,
        table: &'a BucketTable,
        candidate: TaskParams,
    ) -> impl Iterator<Item = (usize, &'a ProcessorBucket)> + 'a {
        let utilization = candidate.utilization();
        let analyse = self.policy.runs_analysis(self.strict);
        table.iter().filter(move |(_, bucket)| {
            bucket.remaining() >= utilization && (!analyse || admits(bucket, candidate))
        })
    }
}

/// Would `bucket`'s task set plus `candidate` pass the schedulability test?
pub fn admits(bucket: &ProcessorBucket, candidate: TaskParams) -> bool {
    analysis::check(&bucket.with_candidate(candidate)).is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
