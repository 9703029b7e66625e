/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Uniprocessor schedulability analysis for rate-monotonic reservations.
//!
//! [`check`] decides whether a set of `(C, T)` pairs that would share one
//! processor is schedulable.  It is a pure function: it never touches the
//! bucket table or any reservation.
//!
//! # Theory
//! **Liu & Layland (1973)**: under Rate Monotonic scheduling (shorter period →
//! higher priority) a set of `n` independent periodic tasks is schedulable on
//! one CPU if
//!
//! $$U = \sum_{i=1}^{n} \frac{C_i}{T_i} \leq n \left(2^{1/n} - 1\right)$$
//!
//! The bound is only sufficient.  When a prefix of the period-sorted set
//! fails it, **Response Time Analysis** is exact for the remaining tasks:
//!
//! $$R_i = C_i + \sum_{j<i} \left\lceil \frac{R_i}{T_j} \right\rceil C_j$$
//!
//! iterated from `R₀ = Σ_{j≤i} C_j` to a fixed point.
//!
//! Everything is integer arithmetic: utilizations are [`Permille`], times are
//! nanoseconds.  The bound table below is `n(2^{1/n} − 1)` rounded **down**
//! to whole permille so the table never admits more than the real bound.
//!
//! | n | Bound (‰) |
//! |---|---|
//! | 1 | 1000 |
//! | 2 | 828 |
//! | 3 | 779 |
//! | 5 | 743 |
//! | 10 | 717 |
//! | > 10 | ln(2) ≈ 693 |

pub mod math;

use thiserror::Error;

use crate::reservation::{Permille, TaskParams};
use math::{ceil_div, interference};

// ── Constants ─────────────────────────────────────────────────────────────────

/// `⌊1000 · n(2^{1/n} − 1)⌋` for `n = 1..=10`.
pub const UB_TABLE: [Permille; 10] = [
    Permille(1_000),
    Permille(828),
    Permille(779),
    Permille(756),
    Permille(743),
    Permille(734),
    Permille(728),
    Permille(724),
    Permille(720),
    Permille(717),
];

/// Asymptotic bound `ln 2` used for more than ten tasks.
pub const UB_ASYMPTOTIC: Permille = Permille(693);

/// Maximum fixed-point iterations before RTA gives up and rejects.
pub const RTA_ITERATION_LIMIT: usize = 50;

// ── Error type ────────────────────────────────────────────────────────────────

/// Why a candidate task set would overload its processor.
///
/// `index` is the position of the failing task in the set **sorted by
/// ascending period**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Infeasible {
    #[error("task {index} misses its deadline (response time {response_ns}ns > period {period_ns}ns)")]
    DeadlineMiss {
        index: usize,
        response_ns: u64,
        period_ns: u64,
    },

    #[error("response time of task {index} did not converge within {limit} iterations")]
    NoConvergence { index: usize, limit: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Utilization bound for a prefix of `n` tasks.  `n = 0` is treated as a
/// single task.
pub fn utilization_bound(n: usize) -> Permille {
    match n {
        0 => UB_TABLE[0],
        n if n <= UB_TABLE.len() => UB_TABLE[n - 1],
        _ => UB_ASYMPTOTIC,
    }
}

/// Decide whether `tasks` is schedulable on one processor.
///
/// The slice may be in any order; it is sorted by period (stable, so ties
/// keep their given order) before analysis.
pub fn check(tasks: &[TaskParams]) -> Result<(), Infeasible> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by_key(|t| t.period_ns);

    let Some(first_failure) = first_bound_violation(&sorted) else {
        return Ok(());
    };

    for index in first_failure..sorted.len() {
        let response_ns = response_time(&sorted, index)?;
        let period_ns = sorted[index].period_ns;
        if response_ns > period_ns {
            return Err(Infeasible::DeadlineMiss {
                index,
                response_ns,
                period_ns,
            });
        }
    }
    Ok(())
}

/// Index of the first prefix (0-based, so prefix length `index + 1`) whose
/// cumulative utilization exceeds its bound, or `None` if every prefix passes.
///
/// `sorted` must already be ordered by ascending period.
pub fn first_bound_violation(sorted: &[TaskParams]) -> Option<usize> {
    let mut cumulative = Permille::ZERO;
    sorted.iter().enumerate().find_map(|(i, task)| {
        cumulative = cumulative.saturating_add(task.utilization());
        (cumulative > utilization_bound(i + 1)).then_some(i)
    })
}

/// Worst-case response time of `sorted[index]` under interference from every
/// shorter-period task before it.
///
/// # Errors
/// [`Infeasible::NoConvergence`] if no fixed point is reached within
/// [`RTA_ITERATION_LIMIT`] iterations.
pub fn response_time(sorted: &[TaskParams], index: usize) -> Result<u64, Infeasible> {
    let own = sorted[index].budget_ns;
    let higher = &sorted[..index];

    let mut response = sorted[..=index]
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.budget_ns));

    for _ in 0..RTA_ITERATION_LIMIT {
        let next = higher.iter().fold(own, |acc, t| {
            acc.saturating_add(interference(ceil_div(response, t.period_ns), t.budget_ns))
        });
        if next == response {
            return Ok(response);
        }
        response = next;
    }

    Err(Infeasible::NoConvergence {
        index,
        limit: RTA_ITERATION_LIMIT,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
