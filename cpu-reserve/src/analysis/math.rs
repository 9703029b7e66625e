/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pure integer helpers for the schedulability analysis.
//!
//! These are free functions rather than methods so they can be used and tested
//! independently of the analyzer.  Nothing here touches floating point.

/// Ceiling division.  Returns `0` when `divisor` is `0`.
///
/// Widened to `u128` so `ceil(R / T)` cannot overflow for any pair of
/// nanosecond durations.
pub fn ceil_div(dividend: u64, divisor: u64) -> u64 {
    if divisor == 0 {
        return 0;
    }
    let q = (dividend as u128).div_ceil(divisor as u128);
    u64::try_from(q).unwrap_or(u64::MAX)
}

/// `numerator / denominator` scaled ×1000, rounded up.  Saturates at
/// `u64::MAX`; returns `0` for a zero denominator.
pub fn permille(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let scaled = (numerator as u128 * 1_000).div_ceil(denominator as u128);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Interference of `count` jobs of a task with budget `budget_ns`, saturating.
pub fn interference(count: u64, budget_ns: u64) -> u64 {
    count.saturating_mul(budget_ns)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
