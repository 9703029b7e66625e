/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Text formats of the monitoring surface.
//!
//! Two read/write points are exposed to display tooling:
//!
//! * the global switch: `"1"` / `"0"`, read back as `"1\n"` / `"0\n"`;
//! * per-thread history: one `"<period_index> <utilization>"` line per
//!   sample, utilization as three-decimal fixed point.
//!
//! The history format is lossless: [`parse_history`] reconstructs exactly the
//! samples [`render_history`] printed.

use thiserror::Error;

use crate::reservation::{ParsePermilleError, UtilizationSample};

/// Body returned for a reservation that has no samples yet.
pub const EMPTY_HISTORY: &str = "No utilization data available yet\n";

/// Interpret a write to the switch.  Only the first character matters, as
/// with a sysfs attribute: `'1'` enables, `'0'` disables, anything else is
/// ignored.
pub fn parse_switch(input: &str) -> Option<bool> {
    match input.trim_start().chars().next() {
        Some('1') => Some(true),
        Some('0') => Some(false),
        _ => None,
    }
}

pub fn render_switch(enabled: bool) -> String {
    format!("{}\n", u8::from(enabled))
}

pub fn render_history(samples: &[UtilizationSample]) -> String {
    if samples.is_empty() {
        return EMPTY_HISTORY.to_string();
    }
    samples.iter().map(|s| format!("{s}\n")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryParseError {
    #[error("line {line}: expected '<period_index> <utilization>'")]
    Shape { line: usize },

    #[error("line {line}: bad period index")]
    PeriodIndex { line: usize },

    #[error("line {line}: {source}")]
    Utilization {
        line: usize,
        #[source]
        source: ParsePermilleError,
    },
}

/// Inverse of [`render_history`].
pub fn parse_history(text: &str) -> Result<Vec<UtilizationSample>, HistoryParseError> {
    if text == EMPTY_HISTORY {
        return Ok(Vec::new());
    }
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            let line = i + 1;
            let (index, util) = l
                .trim()
                .split_once(' ')
                .ok_or(HistoryParseError::Shape { line })?;
            Ok(UtilizationSample {
                period_index: index
                    .parse()
                    .map_err(|_| HistoryParseError::PeriodIndex { line })?,
                utilization: util
                    .parse()
                    .map_err(|source| HistoryParseError::Utilization { line, source })?,
            })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
