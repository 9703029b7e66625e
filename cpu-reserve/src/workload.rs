/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Workload description for the driver binary.
//!
//! The expected YAML structure is:
//! ```yaml
//! threads:
//!   - tid: 101
//!     name: "camera"
//!     pid: 100          # optional, defaults to tid
//!     priority: 50      # optional, defaults to 0
//!     budget_ms: 250
//!     period_ms: 500
//!     cpu: 1            # optional; omit or -1 for automatic placement
//!     demand_ms: 300    # optional; execution charged every period
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::host::ThreadInfo;
use crate::reservation::{CpuRequest, ThreadId, Timespec};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadSpec {
    pub tid: ThreadId,
    pub name: String,
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub priority: i32,
    pub budget_ms: i64,
    pub period_ms: i64,
    /// Raw processor argument, as the control tool takes it.
    #[serde(default)]
    pub cpu: Option<i64>,
    /// Simulated execution per period.  Defaults to the budget.
    #[serde(default)]
    pub demand_ms: Option<u64>,
}

impl ThreadSpec {
    pub fn thread_info(&self) -> ThreadInfo {
        ThreadInfo {
            tid: self.tid,
            pid: self.pid.unwrap_or(self.tid),
            priority: self.priority,
            name: self.name.clone(),
        }
    }

    pub fn budget(&self) -> Timespec {
        Timespec::from_millis(self.budget_ms)
    }

    pub fn period(&self) -> Timespec {
        Timespec::from_millis(self.period_ms)
    }

    /// `None` for a negative processor other than `-1`.
    pub fn cpu_request(&self) -> Option<CpuRequest> {
        self.cpu.map_or(Some(CpuRequest::Auto), CpuRequest::from_raw)
    }

    pub fn demand_ms(&self) -> u64 {
        self.demand_ms
            .unwrap_or_else(|| u64::try_from(self.budget_ms).unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workload {
    #[serde(default)]
    pub threads: Vec<ThreadSpec>,
}

impl Workload {
    /// Load a workload file.
    ///
    /// Budgets and periods are passed through unchecked so the reservation
    /// manager's own validation can be exercised; only duplicate thread ids
    /// are rejected here.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading workload from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open workload file: {}", path.display()))?;

        let workload = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid workload file: {}", path.display()))?;

        info!(threads = workload.threads.len(), "Workload loaded");
        Ok(workload)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            warn!("Workload is empty");
            return Ok(Self::default());
        }
        let workload: Workload = serde_yaml::from_str(content).context("Failed to parse YAML")?;

        let mut seen = HashSet::new();
        for thread in &workload.threads {
            if !seen.insert(thread.tid) {
                bail!("duplicate thread id {}", thread.tid);
            }
        }
        Ok(workload)
    }

    /// Longest period in the workload, in milliseconds.
    pub fn longest_period_ms(&self) -> u64 {
        self.threads
            .iter()
            .filter_map(|t| u64::try_from(t.period_ms).ok())
            .max()
            .unwrap_or(0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn load_workload_with_defaults() {
        let yaml = r#"
threads:
  - tid: 101
    name: "camera"
    budget_ms: 250
    period_ms: 500
  - tid: 102
    name: "lidar"
    pid: 100
    priority: 40
    budget_ms: 100
    period_ms: 1000
    cpu: 2
    demand_ms: 150
"#;
        let f = yaml_tempfile(yaml);
        let w = Workload::load_from_file(f.path()).unwrap();
        assert_eq!(w.threads.len(), 2);

        let camera = &w.threads[0];
        assert_eq!(camera.cpu_request(), Some(CpuRequest::Auto));
        assert_eq!(camera.demand_ms(), 250);
        assert_eq!(camera.thread_info().pid, 101);
        assert_eq!(camera.budget(), Timespec::new(0, 250_000_000));

        let lidar = &w.threads[1];
        assert_eq!(lidar.cpu_request(), Some(CpuRequest::Pinned(2)));
        assert_eq!(lidar.demand_ms(), 150);
        assert_eq!(lidar.thread_info().priority, 40);
        assert_eq!(lidar.period(), Timespec::new(1, 0));

        assert_eq!(w.longest_period_ms(), 1_000);
    }

    #[test]
    fn negative_budget_is_passed_through() {
        let w = Workload::from_yaml_str(
            "threads:\n  - {tid: 1, name: t, budget_ms: -5, period_ms: 10}\n",
        )
        .unwrap();
        assert!(w.threads[0].budget().is_negative());
        assert_eq!(w.threads[0].demand_ms(), 0);
    }

    #[test]
    fn raw_processor_argument() {
        let w = Workload::from_yaml_str(
            "threads:\n  - {tid: 1, name: a, budget_ms: 1, period_ms: 2, cpu: -1}\n  - {tid: 2, name: b, budget_ms: 1, period_ms: 2, cpu: -7}\n",
        )
        .unwrap();
        assert_eq!(w.threads[0].cpu_request(), Some(CpuRequest::Auto));
        assert_eq!(w.threads[1].cpu_request(), None);
    }

    #[test]
    fn duplicate_tid_is_rejected() {
        let yaml = "threads:\n  - {tid: 1, name: a, budget_ms: 1, period_ms: 2}\n  - {tid: 1, name: b, budget_ms: 1, period_ms: 2}\n";
        assert!(Workload::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn missing_period_is_rejected() {
        assert!(Workload::from_yaml_str("threads:\n  - {tid: 1, name: a, budget_ms: 1}\n").is_err());
    }

    #[test]
    fn empty_workload_has_no_threads() {
        let f = yaml_tempfile("");
        let w = Workload::load_from_file(f.path()).unwrap();
        assert!(w.threads.is_empty());
        assert_eq!(w.longest_period_ms(), 0);
    }

    #[test]
    fn missing_file_returns_error() {
        assert!(Workload::load_from_file(Path::new("/nonexistent/workload.yaml")).is_err());
    }
}
