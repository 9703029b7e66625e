/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Framework configuration loading.
//!
//! The expected YAML structure is (every key optional):
//! ```yaml
//! processors: 4
//! policy: "FF"            # FF | NF | BF | WF | LST
//! monitoring: false
//! strict_admission: false # Best/Worst-Fit also run the schedulability test
//! timer_anchor: "now"     # now | deadline
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::enforcement::TimerAnchor;
use crate::partition::PartitionPolicy;

/// Upper limit on processors: the affinity model is a 64-bit mask.
pub const MAX_PROCESSORS: usize = 64;

/// Processor count used when the file does not say.
pub const DEFAULT_PROCESSORS: usize = 4;

fn default_processors() -> usize {
    DEFAULT_PROCESSORS
}

// ── FrameworkConfig ───────────────────────────────────────────────────────────

/// Settings for one reservation manager instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameworkConfig {
    /// Number of processor buckets.
    #[serde(default = "default_processors")]
    pub processors: usize,

    /// Initial partition policy.
    #[serde(default)]
    pub policy: PartitionPolicy,

    /// Initial value of the global monitoring switch.
    #[serde(default)]
    pub monitoring: bool,

    /// Run the schedulability test under every policy.
    #[serde(default)]
    pub strict_admission: bool,

    /// How enforcement timers re-arm.
    #[serde(default)]
    pub timer_anchor: TimerAnchor,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            processors: DEFAULT_PROCESSORS,
            policy: PartitionPolicy::default(),
            monitoring: false,
            strict_admission: false,
            timer_anchor: TimerAnchor::default(),
        }
    }
}

impl FrameworkConfig {
    /// Parse and validate `path`.
    ///
    /// An empty file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed,
    /// or a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading framework configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))?;

        info!(
            processors = config.processors,
            policy = %config.policy,
            monitoring = config.monitoring,
            strict_admission = config.strict_admission,
            timer_anchor = ?config.timer_anchor,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            warn!("Configuration is empty, using defaults");
            return Ok(Self::default());
        }
        let config: FrameworkConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML")?;
        config.validate()?;
        debug!(?config, "configuration parsed");
        Ok(config)
    }

    /// Reject values the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.processors == 0 || self.processors > MAX_PROCESSORS {
            bail!(
                "processors must be between 1 and {MAX_PROCESSORS}, got {}",
                self.processors
            );
        }
        if self.timer_anchor == TimerAnchor::Deadline {
            warn!("timer_anchor=deadline: period boundaries will not drift (differs from the default re-arm-from-now behaviour)");
        }
        if self.strict_admission {
            info!("strict admission: Best-Fit and Worst-Fit also run the schedulability test");
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
