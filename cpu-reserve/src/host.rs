/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Boundary between the reservation core and the threads it governs.
//!
//! The core never owns a thread.  Everything it needs from the platform goes
//! through [`ThreadHost`]:
//!
//! * resolve a thread id (`ESRCH` when it is gone),
//! * bind or release its processor affinity,
//! * deliver the asynchronous "budget exceeded" notification.
//!
//! [`SimHost`] is an in-memory implementation that records every call.  The
//! driver binary and the test suites run against it.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use crate::reservation::ThreadId;
use crate::sync::{read, write};

// ── Types ─────────────────────────────────────────────────────────────────────

/// What the status listing shows about a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: ThreadId,
    pub pid: i32,
    pub priority: i32,
    pub name: String,
}

/// Processor affinity of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// Unconstrained: may run on any processor.
    #[default]
    All,
    /// Pinned to a single processor.
    Single(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("thread {0} no longer exists")]
    ThreadGone(ThreadId),

    #[error("processor {cpu} is not usable by thread {tid}")]
    AffinityRejected { tid: ThreadId, cpu: usize },
}

// ── ThreadHost ────────────────────────────────────────────────────────────────

/// Platform services consumed by the reservation manager and the
/// enforcement timers.
///
/// Implementations must be cheap and non-blocking: `notify_overrun` is called
/// from timer context.
pub trait ThreadHost: Send + Sync + 'static {
    fn lookup(&self, tid: ThreadId) -> Option<ThreadInfo>;

    fn set_affinity(&self, tid: ThreadId, affinity: Affinity) -> Result<(), HostError>;

    fn notify_overrun(&self, tid: ThreadId) -> Result<(), HostError>;
}

// ── SimHost ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimThread {
    info: ThreadInfo,
    affinity: Affinity,
    overruns: u64,
}

/// In-memory thread table.
#[derive(Debug)]
pub struct SimHost {
    processors: usize,
    threads: RwLock<HashMap<ThreadId, SimThread>>,
}

impl SimHost {
    /// Host with `processors` usable CPUs; affinity to any other index is
    /// rejected.
    pub fn new(processors: usize) -> Self {
        Self {
            processors,
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Make a thread visible to the core.
    pub fn spawn_thread(&self, info: ThreadInfo) {
        debug!(tid = info.tid, name = %info.name, "sim thread spawned");
        write(&self.threads).insert(
            info.tid,
            SimThread {
                info,
                affinity: Affinity::All,
                overruns: 0,
            },
        );
    }

    /// Shorthand for tests: a thread whose pid equals its tid.
    pub fn spawn(&self, tid: ThreadId, name: &str) {
        self.spawn_thread(ThreadInfo {
            tid,
            pid: tid,
            priority: 0,
            name: name.to_string(),
        });
    }

    /// Remove a thread, as if it had exited.
    pub fn exit_thread(&self, tid: ThreadId) -> bool {
        write(&self.threads).remove(&tid).is_some()
    }

    pub fn affinity(&self, tid: ThreadId) -> Option<Affinity> {
        read(&self.threads).get(&tid).map(|t| t.affinity)
    }

    /// Number of overrun notifications delivered to `tid`.
    pub fn overruns(&self, tid: ThreadId) -> u64 {
        read(&self.threads).get(&tid).map_or(0, |t| t.overruns)
    }
}

impl ThreadHost for SimHost {
    fn lookup(&self, tid: ThreadId) -> Option<ThreadInfo> {
        read(&self.threads).get(&tid).map(|t| t.info.clone())
    }

    fn set_affinity(&self, tid: ThreadId, affinity: Affinity) -> Result<(), HostError> {
        if let Affinity::Single(cpu) = affinity {
            if cpu >= self.processors {
                return Err(HostError::AffinityRejected { tid, cpu });
            }
        }
        let mut threads = write(&self.threads);
        let thread = threads.get_mut(&tid).ok_or(HostError::ThreadGone(tid))?;
        thread.affinity = affinity;
        Ok(())
    }

    fn notify_overrun(&self, tid: ThreadId) -> Result<(), HostError> {
        let mut threads = write(&self.threads);
        let thread = threads.get_mut(&tid).ok_or(HostError::ThreadGone(tid))?;
        thread.overruns += 1;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
