/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type for the reservation control operations.
//!
//! Every variant carries the thread id and the values that caused it, so a
//! caller can log it in one `tracing` event.  [`ReserveError::errno`] maps it
//! onto the classic control-interface codes:
//!
//! | Variant | errno |
//! |---|---|
//! | `InvalidDuration` / `CpuOutOfRange` / `UnknownPolicy` / `NoReservation` / `Affinity` | `EINVAL` |
//! | `NoSuchThread` | `ESRCH` |
//! | `NotSchedulable` / `NoProcessorAvailable` / `ReservationsActive` | `EBUSY` |
//! | `OutOfMemory` | `ENOMEM` |
//! | `NoActiveJob` | `ENOENT` (the distinguished end-of-job code) |
//!
//! Admission rejections (`NotSchedulable`, `NoProcessorAvailable`) are
//! expected outcomes of a full system, not faults; the caller may retry with
//! other parameters.

use thiserror::Error;

use crate::analysis::Infeasible;
use crate::host::HostError;
use crate::partition::{PartitionPolicy, UnknownPolicy};
use crate::reservation::{ThreadId, Timespec};

pub const ENOENT: i32 = 2;
pub const ESRCH: i32 = 3;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;

#[derive(Debug, Error)]
pub enum ReserveError {
    /// Budget or period is negative, not normalised, or too large.
    #[error("invalid {field} {value}: must be a non-negative, normalised duration")]
    InvalidDuration { field: &'static str, value: Timespec },

    /// A zero period cannot be enforced.
    #[error("period must be greater than zero")]
    ZeroPeriod,

    #[error("processor {cpu} out of range (this system has {processors})")]
    CpuOutOfRange { cpu: usize, processors: usize },

    #[error(transparent)]
    UnknownPolicy(#[from] UnknownPolicy),

    #[error("no such thread {0}")]
    NoSuchThread(ThreadId),

    #[error("thread {0} holds no reservation")]
    NoReservation(ThreadId),

    #[error("thread {0} has no active reservation")]
    NoActiveJob(ThreadId),

    /// Pinned placement: the requested processor would be overloaded.
    #[error("reservation for thread {tid} is not schedulable on processor {cpu}: {reason}")]
    NotSchedulable {
        tid: ThreadId,
        cpu: usize,
        reason: Infeasible,
    },

    /// Automatic placement: the policy found no processor.
    #[error("no processor available for thread {tid} under policy {policy}")]
    NoProcessorAvailable {
        tid: ThreadId,
        policy: PartitionPolicy,
    },

    #[error("cannot change partition policy while {active} reservation(s) are active")]
    ReservationsActive { active: usize },

    #[error("out of memory while admitting thread {tid}")]
    OutOfMemory { tid: ThreadId },

    #[error("could not bind thread {tid} to its processor: {source}")]
    Affinity {
        tid: ThreadId,
        #[source]
        source: HostError,
    },
}

impl ReserveError {
    /// Positive errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ReserveError::InvalidDuration { .. }
            | ReserveError::ZeroPeriod
            | ReserveError::CpuOutOfRange { .. }
            | ReserveError::UnknownPolicy(_)
            | ReserveError::NoReservation(_) => EINVAL,
            ReserveError::Affinity {
                source: HostError::ThreadGone(_),
                ..
            } => ESRCH,
            ReserveError::Affinity { .. } => EINVAL,
            ReserveError::NoSuchThread(_) => ESRCH,
            ReserveError::NotSchedulable { .. }
            | ReserveError::NoProcessorAvailable { .. }
            | ReserveError::ReservationsActive { .. } => EBUSY,
            ReserveError::OutOfMemory { .. } => ENOMEM,
            ReserveError::NoActiveJob(_) => ENOENT,
        }
    }

    /// `true` for the "system is full" outcomes of admission control.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            ReserveError::NotSchedulable { .. } | ReserveError::NoProcessorAvailable { .. }
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
