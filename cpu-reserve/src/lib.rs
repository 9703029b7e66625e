/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! cpu-reserve – CPU reservations for partitioned real-time threads
//!
//! A thread asks for a budget `C` every period `T`.  Admission control decides
//! whether the processor can still meet every deadline, a partition policy
//! picks the processor, and a per-reservation timer enforces the budget.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── reservation     – Timespec / Permille / TaskParams, the shared Reservation record
//! ├── analysis/       – utilization bound + response-time analysis
//! ├── partition/      – FF / NF / BF / WF / LST policies, Processor Bucket Table
//! ├── enforcement     – periodic enforcement timer (tokio task)
//! ├── manager/        – control operations and ReserveError
//! ├── host            – ThreadHost seam, SimHost
//! ├── monitor         – monitoring switch and utilization-history text format
//! ├── config/         – YAML framework configuration
//! └── workload        – YAML workload for the driver binary
//! ```

pub mod analysis;
pub mod config;
pub mod enforcement;
pub mod host;
pub mod manager;
pub mod monitor;
pub mod partition;
pub mod reservation;
pub mod workload;

mod sync;
