/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use cpu_reserve::config::FrameworkConfig;
use cpu_reserve::host::{SimHost, ThreadHost};
use cpu_reserve::manager::error::EINVAL;
use cpu_reserve::manager::{JobResume, ReservationManager};
use cpu_reserve::monitor;
use cpu_reserve::workload::{ThreadSpec, Workload};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Run a simulated workload under CPU reservations.
///
/// Example:
///   cpu-reserve --config framework.yaml --workload threads.yaml --periods 10 --monitor
#[derive(Debug, Parser)]
#[command(
    name = "cpu-reserve",
    about = "CPU reservation, admission control and budget enforcement",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML framework configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to the YAML workload file.
    #[arg(short = 'w', long = "workload")]
    workload: PathBuf,

    /// How many of the longest period to run for.
    #[arg(short = 'n', long = "periods", default_value_t = 5)]
    periods: u64,

    /// Monitoring switch applied before admission ("1" on, "0" off).
    /// A bare `--monitor` means "1".
    #[arg(short = 'm', long = "monitor", num_args = 0..=1, default_missing_value = "1")]
    monitor: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        config = ?cli.config,
        workload = %cli.workload.display(),
        periods = cli.periods,
        monitor = ?cli.monitor,
        "cpu-reserve starting up"
    );

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load configuration and workload ───────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => FrameworkConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using defaults");
            FrameworkConfig::default()
        }
    };
    if let Some(switch) = &cli.monitor {
        match monitor::parse_switch(switch) {
            Some(enabled) => config.monitoring = enabled,
            None => bail!("--monitor expects 1 or 0, got '{switch}'"),
        }
    }

    let workload = Workload::load_from_file(&cli.workload)?;

    let host = Arc::new(SimHost::new(config.processors));
    for thread in &workload.threads {
        host.spawn_thread(thread.thread_info());
    }
    let manager = Arc::new(ReservationManager::new(Arc::clone(&host), &config));

    // ── Admission ─────────────────────────────────────────────────────────────
    let mut admitted = Vec::new();
    for thread in &workload.threads {
        let Some(request) = thread.cpu_request() else {
            warn!(
                tid = thread.tid,
                name = %thread.name,
                errno = EINVAL,
                "not admitted: invalid processor {:?}",
                thread.cpu
            );
            continue;
        };
        match manager
            .set_reservation(thread.tid, thread.budget(), thread.period(), request)
            .await
        {
            Ok(cpu) => {
                info!(tid = thread.tid, name = %thread.name, cpu, "admitted");
                admitted.push(thread.clone());
            }
            Err(e) => warn!(
                tid = thread.tid,
                name = %thread.name,
                errno = e.errno(),
                "not admitted: {e}"
            ),
        }
    }
    info!(
        admitted = admitted.len(),
        requested = workload.threads.len(),
        "admission complete"
    );

    // ── Synthetic load ────────────────────────────────────────────────────────
    let mut load = JoinSet::new();
    for thread in admitted {
        load.spawn(simulate(Arc::clone(&manager), thread));
    }

    let run_for = Duration::from_millis(workload.longest_period_ms().saturating_mul(cli.periods));
    tokio::time::sleep(run_for).await;

    // ── Report ────────────────────────────────────────────────────────────────
    report(&manager);

    manager.shutdown().await;
    while load.join_next().await.is_some() {}
    info!("cpu-reserve finished");
    Ok(())
}

/// One simulated periodic job: consume `demand_ms`, then end the job early
/// and wait for the next period.
async fn simulate<H: ThreadHost>(manager: Arc<ReservationManager<H>>, thread: ThreadSpec) {
    let demand = Duration::from_millis(thread.demand_ms());
    loop {
        if !manager.account_execution(thread.tid, demand) {
            break;
        }
        match manager.end_job(thread.tid).await {
            Ok(JobResume::NextPeriod(_)) => {}
            Ok(JobResume::Cancelled) | Err(_) => break,
        }
    }
}

fn report<H: ThreadHost>(manager: &ReservationManager<H>) {
    let rows = manager.list_reservations();
    info!("{} active reservation(s):", rows.len());
    for row in &rows {
        info!(
            "  [{name}]  tid={tid}  pid={pid}  prio={prio}  cpu={cpu}",
            name = row.name,
            tid = row.tid,
            pid = row.pid,
            prio = row.priority,
            cpu = row.cpu,
        );
    }

    info!("utilization of {} processor(s):", manager.processors());
    for (cpu, utilization) in manager.processor_utilization().iter().enumerate() {
        info!("  cpu{cpu}: {utilization}");
    }

    info!(
        "monitoring: {}",
        monitor::render_switch(manager.monitoring_enabled()).trim_end()
    );
    if manager.monitoring_enabled() {
        for row in &rows {
            if let Ok(samples) = manager.utilization_history(row.tid) {
                info!(
                    "history of {} ({}):\n{}",
                    row.name,
                    row.tid,
                    monitor::render_history(&samples).trim_end()
                );
            }
        }
    }
}
