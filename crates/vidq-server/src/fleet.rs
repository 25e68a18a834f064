//! Fleet manager: one worker process per CPU, child 0 designated.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::Context;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::shutdown_signal;

const DEFAULT_GRACE_SECS: u64 = 10;

/// Fleet sizing and identity options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    pub workers: usize,
    /// Give each child a stable `slot-N` identity.
    pub stable_slots: bool,
    /// How long a child may take to exit on its own after shutdown starts.
    pub grace: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            stable_slots: false,
            grace: Duration::from_secs(DEFAULT_GRACE_SECS),
        }
    }
}

impl FleetConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_stable_slots(mut self, stable: bool) -> Self {
        self.stable_slots = stable;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Environment handed to one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    pub index: usize,
    pub leader: bool,
    pub slot: Option<usize>,
}

impl ChildSpec {
    /// Build the `vidq worker` invocation for this child.
    pub fn command(&self, exe: &Path) -> Command {
        let mut cmd = Command::new(exe);
        cmd.arg("worker").kill_on_drop(true);

        // Inherited values from the manager's own environment must not leak.
        if self.leader {
            cmd.env("JOB_LEADER", "1");
        } else {
            cmd.env_remove("JOB_LEADER");
        }
        match self.slot {
            Some(slot) => cmd.env("WORKER_SLOT", slot.to_string()),
            None => cmd.env_remove("WORKER_SLOT"),
        };
        cmd
    }
}

/// Per-child assignments. Exactly child 0 is the designated processor.
pub fn plan(config: &FleetConfig) -> Vec<ChildSpec> {
    (0..config.workers.max(1))
        .map(|index| ChildSpec {
            index,
            leader: index == 0,
            slot: config.stable_slots.then_some(index),
        })
        .collect()
}

/// Spawn the fleet and wait until every child exits or a shutdown signal
/// arrives. Exited children are logged, not respawned.
pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut children = JoinSet::new();

    info!(
        subsystem = "fleet",
        workers = config.workers,
        stable_slots = config.stable_slots,
        "Starting worker fleet"
    );

    for spec in plan(&config) {
        let child = spec
            .command(&exe)
            .spawn()
            .with_context(|| format!("failed to spawn worker {}", spec.index))?;
        info!(
            subsystem = "fleet",
            index = spec.index,
            pid = child.id(),
            leader = spec.leader,
            "Worker process started"
        );
        children.spawn(supervise(spec, child, stop_rx.clone(), config.grace));
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!(subsystem = "fleet", "Stopping worker fleet");
            stop_tx.send_replace(true);
        }
        _ = drain(&mut children) => {
            info!(subsystem = "fleet", "All worker processes exited");
            return Ok(());
        }
    }

    drain(&mut children).await;
    info!(subsystem = "fleet", "Worker fleet stopped");
    Ok(())
}

async fn drain(children: &mut JoinSet<()>) {
    while let Some(joined) = children.join_next().await {
        if let Err(e) = joined {
            error!(subsystem = "fleet", error = %e, "Supervisor task failed");
        }
    }
}

async fn supervise(
    spec: ChildSpec,
    mut child: Child,
    mut stop: watch::Receiver<bool>,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => log_exit(&spec, status),
        _ = async { let _ = stop.wait_for(|stop| *stop).await; } => {
            terminate(&spec, &child);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => log_exit(&spec, status),
                Err(_) => {
                    warn!(
                        subsystem = "fleet",
                        index = spec.index,
                        grace_secs = grace.as_secs(),
                        "Worker did not exit in time, killing"
                    );
                    if let Err(e) = child.kill().await {
                        error!(subsystem = "fleet", index = spec.index, error = %e, "Failed to kill worker");
                    }
                }
            }
        }
    }
}

/// Ask a child to shut down the way a process manager would, with SIGTERM.
#[cfg(unix)]
fn terminate(spec: &ChildSpec, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // None once the child has been reaped.
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(subsystem = "fleet", index = spec.index, error = %e, "Failed to signal worker");
    }
}

#[cfg(not(unix))]
fn terminate(_spec: &ChildSpec, _child: &Child) {}

fn log_exit(spec: &ChildSpec, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            info!(subsystem = "fleet", index = spec.index, "Worker process exited");
        }
        Ok(status) => {
            warn!(
                subsystem = "fleet",
                index = spec.index,
                leader = spec.leader,
                code = status.code(),
                "Worker process exited abnormally"
            );
        }
        Err(e) => {
            error!(subsystem = "fleet", index = spec.index, error = %e, "Failed to wait on worker");
        }
    }
}
