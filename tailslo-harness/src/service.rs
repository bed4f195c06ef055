use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tailslo_common::{Result, TailSloError};
use tracing::{debug, info, warn};

use crate::config::{READY_POLL_INTERVAL, READY_PROBE_TIMEOUT, STOP_POLL_INTERVAL};

/// Poll `url` with GET until it answers 200 or `timeout` elapses.
///
/// Connection errors and non-200 statuses are retried; the error returned on
/// timeout carries the last one observed.
pub async fn wait_ready(url: &str, timeout: Duration) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(READY_PROBE_TIMEOUT)
        .build()
        .map_err(|e| TailSloError::NetworkError(e.to_string()))?;
    let deadline = Instant::now() + timeout;
    let mut last_err = "no probe completed".to_string();

    loop {
        match http.get(url).send().await {
            Ok(r) if r.status() == reqwest::StatusCode::OK => {
                info!(url, "service ready");
                return Ok(());
            }
            Ok(r) => last_err = format!("status {}", r.status()),
            Err(e) => last_err = e.to_string(),
        }
        debug!(url, last_err = %last_err, "service not ready yet");

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TailSloError::NotReady(format!(
                "{url} not ready after {}s; last error: {last_err}",
                timeout.as_secs_f64()
            )));
        }
        tokio::time::sleep(remaining.min(READY_POLL_INTERVAL)).await;
    }
}

/// How a process group was brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No process with that pid existed.
    NotFound,
    /// The leader exited within the grace period after SIGTERM.
    Exited,
    /// The grace period elapsed and the group was sent SIGKILL.
    Killed,
}

/// SIGTERM the process group of `pid`, wait up to `grace` for `alive` to turn false,
/// then SIGKILL the group.
pub fn terminate_group(pid: u32, grace: Duration, mut alive: impl FnMut() -> bool) -> Result<StopOutcome> {
    let pid = Pid::from_raw(pid as i32);
    let pgid = match getpgid(Some(pid)) {
        Ok(pgid) => pgid,
        Err(Errno::ESRCH) => return Ok(StopOutcome::NotFound),
        Err(e) => return Err(TailSloError::Io(format!("getpgid({pid}): {e}"))),
    };

    signal_group(pgid, Signal::SIGTERM)?;
    info!(%pgid, "sent SIGTERM to process group");

    let deadline = Instant::now() + grace;
    loop {
        if !alive() {
            info!(%pid, "process exited");
            return Ok(StopOutcome::Exited);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(STOP_POLL_INTERVAL));
    }

    signal_group(pgid, Signal::SIGKILL)?;
    warn!(%pgid, "grace period elapsed; sent SIGKILL to process group");
    Ok(StopOutcome::Killed)
}

/// [`terminate_group`] for a process that is not our child, polled on the blocking pool.
pub async fn stop_group(pid: u32, grace: Duration) -> Result<StopOutcome> {
    tokio::task::spawn_blocking(move || terminate_group(pid, grace, || pid_alive(pid)))
        .await
        .map_err(|e| TailSloError::TaskFailed(e.to_string()))?
}

/// Liveness probe for a process that is not our child.
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

fn signal_group(pgid: Pid, signal: Signal) -> Result<()> {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(TailSloError::Io(format!("killpg({pgid}, {signal:?}): {e}"))),
    }
}

/// How to start the service under test.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Receives the service's stdout and stderr.
    pub log_path: PathBuf,
}

/// A service running in its own process group. Dropping it kills the group unless
/// it was [`detach`](ServiceProcess::detach)ed.
pub struct ServiceProcess {
    child: Child,
    detached: bool,
}

impl ServiceProcess {
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        if let Some(dir) = config.log_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let log = File::create(&config.log_path)?;
        let log_err = log.try_clone()?;

        let child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .spawn()
            .map_err(|e| TailSloError::Launch(format!("{}: {e}", config.program)))?;

        info!(pid = child.id(), program = %config.program, log = %config.log_path.display(), "service launched");
        Ok(Self { child, detached: false })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Leave the service running after this handle is dropped; returns its pid.
    pub fn detach(mut self) -> u32 {
        self.detached = true;
        self.child.id()
    }

    /// Graceful-then-forceful shutdown of the whole process group.
    pub fn stop(mut self, grace: Duration) -> Result<StopOutcome> {
        let pid = self.child.id();
        let child = &mut self.child;
        let outcome = terminate_group(pid, grace, || matches!(child.try_wait(), Ok(None)))?;
        self.child.wait().ok();
        self.detached = true;
        Ok(outcome)
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let pgid = Pid::from_raw(self.child.id() as i32);
        killpg(pgid, Signal::SIGKILL).ok();
        self.child.wait().ok();
    }
}
