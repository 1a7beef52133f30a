// Supervisor (C4): owns the authoritative in-memory `{job_id ->
// RunningProcess}` map, admits/spawns/terminates encoder processes, and
// reaps orphans on boot (spec.md §4.4).
//
// Process-group control and the stop-then-escalate sequence generalize the
// teacher's `ffmpeg/runner::run_ffmpeg` (which used a single
// `CancellationToken` and a stdin `"q\n"` quit). The spec requires portable
// process-group signals instead of a stdin convention, so this version
// drives the group directly via `libc::kill` with a negative pid.

use crate::bus::{Bus, EventPayload};
use crate::compiler::{self, OutputPlan, PrimaryOutput};
use crate::config;
use crate::env::{EngineConfig, EnvironmentContext};
use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobStatus};
use crate::store::Store;
use crate::telemetry::{self, TelemetryConfig};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use time::OffsetDateTime;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    None,
    Graceful,
    Force,
    /// Raised internally by the spawn-startup watchdog, never by a caller
    /// (spec.md §5: kill and mark `error` if the encoder produces neither a
    /// stderr line nor an exit within the startup deadline).
    Timeout,
}

struct RunningProcess {
    pid: u32,
    started_at: OffsetDateTime,
    output_tag: String,
    stop_tx: watch::Sender<StopRequest>,
    done_rx: Option<oneshot::Receiver<()>>,
}

pub struct Supervisor {
    running: Arc<Mutex<HashMap<String, RunningProcess>>>,
    store: Arc<Store>,
    bus: Arc<Bus>,
    env_ctx: Arc<EnvironmentContext>,
    engine_cfg: EngineConfig,
}

impl Supervisor {
    pub fn new(
        store: Arc<Store>,
        bus: Arc<Bus>,
        engine_cfg: EngineConfig,
        env_ctx: EnvironmentContext,
    ) -> Self {
        let running = Arc::new(Mutex::new(HashMap::new()));
        spawn_housekeeping(bus.clone(), running.clone(), engine_cfg.telemetry_batch_interval);
        Self {
            running,
            store,
            bus,
            env_ctx: Arc::new(env_ctx),
            engine_cfg,
        }
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.running.lock().await.contains_key(job_id)
    }

    /// The only entry point that admits work (spec.md §4.4). Implements the
    /// full seven-step spawn contract.
    pub async fn start(&self, job_id: &str) -> EngineResult<Job> {
        {
            let running = self.running.lock().await;
            if running.len() >= self.engine_cfg.max_concurrent_jobs {
                return Err(EngineError::conflict("busy: at concurrency cap"));
            }
            if running.contains_key(job_id) {
                return Err(EngineError::conflict(format!("job {job_id} is already running")));
            }
        }

        let (job, stored_config) = self.store.get_job_with_config(job_id).await?;
        if job.status == JobStatus::Running {
            return Err(EngineError::conflict(format!("job {job_id} is already running")));
        }

        let override_cmd = self.store.get_command_override(job_id).await?;
        let (argv, plan) = match override_cmd {
            Some(raw) if !raw.trim().is_empty() => {
                let argv = compiler::parse_shell_args(&raw);
                if argv.is_empty() {
                    return Err(EngineError::Spawn {
                        job_id: job_id.to_string(),
                        message: "command override is empty".to_string(),
                    });
                }
                let plan = compiler::compile(&stored_config, &self.env_ctx).plan;
                (argv, plan)
            }
            _ => {
                let normalized = config::validate(&stored_config).map_err(|problems| EngineError::validation(problems.iter().map(|p| p.to_string())))?;
                let compiled = compiler::compile(&normalized, &self.env_ctx);
                self.store
                    .set_compiled_command(job_id, &compiled.argv.join(" "), &normalized)
                    .await?;
                (compiled.argv, compiled.plan)
            }
        };

        prepare_output_directory(&plan).await.map_err(|e| EngineError::Spawn {
            job_id: job_id.to_string(),
            message: e,
        })?;

        let log_path = self.log_path(job_id);
        if let Some(parent) = std::path::Path::new(&log_path).parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command.spawn().map_err(|e| EngineError::Spawn {
            job_id: job_id.to_string(),
            message: format!("failed to spawn encoder: {e}"),
        })?;

        let pid = child.id().ok_or_else(|| EngineError::Spawn {
            job_id: job_id.to_string(),
            message: "spawned process has no pid".to_string(),
        })?;

        let started_at = OffsetDateTime::now_utc();
        // Compensation: if anything below fails, roll the status back to
        // error in the same spirit as spec.md §7's compensation rule.
        if let Err(e) = self.store.transition_to_running(job_id, pid, started_at).await {
            let _ = child.start_kill();
            return Err(e);
        }

        let stderr = child.stderr.take().expect("stderr piped at spawn");
        let (log_tx, log_rx) = mpsc::unbounded_channel::<String>();
        let (stop_tx, stop_rx_a) = watch::channel(StopRequest::None);
        let stop_rx_b = stop_rx_a.clone();
        let stop_rx_c = stop_rx_a.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let (first_line_tx, first_line_rx) = oneshot::channel::<()>();

        let telemetry_cfg = TelemetryConfig {
            batch_size: self.engine_cfg.telemetry_batch_size,
            batch_interval: self.engine_cfg.telemetry_batch_interval,
        };
        let telemetry_handle = tokio::spawn(telemetry::run_telemetry_stream(
            job_id.to_string(),
            pid,
            stderr,
            self.bus.clone(),
            self.store.clone(),
            telemetry_cfg,
            log_tx,
            Some(first_line_tx),
        ));

        tokio::spawn(run_log_writer(log_path, log_rx));

        let output_tag = output_tag_for(&plan);
        self.bus.publish(EventPayload::Status {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            error_message: None,
        });

        let lifecycle_job_id = job_id.to_string();
        let running_map = self.running.clone();
        let store = self.store.clone();
        let bus = self.bus.clone();
        let grace = self.engine_cfg.stop_grace;
        tokio::spawn(run_lifecycle(
            lifecycle_job_id,
            child,
            pid,
            grace,
            stop_rx_a,
            stop_rx_b,
            stop_rx_c,
            telemetry_handle,
            store,
            bus,
            running_map,
            done_tx,
        ));

        self.running.lock().await.insert(
            job_id.to_string(),
            RunningProcess {
                pid,
                started_at,
                output_tag,
                stop_tx,
                done_rx: Some(done_rx),
            },
        );

        // Spawn-startup watchdog (spec.md §5): if neither a stderr line nor
        // an exit happens within the deadline, raise a timeout stop request.
        // A process that exits without ever writing to stderr still unblocks
        // this — `first_line_tx` is dropped when the telemetry task ends.
        {
            let watchdog_job_id = job_id.to_string();
            let watchdog_running = self.running.clone();
            let deadline = self.engine_cfg.spawn_startup_deadline;
            tokio::spawn(async move {
                if tokio::time::timeout(deadline, first_line_rx).await.is_err() {
                    let running = watchdog_running.lock().await;
                    if let Some(entry) = running.get(&watchdog_job_id) {
                        let _ = entry.stop_tx.send(StopRequest::Timeout);
                    }
                }
            });
        }

        self.store.get_job(job_id).await
    }

    /// Graceful stop with bounded grace then force-kill escalation
    /// (spec.md §4.4).
    pub async fn stop(&self, job_id: &str) -> EngineResult<Job> {
        self.request_stop(job_id, StopRequest::Graceful).await
    }

    /// Immediate kill plus an orphan sweep for stray processes tagged with
    /// this job's output (spec.md §4.4).
    pub async fn force_kill(&self, job_id: &str) -> EngineResult<(Job, usize)> {
        // Capture the output tag before the lifecycle task removes the map
        // entry — by the time `request_stop` returns, the job is gone.
        let output_tag = {
            let running = self.running.lock().await;
            running
                .get(job_id)
                .map(|r| r.output_tag.clone())
                .ok_or_else(|| EngineError::conflict(format!("job {job_id} is not running")))?
        };
        let job = self.request_stop(job_id, StopRequest::Force).await?;
        let killed = sweep_orphans(&output_tag, None);
        Ok((job, killed))
    }

    async fn request_stop(&self, job_id: &str, mode: StopRequest) -> EngineResult<Job> {
        let done_rx = {
            let mut running = self.running.lock().await;
            let entry = running
                .get_mut(job_id)
                .ok_or_else(|| EngineError::conflict(format!("job {job_id} is not running")))?;
            entry.stop_tx.send(mode).ok();
            entry.done_rx.take()
        };
        if let Some(rx) = done_rx {
            let _ = tokio::time::timeout(self.engine_cfg.stop_grace + Duration::from_secs(5), rx).await;
        }
        self.store.get_job(job_id).await
    }

    fn log_path(&self, job_id: &str) -> String {
        format!("{}/logs/{}.log", self.engine_cfg.data_path, job_id)
    }

    /// Boot-time reconciliation (spec.md §4.4): any job the store still
    /// thinks is running is either a live orphaned process we don't touch,
    /// or, if the pid is gone, transitioned to `error`.
    pub async fn reconcile_on_boot(&self) -> EngineResult<()> {
        let stale = self.store.list_running_jobs().await?;
        let mut sys = System::new_all();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        for job in stale {
            let Some(pid) = job.pid else { continue };
            let alive = sys.process(sysinfo::Pid::from_u32(pid)).is_some();
            if !alive {
                self.store
                    .transition_to_terminal(
                        &job.id,
                        JobStatus::Error,
                        OffsetDateTime::now_utc(),
                        Some("process missing on restart"),
                    )
                    .await?;
                self.bus.publish(EventPayload::Status {
                    job_id: job.id.clone(),
                    status: JobStatus::Error,
                    error_message: Some("process missing on restart".to_string()),
                });
            }
            // A live process whose pid we no longer track is left untouched
            // — the engine never kills processes it doesn't own.
        }

        if self.engine_cfg.auto_restart_jobs_on_boot {
            self.auto_restart_eligible().await?;
        }
        Ok(())
    }

    async fn auto_restart_eligible(&self) -> EngineResult<()> {
        use crate::store::{JobFilter, Pagination};
        let candidates = self
            .store
            .list_jobs(
                &JobFilter {
                    status: Some(JobStatus::Error),
                    ..Default::default()
                },
                Pagination {
                    limit: i64::MAX,
                    offset: 0,
                },
            )
            .await?;

        for job in candidates {
            if job.command.is_none() {
                continue;
            }
            if self.running_count().await >= self.engine_cfg.max_concurrent_jobs {
                break;
            }
            if let Err(e) = self.start(&job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "boot auto-restart failed");
            }
        }
        Ok(())
    }
}

/// Periodically publishes `system.metrics` on the same cadence as telemetry
/// batching (spec.md §4.6). Runs for the supervisor's whole lifetime; there's
/// no shutdown signal to wire it to since the process exit takes it down.
fn spawn_housekeeping(bus: Arc<Bus>, running: Arc<Mutex<HashMap<String, RunningProcess>>>, interval: Duration) {
    tokio::spawn(async move {
        let mut sys = System::new();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        loop {
            ticker.tick().await;
            let running_jobs = running.lock().await.len();
            telemetry::publish_system_metrics(&bus, &mut sys, running_jobs);
        }
    });
}

async fn prepare_output_directory(plan: &OutputPlan) -> Result<(), String> {
    let dir = match &plan.primary {
        PrimaryOutput::Hls { base_dir, .. } => Some(base_dir.clone()),
        PrimaryOutput::File { output_file_path, .. } => {
            std::path::Path::new(output_file_path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
        }
        PrimaryOutput::Stream { .. } => None,
    };
    if let Some(dir) = dir {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("failed to create output directory {dir}: {e}"))?;
    }
    Ok(())
}

fn output_tag_for(plan: &OutputPlan) -> String {
    match &plan.primary {
        PrimaryOutput::Hls { base_dir, .. } => base_dir.clone(),
        PrimaryOutput::File { output_file_path, .. } => output_file_path.clone(),
        PrimaryOutput::Stream { destination_url, .. } => destination_url.clone(),
    }
}

async fn run_log_writer(path: String, mut rx: mpsc::UnboundedReceiver<String>) {
    use tokio::io::AsyncWriteExt;
    let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path, error = %e, "failed to open job log file");
            return;
        }
    };
    while let Some(line) = rx.recv().await {
        let _ = file.write_all(line.as_bytes()).await;
        let _ = file.write_all(b"\n").await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_lifecycle(
    job_id: String,
    mut child: tokio::process::Child,
    pid: u32,
    grace: Duration,
    mut stop_rx_graceful: watch::Receiver<StopRequest>,
    mut stop_rx_force: watch::Receiver<StopRequest>,
    mut stop_rx_timeout: watch::Receiver<StopRequest>,
    telemetry_handle: tokio::task::JoinHandle<telemetry::TelemetryOutcome>,
    store: Arc<Store>,
    bus: Arc<Bus>,
    running_map: Arc<Mutex<HashMap<String, RunningProcess>>>,
    done_tx: oneshot::Sender<()>,
) {
    enum Outcome {
        Exited(std::process::ExitStatus),
        Killed,
    }

    let outcome = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => Outcome::Exited(status),
                Err(_) => Outcome::Killed,
            }
        }
        _ = wait_for(&mut stop_rx_graceful, StopRequest::Graceful) => {
            send_signal(pid, libc::SIGTERM);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => Outcome::Exited(status),
                _ => {
                    send_signal(pid, libc::SIGKILL);
                    let _ = child.wait().await;
                    Outcome::Killed
                }
            }
        }
        _ = wait_for(&mut stop_rx_force, StopRequest::Force) => {
            send_signal(pid, libc::SIGKILL);
            let _ = child.wait().await;
            Outcome::Killed
        }
        _ = wait_for(&mut stop_rx_timeout, StopRequest::Timeout) => {
            send_signal(pid, libc::SIGKILL);
            let _ = child.wait().await;
            Outcome::Killed
        }
    };

    let requested = *stop_rx_graceful.borrow();
    let telemetry_outcome = telemetry_handle.await.unwrap_or(telemetry::TelemetryOutcome {
        log_tail: Vec::new(),
        samples_observed: 0,
    });

    let stopped_at = OffsetDateTime::now_utc();
    let (final_status, error_message) = match outcome {
        Outcome::Exited(status) if status.success() => {
            if requested == StopRequest::Graceful {
                (JobStatus::Stopped, None)
            } else {
                (JobStatus::Completed, None)
            }
        }
        Outcome::Exited(status) => (
            JobStatus::Error,
            Some(build_error_message(status.code().unwrap_or(-1), &telemetry_outcome.log_tail)),
        ),
        Outcome::Killed if requested == StopRequest::Timeout => (
            JobStatus::Error,
            Some("encoder produced no stderr output and did not exit within the startup deadline".to_string()),
        ),
        Outcome::Killed => (JobStatus::Stopped, None),
    };

    if let Err(e) = store
        .transition_to_terminal(&job_id, final_status, stopped_at, error_message.as_deref())
        .await
    {
        tracing::error!(job_id, error = %e, "failed to persist terminal status");
    }
    bus.publish(EventPayload::Status {
        job_id: job_id.clone(),
        status: final_status,
        error_message,
    });

    running_map.lock().await.remove(&job_id);
    let _ = done_tx.send(());
}

async fn wait_for(rx: &mut watch::Receiver<StopRequest>, want: StopRequest) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow() == want {
            return;
        }
    }
}

fn send_signal(pid: u32, signal: i32) {
    // Negative pid targets the whole process group (spec.md §4.4: the
    // encoder is forked into its own group precisely so this reaches any
    // child processes it spawned, e.g. a two-pass filter graph helper).
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

fn build_error_message(exit_code: i32, log_tail: &[String]) -> String {
    if log_tail.is_empty() {
        return format!("encoder exited with code {exit_code}");
    }
    format!("encoder exited with code {exit_code}\n\n{}", log_tail.join("\n"))
}

/// Scans the host for processes whose command line mentions this job's
/// output tag (HLS dir, file path, or stream URL) and kills any that
/// survived the primary kill — the supervisor's own pid is excluded so a
/// concurrent `wait()` on the same child isn't disturbed (spec.md §4.4:
/// "never kill processes not owned by the engine" still holds because the
/// tag is unique to jobs this engine created).
fn sweep_orphans(output_tag: &str, known_pid: Option<u32>) -> usize {
    let mut sys = System::new_all();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if known_pid == Some(pid.as_u32()) {
            continue;
        }
        let matches = process
            .cmd()
            .iter()
            .any(|arg| arg.to_string_lossy().contains(output_tag));
        if matches {
            send_signal(pid.as_u32(), libc::SIGKILL);
            killed += 1;
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_message_includes_tail() {
        let msg = build_error_message(1, &["line one".to_string(), "line two".to_string()]);
        assert!(msg.contains("exited with code 1"));
        assert!(msg.contains("line two"));
    }

    #[test]
    fn build_error_message_without_tail() {
        let msg = build_error_message(137, &[]);
        assert_eq!(msg, "encoder exited with code 137");
    }
}
