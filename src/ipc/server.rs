// IPC server: reads requests from stdin, writes responses to stdout as
// NDJSON. Structure lifted directly from the teacher's `read_stdin`/
// `write_stdout` pair — one writer task owns stdout so no two tasks ever
// race a write, and the dispatcher matches on a tagged request enum. Here
// the dispatch target is the Job Service rather than an in-memory queue, and
// `Request::Subscribe` spins up a long-lived forwarding task that turns Bus
// events into the same response stream instead of a one-shot reply.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};

use crate::bus::{Bus, EventPayload};
use crate::error::EngineError;
use crate::ipc::protocol::{stats_event_payload, Request, Response, WireTopic};
use crate::service::JobService;
use crate::store::{JobFilter, Pagination};

/// Reads NDJSON requests from stdin and dispatches each to the Job Service
/// (or, for `subscribe`, to the Bus). All responses funnel through
/// `response_tx` so only `write_stdout` ever touches stdout.
pub async fn read_stdin(
    service: Arc<JobService>,
    bus: Arc<Bus>,
    response_tx: mpsc::Sender<Response>,
    shutdown_tx: oneshot::Sender<()>,
) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut shutdown_tx = Some(shutdown_tx);

    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "invalid request line");
                continue;
            }
        };

        match request {
            Request::Shutdown => {
                if let Some(tx) = shutdown_tx.take() {
                    let _ = tx.send(());
                }
                return Ok(());
            }
            Request::Subscribe { topic, job_id } => {
                let tx = response_tx.clone();
                let bus = bus.clone();
                tokio::spawn(forward_subscription(bus, topic, job_id, tx));
            }
            other => {
                let tx = response_tx.clone();
                let service = service.clone();
                tokio::spawn(async move {
                    let response = dispatch(&service, other).await;
                    if let Err(e) = tx.send(response).await {
                        tracing::warn!(error = %e, "failed to enqueue response");
                    }
                });
            }
        }
    }

    Ok(())
}

/// Every non-subscribe, non-shutdown request resolves to exactly one
/// response, success or `Response::Error` (spec.md §6, §7 — synchronous
/// operations surface their error directly to the caller).
async fn dispatch(service: &JobService, request: Request) -> Response {
    let result = handle(service, request).await;
    result.unwrap_or_else(|(job_id, err)| error_response(job_id, &err))
}

#[allow(clippy::type_complexity)]
async fn handle(service: &JobService, request: Request) -> Result<Response, (Option<String>, EngineError)> {
    match request {
        Request::CreateUnified { name, priority, config } => {
            let created = service
                .create_unified(&name, priority, config)
                .await
                .map_err(|e| (None, e))?;
            Ok(Response::JobCreated {
                job: created.job,
                ffmpeg_command: created.ffmpeg_command,
                warnings: created.warnings.iter().map(|w| w.to_string()).collect(),
            })
        }
        Request::GetUnified { job_id } => {
            let config = service.get_unified(&job_id).await.map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::UnifiedConfig { job_id, config })
        }
        Request::UpdateUnified { job_id, config } => {
            let updated = service
                .update_unified(&job_id, config)
                .await
                .map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::JobCreated {
                job: updated.job,
                ffmpeg_command: updated.ffmpeg_command,
                warnings: updated.warnings.iter().map(|w| w.to_string()).collect(),
            })
        }
        Request::UpdateCommand { job_id, command } => {
            let job = service
                .update_command(&job_id, &command)
                .await
                .map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::JobUpdate { job })
        }
        Request::Start { job_id } => {
            let job = service.start(&job_id).await.map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::JobUpdate { job })
        }
        Request::Stop { job_id } => {
            let job = service.stop(&job_id).await.map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::JobUpdate { job })
        }
        Request::ForceKill { job_id } => {
            let (job, orphans_killed) = service
                .force_kill(&job_id)
                .await
                .map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::ForceKilled { job, orphans_killed })
        }
        Request::ResetStatus { job_id } => {
            let job = service.reset_status(&job_id).await.map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::JobUpdate { job })
        }
        Request::Delete { job_id } => {
            service.delete(&job_id).await.map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::Deleted { job_id })
        }
        Request::Archive { job_id, reason } => {
            let archive = service
                .archive(&job_id, &reason)
                .await
                .map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::Archived { archive })
        }
        Request::Restore { archive_id } => {
            let job = service
                .restore(&archive_id)
                .await
                .map_err(|e| (Some(archive_id.clone()), e))?;
            Ok(Response::JobUpdate { job })
        }
        Request::List {
            status,
            abr_enabled,
            tag,
            limit,
            offset,
        } => {
            let jobs = service
                .list(JobFilter { status, abr_enabled, tag }, Pagination { limit, offset })
                .await
                .map_err(|e| (None, e))?;
            Ok(Response::JobList { jobs })
        }
        Request::TailLog { job_id, lines } => {
            let data_path = std::env::var("DATA_PATH").unwrap_or_else(|_| "/data".to_string());
            let tail = service
                .tail_log(&job_id, &data_path, lines)
                .await
                .map_err(|e| (Some(job_id.clone()), e))?;
            Ok(Response::LogTail { job_id, lines: tail })
        }
        Request::Subscribe { .. } | Request::Shutdown => {
            unreachable!("handled before dispatch")
        }
    }
}

fn error_response(job_id: Option<String>, err: &EngineError) -> Response {
    let kind = match err {
        EngineError::Validation(_) => "validation",
        EngineError::Conflict(_) => "conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::Spawn { .. } => "spawn",
        EngineError::Runtime { .. } => "runtime",
        EngineError::Lost { .. } => "lost",
        EngineError::Internal(_) => "internal",
        EngineError::Store(_) => "store",
    };
    Response::Error {
        job_id,
        kind: kind.to_string(),
        message: err.to_string(),
    }
}

/// Streams bus events matching `topic`/`job_id` onto the response channel
/// until the subscriber drops it (the Bus's own unsubscribe contract) or the
/// response channel itself closes (shutdown in progress).
async fn forward_subscription(
    bus: Arc<Bus>,
    topic: WireTopic,
    job_id: Option<String>,
    response_tx: mpsc::Sender<Response>,
) {
    let mut sub = bus.subscribe(to_internal_topic(topic), job_id);
    while let Some(event) = sub.recv().await {
        let payload = match &event.payload {
            EventPayload::Status { job_id, status, error_message } => serde_json::json!({
                "job_id": job_id,
                "status": status,
                "error_message": error_message,
            }),
            EventPayload::Stats(sample) => stats_event_payload(sample),
            EventPayload::Log { job_id, line } => serde_json::json!({
                "job_id": job_id,
                "line": line,
            }),
            EventPayload::SystemMetrics { cpu_percent, memory_mb, running_jobs } => serde_json::json!({
                "cpu_percent": cpu_percent,
                "memory_mb": memory_mb,
                "running_jobs": running_jobs,
            }),
        };
        let response = Response::Event {
            topic,
            job_id: event_job_id(&event.payload),
            lag_count: event.lag_count,
            payload,
        };
        if response_tx.send(response).await.is_err() {
            return;
        }
    }
}

fn event_job_id(payload: &EventPayload) -> Option<String> {
    match payload {
        EventPayload::Status { job_id, .. } => Some(job_id.clone()),
        EventPayload::Stats(sample) => Some(sample.job_id.clone()),
        EventPayload::Log { job_id, .. } => Some(job_id.clone()),
        EventPayload::SystemMetrics { .. } => None,
    }
}

fn to_internal_topic(topic: WireTopic) -> crate::bus::Topic {
    match topic {
        WireTopic::JobStatus => crate::bus::Topic::JobStatus,
        WireTopic::JobStats => crate::bus::Topic::JobStats,
        WireTopic::JobLog => crate::bus::Topic::JobLog,
        WireTopic::SystemMetrics => crate::bus::Topic::SystemMetrics,
    }
}

/// Writes responses as NDJSON on stdout. Runs as its own task; returns an
/// error once the pipe is gone so the caller knows to start shutting down
/// (spec.md §6: the stdio transport closes when either end goes away).
pub async fn write_stdout(mut rx: mpsc::Receiver<Response>) -> Result<()> {
    let stdout = tokio::io::stdout();
    let mut writer = BufWriter::new(stdout);

    while let Some(response) = rx.recv().await {
        let json = match serde_json::to_string(&response) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize response");
                continue;
            }
        };

        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}
