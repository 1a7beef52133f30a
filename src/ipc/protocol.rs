// IPC protocol: serde types for every request/response exchanged over the
// stdin/stdout NDJSON channel (spec.md §6). Same tagged-enum shape as the
// teacher's protocol (`#[serde(tag = "type")]`, snake_case renames, per-field
// defaults on options structs) generalized from four job-queue operations to
// the full Job Service surface plus event-bus streaming.

use crate::config::UnifiedConfig;
use crate::job::{ArchivedJob, Job, JobStatus, StatisticsSample};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "create_unified")]
    CreateUnified {
        name: String,
        #[serde(default = "default_priority")]
        priority: u8,
        config: UnifiedConfig,
    },

    #[serde(rename = "get_unified")]
    GetUnified { job_id: String },

    #[serde(rename = "update_unified")]
    UpdateUnified { job_id: String, config: UnifiedConfig },

    #[serde(rename = "update_command")]
    UpdateCommand { job_id: String, command: String },

    #[serde(rename = "start")]
    Start { job_id: String },

    #[serde(rename = "stop")]
    Stop { job_id: String },

    #[serde(rename = "force_kill")]
    ForceKill { job_id: String },

    #[serde(rename = "reset_status")]
    ResetStatus { job_id: String },

    #[serde(rename = "delete")]
    Delete { job_id: String },

    #[serde(rename = "archive")]
    Archive { job_id: String, reason: String },

    #[serde(rename = "restore")]
    Restore { archive_id: String },

    #[serde(rename = "list")]
    List {
        status: Option<JobStatus>,
        abr_enabled: Option<bool>,
        tag: Option<String>,
        #[serde(default = "default_limit")]
        limit: i64,
        #[serde(default)]
        offset: i64,
    },

    #[serde(rename = "tail_log")]
    TailLog {
        job_id: String,
        #[serde(default = "default_tail_lines")]
        lines: usize,
    },

    #[serde(rename = "subscribe")]
    Subscribe {
        topic: WireTopic,
        job_id: Option<String>,
    },

    #[serde(rename = "shutdown")]
    Shutdown,
}

fn default_priority() -> u8 {
    5
}

fn default_limit() -> i64 {
    50
}

fn default_tail_lines() -> usize {
    200
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireTopic {
    JobStatus,
    JobStats,
    JobLog,
    SystemMetrics,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "job_created")]
    JobCreated {
        job: Job,
        ffmpeg_command: String,
        warnings: Vec<String>,
    },

    #[serde(rename = "unified_config")]
    UnifiedConfig { job_id: String, config: UnifiedConfig },

    #[serde(rename = "job")]
    JobUpdate { job: Job },

    #[serde(rename = "force_killed")]
    ForceKilled { job: Job, orphans_killed: usize },

    #[serde(rename = "archived")]
    Archived { archive: ArchivedJob },

    #[serde(rename = "job_list")]
    JobList { jobs: Vec<Job> },

    #[serde(rename = "log_tail")]
    LogTail { job_id: String, lines: Vec<String> },

    #[serde(rename = "deleted")]
    Deleted { job_id: String },

    #[serde(rename = "event")]
    Event {
        topic: WireTopic,
        job_id: Option<String>,
        lag_count: u64,
        payload: serde_json::Value,
    },

    #[serde(rename = "error")]
    Error {
        job_id: Option<String>,
        kind: String,
        message: String,
    },
}

pub fn stats_event_payload(sample: &StatisticsSample) -> serde_json::Value {
    serde_json::to_value(sample).unwrap_or(serde_json::Value::Null)
}
