// Shared domain types for a job's runtime state (spec.md §3), independent of
// how they are persisted (store) or mutated (supervisor/service).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Stopped,
    Error,
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Error => "error",
            JobStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "stopped" => Some(JobStatus::Stopped),
            "error" => Some(JobStatus::Error),
            "completed" => Some(JobStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub priority: u8,
    pub status: JobStatus,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub stopped_at: Option<OffsetDateTime>,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl Job {
    /// `status=running ⇔ pid ≠ null` is an invariant the Supervisor and
    /// Store must jointly uphold (spec.md §8).
    pub fn invariant_holds(&self) -> bool {
        (self.status == JobStatus::Running) == self.pid.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSample {
    pub job_id: String,
    pub timestamp: OffsetDateTime,
    pub fps: f32,
    pub bitrate_bps: i64,
    pub dropped_frames: u64,
    pub speed: f32,
    pub cpu_percent: f32,
    pub memory_mb: f32,
    pub gpu_percent: Option<f32>,
    pub total_frames: u64,
    pub current_time_offset_us: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedJob {
    pub id: String,
    pub name: String,
    pub archived_at: OffsetDateTime,
    pub archived_reason: String,
    pub config: crate::config::UnifiedConfig,
}
