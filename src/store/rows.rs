use crate::job::{ArchivedJob, Job, JobStatus, StatisticsSample};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub priority: i64,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub stopped_at: Option<OffsetDateTime>,
    pub pid: Option<i64>,
    pub error_message: Option<String>,
    pub command: Option<String>,
    pub command_override: Option<String>,
    pub tags: String,
}

impl JobRow {
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            name: self.name,
            priority: self.priority as u8,
            status: JobStatus::parse(&self.status).unwrap_or(JobStatus::Error),
            created_at: self.created_at,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            pid: self.pid.map(|p| p as u32),
            command: self.command_override.or(self.command),
            error_message: self.error_message,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            notes: None,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct StatisticsRow {
    pub job_id: String,
    pub timestamp: OffsetDateTime,
    pub fps: f64,
    pub bitrate_bps: i64,
    pub dropped_frames: i64,
    pub speed: f64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub gpu_percent: Option<f64>,
    pub total_frames: i64,
    pub current_time_offset_us: i64,
}

impl From<StatisticsRow> for StatisticsSample {
    fn from(r: StatisticsRow) -> Self {
        StatisticsSample {
            job_id: r.job_id,
            timestamp: r.timestamp,
            fps: r.fps as f32,
            bitrate_bps: r.bitrate_bps,
            dropped_frames: r.dropped_frames as u64,
            speed: r.speed as f32,
            cpu_percent: r.cpu_percent as f32,
            memory_mb: r.memory_mb as f32,
            gpu_percent: r.gpu_percent.map(|v| v as f32),
            total_frames: r.total_frames as u64,
            current_time_offset_us: r.current_time_offset_us,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ArchiveRow {
    pub id: String,
    pub name: String,
    pub archived_at: OffsetDateTime,
    pub archived_reason: String,
    pub serialized_config: String,
}

impl ArchiveRow {
    pub fn into_archived_job(self) -> Result<ArchivedJob, serde_json::Error> {
        Ok(ArchivedJob {
            id: self.id,
            name: self.name,
            archived_at: self.archived_at,
            archived_reason: self.archived_reason,
            config: serde_json::from_str(&self.serialized_config)?,
        })
    }
}
