// Store (C3): transactional persistence for jobs, their unified configs,
// statistics samples, and archived jobs (spec.md §4.3). Backed by SQLite in
// WAL mode — concurrent readers don't block the single writer, and every
// status transition is one atomic UPDATE alongside its timestamp/pid.
//
// Grounded in the `dog4ik/media-server` reference example's sqlx+sqlite
// setup; the teacher itself has no persistence layer (its job map lives only
// in memory for the lifetime of the stdio session).

mod rows;
mod schema;

use crate::config::UnifiedConfig;
use crate::error::{EngineError, EngineResult};
use crate::job::{ArchivedJob, Job, JobStatus, StatisticsSample};
use rows::{ArchiveRow, JobRow, StatisticsRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub abr_enabled: Option<bool>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| EngineError::Internal(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        // Sqlite hands out a fresh, empty database per connection to
        // `:memory:`; a pool of more than one connection would silently
        // scatter reads and writes across unrelated databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(schema::SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn connect_in_memory() -> EngineResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Creates a job and its owning config atomically (spec.md §3: "Owns
    /// exactly one UnifiedConfig (1:1); deletion of the job cascades").
    pub async fn create_job(
        &self,
        id: &str,
        name: &str,
        priority: u8,
        config: &UnifiedConfig,
        command: Option<&str>,
        abr_enabled: bool,
    ) -> EngineResult<Job> {
        let serialized = config
            .canonical_json()
            .map_err(|e| EngineError::Internal(format!("config serialization failed: {e}")))?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"INSERT INTO jobs (id, name, status, priority, created_at, command, full_config, abr_enabled, tags)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, '[]')"#,
        )
        .bind(id)
        .bind(name)
        .bind(JobStatus::Pending.as_str())
        .bind(priority as i64)
        .bind(now)
        .bind(command)
        .bind(&serialized)
        .bind(abr_enabled as i64)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert {
            if db_err.is_unique_violation() {
                return Err(EngineError::conflict(format!(
                    "a job named '{name}' already exists"
                )));
            }
        }
        insert?;

        sqlx::query("INSERT INTO unified_config (job_id, serialized_config) VALUES (?, ?)")
            .bind(id)
            .bind(&serialized)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Job {
            id: id.to_string(),
            name: name.to_string(),
            priority,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            stopped_at: None,
            pid: None,
            command: command.map(str::to_string),
            error_message: None,
            tags: Vec::new(),
            notes: None,
        })
    }

    /// Snapshot-consistent read: job and config come from the same query
    /// (spec.md §4.3).
    pub async fn get_job_with_config(&self, id: &str) -> EngineResult<(Job, UnifiedConfig)> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"SELECT id, name, status, priority, created_at, started_at, stopped_at, pid,
                      error_message, command, command_override, tags
               FROM jobs WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::not_found(id))?;

        let serialized: String =
            sqlx::query_scalar("SELECT serialized_config FROM unified_config WHERE job_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let config: UnifiedConfig = serde_json::from_str(&serialized)
            .map_err(|e| EngineError::Internal(format!("stored config corrupt: {e}")))?;

        Ok((row.into_job(), config))
    }

    pub async fn get_job(&self, id: &str) -> EngineResult<Job> {
        Ok(self.get_job_with_config(id).await?.0)
    }

    pub async fn get_unified_config(&self, id: &str) -> EngineResult<UnifiedConfig> {
        Ok(self.get_job_with_config(id).await?.1)
    }

    /// Rejected by the caller (Job Service) if the job is running; the Store
    /// enforces it too so a race between a concurrent start and update can't
    /// slip a write past the check (spec.md §4.7).
    pub async fn update_unified_config(
        &self,
        id: &str,
        config: &UnifiedConfig,
        abr_enabled: bool,
    ) -> EngineResult<()> {
        let serialized = config
            .canonical_json()
            .map_err(|e| EngineError::Internal(format!("config serialization failed: {e}")))?;

        let mut tx = self.pool.begin().await?;
        self.guard_not_running(&mut tx, id).await?;

        sqlx::query("UPDATE unified_config SET serialized_config = ? WHERE job_id = ?")
            .bind(&serialized)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Invalidate the command cache: the next compile repopulates it.
        sqlx::query(
            "UPDATE jobs SET full_config = NULL, command = NULL, abr_enabled = ? WHERE id = ?",
        )
        .bind(abr_enabled as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_compiled_command(
        &self,
        id: &str,
        command: &str,
        full_config: &UnifiedConfig,
    ) -> EngineResult<()> {
        let serialized = full_config
            .canonical_json()
            .map_err(|e| EngineError::Internal(format!("config serialization failed: {e}")))?;
        sqlx::query("UPDATE jobs SET command = ?, full_config = ? WHERE id = ?")
            .bind(command)
            .bind(&serialized)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_command_override(&self, id: &str, override_cmd: Option<&str>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        self.guard_not_running(&mut tx, id).await?;
        sqlx::query("UPDATE jobs SET command_override = ? WHERE id = ?")
            .bind(override_cmd)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Raw override column, distinct from `Job::command` (which already
    /// folds override-over-compiled for display). The Supervisor needs the
    /// two kept apart to decide whether to recompile at spawn time
    /// (spec.md §4.4 step 2).
    pub async fn get_command_override(&self, id: &str) -> EngineResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT command_override FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((override_cmd,)) => Ok(override_cmd),
            None => Err(EngineError::not_found(id)),
        }
    }

    async fn guard_not_running(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &str,
    ) -> EngineResult<()> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        match status.as_deref() {
            None => Err(EngineError::not_found(id)),
            Some("running") => Err(EngineError::conflict(format!(
                "job {id} is running; stop it before updating"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Atomic status transition to running, with its pid and started_at
    /// (spec.md §4.3).
    pub async fn transition_to_running(
        &self,
        id: &str,
        pid: u32,
        started_at: OffsetDateTime,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'running', pid = ?, started_at = ?, error_message = NULL WHERE id = ?",
        )
        .bind(pid as i64)
        .bind(started_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic transition to a terminal state (stopped/error/completed),
    /// clearing pid and recording stopped_at (spec.md §4.3, §4.4).
    pub async fn transition_to_terminal(
        &self,
        id: &str,
        status: JobStatus,
        stopped_at: OffsetDateTime,
        error_message: Option<&str>,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, pid = NULL, stopped_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(stopped_at)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Administrative action: moves a non-running job to pending without
    /// running it (spec.md §4.7).
    pub async fn reset_status_to_pending(&self, id: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        self.guard_not_running(&mut tx, id).await?;
        sqlx::query(
            "UPDATE jobs SET status = 'pending', pid = NULL, error_message = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_jobs(&self, filter: &JobFilter, page: Pagination) -> EngineResult<Vec<Job>> {
        let mut sql = String::from(
            "SELECT id, name, status, priority, created_at, started_at, stopped_at, pid, \
             error_message, command, command_override, tags FROM jobs WHERE 1=1",
        );
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.abr_enabled.is_some() {
            sql.push_str(" AND abr_enabled = ?");
        }
        if filter.tag.is_some() {
            sql.push_str(" AND tags LIKE ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, JobRow>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(abr) = filter.abr_enabled {
            query = query.bind(abr as i64);
        }
        if let Some(tag) = &filter.tag {
            query = query.bind(format!("%\"{tag}\"%"));
        }
        query = query.bind(page.limit).bind(page.offset);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    /// Every job whose store-recorded status is `running`, used by the
    /// Supervisor's boot-time orphan reconciliation (spec.md §4.4).
    pub async fn list_running_jobs(&self) -> EngineResult<Vec<Job>> {
        self.list_jobs(
            &JobFilter {
                status: Some(JobStatus::Running),
                ..Default::default()
            },
            Pagination {
                limit: i64::MAX,
                offset: 0,
            },
        )
        .await
    }

    pub async fn delete_job(&self, id: &str) -> EngineResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found(id));
        }
        Ok(())
    }

    /// Archive is explicit and distinct from delete: the config snapshot
    /// survives in `archives` with its archived-at timestamp and reason
    /// (spec.md §3).
    pub async fn archive_job(&self, id: &str, reason: &str) -> EngineResult<ArchivedJob> {
        let mut tx = self.pool.begin().await?;

        let name: Option<String> = sqlx::query_scalar("SELECT name FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let name = name.ok_or_else(|| EngineError::not_found(id))?;

        let serialized: String =
            sqlx::query_scalar("SELECT serialized_config FROM unified_config WHERE job_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        let archive_id = uuid::Uuid::new_v4().to_string();
        let archived_at = OffsetDateTime::now_utc();

        sqlx::query(
            "INSERT INTO archives (id, name, archived_at, archived_reason, serialized_config) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&archive_id)
        .bind(&name)
        .bind(archived_at)
        .bind(reason)
        .bind(&serialized)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ArchivedJob {
            id: archive_id,
            name,
            archived_at,
            archived_reason: reason.to_string(),
            config: serde_json::from_str(&serialized)
                .map_err(|e| EngineError::Internal(format!("stored config corrupt: {e}")))?,
        })
    }

    /// Restore produces a new active Job with the archived config
    /// (spec.md §3).
    pub async fn restore_archived(&self, archive_id: &str, new_job_id: &str) -> EngineResult<Job> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ArchiveRow>(
            "SELECT id, name, archived_at, archived_reason, serialized_config FROM archives WHERE id = ?",
        )
        .bind(archive_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found(archive_id))?;

        let archived = row
            .into_archived_job()
            .map_err(|e| EngineError::Internal(format!("stored config corrupt: {e}")))?;
        let serialized_config = serde_json::to_string(&archived.config)
            .map_err(|e| EngineError::Internal(format!("failed to reserialize restored config: {e}")))?;
        let now = OffsetDateTime::now_utc();

        sqlx::query(
            r#"INSERT INTO jobs (id, name, status, priority, created_at, full_config, tags)
               VALUES (?, ?, 'pending', 5, ?, ?, '[]')"#,
        )
        .bind(new_job_id)
        .bind(&archived.name)
        .bind(now)
        .bind(&serialized_config)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO unified_config (job_id, serialized_config) VALUES (?, ?)")
            .bind(new_job_id)
            .bind(&serialized_config)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM archives WHERE id = ?")
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Job {
            id: new_job_id.to_string(),
            name: archived.name,
            priority: 5,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            stopped_at: None,
            pid: None,
            command: None,
            error_message: None,
            tags: Vec::new(),
            notes: None,
        })
    }

    /// Batched to bound DB write rate (spec.md §4.5): callers accumulate
    /// samples and call this once per batch.
    pub async fn insert_statistics_batch(&self, samples: &[StatisticsSample]) -> EngineResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                r#"INSERT INTO statistics
                   (job_id, timestamp, fps, bitrate_bps, dropped_frames, speed, cpu_percent,
                    memory_mb, gpu_percent, total_frames, current_time_offset_us)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&s.job_id)
            .bind(s.timestamp)
            .bind(s.fps as f64)
            .bind(s.bitrate_bps)
            .bind(s.dropped_frames as i64)
            .bind(s.speed as f64)
            .bind(s.cpu_percent as f64)
            .bind(s.memory_mb as f64)
            .bind(s.gpu_percent.map(|v| v as f64))
            .bind(s.total_frames as i64)
            .bind(s.current_time_offset_us)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn statistics_since(
        &self,
        job_id: &str,
        since: OffsetDateTime,
    ) -> EngineResult<Vec<StatisticsSample>> {
        let rows = sqlx::query_as::<_, StatisticsRow>(
            "SELECT job_id, timestamp, fps, bitrate_bps, dropped_frames, speed, cpu_percent, \
             memory_mb, gpu_percent, total_frames, current_time_offset_us \
             FROM statistics WHERE job_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(job_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StatisticsSample::from).collect())
    }

    /// Rolling-window retention (spec.md §3): deletes samples older than the
    /// cutoff and reports how many were removed.
    pub async fn prune_statistics_older_than(&self, cutoff: OffsetDateTime) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM statistics WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Used by boot reconciliation to confirm a row actually exists before
    /// reasoning about its pid.
    pub async fn job_exists(&self, id: &str) -> EngineResult<bool> {
        let row = sqlx::query("SELECT 1 FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFormat, UnifiedConfig, VideoCodec};

    fn sample_config() -> UnifiedConfig {
        UnifiedConfig {
            input_file: "/input/a.mp4".into(),
            video_codec: Some(VideoCodec::H264),
            audio_codec: Some("aac".into()),
            output_format: Some(OutputFormat::Hls),
            output_dir: Some("/output/hls/s1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_read_round_trips_config() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "s1", 5, &cfg, Some("ffmpeg -i ..."), false)
            .await
            .unwrap();

        let (job, read_back) = store.get_job_with_config("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(read_back.input_file, cfg.input_file);
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "dup", 5, &cfg, None, false)
            .await
            .unwrap();
        let err = store
            .create_job("job-2", "dup", 5, &cfg, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn status_transition_sets_pid_and_timestamp_atomically() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "s1", 5, &cfg, None, false)
            .await
            .unwrap();

        let started = OffsetDateTime::now_utc();
        store.transition_to_running("job-1", 4242, started).await.unwrap();
        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.pid, Some(4242));
        assert!(job.invariant_holds());

        store
            .transition_to_terminal("job-1", JobStatus::Stopped, OffsetDateTime::now_utc(), None)
            .await
            .unwrap();
        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(job.pid, None);
        assert!(job.invariant_holds());
    }

    #[tokio::test]
    async fn update_rejected_while_running() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "s1", 5, &cfg, None, false)
            .await
            .unwrap();
        store
            .transition_to_running("job-1", 1, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let err = store
            .update_unified_config("job-1", &cfg, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn archive_then_restore_round_trips() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "s1", 5, &cfg, None, false)
            .await
            .unwrap();

        let archived = store.archive_job("job-1", "user requested").await.unwrap();
        assert!(store.get_job("job-1").await.is_err());

        let restored = store.restore_archived(&archived.id, "job-2").await.unwrap();
        assert_eq!(restored.name, "s1");
        assert_eq!(restored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn statistics_batch_and_window_query() {
        let store = Store::connect_in_memory().await.unwrap();
        let cfg = sample_config();
        store
            .create_job("job-1", "s1", 5, &cfg, None, false)
            .await
            .unwrap();

        let t0 = OffsetDateTime::now_utc();
        let samples = vec![StatisticsSample {
            job_id: "job-1".into(),
            timestamp: t0,
            fps: 30.0,
            bitrate_bps: 5_000_000,
            dropped_frames: 0,
            speed: 1.0,
            cpu_percent: 40.0,
            memory_mb: 512.0,
            gpu_percent: None,
            total_frames: 900,
            current_time_offset_us: 30_000_000,
        }];
        store.insert_statistics_batch(&samples).await.unwrap();

        let since = t0 - time::Duration::seconds(1);
        let fetched = store.statistics_since("job-1", since).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].fps, 30.0);
    }
}
