// Job Service (C7): the public, transport-neutral facade (spec.md §4.7).
// Every operation here is what the IPC/HTTP glue calls directly — it owns
// no state of its own beyond handles to the Store, Supervisor, and Bus, and
// every mutation is idempotent where the job's current state permits it.

use crate::compiler::{self, WarningCode};
use crate::config::{self, UnifiedConfig};
use crate::env::EnvironmentContext;
use crate::error::{EngineError, EngineResult};
use crate::job::{ArchivedJob, Job};
use crate::store::{JobFilter, Pagination, Store};
use crate::supervisor::Supervisor;
use std::sync::Arc;

pub struct CreatedJob {
    pub job: Job,
    pub ffmpeg_command: String,
    pub warnings: Vec<WarningCode>,
}

pub struct JobService {
    store: Arc<Store>,
    supervisor: Arc<Supervisor>,
    env_ctx: Arc<EnvironmentContext>,
}

impl JobService {
    pub fn new(store: Arc<Store>, supervisor: Arc<Supervisor>, env_ctx: Arc<EnvironmentContext>) -> Self {
        Self {
            store,
            supervisor,
            env_ctx,
        }
    }

    /// Validates, compiles (to surface warnings and an initial `command`),
    /// and persists (spec.md §4.7).
    pub async fn create_unified(&self, name: &str, priority: u8, config: UnifiedConfig) -> EngineResult<CreatedJob> {
        let normalized = config::validate(&config).map_err(|problems| EngineError::validation(problems.iter().map(|p| p.to_string())))?;
        let compiled = compiler::compile(&normalized, &self.env_ctx);
        let command = compiled.argv.join(" ");
        let job_id = uuid::Uuid::new_v4().to_string();

        let job = self
            .store
            .create_job(&job_id, name, priority, &normalized, Some(&command), normalized.abr_enabled)
            .await?;

        Ok(CreatedJob {
            job,
            ffmpeg_command: command,
            warnings: compiled.warnings,
        })
    }

    /// Reconstructed from the stored record — round-trips through
    /// normalization (spec.md §8: `get_unified(create_unified(c)) ==
    /// normalize(c)`).
    pub async fn get_unified(&self, job_id: &str) -> EngineResult<UnifiedConfig> {
        self.store.get_unified_config(job_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> EngineResult<Job> {
        self.store.get_job(job_id).await
    }

    /// Rejected if running; re-validates, re-compiles to refresh `command`,
    /// and invalidates the `full_config` cache (spec.md §4.7).
    pub async fn update_unified(&self, job_id: &str, config: UnifiedConfig) -> EngineResult<CreatedJob> {
        let normalized = config::validate(&config).map_err(|problems| EngineError::validation(problems.iter().map(|p| p.to_string())))?;
        self.store
            .update_unified_config(job_id, &normalized, normalized.abr_enabled)
            .await?;

        let compiled = compiler::compile(&normalized, &self.env_ctx);
        let command = compiled.argv.join(" ");
        self.store.set_compiled_command(job_id, &command, &normalized).await?;

        let job = self.store.get_job(job_id).await?;
        Ok(CreatedJob {
            job,
            ffmpeg_command: command,
            warnings: compiled.warnings,
        })
    }

    /// Rejected if running; must start with `ffmpeg`; stored as an override
    /// that replaces the compiled command verbatim at the next `start`
    /// (spec.md §4.4 step 2, §4.7).
    pub async fn update_command(&self, job_id: &str, command: &str) -> EngineResult<Job> {
        let trimmed = command.trim();
        if !trimmed.starts_with("ffmpeg") {
            return Err(EngineError::validation(["command must start with 'ffmpeg'"]));
        }
        self.store.set_command_override(job_id, Some(trimmed)).await?;
        self.store.get_job(job_id).await
    }

    pub async fn start(&self, job_id: &str) -> EngineResult<Job> {
        self.supervisor.start(job_id).await
    }

    pub async fn stop(&self, job_id: &str) -> EngineResult<Job> {
        self.supervisor.stop(job_id).await
    }

    pub async fn force_kill(&self, job_id: &str) -> EngineResult<(Job, usize)> {
        self.supervisor.force_kill(job_id).await
    }

    /// Administrative action: moves a non-running job back to `pending`
    /// without running it (spec.md §4.7).
    pub async fn reset_status(&self, job_id: &str) -> EngineResult<Job> {
        self.store.reset_status_to_pending(job_id).await?;
        self.store.get_job(job_id).await
    }

    pub async fn delete(&self, job_id: &str) -> EngineResult<()> {
        if self.supervisor.is_running(job_id).await {
            return Err(EngineError::conflict(format!("job {job_id} is running; stop it before deleting")));
        }
        self.store.delete_job(job_id).await
    }

    pub async fn archive(&self, job_id: &str, reason: &str) -> EngineResult<ArchivedJob> {
        if self.supervisor.is_running(job_id).await {
            return Err(EngineError::conflict(format!("job {job_id} is running; stop it before archiving")));
        }
        self.store.archive_job(job_id, reason).await
    }

    pub async fn restore(&self, archive_id: &str) -> EngineResult<Job> {
        let new_job_id = uuid::Uuid::new_v4().to_string();
        self.store.restore_archived(archive_id, &new_job_id).await
    }

    pub async fn list(&self, filter: JobFilter, pagination: Pagination) -> EngineResult<Vec<Job>> {
        self.store.list_jobs(&filter, pagination).await
    }

    /// Last N lines of a job's on-disk log file (spec.md §6: "Tail job
    /// log").
    pub async fn tail_log(&self, job_id: &str, data_path: &str, n: usize) -> EngineResult<Vec<String>> {
        // Existence check first so a typo'd id gets NotFound, not an empty tail.
        self.store.get_job(job_id).await?;
        let path = format!("{data_path}/logs/{job_id}.log");
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::Internal(format!("failed to read log {path}: {e}"))),
        };
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::config::{OutputFormat, VideoCodec};
    use crate::env::{EngineConfig, StaticHwInventory};

    async fn harness() -> (JobService, Arc<Store>) {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        let bus = Arc::new(Bus::new());
        let engine_cfg = EngineConfig::from_env();
        let env_ctx = Arc::new(EnvironmentContext::from_engine_config(
            &engine_cfg,
            Box::new(StaticHwInventory::assume_all_mapped()),
        ));
        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            bus.clone(),
            engine_cfg,
            EnvironmentContext::from_engine_config(
                &EngineConfig::from_env(),
                Box::new(StaticHwInventory::assume_all_mapped()),
            ),
        ));
        (JobService::new(store.clone(), supervisor, env_ctx), store)
    }

    fn sample_config() -> UnifiedConfig {
        UnifiedConfig {
            input_file: "/input/a.mp4".into(),
            video_codec: Some(VideoCodec::H264),
            audio_codec: Some("aac".into()),
            audio_bitrate: Some("128k".into()),
            output_format: Some(OutputFormat::Hls),
            output_dir: Some("/output/hls/s1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (svc, _store) = harness().await;
        let created = svc.create_unified("s1", 5, sample_config()).await.unwrap();
        assert!(created.ffmpeg_command.starts_with("ffmpeg"));

        let fetched = svc.get_unified(&created.job.id).await.unwrap();
        assert_eq!(fetched.input_file, "/input/a.mp4");
    }

    #[tokio::test]
    async fn update_command_requires_ffmpeg_prefix() {
        let (svc, _store) = harness().await;
        let created = svc.create_unified("s1", 5, sample_config()).await.unwrap();
        let err = svc.update_command(&created.job.id, "rm -rf /").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_name_surfaces_as_conflict() {
        let (svc, _store) = harness().await;
        svc.create_unified("dup", 5, sample_config()).await.unwrap();
        let err = svc.create_unified("dup", 5, sample_config()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn archive_and_restore_round_trip_through_service() {
        let (svc, _store) = harness().await;
        let created = svc.create_unified("s1", 5, sample_config()).await.unwrap();
        let archived = svc.archive(&created.job.id, "done testing").await.unwrap();
        assert!(svc.get_job(&created.job.id).await.is_err());

        let restored = svc.restore(&archived.id).await.unwrap();
        assert_eq!(restored.name, "s1");
    }
}
