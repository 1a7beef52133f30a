// Integration tests for the Supervisor's admission, termination, and
// boot-reconciliation contracts (spec.md §8 seed scenarios 1, 4, 5, 6).
// Each test gets its own in-memory store and a throwaway output directory so
// tests can run concurrently without interfering with each other. Encoder
// processes are simulated with `/bin/sh` rather than a real FFmpeg binary —
// the Supervisor only cares about process-group lifecycle and stderr lines,
// both of which a shell script can produce identically.

use std::sync::Arc;
use std::time::Duration;

use hlsforge::config::{OutputFormat, UnifiedConfig, VideoCodec};
use hlsforge::env::{EngineConfig, EnvironmentContext, StaticHwInventory};
use hlsforge::job::JobStatus;
use hlsforge::{Bus, Store, Supervisor};

fn test_engine_config(output_path: &str, data_path: &str, max_concurrent_jobs: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_jobs,
        default_segment_duration: 6,
        auto_restart_jobs_on_boot: false,
        hls_url: "http://localhost/hls".to_string(),
        input_path: "/input".to_string(),
        output_path: output_path.to_string(),
        data_path: data_path.to_string(),
        stop_grace: Duration::from_millis(300),
        spawn_startup_deadline: Duration::from_secs(5),
        telemetry_batch_size: 10,
        telemetry_batch_interval: Duration::from_millis(50),
    }
}

fn hls_config(output_dir: &str) -> UnifiedConfig {
    UnifiedConfig {
        input_file: "/input/a.mp4".into(),
        video_codec: Some(VideoCodec::H264),
        audio_codec: Some("aac".into()),
        audio_bitrate: Some("128k".into()),
        output_format: Some(OutputFormat::Hls),
        output_dir: Some(output_dir.to_string()),
        ..Default::default()
    }
}

async fn harness(max_concurrent_jobs: usize) -> (Arc<Store>, Arc<Bus>, Arc<Supervisor>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let output_path = tmp.path().join("output").to_string_lossy().to_string();
    let data_path = tmp.path().join("data").to_string_lossy().to_string();

    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    let bus = Arc::new(Bus::new());
    let engine_cfg = test_engine_config(&output_path, &data_path, max_concurrent_jobs);
    let env_ctx = EnvironmentContext::from_engine_config(&engine_cfg, Box::new(StaticHwInventory::assume_all_mapped()));
    let supervisor = Arc::new(Supervisor::new(store.clone(), bus.clone(), engine_cfg, env_ctx));
    (store, bus, supervisor, tmp)
}

async fn create_job_with_override(store: &Store, name: &str, output_dir: &str, override_cmd: &str) -> String {
    let job_id = uuid::Uuid::new_v4().to_string();
    store
        .create_job(&job_id, name, 5, &hls_config(output_dir), None, false)
        .await
        .unwrap();
    store.set_command_override(&job_id, Some(override_cmd)).await.unwrap();
    job_id
}

/// Seed scenario 1: a job whose encoder emits progress bursts and exits
/// cleanly transitions running -> completed, with at least one stats sample
/// observed, and `job.status=running` is published before the first
/// `job.stats` event (spec.md §8's event-ordering invariant).
#[tokio::test]
async fn happy_path_runs_to_completion_with_ordered_events() {
    let (store, bus, supervisor, tmp) = harness(4).await;
    let output_dir = tmp.path().join("output/hls/s1").to_string_lossy().to_string();

    let mut status_sub = bus.subscribe(hlsforge::Topic::JobStatus, None);
    let mut stats_sub = bus.subscribe(hlsforge::Topic::JobStats, None);

    let script = "/bin/sh -c 'for i in 1 2 3; do printf \"frame=%d\\nfps=25.0\\nbitrate=100kbits/s\\nout_time_us=%d\\nprogress=continue\\n\" \"$i\" $((i * 1000000)) 1>&2; sleep 0.05; done; printf \"progress=end\\n\" 1>&2'";
    let job_id = create_job_with_override(&store, "s1", &output_dir, script).await;

    let job = supervisor.start(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.pid.is_some());

    let first_status = status_sub.recv().await.unwrap();
    match first_status.payload {
        hlsforge::EventPayload::Status { status, .. } => assert_eq!(status, JobStatus::Running),
        _ => panic!("expected a status event"),
    }
    let first_stats = stats_sub.recv().await.unwrap();
    assert!(matches!(first_stats.payload, hlsforge::EventPayload::Stats(_)));

    let finished = wait_until_terminal(&store, &job_id, Duration::from_secs(5)).await;
    assert!(finished, "job did not reach a terminal state in time");

    let job = store.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.pid.is_none());
}

async fn wait_until_terminal(store: &Store, job_id: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = store.get_job(job_id).await.unwrap().status;
        if matches!(status, JobStatus::Completed | JobStatus::Error | JobStatus::Stopped) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Seed scenario 4: starting a third job past the concurrency cap is
/// rejected as a conflict and leaves it untouched; it succeeds once a slot
/// frees up.
#[tokio::test]
async fn concurrency_cap_rejects_then_admits_after_slot_frees() {
    let (store, _bus, supervisor, tmp) = harness(2).await;
    let dir = |n: usize| tmp.path().join(format!("output/hls/s{n}")).to_string_lossy().to_string();
    let sleep_cmd = "/bin/sh -c 'sleep 5'";

    let j1 = create_job_with_override(&store, "s1", &dir(1), sleep_cmd).await;
    let j2 = create_job_with_override(&store, "s2", &dir(2), sleep_cmd).await;
    let j3 = create_job_with_override(&store, "s3", &dir(3), sleep_cmd).await;

    assert!(supervisor.start(&j1).await.is_ok());
    assert!(supervisor.start(&j2).await.is_ok());

    let err = supervisor.start(&j3).await.unwrap_err();
    assert!(matches!(err, hlsforge::EngineError::Conflict(_)));
    let j3_job = store.get_job(&j3).await.unwrap();
    assert_eq!(j3_job.status, JobStatus::Pending);

    supervisor.stop(&j1).await.unwrap();
    assert!(supervisor.start(&j3).await.is_ok());
}

/// Seed scenario 5: a job that ignores SIGTERM is killed after the grace
/// period elapses; the final status is `stopped`, and no process survives.
#[tokio::test]
async fn stop_escalates_to_force_kill_after_grace_period() {
    let (store, _bus, supervisor, tmp) = harness(4).await;
    let output_dir = tmp.path().join("output/hls/s1").to_string_lossy().to_string();
    let marker = format!("hlsforge-test-marker-{}", uuid::Uuid::new_v4());
    let script = format!("/bin/sh -c 'trap \"\" TERM; while true; do sleep 1; done' -- {marker}");

    let job_id = create_job_with_override(&store, "s1", &output_dir, &script).await;
    supervisor.start(&job_id).await.unwrap();

    let started = std::time::Instant::now();
    let job = supervisor.stop(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5), "stop() should escalate well within the timeout ceiling");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut sys = sysinfo::System::new_all();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    let survivors = sys
        .processes()
        .values()
        .filter(|p| p.cmd().iter().any(|a| a.to_string_lossy().contains(&marker)))
        .count();
    assert_eq!(survivors, 0, "process group must have no survivors after force-kill");
}

/// Seed scenario 6: a job the store thinks is running, whose pid no longer
/// exists, is transitioned to `error` with a diagnostic message on boot.
#[tokio::test]
async fn boot_reconciliation_marks_missing_process_as_error() {
    let (store, _bus, supervisor, tmp) = harness(4).await;
    let output_dir = tmp.path().join("output/hls/s1").to_string_lossy().to_string();

    let job_id = uuid::Uuid::new_v4().to_string();
    store
        .create_job(&job_id, "s1", 5, &hls_config(&output_dir), None, false)
        .await
        .unwrap();
    store
        .transition_to_running(&job_id, 999_999, time::OffsetDateTime::now_utc())
        .await
        .unwrap();

    supervisor.reconcile_on_boot().await.unwrap();

    let job = store.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("process missing"));
}
