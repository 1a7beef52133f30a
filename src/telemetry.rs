// Telemetry Parser (C5): line-by-line classification of the encoder's
// stderr stream into progress bursts and ordinary log lines, plus the
// per-process CPU/memory sampling that rides along with each burst
// (spec.md §4.5).
//
// `ProgressParser` generalizes the teacher's `ffmpeg/progress.rs`
// byte-for-byte in structure: same key=value accumulate-until-`progress=`-line
// approach, extended with the `drop_frames` and `bitrate` keys the teacher
// didn't need (it only ever displayed a percentage) but a StatisticsSample
// does.

use crate::bus::{Bus, EventPayload};
use crate::job::StatisticsSample;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const LOG_TAIL_CAPACITY: usize = 40;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderProgress {
    pub frame: u64,
    pub fps: f32,
    pub speed: f32,
    pub bitrate_bps: i64,
    pub dropped_frames: u64,
    pub out_time_us: i64,
    pub is_done: bool,
}

/// Accumulates `key=value` lines until a `progress=` line closes the burst.
pub struct ProgressParser {
    current_block: HashMap<String, String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            current_block: HashMap::new(),
        }
    }

    /// Returns `Some(progress)` once a burst completes; `None` while still
    /// accumulating or if the line isn't a recognized key=value pair.
    pub fn feed_line(&mut self, line: &str) -> Option<EncoderProgress> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        let (key, value) = (key.trim(), value.trim());

        if key == "progress" {
            let progress = self.build_progress(value == "end");
            self.current_block.clear();
            return Some(progress);
        }

        self.current_block.insert(key.to_string(), value.to_string());
        None
    }

    fn build_progress(&self, is_done: bool) -> EncoderProgress {
        EncoderProgress {
            frame: self.parse_u64("frame"),
            fps: self.parse_f32("fps"),
            speed: self.parse_speed(),
            bitrate_bps: self.parse_bitrate(),
            dropped_frames: self.parse_u64("drop_frames"),
            out_time_us: self.parse_i64("out_time_us"),
            is_done,
        }
    }

    fn parse_u64(&self, key: &str) -> u64 {
        self.current_block.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    fn parse_i64(&self, key: &str) -> i64 {
        self.current_block.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    fn parse_f32(&self, key: &str) -> f32 {
        self.current_block.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
    }

    /// `speed` arrives as e.g. `"1.23x"` — the trailing `x` must go.
    fn parse_speed(&self) -> f32 {
        self.current_block
            .get("speed")
            .map(|v| v.trim_end_matches('x'))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0)
    }

    /// `bitrate` arrives as e.g. `"4815.3kbits/s"` or `"N/A"`.
    fn parse_bitrate(&self) -> i64 {
        self.current_block
            .get("bitrate")
            .and_then(|v| parse_bitrate_kbits(v))
            .unwrap_or(0)
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bitrate_kbits(raw: &str) -> Option<i64> {
    let raw = raw.trim().trim_end_matches("kbits/s").trim();
    let kbits: f64 = raw.parse().ok()?;
    Some((kbits * 1000.0) as i64)
}

#[derive(Debug, Clone, Copy)]
pub struct TelemetryConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_interval: Duration::from_millis(1000),
        }
    }
}

/// What the telemetry task hands back once the encoder's stderr closes: the
/// last lines seen, used by the Supervisor to build `error_message` on a
/// non-zero exit (spec.md §4.4, §7).
pub struct TelemetryOutcome {
    pub log_tail: Vec<String>,
    pub samples_observed: u64,
}

/// Reads `stderr` to EOF, classifying each line as a progress burst or a
/// plain log line. Progress bursts are published on the bus immediately and
/// also buffered for batched persistence (spec.md §4.5: "emits on each
/// complete burst... persisted in batches of up to K or every T ms").
/// Log lines are forwarded to `log_tx` for the log-file writer task and,
/// always, published on the `job.log` bus topic.
///
/// `first_line_tx` fires once, the moment the very first line of stderr is
/// read (regardless of whether it completes a progress burst), so the
/// Supervisor's spawn-startup watchdog (spec.md §5) can tell a silent hang
/// apart from a process that's merely slow to finish its first burst.
pub async fn run_telemetry_stream<R>(
    job_id: String,
    pid: u32,
    stderr: R,
    bus: Arc<Bus>,
    store: Arc<Store>,
    cfg: TelemetryConfig,
    log_tx: mpsc::UnboundedSender<String>,
    mut first_line_tx: Option<tokio::sync::oneshot::Sender<()>>,
) -> TelemetryOutcome
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut parser = ProgressParser::new();
    let mut log_tail: Vec<String> = Vec::with_capacity(LOG_TAIL_CAPACITY);
    let mut pending: Vec<StatisticsSample> = Vec::with_capacity(cfg.batch_size);
    let mut last_flush = Instant::now();
    let mut last_timestamp: Option<OffsetDateTime> = None;
    let mut samples_observed = 0u64;
    let mut sys = System::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };

        if let Some(tx) = first_line_tx.take() {
            let _ = tx.send(());
        }

        match parser.feed_line(&line) {
            Some(progress) if !progress.is_done => {
                samples_observed += 1;
                let (cpu_percent, memory_mb) = sample_process(&mut sys, pid);

                // Strictly monotonic timestamps even if the system clock
                // hasn't advanced between two bursts (spec.md §8).
                let mut timestamp = OffsetDateTime::now_utc();
                if let Some(prev) = last_timestamp {
                    if timestamp <= prev {
                        timestamp = prev + time::Duration::microseconds(1);
                    }
                }
                last_timestamp = Some(timestamp);

                let sample = StatisticsSample {
                    job_id: job_id.clone(),
                    timestamp,
                    fps: progress.fps,
                    bitrate_bps: progress.bitrate_bps,
                    dropped_frames: progress.dropped_frames,
                    speed: progress.speed,
                    cpu_percent,
                    memory_mb,
                    gpu_percent: None,
                    total_frames: progress.frame,
                    current_time_offset_us: progress.out_time_us,
                };

                bus.publish(EventPayload::Stats(sample.clone()));
                pending.push(sample);

                if pending.len() >= cfg.batch_size || last_flush.elapsed() >= cfg.batch_interval {
                    flush_batch(&store, &job_id, &mut pending).await;
                    last_flush = Instant::now();
                }
            }
            Some(_done) => {
                // Final burst before the process exits; nothing further to
                // record, the Supervisor's exit-waiter owns the transition.
            }
            None => {
                if log_tail.len() == LOG_TAIL_CAPACITY {
                    log_tail.remove(0);
                }
                log_tail.push(line.clone());
                bus.publish(EventPayload::Log {
                    job_id: job_id.clone(),
                    line: line.clone(),
                });
                let _ = log_tx.send(line);
            }
        }
    }

    flush_batch(&store, &job_id, &mut pending).await;

    TelemetryOutcome {
        log_tail,
        samples_observed,
    }
}

async fn flush_batch(store: &Store, job_id: &str, pending: &mut Vec<StatisticsSample>) {
    if pending.is_empty() {
        return;
    }
    if let Err(e) = store.insert_statistics_batch(pending).await {
        tracing::warn!(job_id, error = %e, "failed to persist statistics batch");
    }
    pending.clear();
}

fn sample_process(sys: &mut System, pid: u32) -> (f32, f32) {
    let pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match sys.process(pid) {
        Some(proc) => (proc.cpu_usage(), proc.memory() as f32 / (1024.0 * 1024.0)),
        None => (0.0, 0.0),
    }
}

/// Publishes a `system.metrics` sample aggregating host-wide CPU/memory and
/// the current running-job count (spec.md §4.6 topic list). Called on the
/// same cadence as telemetry batching by the Supervisor's housekeeping task.
pub fn publish_system_metrics(bus: &Bus, sys: &mut System, running_jobs: usize) {
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    let cores = sys.cpus();
    let cpu_percent = if cores.is_empty() {
        0.0
    } else {
        cores.iter().map(|c| c.cpu_usage()).sum::<f32>() / cores.len() as f32
    };
    let memory_mb = sys.used_memory() as f32 / (1024.0 * 1024.0);
    bus.publish(EventPayload::SystemMetrics {
        cpu_percent,
        memory_mb,
        running_jobs,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_complete_block() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed_line("frame=100").is_none());
        assert!(parser.feed_line("fps=25.0").is_none());
        assert!(parser.feed_line("speed=1.5x").is_none());
        assert!(parser.feed_line("bitrate=4815.3kbits/s").is_none());
        assert!(parser.feed_line("drop_frames=2").is_none());
        assert!(parser.feed_line("out_time_us=4000000").is_none());

        let p = parser.feed_line("progress=continue").unwrap();
        assert_eq!(p.frame, 100);
        assert!((p.fps - 25.0).abs() < f32::EPSILON);
        assert!((p.speed - 1.5).abs() < f32::EPSILON);
        assert_eq!(p.bitrate_bps, 4_815_300);
        assert_eq!(p.dropped_frames, 2);
        assert_eq!(p.out_time_us, 4_000_000);
        assert!(!p.is_done);
    }

    #[test]
    fn parse_end_block() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed_line("frame=200").is_none());
        let p = parser.feed_line("progress=end").unwrap();
        assert_eq!(p.frame, 200);
        assert!(p.is_done);
    }

    #[test]
    fn non_progress_line_is_not_a_burst() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed_line("libx264 @ 0x55f2: using cpu capabilities").is_none());
    }

    #[test]
    fn na_bitrate_defaults_to_zero() {
        let mut parser = ProgressParser::new();
        parser.feed_line("bitrate=N/A");
        let p = parser.feed_line("progress=continue").unwrap();
        assert_eq!(p.bitrate_bps, 0);
    }
}
