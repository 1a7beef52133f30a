// Event Bus (C6): typed in-process pub/sub over job.status, job.stats,
// job.log, system.metrics (spec.md §4.6). Built directly on
// `tokio::sync::broadcast` — its ring buffer already gives us the exact
// semantics the spec asks for: publish never blocks, and a receiver that
// falls more than the buffer's capacity behind gets `Lagged(n)` on its next
// `recv` instead of stalling the publisher. We fold that `n` into the next
// delivered event's `lag_count` rather than inventing a second channel type.

use crate::job::{JobStatus, StatisticsSample};
use time::OffsetDateTime;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    JobStatus,
    JobStats,
    JobLog,
    SystemMetrics,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Status {
        job_id: String,
        status: JobStatus,
        error_message: Option<String>,
    },
    Stats(StatisticsSample),
    Log {
        job_id: String,
        line: String,
    },
    SystemMetrics {
        cpu_percent: f32,
        memory_mb: f32,
        running_jobs: usize,
    },
}

impl EventPayload {
    fn topic(&self) -> Topic {
        match self {
            EventPayload::Status { .. } => Topic::JobStatus,
            EventPayload::Stats(_) => Topic::JobStats,
            EventPayload::Log { .. } => Topic::JobLog,
            EventPayload::SystemMetrics { .. } => Topic::SystemMetrics,
        }
    }

    fn job_id(&self) -> Option<&str> {
        match self {
            EventPayload::Status { job_id, .. } => Some(job_id),
            EventPayload::Stats(s) => Some(&s.job_id),
            EventPayload::Log { job_id, .. } => Some(job_id),
            EventPayload::SystemMetrics { .. } => None,
        }
    }
}

/// A delivered event plus how many prior events this particular subscriber
/// missed before it (spec.md §4.6: "a `lag_count` is attached to the next
/// delivered event so clients can detect loss").
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub payload: EventPayload,
    pub published_at: OffsetDateTime,
    pub lag_count: u64,
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<EventPayload>,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Never blocks: a full subscriber buffer just drops that subscriber's
    /// oldest entry, surfaced to it as `Lagged` on its next recv.
    pub fn publish(&self, payload: EventPayload) {
        // No receivers is not an error here — publishing with nobody
        // listening is normal (e.g. no SSE client attached to a job yet).
        let _ = self.tx.send(payload);
    }

    pub fn subscribe(&self, topic: Topic, job_filter: Option<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topic,
            job_filter,
            pending_lag: 0,
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus. Dropping it is the entire unsubscribe
/// contract — idempotent by construction, no explicit `unsubscribe` call
/// needed (spec.md §4.6).
pub struct Subscription {
    rx: broadcast::Receiver<EventPayload>,
    topic: Topic,
    job_filter: Option<String>,
    pending_lag: u64,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => {
                    if payload.topic() != self.topic {
                        continue;
                    }
                    if let Some(filter) = &self.job_filter {
                        if payload.job_id() != Some(filter.as_str()) {
                            continue;
                        }
                    }
                    let lag_count = std::mem::take(&mut self.pending_lag);
                    return Some(BusEvent {
                        payload,
                        published_at: OffsetDateTime::now_utc(),
                        lag_count,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.pending_lag += n;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_only_sees_its_topic() {
        let bus = Bus::new();
        let mut stats_sub = bus.subscribe(Topic::JobStats, None);

        bus.publish(EventPayload::Status {
            job_id: "job-1".into(),
            status: JobStatus::Running,
            error_message: None,
        });
        bus.publish(EventPayload::Stats(sample("job-1")));

        let event = stats_sub.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Stats(_)));
        assert_eq!(event.lag_count, 0);
    }

    #[tokio::test]
    async fn job_filter_excludes_other_jobs() {
        let bus = Bus::new();
        let mut sub = bus.subscribe(Topic::JobStats, Some("job-1".into()));

        bus.publish(EventPayload::Stats(sample("job-2")));
        bus.publish(EventPayload::Stats(sample("job-1")));

        let event = sub.recv().await.unwrap();
        match event.payload {
            EventPayload::Stats(s) => assert_eq!(s.job_id, "job-1"),
            _ => panic!("expected stats"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag_count_not_a_block() {
        let bus = Bus::with_capacity(2);
        let mut sub = bus.subscribe(Topic::JobStats, None);

        for _ in 0..5 {
            bus.publish(EventPayload::Stats(sample("job-1")));
        }

        let event = sub.recv().await.unwrap();
        assert!(event.lag_count > 0);
    }

    fn sample(job_id: &str) -> StatisticsSample {
        StatisticsSample {
            job_id: job_id.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            fps: 30.0,
            bitrate_bps: 5_000_000,
            dropped_frames: 0,
            speed: 1.0,
            cpu_percent: 10.0,
            memory_mb: 256.0,
            gpu_percent: None,
            total_frames: 100,
            current_time_offset_us: 1_000_000,
        }
    }
}
