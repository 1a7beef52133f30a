// hlsforge: live video encoding orchestrator — job lifecycle engine for
// FFmpeg-backed HLS/file/stream outputs (spec.md §1-§9). `src/bin/ipcd.rs`
// is the thin stdio transport; everything that matters lives here so it can
// be exercised directly by the module test suites without going through a
// subprocess.

pub mod bus;
pub mod compiler;
pub mod config;
pub mod env;
pub mod error;
pub mod ipc;
pub mod job;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod telemetry;

pub use bus::{Bus, BusEvent, EventPayload, Topic};
pub use env::{EngineConfig, EnvironmentContext, HwInventory, StaticHwInventory};
pub use error::{EngineError, EngineResult};
pub use job::{ArchivedJob, Job, JobStatus, StatisticsSample};
pub use service::{CreatedJob, JobService};
pub use store::Store;
pub use supervisor::Supervisor;
