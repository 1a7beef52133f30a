// Environment-provided configuration (spec.md §6) and the EnvironmentContext
// the Command Compiler consumes (spec.md §4.2). Generalizes the teacher's
// `--max-parallel` CLI-arg parsing in `main.rs` into a full env-var table.

use crate::config::{HwAccel, VideoCodec};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_jobs: usize,
    pub default_segment_duration: u32,
    pub auto_restart_jobs_on_boot: bool,
    pub hls_url: String,
    pub input_path: String,
    pub output_path: String,
    pub data_path: String,
    pub stop_grace: Duration,
    pub spawn_startup_deadline: Duration,
    pub telemetry_batch_size: usize,
    pub telemetry_batch_interval: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_usize("MAX_CONCURRENT_JOBS", 10),
            default_segment_duration: env_u32("DEFAULT_SEGMENT_DURATION", 6),
            auto_restart_jobs_on_boot: env_bool("AUTO_RESTART_JOBS_ON_BOOT", false),
            hls_url: env::var("HLS_URL").unwrap_or_else(|_| "http://localhost/hls".to_string()),
            input_path: env::var("INPUT_PATH").unwrap_or_else(|_| "/input".to_string()),
            output_path: env::var("OUTPUT_PATH").unwrap_or_else(|_| "/output".to_string()),
            data_path: env::var("DATA_PATH").unwrap_or_else(|_| "/data".to_string()),
            stop_grace: Duration::from_secs(10),
            spawn_startup_deadline: Duration::from_secs(30),
            telemetry_batch_size: 10,
            telemetry_batch_interval: Duration::from_millis(1000),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n: &usize| n >= 1)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key).ok().as_deref() {
        Some("1") | Some("true") | Some("TRUE") | Some("yes") => true,
        Some("0") | Some("false") | Some("FALSE") | Some("no") => false,
        _ => default,
    }
}

/// The hardware encoder inventory: which `{accel, codec}` pairs this host can
/// actually run. Populated by a real hardware probe in production (the
/// ffprobe-equivalent inspector is an out-of-scope collaborator); a
/// conservative default assumes nothing beyond software encoding.
pub trait HwInventory: Send + Sync {
    fn supports(&self, accel: HwAccel, codec: VideoCodec) -> bool;
}

#[derive(Default)]
pub struct StaticHwInventory {
    pairs: HashSet<(HwAccel, VideoCodec)>,
}

impl StaticHwInventory {
    pub fn new(pairs: impl IntoIterator<Item = (HwAccel, VideoCodec)>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Every `{accel, codec}` pair the fixed hardware mapping table
    /// (spec.md §4.2) names, i.e. assume full hardware availability. Useful
    /// for tests and for hosts that don't wire in a real probe.
    pub fn assume_all_mapped() -> Self {
        use HwAccel::*;
        use VideoCodec::*;
        Self::new([
            (Nvenc, H264),
            (Nvenc, H265),
            (Nvenc, Av1),
            (Vaapi, H264),
            (Vaapi, H265),
            (Vaapi, Av1),
            (Videotoolbox, H264),
            (Videotoolbox, H265),
        ])
    }
}

impl HwInventory for StaticHwInventory {
    fn supports(&self, accel: HwAccel, codec: VideoCodec) -> bool {
        accel == HwAccel::None || self.pairs.contains(&(accel, codec))
    }
}

/// What the Command Compiler is allowed to know about the world: the
/// hardware inventory, the base output directories, and the HLS public URL
/// root (spec.md §4.2). Deliberately narrow — the compiler must stay pure
/// and deterministic for identical `(config, context)` pairs.
pub struct EnvironmentContext {
    pub hw_inventory: Box<dyn HwInventory>,
    pub hls_output_root: String,
    pub file_output_root: String,
    pub hls_url_root: String,
    pub default_segment_duration: u32,
}

impl EnvironmentContext {
    pub fn from_engine_config(cfg: &EngineConfig, hw_inventory: Box<dyn HwInventory>) -> Self {
        Self {
            hw_inventory,
            hls_output_root: format!("{}/hls", cfg.output_path),
            file_output_root: format!("{}/files", cfg.output_path),
            hls_url_root: cfg.hls_url.clone(),
            default_segment_duration: cfg.default_segment_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_all_mapped_covers_table_minus_missing_cells() {
        let inv = StaticHwInventory::assume_all_mapped();
        assert!(inv.supports(HwAccel::Nvenc, VideoCodec::H264));
        assert!(!inv.supports(HwAccel::Videotoolbox, VideoCodec::Av1));
        assert!(inv.supports(HwAccel::None, VideoCodec::Av1));
    }
}
