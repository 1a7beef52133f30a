// Canonical unified configuration record: validation, normalization, and
// deterministic serialization. Pure — no I/O, no subprocess handles.
//
// Generalizes the teacher's `JobOptions` (ipc/protocol.rs) from four proxy
// knobs (audio_codec, proxy_resolution, proxy_codec, hw_accel) to the full
// set of encoder knobs a live-encoding job depends on.

mod normalize;
mod validate;

pub use normalize::normalize_bitrate;
pub use validate::{validate, ValidationProblem};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-facing codec alias. The canonical storage form — translated to an
/// encoder identifier only at compile time (spec.md §9: "one canonical form
/// in storage with deterministic translation at compile time").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Default software encoder identifier, ignoring hardware acceleration.
    pub fn software_encoder(self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libaom-av1",
        }
    }

    /// fMP4 is mandatory for codecs the MPEG-TS muxer cannot carry cleanly.
    pub fn requires_fmp4(self) -> bool {
        matches!(self, VideoCodec::H265 | VideoCodec::Av1)
    }

    pub fn as_alias(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HwAccel {
    None,
    Nvenc,
    Vaapi,
    Videotoolbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Hls,
    Udp,
    Rtmp,
    File,
    Mp4,
    Mkv,
    Webm,
    Mov,
    Avi,
}

impl OutputFormat {
    pub fn is_file_like(self) -> bool {
        matches!(
            self,
            OutputFormat::File
                | OutputFormat::Mp4
                | OutputFormat::Mkv
                | OutputFormat::Webm
                | OutputFormat::Mov
                | OutputFormat::Avi
        )
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::File => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
            OutputFormat::Avi => "avi",
            OutputFormat::Hls | OutputFormat::Udp | OutputFormat::Rtmp => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistType {
    Live,
    Event,
    Vod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Mpegts,
    Fmp4,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HlsParams {
    pub segment_duration: Option<u32>,
    pub playlist_size: Option<u32>,
    pub playlist_type: Option<PlaylistType>,
    pub segment_type: Option<SegmentType>,
    pub segment_pattern: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbrVariant {
    pub name: String,
    pub resolution: String,
    pub video_bitrate: Option<String>,
    pub video_codec: Option<VideoCodec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamMap {
    /// Syntactically `0:v:N`, `0:a:N`, or `0:s:N`.
    pub input_stream: String,
    pub output_label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UnifiedConfig {
    pub input_file: String,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<String>,
    pub output_format: Option<OutputFormat>,

    pub video_bitrate: Option<String>,
    pub audio_bitrate: Option<String>,
    pub resolution: Option<String>,
    pub frame_rate: Option<f64>,
    pub preset: Option<String>,
    pub profile: Option<String>,
    pub level: Option<String>,
    pub hardware_accel: Option<HwAccel>,

    pub hls: HlsParams,

    pub abr_enabled: bool,
    pub ladder: Vec<AbrVariant>,

    pub stream_maps: Vec<StreamMap>,

    pub loop_input: bool,
    /// Input-format flag for device inputs only, e.g. `v4l2`, `dshow` (step 4
    /// of the argv assembly order in spec.md §4.2).
    pub input_format: Option<String>,
    pub input_framerate: Option<String>,
    pub input_video_size: Option<String>,
    pub input_pixel_format: Option<String>,
    /// Free-form user args for the input, parsed with shell-like quoting.
    pub input_device_args: Option<String>,

    pub video_filters: Option<String>,
    pub audio_channels: Option<u32>,
    pub audio_sample_rate: Option<u32>,
    pub audio_volume: Option<f64>,

    pub udp_outputs: Vec<String>,
    pub rtmp_outputs: Vec<String>,

    pub custom_args: Option<String>,

    pub output_dir: Option<String>,
    pub output_url: Option<String>,
}

impl UnifiedConfig {
    /// Deterministic serialization with stable key ordering, so the cached
    /// `command` string and `full_config` cache remain meaningful across
    /// processes (spec.md §4.1).
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        let value = serde_json::to_value(self)?;
        let ordered = order_keys(value);
        serde_json::to_string(&ordered)
    }
}

/// Recursively re-serializes a `serde_json::Value` with object keys sorted,
/// so two structurally-equal configs always produce byte-identical JSON.
fn order_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let ordered: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, order_keys(v))).collect();
            serde_json::to_value(ordered).expect("BTreeMap<String, Value> always serializes")
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(order_keys).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_stable_under_field_reorder() {
        let mut a = UnifiedConfig {
            input_file: "/in.mp4".into(),
            video_codec: Some(VideoCodec::H264),
            ..Default::default()
        };
        let mut b = a.clone();
        // Reordering a Vec that matters (ladder) would change semantics; here
        // we only assert that two structurally identical configs built in a
        // different field-assignment order still canonicalize identically.
        a.audio_codec = Some("aac".into());
        b.audio_codec = Some("aac".into());
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }
}
