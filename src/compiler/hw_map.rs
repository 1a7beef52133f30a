// The fixed hardware encoder mapping table from spec.md §4.2. Missing cells
// (e.g. VideoToolbox + AV1) are represented as `None`; the caller falls back
// to the software encoder and records a warning.

use crate::config::{HwAccel, VideoCodec};

pub fn hardware_encoder_name(accel: HwAccel, codec: VideoCodec) -> Option<&'static str> {
    use HwAccel::*;
    use VideoCodec::*;
    match (accel, codec) {
        (Nvenc, H264) => Some("h264_nvenc"),
        (Nvenc, H265) => Some("hevc_nvenc"),
        (Nvenc, Av1) => Some("av1_nvenc"),
        (Vaapi, H264) => Some("h264_vaapi"),
        (Vaapi, H265) => Some("hevc_vaapi"),
        (Vaapi, Av1) => Some("av1_vaapi"),
        (Videotoolbox, H264) => Some("h264_videotoolbox"),
        (Videotoolbox, H265) => Some("hevc_videotoolbox"),
        (Videotoolbox, Av1) => None,
        (None, _) => None,
        (Vaapi, Vp9) | (Nvenc, Vp9) | (Videotoolbox, Vp9) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_spec() {
        assert_eq!(
            hardware_encoder_name(HwAccel::Nvenc, VideoCodec::H264),
            Some("h264_nvenc")
        );
        assert_eq!(
            hardware_encoder_name(HwAccel::Videotoolbox, VideoCodec::Av1),
            None
        );
    }
}
