use crate::config::{HwAccel, VideoCodec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningCode {
    /// `hardware_accel` is set but the codec has no mapping for that
    /// accelerator (e.g. VideoToolbox + AV1); the compiler fell back to the
    /// software encoder. `variant_index` is `Some` for ABR ladder entries.
    HardwareAccelUnmapped {
        accel: HwAccel,
        codec: VideoCodec,
        variant_index: Option<usize>,
    },
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningCode::HardwareAccelUnmapped {
                accel,
                codec,
                variant_index,
            } => {
                write!(
                    f,
                    "no {accel:?} encoder mapped for {codec:?}{}, falling back to software",
                    variant_index
                        .map(|i| format!(" (ladder variant {i})"))
                        .unwrap_or_default()
                )
            }
        }
    }
}
