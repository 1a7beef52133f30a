// Command Compiler (C2): deterministic, side-effect-free translation of a
// validated UnifiedConfig + EnvironmentContext into an argv vector, an
// OutputPlan, and a warning list. Same inputs always yield identical
// outputs (spec.md §4.2, §8).

mod argv;
mod hw_map;
mod plan;
mod warnings;

pub use argv::{compile, parse_shell_args, Compiled};
pub use plan::{OutputPlan, PrimaryOutput, StreamKind};
pub use warnings::WarningCode;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AbrVariant, HlsParams, HwAccel, OutputFormat, SegmentType, StreamMap, UnifiedConfig,
        VideoCodec,
    };
    use crate::env::{EnvironmentContext, StaticHwInventory};

    fn ctx() -> EnvironmentContext {
        EnvironmentContext {
            hw_inventory: Box::new(StaticHwInventory::assume_all_mapped()),
            hls_output_root: "/output/hls".into(),
            file_output_root: "/output/files".into(),
            hls_url_root: "http://localhost/hls".into(),
            default_segment_duration: 6,
        }
    }

    fn minimal_hls_config() -> UnifiedConfig {
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

    #[test]
    fn seed_scenario_1_minimal_hls_happy_path() {
        let cfg = minimal_hls_config();
        let compiled = compile(&cfg, &ctx());
        let argv = &compiled.argv;
        assert_eq!(argv[0], "ffmpeg");
        assert!(contains_subsequence(
            argv,
            &["-c:v", "libx264", "-c:a", "aac", "-b:a", "128k"]
        ));
        assert!(contains_subsequence(argv, &["-f", "hls", "-hls_time", "6"]));
        assert!(contains_subsequence(
            argv,
            &["-hls_segment_type", "mpegts"]
        ));
        assert!(argv.last().unwrap().ends_with("/output/hls/s1/master.m3u8"));
    }

    #[test]
    fn seed_scenario_2_abr_hevc_forces_fmp4() {
        let mut cfg = minimal_hls_config();
        cfg.abr_enabled = true;
        cfg.hls = HlsParams {
            segment_type: Some(SegmentType::Fmp4),
            ..Default::default()
        };
        cfg.ladder = vec![
            AbrVariant {
                name: "hi".into(),
                resolution: "1920x1080".into(),
                video_bitrate: Some("5000k".into()),
                video_codec: Some(VideoCodec::H265),
            },
            AbrVariant {
                name: "mid".into(),
                resolution: "1280x720".into(),
                video_bitrate: Some("2500k".into()),
                video_codec: Some(VideoCodec::H264),
            },
            AbrVariant {
                name: "lo".into(),
                resolution: "640x360".into(),
                video_bitrate: Some("800k".into()),
                video_codec: Some(VideoCodec::H264),
            },
        ];
        let compiled = compile(&cfg, &ctx());
        assert!(compiled.warnings.is_empty());
        assert!(contains_subsequence(
            &compiled.argv,
            &["-hls_segment_type", "fmp4"]
        ));
        let idx = compiled
            .argv
            .iter()
            .position(|s| s == "-var_stream_map")
            .expect("var_stream_map present");
        assert_eq!(
            compiled.argv[idx + 1],
            "v:0,a:0,name:hi v:1,a:1,name:mid v:2,a:2,name:lo"
        );
    }

    #[test]
    fn seed_scenario_3_bitrate_roundtrip_to_argv() {
        let mut cfg = minimal_hls_config();
        cfg.video_bitrate = Some("1.5M".into());
        let normalized = crate::config::validate(&cfg).unwrap();
        let compiled = compile(&normalized, &ctx());
        assert!(contains_subsequence(
            &compiled.argv,
            &["-b:v", "1500k"]
        ));
    }

    #[test]
    fn hardware_accel_without_mapping_warns_and_falls_back() {
        let mut cfg = minimal_hls_config();
        cfg.video_codec = Some(VideoCodec::Av1);
        cfg.hardware_accel = Some(HwAccel::Videotoolbox);
        let compiled = compile(&cfg, &ctx());
        assert_eq!(compiled.warnings.len(), 1);
        assert!(contains_subsequence(&compiled.argv, &["-c:v", "libaom-av1"]));
    }

    #[test]
    fn progress_flag_precedes_the_output_block() {
        let cfg = minimal_hls_config();
        let compiled = compile(&cfg, &ctx());
        let progress_idx = compiled
            .argv
            .iter()
            .position(|s| s == "-progress")
            .expect("-progress pipe:2 must be present for the telemetry parser to receive updates");
        assert_eq!(compiled.argv[progress_idx + 1], "pipe:2");
        let output_f = compiled.argv.iter().position(|s| s == "-f").unwrap();
        assert!(progress_idx < output_f);
    }

    #[test]
    fn default_segment_duration_comes_from_environment_context() {
        let cfg = minimal_hls_config();
        let mut ctx = ctx();
        ctx.default_segment_duration = 4;
        let compiled = compile(&cfg, &ctx);
        assert!(contains_subsequence(&compiled.argv, &["-hls_time", "4"]));
    }

    #[test]
    fn determinism_same_inputs_same_argv() {
        let cfg = minimal_hls_config();
        let a = compile(&cfg, &ctx());
        let b = compile(&cfg, &ctx());
        assert_eq!(a.argv, b.argv);
    }

    #[test]
    fn map_precedes_first_output_specification() {
        let mut cfg = minimal_hls_config();
        cfg.stream_maps = vec![
            StreamMap {
                input_stream: "0:v:0".into(),
                output_label: None,
            },
            StreamMap {
                input_stream: "0:a:0".into(),
                output_label: None,
            },
        ];
        let compiled = compile(&cfg, &ctx());
        let first_map = compiled.argv.iter().position(|s| s == "-map").unwrap();
        let first_output_f = compiled
            .argv
            .iter()
            .position(|s| s == "-f")
            .expect("has an output -f flag");
        assert!(first_map < first_output_f);
        let i_index = compiled.argv.iter().position(|s| s == "-i").unwrap();
        assert!(i_index < first_map);
        assert_eq!(compiled.argv.iter().filter(|s| *s == "-i").count(), 1);
    }

    fn contains_subsequence(haystack: &[String], needle: &[&str]) -> bool {
        if needle.is_empty() {
            return true;
        }
        haystack
            .windows(needle.len())
            .any(|w| w.iter().map(String::as_str).eq(needle.iter().copied()))
    }
}
