// Property tests for the Command Compiler (spec.md §8): determinism and
// argv-ordering invariants must hold for the whole input space, not just the
// handful of seed scenarios exercised by the unit tests beside the code.
// Grounded in the `IONIQ6000-av1-janitor` reference daemon's
// `proptest!`-over-command-construction style.

use hlsforge::config::{AbrVariant, HlsParams, OutputFormat, SegmentType, UnifiedConfig, VideoCodec};
use hlsforge::env::{EnvironmentContext, StaticHwInventory};
use proptest::prelude::*;

fn ctx() -> EnvironmentContext {
    EnvironmentContext::from_engine_config(
        &hlsforge::env::EngineConfig::from_env(),
        Box::new(StaticHwInventory::assume_all_mapped()),
    )
}

fn codec_strategy() -> impl Strategy<Value = VideoCodec> {
    prop_oneof![
        Just(VideoCodec::H264),
        Just(VideoCodec::H265),
        Just(VideoCodec::Vp9),
        Just(VideoCodec::Av1),
    ]
}

fn config_strategy() -> impl Strategy<Value = UnifiedConfig> {
    (codec_strategy(), 100u32..20_000u32, 0usize..=3usize).prop_map(|(codec, bitrate_k, ladder_len)| {
        let ladder: Vec<AbrVariant> = (0..ladder_len)
            .map(|i| AbrVariant {
                name: format!("v{i}"),
                resolution: format!("{}x{}", 640 + i * 100, 360 + i * 100),
                video_bitrate: Some(format!("{}k", bitrate_k + i as u32 * 10)),
                video_codec: Some(codec),
            })
            .collect();
        let abr_enabled = !ladder.is_empty();
        UnifiedConfig {
            input_file: "/input/a.mp4".into(),
            video_codec: Some(codec),
            audio_codec: Some("aac".into()),
            audio_bitrate: Some("128k".into()),
            video_bitrate: Some(format!("{bitrate_k}k")),
            output_format: Some(OutputFormat::Hls),
            output_dir: Some("/output/hls/s1".into()),
            hls: HlsParams {
                segment_type: if abr_enabled { Some(SegmentType::Fmp4) } else { None },
                ..Default::default()
            },
            abr_enabled,
            ladder,
            ..Default::default()
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Repeated compilation of the same config yields byte-identical argv
    /// (spec.md §8: "compile(config) is deterministic").
    #[test]
    fn compile_is_deterministic(cfg in config_strategy()) {
        let environment = ctx();
        let a = hlsforge::compiler::compile(&cfg, &environment);
        let b = hlsforge::compiler::compile(&cfg, &environment);
        prop_assert_eq!(a.argv, b.argv);
    }

    /// `-i` appears exactly once, and it precedes every `-map` and the first
    /// output flag (spec.md §8).
    #[test]
    fn input_flag_precedes_everything_else(cfg in config_strategy()) {
        let compiled = hlsforge::compiler::compile(&cfg, &ctx());
        let argv = &compiled.argv;

        let i_count = argv.iter().filter(|s| s.as_str() == "-i").count();
        prop_assert_eq!(i_count, 1);

        let i_index = argv.iter().position(|s| s == "-i").unwrap();
        for (idx, flag) in argv.iter().enumerate() {
            if flag == "-map" || flag == "-f" {
                prop_assert!(i_index < idx, "-i at {} must precede {} at {}", i_index, flag, idx);
            }
        }
    }

    /// ABR ladders always produce a `var_stream_map` with one entry per
    /// variant, in ladder order (spec.md §8: ABR variant count invariant
    /// restated at the compiler boundary).
    #[test]
    fn abr_ladder_produces_matching_stream_map_entries(cfg in config_strategy()) {
        prop_assume!(cfg.abr_enabled && !cfg.ladder.is_empty());
        let compiled = hlsforge::compiler::compile(&cfg, &ctx());
        let idx = compiled.argv.iter().position(|s| s == "-var_stream_map");
        prop_assert!(idx.is_some());
        let map_value = &compiled.argv[idx.unwrap() + 1];
        let entries: Vec<&str> = map_value.split(' ').collect();
        prop_assert_eq!(entries.len(), cfg.ladder.len());
        for (i, variant) in cfg.ladder.iter().enumerate() {
            prop_assert!(entries[i].contains(&format!("name:{}", variant.name)));
        }
    }
}
