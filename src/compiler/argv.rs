// Deterministic argv assembly, in the fixed order spec.md §4.2 mandates.
// Generalizes the teacher's `build_ffmpeg_args` (ffmpeg/runner.rs), which
// hard-codes one proxy-transcode shape, into the full set of output kinds
// and ABR ladders this engine supports.

use super::hw_map::hardware_encoder_name;
use super::plan::{OutputPlan, PrimaryOutput, StreamKind};
use super::warnings::WarningCode;
use crate::config::{HwAccel, OutputFormat, SegmentType, UnifiedConfig, VideoCodec};
use crate::env::EnvironmentContext;

const DEFAULT_SEGMENT_PATTERN: &str = "segment_%03d.ts";

pub struct Compiled {
    pub argv: Vec<String>,
    pub plan: OutputPlan,
    pub warnings: Vec<WarningCode>,
}

/// Translates a validated, normalized `UnifiedConfig` plus an
/// `EnvironmentContext` into an argv vector, an `OutputPlan`, and a warning
/// list. Pure: identical inputs always produce identical outputs.
pub fn compile(cfg: &UnifiedConfig, ctx: &EnvironmentContext) -> Compiled {
    let mut argv = Vec::new();
    let mut warnings = Vec::new();

    // 1. ffmpeg
    argv.push("ffmpeg".to_string());

    // 2. Hardware-accel input flags.
    push_hwaccel_input_flags(&mut argv, cfg.hardware_accel.unwrap_or(HwAccel::None));

    // 3. Loop / real-time flags.
    if cfg.loop_input {
        argv.push("-stream_loop".to_string());
        argv.push("-1".to_string());
        argv.push("-re".to_string());
    }

    // 4. Input-format flag (device inputs only).
    if let Some(fmt) = &cfg.input_format {
        argv.push("-f".to_string());
        argv.push(fmt.clone());
    }

    // 5. Input auxiliary args.
    if let Some(v) = &cfg.input_framerate {
        argv.push("-framerate".to_string());
        argv.push(v.clone());
    }
    if let Some(v) = &cfg.input_video_size {
        argv.push("-video_size".to_string());
        argv.push(v.clone());
    }
    if let Some(v) = &cfg.input_pixel_format {
        argv.push("-pixel_format".to_string());
        argv.push(v.clone());
    }
    if let Some(extra) = &cfg.input_device_args {
        argv.extend(parse_shell_args(extra));
    }

    // 6. -i <input>.
    argv.push("-i".to_string());
    argv.push(cfg.input_file.clone());

    // 7. Stream maps, in declared order.
    for map in &cfg.stream_maps {
        argv.push("-map".to_string());
        argv.push(map.input_stream.clone());
    }

    let output_format = cfg
        .output_format
        .expect("compile() requires a validated config with output_format set");

    // 8-9. Video/audio codec options, or the ABR per-variant equivalent.
    if cfg.abr_enabled {
        push_abr_variant_args(&mut argv, cfg, ctx, &mut warnings);
    } else {
        push_single_rendition_video_args(&mut argv, cfg, ctx, &mut warnings);
        push_audio_args(&mut argv, cfg);
    }

    // 10. Machine-readable progress reporting on stderr, consumed by the
    // Telemetry Parser (teacher ffmpeg/runner.rs: pushed right before the
    // output args).
    argv.push("-progress".to_string());
    argv.push("pipe:2".to_string());

    // 11-12. Output-format-specific block, then auxiliary outputs.
    let plan = push_output_block(&mut argv, cfg, ctx, output_format);

    // 13. Custom user args, appended last.
    if let Some(extra) = &cfg.custom_args {
        argv.extend(parse_shell_args(extra));
    }

    Compiled {
        argv,
        plan,
        warnings,
    }
}

fn push_hwaccel_input_flags(argv: &mut Vec<String>, accel: HwAccel) {
    match accel {
        HwAccel::Vaapi => {
            argv.push("-vaapi_device".to_string());
            argv.push("/dev/dri/renderD128".to_string());
        }
        HwAccel::Nvenc => {
            argv.push("-init_hw_device".to_string());
            argv.push("cuda=cuda:0".to_string());
            argv.push("-hwaccel".to_string());
            argv.push("cuda".to_string());
            argv.push("-hwaccel_output_format".to_string());
            argv.push("cuda".to_string());
        }
        HwAccel::Videotoolbox => {
            argv.push("-hwaccel".to_string());
            argv.push("videotoolbox".to_string());
        }
        HwAccel::None => {}
    }
}

/// Resolves the actual encoder identifier for one `(codec, accel)` pair,
/// falling back to software and recording a warning when the accelerator has
/// no mapping or the environment doesn't report it as available (spec.md
/// §4.2, §3: "the config remains valid" even when this happens).
fn resolve_encoder(
    codec: VideoCodec,
    accel: HwAccel,
    ctx: &EnvironmentContext,
    variant_index: Option<usize>,
    warnings: &mut Vec<WarningCode>,
) -> String {
    if accel == HwAccel::None {
        return codec.software_encoder().to_string();
    }
    match hardware_encoder_name(accel, codec) {
        Some(name) if ctx.hw_inventory.supports(accel, codec) => name.to_string(),
        _ => {
            warnings.push(WarningCode::HardwareAccelUnmapped {
                accel,
                codec,
                variant_index,
            });
            codec.software_encoder().to_string()
        }
    }
}

fn push_single_rendition_video_args(
    argv: &mut Vec<String>,
    cfg: &UnifiedConfig,
    ctx: &EnvironmentContext,
    warnings: &mut Vec<WarningCode>,
) {
    let codec = cfg
        .video_codec
        .expect("compile() requires a validated config with video_codec set");
    let accel = cfg.hardware_accel.unwrap_or(HwAccel::None);
    let encoder = resolve_encoder(codec, accel, ctx, None, warnings);

    argv.push("-c:v".to_string());
    argv.push(encoder);
    if let Some(b) = &cfg.video_bitrate {
        argv.push("-b:v".to_string());
        argv.push(b.clone());
    }
    if let Some(r) = cfg.frame_rate {
        argv.push("-r".to_string());
        argv.push(r.to_string());
    }
    if let Some(p) = &cfg.preset {
        argv.push("-preset".to_string());
        argv.push(p.clone());
    }
    if let Some(p) = &cfg.profile {
        argv.push("-profile:v".to_string());
        argv.push(p.clone());
    }
    if let Some(l) = &cfg.level {
        argv.push("-level".to_string());
        argv.push(l.clone());
    }
    if let Some(res) = &cfg.resolution {
        argv.push("-s".to_string());
        argv.push(res.clone());
    }
    if let Some(vf) = &cfg.video_filters {
        argv.push("-vf".to_string());
        argv.push(vf.clone());
    }
}

fn push_audio_args(argv: &mut Vec<String>, cfg: &UnifiedConfig) {
    let codec = cfg
        .audio_codec
        .clone()
        .expect("compile() requires a validated config with audio_codec set");
    argv.push("-c:a".to_string());
    argv.push(codec);
    if let Some(b) = &cfg.audio_bitrate {
        argv.push("-b:a".to_string());
        argv.push(b.clone());
    }
    if let Some(c) = cfg.audio_channels {
        argv.push("-ac".to_string());
        argv.push(c.to_string());
    }
    if let Some(sr) = cfg.audio_sample_rate {
        argv.push("-ar".to_string());
        argv.push(sr.to_string());
    }
    if let Some(vol) = cfg.audio_volume {
        argv.push("-af".to_string());
        argv.push(format!("volume={vol}"));
    }
}

/// Per-variant video encoder options using FFmpeg variant-stream notation,
/// followed by one `-var_stream_map` built from ladder order (spec.md §4.2).
fn push_abr_variant_args(
    argv: &mut Vec<String>,
    cfg: &UnifiedConfig,
    ctx: &EnvironmentContext,
    warnings: &mut Vec<WarningCode>,
) {
    let accel = cfg.hardware_accel.unwrap_or(HwAccel::None);
    let mut stream_map_entries = Vec::with_capacity(cfg.ladder.len());

    for (i, variant) in cfg.ladder.iter().enumerate() {
        argv.push("-map".to_string());
        argv.push("0:v:0".to_string());
        argv.push("-map".to_string());
        argv.push("0:a:0".to_string());

        let codec = variant.video_codec.or(cfg.video_codec).expect(
            "compile() requires a validated config where every ladder variant resolves a codec",
        );
        let encoder = resolve_encoder(codec, accel, ctx, Some(i), warnings);
        argv.push(format!("-c:v:{i}"));
        argv.push(encoder);
        if let Some(b) = &variant.video_bitrate {
            argv.push(format!("-b:v:{i}"));
            argv.push(b.clone());
        }
        argv.push(format!("-s:{i}"));
        argv.push(variant.resolution.clone());

        argv.push(format!("-c:a:{i}"));
        argv.push(
            cfg.audio_codec
                .clone()
                .expect("compile() requires a validated config with audio_codec set"),
        );

        stream_map_entries.push(format!("v:{i},a:{i},name:{}", variant.name));
    }

    argv.push("-var_stream_map".to_string());
    argv.push(stream_map_entries.join(" "));
}

fn push_output_block(
    argv: &mut Vec<String>,
    cfg: &UnifiedConfig,
    ctx: &EnvironmentContext,
    format: OutputFormat,
) -> OutputPlan {
    let primary = match format {
        OutputFormat::Hls => push_hls_block(argv, cfg, ctx),
        OutputFormat::Udp | OutputFormat::Rtmp => push_stream_block(argv, cfg, format),
        _ => push_file_block(argv, cfg, ctx, format),
    };

    let mut auxiliary_outputs = Vec::new();
    for url in &cfg.udp_outputs {
        argv.push("-f".to_string());
        argv.push("mpegts".to_string());
        argv.push(url.clone());
        auxiliary_outputs.push(url.clone());
    }
    for url in &cfg.rtmp_outputs {
        argv.push("-f".to_string());
        argv.push("flv".to_string());
        argv.push(url.clone());
        auxiliary_outputs.push(url.clone());
    }

    OutputPlan {
        primary,
        auxiliary_outputs,
    }
}

fn push_hls_block(argv: &mut Vec<String>, cfg: &UnifiedConfig, ctx: &EnvironmentContext) -> PrimaryOutput {
    let base_dir = cfg
        .output_dir
        .clone()
        .expect("compile() requires a validated config with output_dir set for hls");
    let segment_pattern = cfg
        .hls
        .segment_pattern
        .clone()
        .unwrap_or_else(|| DEFAULT_SEGMENT_PATTERN.to_string());
    let dir_name = base_dir
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(&base_dir)
        .to_string();

    argv.push("-f".to_string());
    argv.push("hls".to_string());
    argv.push("-hls_time".to_string());
    argv.push(cfg.hls.segment_duration.unwrap_or(ctx.default_segment_duration).to_string());
    argv.push("-hls_list_size".to_string());
    argv.push(cfg.hls.playlist_size.unwrap_or(5).to_string());
    if let Some(pt) = cfg.hls.playlist_type {
        argv.push("-hls_playlist_type".to_string());
        argv.push(playlist_type_str(pt).to_string());
    }
    let segment_type = cfg.hls.segment_type.unwrap_or(SegmentType::Mpegts);
    argv.push("-hls_segment_type".to_string());
    argv.push(segment_type_str(segment_type).to_string());

    let master_playlist_path = if cfg.abr_enabled {
        argv.push("-hls_segment_filename".to_string());
        argv.push(format!("{base_dir}/%v/{segment_pattern}"));
        let master = format!("{base_dir}/master.m3u8");
        argv.push(master.clone());
        master
    } else {
        argv.push("-hls_segment_filename".to_string());
        argv.push(format!("{base_dir}/{segment_pattern}"));
        let master = format!("{base_dir}/master.m3u8");
        argv.push(master.clone());
        master
    };

    PrimaryOutput::Hls {
        base_dir: base_dir.clone(),
        master_playlist_path,
        public_master_url: format!("{}/{}/master.m3u8", ctx.hls_url_root, dir_name),
        segment_pattern,
    }
}

fn playlist_type_str(pt: crate::config::PlaylistType) -> &'static str {
    use crate::config::PlaylistType::*;
    match pt {
        Live => "live",
        Event => "event",
        Vod => "vod",
    }
}

fn segment_type_str(st: SegmentType) -> &'static str {
    match st {
        SegmentType::Mpegts => "mpegts",
        SegmentType::Fmp4 => "fmp4",
    }
}

fn push_stream_block(argv: &mut Vec<String>, cfg: &UnifiedConfig, format: OutputFormat) -> PrimaryOutput {
    let url = cfg
        .output_url
        .clone()
        .expect("compile() requires a validated config with output_url set for stream outputs");
    let (muxer, kind) = match format {
        OutputFormat::Udp => ("mpegts", StreamKind::Udp),
        OutputFormat::Rtmp => ("flv", StreamKind::Rtmp),
        _ => unreachable!("push_stream_block only called for udp/rtmp"),
    };
    argv.push("-f".to_string());
    argv.push(muxer.to_string());
    argv.push(url.clone());
    PrimaryOutput::Stream {
        destination_url: url,
        kind,
    }
}

fn push_file_block(
    argv: &mut Vec<String>,
    cfg: &UnifiedConfig,
    ctx: &EnvironmentContext,
    format: OutputFormat,
) -> PrimaryOutput {
    let path = cfg
        .output_url
        .clone()
        .expect("compile() requires a validated config with output_url set for file outputs");
    argv.push("-f".to_string());
    argv.push(muxer_for(format).to_string());
    argv.push(path.clone());

    let public_download_url = path
        .strip_prefix(&ctx.file_output_root)
        .map(|rest| format!("{}/files{}", ctx.hls_url_root, rest));

    PrimaryOutput::File {
        output_file_path: path,
        public_download_url,
    }
}

fn muxer_for(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::File | OutputFormat::Mp4 => "mp4",
        OutputFormat::Mkv => "matroska",
        OutputFormat::Webm => "webm",
        OutputFormat::Mov => "mov",
        OutputFormat::Avi => "avi",
        _ => unreachable!("muxer_for only called for file-like formats"),
    }
}

/// Parses free-form user args with shell-like quoting. Falls back to naive
/// whitespace splitting if the input has unbalanced quotes, rather than
/// failing the whole compile over one malformed string.
pub fn parse_shell_args(raw: &str) -> Vec<String> {
    shlex::split(raw).unwrap_or_else(|| raw.split_whitespace().map(str::to_string).collect())
}
