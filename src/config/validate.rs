// Pure validation: given a config value, returns either a normalized config
// or the full list of problems found. Never throws, never partially mutates
// the input (spec.md §4.1).

use super::{normalize_bitrate, OutputFormat, UnifiedConfig};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationProblem {
    pub field: String,
    pub message: String,
}

impl ValidationProblem {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates and normalizes a config. On success, returns a config where
/// empty strings have become `None`, numeric strings have been parsed, and
/// bitrates are in canonical `<int>k` form.
pub fn validate(input: &UnifiedConfig) -> Result<UnifiedConfig, Vec<ValidationProblem>> {
    let mut problems = Vec::new();
    let mut cfg = input.clone();

    empty_to_none(&mut cfg);

    if cfg.input_file.trim().is_empty() {
        problems.push(ValidationProblem::new("input_file", "must not be empty"));
    }
    if cfg.video_codec.is_none() {
        problems.push(ValidationProblem::new("video_codec", "required"));
    }
    if cfg.audio_codec.is_none() {
        problems.push(ValidationProblem::new("audio_codec", "required"));
    }
    let output_format = match cfg.output_format {
        Some(f) => f,
        None => {
            problems.push(ValidationProblem::new("output_format", "required"));
            // Can't validate most downstream invariants without a format;
            // record the problem list collected so far immediately.
            return Err(problems);
        }
    };

    if let Some(raw) = &cfg.video_bitrate {
        match normalize_bitrate(raw) {
            Ok(n) => cfg.video_bitrate = Some(n),
            Err(e) => problems.push(ValidationProblem::new("video_bitrate", e)),
        }
    }
    if let Some(raw) = &cfg.audio_bitrate {
        match normalize_bitrate(raw) {
            Ok(n) => cfg.audio_bitrate = Some(n),
            Err(e) => problems.push(ValidationProblem::new("audio_bitrate", e)),
        }
    }

    validate_output_destination(&cfg, output_format, &mut problems);
    validate_hls_params(&cfg, &mut problems);
    validate_abr(&cfg, output_format, &mut problems);
    validate_stream_maps(&cfg, &mut problems);
    validate_restricted_output_dir(&cfg, &mut problems);

    if problems.is_empty() {
        Ok(cfg)
    } else {
        Err(problems)
    }
}

/// Empty strings become absent (spec.md §4.1).
fn empty_to_none(cfg: &mut UnifiedConfig) {
    macro_rules! blank_to_none {
        ($field:expr) => {
            if $field.as_deref().map(str::trim) == Some("") {
                $field = None;
            }
        };
    }
    blank_to_none!(cfg.audio_codec);
    blank_to_none!(cfg.video_bitrate);
    blank_to_none!(cfg.audio_bitrate);
    blank_to_none!(cfg.resolution);
    blank_to_none!(cfg.preset);
    blank_to_none!(cfg.profile);
    blank_to_none!(cfg.level);
    blank_to_none!(cfg.input_format);
    blank_to_none!(cfg.input_framerate);
    blank_to_none!(cfg.input_video_size);
    blank_to_none!(cfg.input_pixel_format);
    blank_to_none!(cfg.input_device_args);
    blank_to_none!(cfg.video_filters);
    blank_to_none!(cfg.custom_args);
    blank_to_none!(cfg.output_dir);
    blank_to_none!(cfg.output_url);
}

/// If output_format=hls, output_dir must be set; else output_url must be set
/// for the primary output (xor, spec.md §3).
fn validate_output_destination(
    cfg: &UnifiedConfig,
    format: OutputFormat,
    problems: &mut Vec<ValidationProblem>,
) {
    if format == OutputFormat::Hls {
        if cfg.output_dir.is_none() {
            problems.push(ValidationProblem::new(
                "output_dir",
                "required when output_format=hls",
            ));
        }
        if cfg.output_url.is_some() {
            problems.push(ValidationProblem::new(
                "output_url",
                "must not be set when output_format=hls",
            ));
        }
    } else {
        if cfg.output_url.is_none() {
            problems.push(ValidationProblem::new(
                "output_url",
                "required unless output_format=hls",
            ));
        }
        if cfg.output_dir.is_some() {
            problems.push(ValidationProblem::new(
                "output_dir",
                "must not be set unless output_format=hls",
            ));
        }
    }
}

fn validate_hls_params(cfg: &UnifiedConfig, problems: &mut Vec<ValidationProblem>) {
    if let Some(d) = cfg.hls.segment_duration {
        if !(1..=30).contains(&d) {
            problems.push(ValidationProblem::new(
                "hls.segment_duration",
                "must be in 1..30",
            ));
        }
    }
    if let Some(s) = cfg.hls.playlist_size {
        if !(1..=20).contains(&s) {
            problems.push(ValidationProblem::new(
                "hls.playlist_size",
                "must be in 1..20",
            ));
        }
    }
}

/// ABR invariants: if abr_enabled, output_format must be hls, 2 <= |ladder|
/// <= 6, variants unique by name and by resolution, and any variant codec
/// requiring fMP4 forces segment_type=fmp4 (spec.md §3).
fn validate_abr(
    cfg: &UnifiedConfig,
    format: OutputFormat,
    problems: &mut Vec<ValidationProblem>,
) {
    if !cfg.abr_enabled {
        return;
    }
    if format != OutputFormat::Hls {
        problems.push(ValidationProblem::new(
            "abr_enabled",
            "requires output_format=hls",
        ));
    }
    if !(2..=6).contains(&cfg.ladder.len()) {
        problems.push(ValidationProblem::new("ladder", "must have 2..6 variants"));
    }

    let mut names = HashSet::new();
    let mut resolutions = HashSet::new();
    for variant in &cfg.ladder {
        if !names.insert(variant.name.as_str()) {
            problems.push(ValidationProblem::new(
                "ladder",
                format!("duplicate variant name '{}'", variant.name),
            ));
        }
        if !resolutions.insert(variant.resolution.as_str()) {
            problems.push(ValidationProblem::new(
                "ladder",
                format!("duplicate variant resolution '{}'", variant.resolution),
            ));
        }
    }

    let needs_fmp4 = cfg
        .ladder
        .iter()
        .any(|v| v.video_codec.or(cfg.video_codec).is_some_and(|c| c.requires_fmp4()));
    if needs_fmp4 && cfg.hls.segment_type != Some(super::SegmentType::Fmp4) {
        problems.push(ValidationProblem::new(
            "hls.segment_type",
            "must be fmp4 when any ABR variant uses a codec requiring fMP4 (HEVC, AV1)",
        ));
    }
}

/// `stream_maps` references must be syntactically well-formed
/// (`0:v:N`, `0:a:N`, `0:s:N`).
fn validate_stream_maps(cfg: &UnifiedConfig, problems: &mut Vec<ValidationProblem>) {
    for map in &cfg.stream_maps {
        if !is_well_formed_stream_map(&map.input_stream) {
            problems.push(ValidationProblem::new(
                "stream_maps",
                format!(
                    "'{}' is not a well-formed stream map (expected 0:[vas]:N)",
                    map.input_stream
                ),
            ));
        }
    }
}

fn is_well_formed_stream_map(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return false;
    }
    if parts[0] != "0" {
        return false;
    }
    if !matches!(parts[1], "v" | "a" | "s") {
        return false;
    }
    !parts[2].is_empty() && parts[2].chars().all(|c| c.is_ascii_digit())
}

const RESTRICTED_PREFIXES: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/dev", "/proc", "/sys"];

fn validate_restricted_output_dir(cfg: &UnifiedConfig, problems: &mut Vec<ValidationProblem>) {
    let Some(dir) = cfg.output_dir.as_deref() else {
        return;
    };
    if dir.contains("..") {
        problems.push(ValidationProblem::new(
            "output_dir",
            "must not contain '..'",
        ));
        return;
    }
    for prefix in RESTRICTED_PREFIXES {
        if dir == *prefix || dir.starts_with(&format!("{prefix}/")) {
            problems.push(ValidationProblem::new(
                "output_dir",
                format!("must not be under restricted path '{prefix}'"),
            ));
            return;
        }
    }
}
