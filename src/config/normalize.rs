// Bitrate normalization: "1.5M" -> "1500k", "5M" -> "5000k", "128k" -> "128k".
//
// Empty strings become absent (spec.md §4.1); callers are expected to have
// already turned "" into None before reaching here.

/// Normalizes a bitrate string to the canonical `<integer>k` form.
/// Accepts `M`/`m` (megabit) and `K`/`k` (kilobit) suffixes, or a bare
/// integer/decimal number interpreted as bits per second.
pub fn normalize_bitrate(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("bitrate must not be empty".to_string());
    }

    let (number_part, unit) = match raw.chars().last() {
        Some(c) if c.eq_ignore_ascii_case('m') => (&raw[..raw.len() - 1], Unit::Mega),
        Some(c) if c.eq_ignore_ascii_case('k') => (&raw[..raw.len() - 1], Unit::Kilo),
        _ => (raw, Unit::Bits),
    };

    let value: f64 = number_part
        .parse()
        .map_err(|_| format!("invalid bitrate '{raw}'"))?;
    if value <= 0.0 {
        return Err(format!("bitrate must be positive, got '{raw}'"));
    }

    let kilobits = match unit {
        Unit::Mega => value * 1000.0,
        Unit::Kilo => value,
        Unit::Bits => value / 1000.0,
    };

    Ok(format!("{}k", kilobits.round() as u64))
}

enum Unit {
    Mega,
    Kilo,
    Bits,
}
