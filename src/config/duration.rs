//! Duration parsing utilities.

use anyhow::Context;

/// Parse a duration string like "2m", "1.5s", "500ms", "1.5" into seconds.
/// Supports:
/// - Plain numbers (interpreted as seconds): "1.5"
/// - Milliseconds suffix: "500ms"
/// - Seconds suffix: "1.5s"
/// - Minutes suffix: "2m"
pub fn parse_duration_secs(s: &str) -> anyhow::Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    // "ms" must be tried before "m" and "s"
    let secs = if let Some(num_str) = s.strip_suffix("ms") {
        parse_number(num_str, "milliseconds")? / 1000.0
    } else if let Some(num_str) = s.strip_suffix('m') {
        parse_number(num_str, "minutes")? * 60.0
    } else if let Some(num_str) = s.strip_suffix('s') {
        parse_number(num_str, "seconds")?
    } else {
        parse_number(s, "duration")?
    };

    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("Duration must be a positive number of seconds: {s}");
    }
    Ok(secs)
}

fn parse_number(num_str: &str, unit: &str) -> anyhow::Result<f64> {
    num_str
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid {unit} value: {num_str}"))
}
