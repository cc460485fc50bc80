const ELLIPSIS: &str = "...";

/// Bound `s` to `max` characters.
///
/// Input that fits is returned unchanged. Longer input is cut so that the
/// result, including a trailing `...`, is exactly `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let marker = ELLIPSIS.len().min(max);
    let kept: String = s.chars().take(max - marker).collect();
    format!("{}{}", kept, &ELLIPSIS[..marker])
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
