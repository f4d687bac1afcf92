use std::time::Duration;

/// Format a duration to a human-readable string, e.g. 65s becomes "1m 5s".
/// Sub-second durations are shown in milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();

    if seconds == 0 {
        return format!("{}ms", duration.as_millis());
    }

    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes = seconds / 60;
    let seconds = seconds % 60;

    if minutes < 60 {
        return format!("{}m {}s", minutes, seconds);
    }

    let hours = minutes / 60;
    let minutes = minutes % 60;

    format!("{}h {}m {}s", hours, minutes, seconds)
}
