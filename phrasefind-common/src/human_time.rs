//! Human-readable duration formatting
//!
//! Quota and throttle denials carry a machine-readable retry-after in
//! seconds plus a human-formatted rendering produced here.

/// Format a retry-after duration as human-readable text.
///
/// Tiered by magnitude:
/// - under a minute: `"45 seconds"`
/// - under an hour: `"3 minutes"` (seconds dropped once >= 2 minutes)
/// - under a day: `"1 hour 12 minutes"`
/// - otherwise: `"2 days 3 hours"`
///
/// Zero and negative inputs render as `"0 seconds"`.
pub fn format_retry_after(seconds: i64) -> String {
    if seconds <= 0 {
        return "0 seconds".to_string();
    }

    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        if hours > 0 {
            format!("{} {} {} {}", days, plural(days, "day"), hours, plural(hours, "hour"))
        } else {
            format!("{} {}", days, plural(days, "day"))
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!(
                "{} {} {} {}",
                hours,
                plural(hours, "hour"),
                minutes,
                plural(minutes, "minute")
            )
        } else {
            format!("{} {}", hours, plural(hours, "hour"))
        }
    } else if minutes >= 2 {
        format!("{} {}", minutes, plural(minutes, "minute"))
    } else if minutes == 1 {
        if secs > 0 {
            format!("1 minute {} {}", secs, plural(secs, "second"))
        } else {
            "1 minute".to_string()
        }
    } else {
        format!("{} {}", secs, plural(secs, "second"))
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    }
}
