/// Format seconds to HH:MM:SS.mmm format
pub fn format_time(seconds: f64) -> String {
    let total_seconds = seconds.floor() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    let millis = ((seconds - seconds.floor()) * 1000.0) as u64;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, millis)
    }
}

/// Format milliseconds to a short MM:SS label for ruler ticks
pub fn format_tick(millis: f64) -> String {
    let total_seconds = (millis / 1000.0).floor() as u64;
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;
    format!("{:02}:{:02}", minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00.000");
        assert_eq!(format_time(65.5), "01:05.500");
        assert_eq!(format_time(3661.123), "01:01:01.123");
    }

    #[test]
    fn test_format_tick() {
        assert_eq!(format_tick(0.0), "00:00");
        assert_eq!(format_tick(90_000.0), "01:30");
    }
}
