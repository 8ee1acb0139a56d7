//! CLI presenter for output formatting

use colored::*;

use crate::domain::session::Session;

/// Presenter for CLI output formatting
pub struct Presenter;

impl Presenter {
    pub fn new() -> Self {
        Self
    }

    /// Print info message to stderr
    pub fn info(&self, message: &str) {
        eprintln!("{} {}", "ℹ".cyan(), message);
    }

    /// Print success message to stderr
    pub fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green(), message);
    }

    /// Print warning message to stderr
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow(), message);
    }

    /// Print error message to stderr
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Output text to stdout
    pub fn output(&self, text: &str) {
        println!("{}", text);
    }

    /// Print a key-value pair (for settings listing)
    pub fn key_value(&self, key: &str, value: &str) {
        println!("{}: {}", key.cyan(), value);
    }

    /// One-line session summary for listings
    pub fn session_line(&self, session: &Session) {
        println!(
            "{}  {}  {}  {} segment(s)  {}",
            session.id.to_string().dimmed(),
            session.metadata.session_name.to_string().bold(),
            format_duration(session.metadata.duration_seconds),
            session.segments.len(),
            format_size(session.metadata.file_size_bytes),
        );
    }

    /// Full detail for one session
    pub fn session_detail(&self, session: &Session) {
        self.key_value("id", &session.id.to_string());
        self.key_value("name", session.metadata.session_name.as_str());
        self.key_value("started", &session.metadata.start_time.to_rfc3339());
        self.key_value(
            "duration",
            &format_duration(session.metadata.duration_seconds),
        );
        self.key_value("size", &format_size(session.metadata.file_size_bytes));
        self.key_value("format", session.metadata.format.as_str());
        self.key_value("quality", &format!("{} kbps", session.metadata.quality_kbps));
        if !session.tags.is_empty() {
            let tags: Vec<&str> = session.tags.iter().map(String::as_str).collect();
            self.key_value("tags", &tags.join(", "));
        }
        for (index, segment) in session.segments.iter().enumerate() {
            println!(
                "  segment {:>3}: {}  {}  {}",
                index + 1,
                segment.id.to_string().dimmed(),
                format_duration(segment.metadata.duration_seconds),
                format_size(segment.metadata.file_size_bytes),
            );
        }
        for note in &session.notes {
            println!("  {} {}", "note:".cyan(), note);
        }
    }

    /// In-place recording status line: duration plus a level bar
    pub fn recording_status(&self, duration_seconds: u64, level: f32) {
        let bar_width = 20;
        let filled = ((level.clamp(0.0, 1.0) * bar_width as f32) as usize).min(bar_width);
        let empty = bar_width - filled;
        eprint!(
            "\r{} {} [{}{}]",
            "●".red(),
            format_duration(duration_seconds),
            "█".repeat(filled).green(),
            "░".repeat(empty),
        );
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new()
    }
}

/// `h:mm:ss` when hours are present, `m:ss` otherwise
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Humanized byte count
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_without_hours() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(599), "9:59");
    }

    #[test]
    fn duration_with_hours() {
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(6 * 3600 + 62), "6:01:02");
    }

    #[test]
    fn size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
