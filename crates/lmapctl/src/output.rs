//! Output formatting utilities

use chrono::{DateTime, Local, TimeZone, Utc};
use colored::Colorize;

/// Output format for the report command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// XML rendering (default)
    #[default]
    Xml,
    /// JSON rendering
    Json,
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Format bytes of storage as a short human-readable string
pub fn format_storage(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Percentage of part in total, zero when nothing happened yet
pub fn percent(part: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((u64::from(part) * 100) / u64::from(total)) as u32
}

/// Short local timestamp: time of day within the last day, date otherwise
pub fn format_datetime_short(epoch: i64) -> String {
    let Some(dt) = Utc.timestamp_opt(epoch, 0).single() else {
        return String::new();
    };
    let local: DateTime<Local> = dt.with_timezone(&Local);
    let age = Utc::now().timestamp() - epoch;
    if (0..86400).contains(&age) {
        local.format("%H:%M:%S").to_string()
    } else {
        local.format("%Y-%m-%d").to_string()
    }
}

/// Long local timestamp
pub fn format_datetime_long(epoch: i64) -> String {
    let Some(dt) = Utc.timestamp_opt(epoch, 0).single() else {
        return String::new();
    };
    dt.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Colour an entity state letter
pub fn color_state(letter: &str) -> String {
    match letter {
        "E" => letter.green().to_string(),
        "R" => letter.cyan().to_string(),
        "S" => letter.yellow().to_string(),
        "D" => letter.red().to_string(),
        "A" => letter.yellow().to_string(),
        _ => letter.to_string(),
    }
}
