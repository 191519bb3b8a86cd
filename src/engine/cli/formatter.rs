//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::Colorize;

use crate::engine::profiling::ProfileRow;
use crate::engine::record::{Record, Scalar};

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a table header
    pub fn table_header(columns: &[&str]) {
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(columns.iter().map(|c| c.len() + 3).sum::<usize>()).bright_black());
    }

    /// Print a table row
    pub fn table_row(values: &[&str]) {
        println!("  {}", values.join(" │ "));
    }

    pub fn profile_rows(rows: &[ProfileRow]) {
        Self::table_header(&["id", "name", "calls", "avg", "min", "max"]);
        for row in rows {
            Self::table_row(&[
                &row.id.to_string(),
                &row.name,
                &row.calls.to_string(),
                &format_millis(row.avg),
                &format_millis(row.min),
                &format_millis(row.max),
            ]);
        }
    }

    /// Print a blank line
    pub fn blank() {
        println!();
    }
}

/// Format a duration given in milliseconds
pub fn format_millis(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// `field=value` pairs in field order
pub fn format_record(record: &Record) -> String {
    record
        .iter()
        .map(|(field, value)| match value {
            Scalar::Text(s) => format!("{}={:?}", field, s),
            other => format!("{}={}", field, other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `field=value`; integers and reals become numbers, `null` becomes Null
pub fn parse_field(pair: &str) -> Option<(String, Scalar)> {
    let (field, raw) = pair.split_once('=')?;
    if field.is_empty() {
        return None;
    }
    let value = if raw == "null" {
        Scalar::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Scalar::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Scalar::Real(f)
    } else {
        Scalar::Text(raw.to_string())
    };
    Some((field.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0.25), "250µs");
        assert_eq!(format_millis(3.5), "3.50ms");
        assert_eq!(format_millis(1500.0), "1.50s");
    }

    #[test]
    fn test_format_record() {
        let record = Record::new().with("id", 1).with("name", "it's");
        assert_eq!(format_record(&record), "id=1 name=\"it's\"");
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("calls=3"), Some(("calls".to_string(), Scalar::Integer(3))));
        assert_eq!(parse_field("avg=1.5"), Some(("avg".to_string(), Scalar::Real(1.5))));
        assert_eq!(parse_field("name=render"), Some(("name".to_string(), Scalar::from("render"))));
        assert_eq!(parse_field("x=null"), Some(("x".to_string(), Scalar::Null)));
        assert_eq!(parse_field("novalue"), None);
        assert_eq!(parse_field("=3"), None);
    }
}
