// Output formatting for CLI

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            OutputFormat::Text => {
                // Text format is handled by each command
            }
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    println!("{}", format_row(columns));
}

/// Print a table row
pub fn print_table_row(values: &[(&str, usize)]) {
    println!("{}", format_row(values));
}

fn format_row(cells: &[(&str, usize)]) -> String {
    cells
        .iter()
        .map(|(val, width)| format!("{:<width$}", truncate(val, *width), width = width))
        .collect::<Vec<_>>()
        .join("  ")
}

fn truncate(val: &str, width: usize) -> String {
    if val.chars().count() <= width || width < 3 {
        return val.to_string();
    }
    let kept: String = val.chars().take(width - 3).collect();
    format!("{kept}...")
}

/// Format a duration as milliseconds with one decimal
pub fn format_ms(duration: std::time::Duration) -> String {
    format!("{:.1}ms", duration.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("text"), OutputFormat::Text);
        assert!(OutputFormat::from_str("anything").is_text());
    }

    #[test]
    fn test_truncate_long_cells() {
        assert_eq!(truncate("unit-0123456789", 10), "unit-01...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_format_row_pads_columns() {
        assert_eq!(format_row(&[("ID", 4), ("OK", 2)]), "ID    OK");
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(Duration::from_micros(12_345)), "12.3ms");
    }
}
