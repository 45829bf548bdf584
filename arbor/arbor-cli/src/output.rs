//! Terminal output for the Arbor CLI.
//!
//! Human output is colored and tabular; JSON output is meant for scripting
//! and carries the same fields the engine serializes.

use anyhow::Result;
use arbor_tree::ResourceInfo;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use console::style;
use serde::Serialize;
use std::fmt::Display;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output for scripting
    Json,
}

/// Print a success message
pub fn success(msg: impl Display) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: impl Display) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: impl Display) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print a section header
pub fn header(msg: impl Display) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair
pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

/// Create a formatted table
pub struct TableBuilder {
    table: Table,
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        Self { table }
    }

    pub fn header<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String> + Display,
    {
        let row: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect();
        self.table.set_header(row);
        self
    }

    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String> + Display,
    {
        let row: Vec<Cell> = cells.into_iter().map(Cell::new).collect();
        self.table.add_row(row);
        self
    }

    pub fn print(self) {
        println!("{}", self.table);
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Format an optional timestamp, `-` when absent
pub fn format_mtime(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Print one resource as key-value pairs
pub fn resource(info: &ResourceInfo) {
    header(&info.path);
    kv("id", &info.id);
    if let Some(parent) = &info.parent_id {
        kv("parent", parent);
    }
    kv("type", info.resource_type);
    if let Some(owner) = &info.owner {
        kv("owner", owner);
    }
    if let Some(target) = &info.target {
        kv("target", target);
    }
    kv("tree mtime", format_mtime(info.tree_mtime));
    if let Some(size) = info.tree_size {
        kv("tree size", format_bytes(size));
    }
    for (key, value) in &info.metadata {
        kv(format!("md.{}", key), value);
    }
}

/// Print a folder listing as a table
pub fn listing(items: &[ResourceInfo]) {
    if items.is_empty() {
        warning("Folder is empty");
        return;
    }
    let mut table = TableBuilder::new().header(["Name", "Type", "Id", "Tree mtime", "Tree size"]);
    for info in items {
        table = table.row([
            info.name.clone(),
            info.resource_type.to_string(),
            info.id.to_string(),
            format_mtime(info.tree_mtime),
            info.tree_size.map(format_bytes).unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.print();
}

/// Output data as pretty JSON
pub fn json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_mtime() {
        assert_eq!(format_mtime(None), "-");
        let ts = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_mtime(Some(ts)), "2024-05-01 12:30:00 UTC");
    }
}
