//! Terminal tables for the `log` and `errors` commands.

use chrono::NaiveDateTime;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use dataload_db::{ErrorLogEntry, LoadProfile};

/// Build a table with cyan headers.
pub fn build_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }
    table
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    println!("{}", build_table(headers, rows));
}

fn stamp(at: Option<NaiveDateTime>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn profile_rows(profiles: &[LoadProfile]) -> Vec<Vec<String>> {
    profiles
        .iter()
        .map(|p| {
            vec![
                p.profile_key.clone(),
                p.file_name.clone(),
                p.table.to_string(),
                p.delimiter.clone().unwrap_or_default().escape_default().to_string(),
                p.total_records.to_string(),
                p.duplicate_records.to_string(),
                p.error_records.to_string(),
                if p.load_success { "loaded" } else { "pending" }.to_string(),
                stamp(Some(p.load_started_at)),
                stamp(p.load_ended_at),
            ]
        })
        .collect()
}

pub const PROFILE_HEADERS: &[&str] = &[
    "KEY", "FILE", "TABLE", "DELIM", "ROWS", "DUPES", "ERRORS", "STATUS", "STARTED", "ENDED",
];

pub fn error_rows(entries: &[ErrorLogEntry]) -> Vec<Vec<String>> {
    entries
        .iter()
        .map(|e| {
            vec![
                e.profile_key.clone(),
                e.table.clone(),
                stamp(Some(e.logged_at)),
                if e.notification_sent { "yes" } else { "no" }.to_string(),
                e.message.clone(),
            ]
        })
        .collect()
}

pub const ERROR_HEADERS: &[&str] = &["KEY", "TABLE", "LOGGED", "NOTIFIED", "MESSAGE"];
