//! Table and value formatting for command output.

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use stagehand_core::{FileRecord, StatusCounts, Transition};

/// Format a byte count in human-readable form.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format a Unix-millisecond timestamp as a relative age ("3m ago").
pub fn format_age(timestamp_ms: i64) -> String {
    let Some(then) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms) else {
        return "?".to_string();
    };
    let seconds = (Utc::now() - then).num_seconds();
    if seconds < 0 {
        return "just now".to_string();
    }
    match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3599 => format!("{}m ago", seconds / 60),
        3600..=86_399 => format!("{}h ago", seconds / 3600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn records_table(records: &[FileRecord]) -> Table {
    let mut table = base_table();
    table.set_header(vec!["ID", "Status", "Name", "Size", "Tags", "Age", "Path"]);
    for record in records {
        table.add_row(vec![
            Cell::new(record.id),
            Cell::new(record.status),
            Cell::new(&record.original_name),
            Cell::new(format_size(record.identity.size)),
            Cell::new(record.tags.join(", ")),
            Cell::new(format_age(record.created_at)),
            Cell::new(&record.path),
        ]);
    }
    table
}

pub fn history_table(transitions: &[Transition]) -> Table {
    let mut table = base_table();
    table.set_header(vec!["When", "From", "To", "Actor"]);
    for transition in transitions {
        let from = transition
            .from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(format_timestamp(transition.at)),
            Cell::new(from),
            Cell::new(transition.to),
            Cell::new(transition.actor.as_str()),
        ]);
    }
    table
}

pub fn counts_table(counts: &StatusCounts) -> Table {
    let mut table = base_table();
    table.set_header(vec!["Status", "Count"]);
    table.add_row(vec![Cell::new("new"), Cell::new(counts.new)]);
    table.add_row(vec![Cell::new("reviewed"), Cell::new(counts.reviewed)]);
    table.add_row(vec![Cell::new("archived"), Cell::new(counts.archived)]);
    table.add_row(vec![Cell::new("rejected"), Cell::new(counts.rejected)]);
    table.add_row(vec![Cell::new("total"), Cell::new(counts.total())]);
    table
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_sensible_units() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1_572_864), "1.5 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn ages_scale_with_distance() {
        let now = Utc::now().timestamp_millis();
        assert!(format_age(now).ends_with("s ago"));
        assert!(format_age(now - 5 * 60 * 1000).starts_with("5m"));
        assert!(format_age(now - 3 * 3600 * 1000).starts_with("3h"));
        assert!(format_age(now - 2 * 86_400 * 1000).starts_with("2d"));
        assert_eq!(format_age(now + 60_000), "just now");
    }

    #[test]
    fn unrepresentable_timestamps_do_not_panic() {
        assert_eq!(format_age(i64::MAX), "?");
        assert_eq!(format_timestamp(i64::MAX), "?");
    }
}
