//! Plain-text preview of the tail of a series.

use crate::store::Snapshot;

const TIMESTAMP_WIDTH: usize = 19;

/// Renders samples as a right-aligned table, one row per sample.
///
/// ```text
///                      MemTotal  MemFree
/// 2024-03-01 10:00:00    2000.0    500.0
/// ```
pub fn render_table(snapshot: &Snapshot) -> String {
    let columns = snapshot.columns();
    if columns.is_empty() {
        return String::new();
    }

    let cells: Vec<Vec<String>> = snapshot
        .iter()
        .map(|s| {
            columns
                .iter()
                .map(|c| s.get(c).map(|v| v.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or_default()
        })
        .collect();

    let mut out = format!("{:width$}", "", width = TIMESTAMP_WIDTH);
    for (name, width) in columns.iter().zip(&widths) {
        out.push_str(&format!("  {:>width$}", name, width = width));
    }
    out.push('\n');

    for (sample, row) in snapshot.iter().zip(&cells) {
        out.push_str(&sample.timestamp_string());
        for (cell, width) in row.iter().zip(&widths) {
            out.push_str(&format!("  {:>width$}", cell, width = width));
        }
        out.push('\n');
    }

    out
}
