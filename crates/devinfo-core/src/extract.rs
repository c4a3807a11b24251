//! Field extraction from raw text lines.
//!
//! Two line shapes are supported:
//!
//! - key/value lines as found in `/proc/meminfo`:
//!   `MemTotal:        2048000 kB`
//! - whitespace-delimited table rows as emitted by `vmstat`:
//!   ` 0  0 616392 178468 105700 627320   12   19  1018   232    0  680 26 14 59  0`
//!
//! Everything here is a pure function over `&str` so it can be tested
//! without spawning anything.

/// Number of columns in a `vmstat` data row.
pub const VMSTAT_COLUMNS: usize = 16;

/// Literal in column 0 of the `vmstat` group header row.
const GROUP_HEADER: &str = "procs";

/// Literal in column 2 of the `vmstat` column label row.
const LABEL_HEADER: &str = "swpd";

/// Converts kilobytes to megabytes rounded to two decimals.
pub fn kb_to_mb(kb: u64) -> f64 {
    round2(kb as f64 / 1024.0)
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Match rule for one `name: <digits>` field.
///
/// A line matches when, after trimming, it starts with the field name
/// immediately followed by a colon, then at least one whitespace character,
/// then a run of digits. Anything after the digits (usually ` kB`) is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    name: &'static str,
}

impl FieldRule {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the raw integer value if the line carries this field.
    pub fn extract_raw(&self, line: &str) -> Option<u64> {
        let rest = line.trim().strip_prefix(self.name)?.strip_prefix(':')?;

        // At least one separator character is required between colon and value.
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }

        let rest = rest.trim_start();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }

        rest[..digits_end].parse().ok()
    }

    /// Returns the value in megabytes (kilobytes / 1024, two decimals).
    pub fn extract(&self, line: &str) -> Option<f64> {
        self.extract_raw(line).map(kb_to_mb)
    }
}

/// Extracts `name` from a key/value line, in megabytes.
pub fn extract(name: &'static str, line: &str) -> Option<f64> {
    FieldRule::new(name).extract(line)
}

/// Splits a table row on runs of whitespace.
///
/// Returns `None` unless the row has exactly `columns` tokens, which rules
/// out truncated rows, blank lines and most header text.
pub fn split_row(line: &str, columns: usize) -> Option<Vec<&str>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    (tokens.len() == columns).then_some(tokens)
}

/// Whether a split `vmstat` row is one of the two header lines.
///
/// ```text
/// procs -----------memory---------- ---swap-- -----io---- -system-- ----cpu----
///  r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa
/// ```
pub fn is_vmstat_header(tokens: &[&str]) -> bool {
    tokens.first() == Some(&GROUP_HEADER) || tokens.get(2) == Some(&LABEL_HEADER)
}

/// Whether every character of the line is printable.
pub fn is_printable(line: &str) -> bool {
    !line.chars().any(char::is_control)
}
