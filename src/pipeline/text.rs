//! Line-level text helpers shared by discovery, the parsers and dedup.

use std::sync::LazyLock;

use regex::Regex;

/// Column separators in extracted schedule text: tabs, pipes, or 2+ spaces.
static COLUMN_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t+|\s*\|\s*|\s{2,}").unwrap());

/// Bullet or numbered list marker at line start.
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-•*▪‣]|\d{1,3}[.)])\s+\S").unwrap());

/// Leading "ROOM" / "RM." / "RM #" noise on room numbers.
static ROOM_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:ROOM|RM)\.?\s*(?:NO\.?|#)?\s*").unwrap());

/// Split a schedule row into trimmed, non-empty columns.
pub fn split_columns(line: &str) -> Vec<&str> {
    COLUMN_SPLIT
        .split(line.trim())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Heuristic: a line looks tabular if it has 3+ columns separated by
/// tabs, pipes, or multi-space gaps.
pub fn is_tabular_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.len() < 5 {
        return false;
    }
    split_columns(trimmed).len() >= 3
}

pub fn is_list_line(line: &str) -> bool {
    LIST_MARKER.is_match(line)
}

/// Uppercase and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Canonical room number: prefix noise dropped, only alphanumerics kept.
/// "RM 101-A", "101A" and "Room #101a" all become "101A".
pub fn normalize_room_number(room: &str) -> String {
    let stripped = ROOM_PREFIX.replace(room, "");
    stripped
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Canonical sign-type code: "rs-1", "RS 1" and "RS1" all become "RS1".
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Non-empty lines of a page.
pub fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|l| !l.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_tabs_pipes_and_gaps() {
        assert_eq!(split_columns("101\tOFFICE\t101"), vec!["101", "OFFICE", "101"]);
        assert_eq!(split_columns("A1 | ROOM ID | 12"), vec!["A1", "ROOM ID", "12"]);
        assert_eq!(
            split_columns("  A1    ROOM ID SIGN   12  "),
            vec!["A1", "ROOM ID SIGN", "12"]
        );
    }

    #[test]
    fn single_spaces_do_not_split() {
        assert_eq!(split_columns("BREAK ROOM"), vec!["BREAK ROOM"]);
    }

    #[test]
    fn tabular_detection() {
        assert!(is_tabular_line("101    OFFICE    101"));
        assert!(!is_tabular_line("GENERAL NOTES APPLY TO ALL SHEETS"));
        assert!(!is_tabular_line(""));
    }

    #[test]
    fn list_detection() {
        assert!(is_list_line("- DOOR 101: OFFICE"));
        assert!(is_list_line("12. DOOR 101 OFFICE"));
        assert!(!is_list_line("OFFICE 101"));
    }

    #[test]
    fn room_numbers_normalize() {
        assert_eq!(normalize_room_number("RM 101-A"), "101A");
        assert_eq!(normalize_room_number("Room #101a"), "101A");
        assert_eq!(normalize_room_number("101"), "101");
        assert_eq!(normalize_room_number("RM. 1.02"), "102");
    }

    #[test]
    fn codes_normalize() {
        assert_eq!(normalize_code("rs-1"), "RS1");
        assert_eq!(normalize_code("RS 1"), "RS1");
    }

    #[test]
    fn names_collapse_whitespace() {
        assert_eq!(normalize_name("  break   room "), "BREAK ROOM");
    }
}
