use std::sync::LazyLock;

use regex::Regex;

/// A compiled scope-exclusion marker with the label reported in warnings.
struct ExclusionMarker {
    regex: Regex,
    label: &'static str,
}

fn marker(pattern: &str, label: &'static str) -> ExclusionMarker {
    ExclusionMarker {
        regex: Regex::new(pattern).unwrap(),
        label,
    }
}

/// Text that puts an item outside the bid scope. Any candidate whose source
/// line carries one of these is dropped before counting, in every parser.
static EXCLUSION_MARKERS: LazyLock<Vec<ExclusionMarker>> = LazyLock::new(|| {
    vec![
        marker(r"(?i)\bN\.?I\.?C\b", "NIC"),
        marker(r"(?i)\bnot\s+in\s+contract\b", "NOT IN CONTRACT"),
        marker(r"(?i)\bby\s+others\b", "BY OTHERS"),
        marker(r"(?i)\bdemo(?:lish(?:ed)?|lition)?\b", "DEMO"),
        marker(r"(?i)\bexisting\b|\(E\)", "EXISTING"),
        marker(r"(?i)\bfuture\b", "FUTURE"),
    ]
});

/// The first exclusion marker found in `text`, if any.
pub fn exclusion_marker(text: &str) -> Option<&'static str> {
    EXCLUSION_MARKERS
        .iter()
        .find(|m| m.regex.is_match(text))
        .map(|m| m.label)
}

pub fn is_excluded(text: &str) -> bool {
    exclusion_marker(text).is_some()
}

/// Running tally of dropped candidates per marker, turned into one warning.
#[derive(Debug, Default)]
pub struct ExclusionTally {
    dropped: Vec<&'static str>,
}

impl ExclusionTally {
    /// Returns true (and records the drop) when the line is out of scope.
    pub fn check(&mut self, text: &str) -> bool {
        match exclusion_marker(text) {
            Some(label) => {
                self.dropped.push(label);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.dropped.len()
    }

    pub fn warning(&self) -> Option<String> {
        if self.dropped.is_empty() {
            return None;
        }
        let mut labels = self.dropped.clone();
        labels.sort_unstable();
        labels.dedup();
        Some(format!(
            "Dropped {} out-of-scope candidate(s) marked {}",
            self.dropped.len(),
            labels.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_all_markers() {
        assert_eq!(exclusion_marker("A3  EXIT SIGN  2  N.I.C."), Some("NIC"));
        assert_eq!(exclusion_marker("A3 EXIT SIGN NIC"), Some("NIC"));
        assert_eq!(exclusion_marker("DONOR WALL - BY OTHERS"), Some("BY OTHERS"));
        assert_eq!(exclusion_marker("REMOVE SIGN (DEMO)"), Some("DEMO"));
        assert_eq!(exclusion_marker("EXISTING SIGN TO REMAIN"), Some("EXISTING"));
        assert_eq!(exclusion_marker("OFFICE 110 (E)"), Some("EXISTING"));
        assert_eq!(exclusion_marker("FUTURE TENANT 200"), Some("FUTURE"));
        assert_eq!(exclusion_marker("NOT IN CONTRACT"), Some("NOT IN CONTRACT"));
    }

    #[test]
    fn ordinary_words_not_excluded() {
        assert!(!is_excluded("CLINIC 204"));
        assert!(!is_excluded("DEMONSTRATION KITCHEN 110"));
        assert!(!is_excluded("OFFICE 101"));
        assert!(!is_excluded("NICHE 12"));
    }

    #[test]
    fn tally_builds_single_warning() {
        let mut tally = ExclusionTally::default();
        assert!(tally.check("OFFICE 101 (E)"));
        assert!(!tally.check("OFFICE 102"));
        assert!(tally.check("BY OTHERS"));
        assert_eq!(tally.count(), 2);
        let warning = tally.warning().unwrap();
        assert!(warning.contains("Dropped 2"));
        assert!(warning.contains("BY OTHERS"));
        assert!(warning.contains("EXISTING"));
    }

    #[test]
    fn empty_tally_has_no_warning() {
        assert!(ExclusionTally::default().warning().is_none());
    }
}
