//! Raw-text fallback scan.
//!
//! Runs when discovery finds no evidence at all. Scans every page for
//! legend-style sign codes and uppercase room tags ("OFFICE 101"). Never
//! fails: zero pages, empty pages and unrecognizable text all produce an
//! empty result at the floor confidence.

use std::sync::LazyLock;

use regex::Regex;

use super::door_schedule::is_unsigned_room;
use super::exclusion::ExclusionTally;
use crate::pipeline::dedup::dedup_entries;
use crate::pipeline::text::{content_lines, normalize_code, normalize_name};
use crate::pipeline::types::{Entry, Page, ParseResult, SourceType};

/// Confidence with nothing found.
pub const FALLBACK_BASE_CONFIDENCE: f32 = 0.2;
/// Added per distinct entry found.
pub const FALLBACK_STEP: f32 = 0.02;
/// Pattern scanning without a classified source never claims more than this.
pub const FALLBACK_MAX_CONFIDENCE: f32 = 0.5;

/// Per-entry confidence; individual raw hits are guesses.
const ENTRY_CONFIDENCE: f32 = 0.3;

static LEGEND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<code>[A-Z]{1,3}-?\d{1,3}[A-Z]?)\s*[:=]\s*(?P<desc>[A-Za-z][^:]{2,})$").unwrap()
});

static ROOM_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<name>[A-Z][A-Z&/'-]{2,}(?:[ \t]+[A-Z&/'-]{2,}){0,2})[ \t]+(?P<num>\d{3,4}[A-Z]?)\b")
        .unwrap()
});

/// `max(0.2, min(0.5, 0.2 + 0.02 n))`
pub fn fallback_confidence(entries: usize) -> f32 {
    (FALLBACK_BASE_CONFIDENCE + FALLBACK_STEP * entries as f32)
        .min(FALLBACK_MAX_CONFIDENCE)
        .max(FALLBACK_BASE_CONFIDENCE)
}

/// Scan all pages for anything that looks like a sign or a signed room.
pub fn parse(pages: &[Page]) -> ParseResult {
    let mut exclusions = ExclusionTally::default();
    let mut candidates = Vec::new();

    for page in pages {
        for line in content_lines(&page.text) {
            if exclusions.check(line) {
                continue;
            }

            if let Some(caps) = LEGEND.captures(line) {
                let code = &caps["code"];
                candidates.push(
                    Entry::new(
                        SourceType::RawText,
                        &normalize_code(code),
                        &normalize_name(&caps["desc"]),
                        ENTRY_CONFIDENCE,
                    )
                    .with_sign_type(code)
                    .with_page(page.page_number),
                );
                continue;
            }

            for caps in ROOM_TAG.captures_iter(line) {
                let name = normalize_name(&caps["name"]);
                if is_unsigned_room(&name) {
                    continue;
                }
                let number = &caps["num"];
                candidates.push(
                    Entry::new(SourceType::RawText, number, &name, ENTRY_CONFIDENCE)
                        .with_room_number(number)
                        .with_page(page.page_number),
                );
            }
        }
    }

    let raw_count = candidates.len();
    let entries = dedup_entries(candidates).entries;

    let mut warnings = vec!["No classified source found; raw-text scan used".to_string()];
    if let Some(w) = exclusions.warning() {
        warnings.push(w);
    }

    tracing::info!(entries = entries.len(), pages = pages.len(), "Raw-text fallback scan");

    ParseResult {
        confidence: fallback_confidence(entries.len()),
        entries,
        source_type: SourceType::RawText,
        pages_parsed: pages.iter().map(|p| p.page_number).collect(),
        warnings,
        raw_count,
    }
}
