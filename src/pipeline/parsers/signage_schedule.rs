//! Signage schedule / legend parser.
//!
//! Two strategies:
//! - Tabular: rows under a detected header ("SIGN TYPE ... DESCRIPTION ... QTY"),
//!   split into columns.
//! - Legend: "CODE : description [QTY n] [LOCATION ...]" lines.
//!
//! Tabular layouts try the table first, list/tagged layouts the legend first;
//! an ambiguous layout runs both and merges by normalized code (max quantity,
//! union of locations).

use std::sync::LazyLock;

use regex::Regex;

use super::exclusion::ExclusionTally;
use super::{select_pages, ParseContext, ParseError};
use crate::pipeline::confidence::weighted_entry_confidence;
use crate::pipeline::dedup::dedup_entries;
use crate::pipeline::text::{normalize_code, normalize_name, split_columns};
use crate::pipeline::types::{Entry, Page, ParseResult, SourceFormat, SourceType};

/// Sign-type code: short alphabetic prefix + digits ("A1", "RS-12", "TS3B").
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{1,3}-?\d{1,3}[A-Z]?$").unwrap());

/// Header row anchoring the tabular strategy.
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sign\s+)?type\b.*\b(?:description|message|qty|quantity)\b").unwrap()
});

/// Legend line: code, separator, remainder.
static LEGEND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-•*]\s*)?(?P<code>[A-Z]{1,3}-?\d{1,3}[A-Z]?)\s*[:=–-]\s*(?P<rest>\S.*)$")
        .unwrap()
});

/// Quantity tokens inside a legend remainder: "QTY: 4", "(4)", "x4".
static QTY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:qty|quantity)\.?\s*[:=]?\s*(\d{1,4})\b|\((\d{1,4})\)|\bx\s*(\d{1,4})\b")
        .unwrap()
});

/// Trailing location text inside a legend remainder. The keyword must be a
/// whole word with a separator so "LOCKER" or "LOCAL" stay in the description.
static LOCATION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:location|loc)\b\.?\s*[:=]|\s@)\s*(?P<loc>.+)$").unwrap()
});

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,4}$").unwrap());

/// Confidence taken off rows that never state a quantity.
const MISSING_QTY_PENALTY: f32 = 0.10;

/// Accumulates candidate rows from either strategy.
#[derive(Default)]
struct Candidates {
    entries: Vec<Entry>,
    exclusions: ExclusionTally,
}

/// Parse signage schedule pages.
pub fn parse(pages: &[Page], relevant: &[u32], ctx: &ParseContext) -> Result<ParseResult, ParseError> {
    let selected = select_pages(pages, relevant)?;
    let mut candidates = Candidates::default();
    let mut warnings = Vec::new();

    match ctx.format {
        SourceFormat::Tabular => {
            parse_tabular(&selected, ctx, &mut candidates);
            if candidates.entries.is_empty() {
                parse_legend(&selected, ctx, &mut candidates);
            }
        }
        SourceFormat::List | SourceFormat::Tagged => {
            parse_legend(&selected, ctx, &mut candidates);
            if candidates.entries.is_empty() {
                parse_tabular(&selected, ctx, &mut candidates);
            }
        }
        SourceFormat::Unknown => {
            parse_tabular(&selected, ctx, &mut candidates);
            parse_legend(&selected, ctx, &mut candidates);
        }
    }

    let raw_count = candidates.entries.len();
    let outcome = dedup_entries(candidates.entries);

    if let Some(w) = candidates.exclusions.warning() {
        warnings.push(w);
    }
    if outcome.entries.is_empty() {
        warnings.push(format!("No sign-type rows found on pages {relevant:?}"));
    }

    Ok(ParseResult {
        confidence: weighted_entry_confidence(&outcome.entries),
        entries: outcome.entries,
        source_type: SourceType::SignageSchedule,
        pages_parsed: selected.iter().map(|p| p.page_number).collect(),
        warnings,
        raw_count,
    })
}

/// Table rows after a header line, per page.
fn parse_tabular(pages: &[&Page], ctx: &ParseContext, out: &mut Candidates) {
    for page in pages {
        let mut in_table = false;
        for line in page.text.lines() {
            if HEADER.is_match(line) {
                in_table = true;
                continue;
            }
            if !in_table {
                continue;
            }

            let cols = split_columns(line);
            let Some(code) = cols.first().filter(|c| CODE.is_match(c)) else {
                continue;
            };
            let Some(description) = cols.get(1).filter(|c| !INTEGER.is_match(c)) else {
                continue;
            };
            if out.exclusions.check(line) {
                continue;
            }

            let qty_pos = cols.iter().skip(2).position(|c| INTEGER.is_match(c)).map(|i| i + 2);
            let quantity = qty_pos.and_then(|i| cols[i].parse::<u32>().ok());
            let location = qty_pos
                .map(|i| cols[i + 1..].join(" "))
                .unwrap_or_else(|| cols.get(2..).map(|c| c.join(" ")).unwrap_or_default());

            out.entries
                .push(build_entry(code, description, quantity, &location, page.page_number, ctx));
        }
    }
}

/// "CODE : description" lines anywhere on the page.
fn parse_legend(pages: &[&Page], ctx: &ParseContext, out: &mut Candidates) {
    for page in pages {
        for line in page.text.lines() {
            let Some(caps) = LEGEND_LINE.captures(line) else {
                continue;
            };
            if out.exclusions.check(line) {
                continue;
            }
            let code = &caps["code"];
            let mut rest = caps["rest"].to_string();

            let mut location = String::new();
            if let Some(loc) = LOCATION_TOKEN.captures(&rest) {
                location = loc["loc"].trim().to_string();
                let start = loc.get(0).map_or(rest.len(), |m| m.start());
                rest.truncate(start);
            }

            let mut quantity = None;
            if let Some(q) = QTY_TOKEN.captures(&rest) {
                quantity = (1..=3)
                    .find_map(|i| q.get(i))
                    .and_then(|m| m.as_str().parse::<u32>().ok());
                let range = q.get(0).map(|m| m.range());
                if let Some(range) = range {
                    rest.replace_range(range, " ");
                }
            }

            let description = rest.trim().trim_matches(|c: char| matches!(c, ',' | ';' | '-' | '–'));
            if description.trim().is_empty() {
                continue;
            }

            out.entries
                .push(build_entry(code, description, quantity, &location, page.page_number, ctx));
        }
    }
}

fn build_entry(
    code: &str,
    description: &str,
    quantity: Option<u32>,
    location: &str,
    page: u32,
    ctx: &ParseContext,
) -> Entry {
    let confidence = match quantity {
        Some(_) => ctx.source_confidence,
        None => ctx.source_confidence - MISSING_QTY_PENALTY,
    };
    let mut entry = Entry::new(
        SourceType::SignageSchedule,
        &normalize_code(code),
        &normalize_name(description),
        confidence,
    )
    .with_sign_type(code)
    .with_quantity(quantity.unwrap_or(1))
    .with_page(page);
    entry.add_location(location);
    if quantity.is_none() {
        entry.notes = Some("Quantity not stated; assumed 1".into());
    }
    entry
}
