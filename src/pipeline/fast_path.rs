//! Fast-path pattern extractor.
//!
//! A deterministic shortcut tried before the agentic loop. The whole
//! document is scored against a fixed content-pattern library; below the
//! gate the fast path declines and the agent takes over. Otherwise one
//! direct extractor runs, chosen by what the text looks like:
//!
//! - site plans: compound callouts `area.TYPE.index` ("7.P3.28")
//! - signage schedules and legends: code rows
//! - door schedules: door number + room name rows
//!
//! Results are never fully certain: confidence is clamped to the configured
//! band (default [0.5, 0.90]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use super::confidence::clamp_unit;
use super::dedup::dedup_entries;
use super::parsers::door_schedule::is_unsigned_room;
use super::parsers::exclusion::ExclusionTally;
use super::text::{content_lines, normalize_code, normalize_name, split_columns};
use super::types::{Entry, ExtractionResult, Page, SourceType};
use crate::pipeline_config::FastPathTuning;

// ═══════════════════════════════════════════
// Content-pattern library
// ═══════════════════════════════════════════

/// Which extractor a content pattern is evidence for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FastPathKind {
    SitePlan,
    Schedule,
    DoorSchedule,
}

impl FastPathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SitePlan => "site_plan",
            Self::Schedule => "schedule",
            Self::DoorSchedule => "door_schedule",
        }
    }
}

struct ContentPattern {
    regex: Regex,
    weight: f32,
    kind: FastPathKind,
}

fn pattern(regex: &str, weight: f32, kind: FastPathKind) -> ContentPattern {
    ContentPattern {
        regex: Regex::new(regex).unwrap(),
        weight,
        kind,
    }
}

static CONTENT_PATTERNS: LazyLock<Vec<ContentPattern>> = LazyLock::new(|| {
    use FastPathKind::*;
    vec![
        pattern(r"\b\d{1,3}\.[A-Z]{1,3}\d{1,3}\.\d{1,4}\b", 0.45, SitePlan),
        pattern(r"(?i)\b(?:site|key)\s+plan\b", 0.30, SitePlan),
        pattern(r"(?i)\bsign(?:age)?\s+(?:schedule|legend)\b", 0.40, Schedule),
        pattern(r"(?i)\bsign\s+type\b", 0.20, Schedule),
        pattern(r"(?i)\b(?:qty|quantity)\b", 0.15, Schedule),
        pattern(r"(?m)^\s*[A-Z]{1,3}-?\d{1,3}[A-Z]?\s*[:=]\s*[A-Za-z]", 0.25, Schedule),
        pattern(r"(?i)\b(?:room\s+identification|tactile|braille)\b", 0.10, Schedule),
        pattern(r"(?i)\bdoor\s+schedule\b", 0.40, DoorSchedule),
        pattern(r"(?i)\bdoor\s+(?:no\.?|number|#)", 0.20, DoorSchedule),
        pattern(r"(?i)\bhardware\s+(?:set|group)\b|\bframe\s+type\b", 0.15, DoorSchedule),
    ]
});

/// Summed weight of every content pattern present anywhere in the text, capped at 1.
pub fn content_confidence(text: &str) -> f32 {
    let score: f32 = CONTENT_PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.weight)
        .sum();
    clamp_unit(score)
}

/// Strongest extractor signal in the text. Callouts win outright.
fn detect_kind(text: &str) -> Option<FastPathKind> {
    let mut weights: BTreeMap<FastPathKind, f32> = BTreeMap::new();
    for p in CONTENT_PATTERNS.iter().filter(|p| p.regex.is_match(text)) {
        *weights.entry(p.kind).or_default() += p.weight;
    }
    if CALLOUT.is_match(text) {
        return Some(FastPathKind::SitePlan);
    }
    weights
        .into_iter()
        .filter(|(kind, _)| *kind != FastPathKind::SitePlan)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(kind, _)| kind)
}

// ═══════════════════════════════════════════
// Extractors
// ═══════════════════════════════════════════

/// `area.TYPE.index`, e.g. "7.P3.28".
static CALLOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\.([A-Z]{1,3}\d{1,3})\.(\d{1,4})\b").unwrap());

static SIGN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,3}-?\d{1,3}[A-Z]?$").unwrap());

static LEGEND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<code>[A-Z]{1,3}-?\d{1,3}[A-Z]?)\s*[:=]\s*(?P<desc>[A-Za-z][^:=]*?)\s*$").unwrap()
});

static QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:QTY[:.]?\s*)?(\d{1,4})$").unwrap());

static DOOR_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:DOOR\s*#?\s*)?(?P<door>\d{3,4})[A-Z]?(?:\s{2,}|\t)\s*(?P<name>[A-Z][A-Z &/'-]*[A-Z])\s*(?:\s{2,}|\t|$)")
        .unwrap()
});

/// Entries plus the structural issues noticed while extracting them.
#[derive(Debug, Clone, Default)]
struct Extracted {
    entries: Vec<Entry>,
    issues: Vec<String>,
    /// Distinct physical signs counted (callouts for site plans, entries otherwise).
    units: usize,
}

/// Count site-plan callouts per type code.
///
/// A callout string names one physical sign, so repeated mentions of the
/// same callout count once. Quantity per type is the number of distinct
/// callouts.
pub fn extract_site_plan_callouts(pages: &[Page]) -> Vec<Entry> {
    site_plan(pages).entries
}

fn site_plan(pages: &[Page]) -> Extracted {
    let mut exclusions = ExclusionTally::default();
    let mut by_type: BTreeMap<String, BTreeSet<(u32, u32)>> = BTreeMap::new();
    let mut pages_by_type: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    let mut areas_by_type: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();

    for page in pages {
        for line in content_lines(&page.text) {
            if exclusions.check(line) {
                continue;
            }
            for caps in CALLOUT.captures_iter(line) {
                let (Ok(area), Ok(index)) = (caps[1].parse::<u32>(), caps[3].parse::<u32>()) else {
                    continue;
                };
                let code = caps[2].to_string();
                by_type.entry(code.clone()).or_default().insert((area, index));
                pages_by_type.entry(code.clone()).or_default().insert(page.page_number);
                areas_by_type.entry(code).or_default().insert(area);
            }
        }
    }

    let mut issues = Vec::new();
    let mut entries = Vec::new();
    let mut units = 0;

    for (code, callouts) in &by_type {
        units += callouts.len();
        for area in areas_by_type.get(code).into_iter().flatten() {
            let indices: Vec<u32> = callouts
                .iter()
                .filter(|(a, _)| a == area)
                .map(|(_, i)| *i)
                .collect();
            if let (Some(first), Some(last)) = (indices.first(), indices.last()) {
                let expected = (last - first + 1) as usize;
                if expected != indices.len() {
                    issues.push(format!(
                        "Callouts {area}.{code}.{first}-{last} skip {} index(es)",
                        expected - indices.len()
                    ));
                }
            }
        }

        let listed: Vec<String> = callouts
            .iter()
            .map(|(area, index)| format!("{area}.{code}.{index}"))
            .collect();
        let mut entry = Entry::new(SourceType::FastPath, code, &format!("SIGN TYPE {code}"), 0.0)
            .with_sign_type(code)
            .with_quantity(callouts.len() as u32)
            .with_notes(format!("callouts: {}", listed.join(", ")));
        for &page in pages_by_type.get(code).into_iter().flatten() {
            entry.add_page(page);
        }
        entries.push(entry);
    }

    if let Some(w) = exclusions.warning() {
        issues.push(w);
    }
    Extracted {
        entries,
        issues,
        units,
    }
}

fn schedule(pages: &[Page]) -> Extracted {
    let mut exclusions = ExclusionTally::default();
    let mut candidates = Vec::new();
    let mut issues = Vec::new();
    let mut seen_quantities: BTreeMap<String, u32> = BTreeMap::new();

    for page in pages {
        for line in content_lines(&page.text) {
            let Some((code, desc, quantity)) = schedule_row(line) else {
                continue;
            };
            if exclusions.check(line) {
                continue;
            }
            let key = normalize_code(&code);
            match quantity {
                None => issues.push(format!("No quantity for sign type {code}")),
                Some(q) => {
                    if let Some(prev) = seen_quantities.insert(key.clone(), q) {
                        if prev != q {
                            issues.push(format!("Sign type {code} listed with quantities {prev} and {q}"));
                        }
                    }
                }
            }
            candidates.push(
                Entry::new(SourceType::FastPath, &key, &normalize_name(&desc), 0.0)
                    .with_sign_type(&code)
                    .with_quantity(quantity.unwrap_or(1))
                    .with_page(page.page_number),
            );
        }
    }

    if let Some(w) = exclusions.warning() {
        issues.push(w);
    }
    let entries = dedup_entries(candidates).entries;
    Extracted {
        units: entries.len(),
        entries,
        issues,
    }
}

/// (code, description, quantity) from a legend line or a column row.
fn schedule_row(line: &str) -> Option<(String, String, Option<u32>)> {
    if let Some(caps) = LEGEND_LINE.captures(line) {
        return Some((caps["code"].to_string(), caps["desc"].to_string(), None));
    }
    let cols = split_columns(line);
    let (code, rest) = cols.split_first()?;
    let code = code.to_uppercase();
    let desc = rest.first()?;
    if !SIGN_CODE.is_match(&code) || !desc.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let quantity = rest[1..]
        .iter()
        .find_map(|c| QUANTITY.captures(&c.to_uppercase()).and_then(|q| q[1].parse().ok()));
    Some((code, desc.to_string(), quantity))
}

fn door_schedule(pages: &[Page]) -> Extracted {
    let mut exclusions = ExclusionTally::default();
    let mut candidates = Vec::new();
    let mut skipped = 0usize;

    for page in pages {
        for line in content_lines(&page.text) {
            let Some(caps) = DOOR_ROW.captures(line) else {
                continue;
            };
            if exclusions.check(line) {
                continue;
            }
            let name = normalize_name(&caps["name"]);
            if is_unsigned_room(&name) {
                skipped += 1;
                continue;
            }
            let room = &caps["door"];
            candidates.push(
                Entry::new(SourceType::FastPath, room, &name, 0.0)
                    .with_room_number(room)
                    .with_page(page.page_number),
            );
        }
    }

    let mut issues = Vec::new();
    if skipped > 0 {
        issues.push(format!("Skipped {skipped} unsigned service room(s)"));
    }
    if let Some(w) = exclusions.warning() {
        issues.push(w);
    }
    let entries = dedup_entries(candidates).entries;
    Extracted {
        units: entries.len(),
        entries,
        issues,
    }
}

// ═══════════════════════════════════════════
// Confidence
// ═══════════════════════════════════════════

/// Site plans are capped lower and lose confidence per structural issue.
fn site_plan_confidence(units: usize, issues: usize) -> f32 {
    (0.6 + 0.02 * units as f32).min(0.85) - 0.05 * issues as f32
}

/// Schedules gain with volume and get a bonus when nothing looked wrong.
fn schedule_confidence(entries: usize, issues: usize) -> f32 {
    let bonus = if issues == 0 { 0.05 } else { 0.0 };
    0.7 + (0.01 * entries as f32).min(0.15) + bonus
}

// ═══════════════════════════════════════════
// Entry point
// ═══════════════════════════════════════════

/// Try the fast path. `None` means declined; the caller moves on.
pub fn extract(pages: &[Page], tuning: &FastPathTuning) -> Option<ExtractionResult> {
    let text: String = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let content = content_confidence(&text);
    if content < tuning.min_content_confidence {
        tracing::debug!(content, gate = tuning.min_content_confidence, "Fast path declined: content");
        return None;
    }
    let kind = detect_kind(&text)?;

    let extracted = match kind {
        FastPathKind::SitePlan => site_plan(pages),
        FastPathKind::Schedule => schedule(pages),
        FastPathKind::DoorSchedule => door_schedule(pages),
    };
    if extracted.entries.len() < tuning.min_entries {
        tracing::debug!(
            kind = kind.as_str(),
            entries = extracted.entries.len(),
            "Fast path declined: too few entries"
        );
        return None;
    }

    let raw = match kind {
        FastPathKind::SitePlan => site_plan_confidence(extracted.units, extracted.issues.len()),
        FastPathKind::Schedule | FastPathKind::DoorSchedule => {
            schedule_confidence(extracted.entries.len(), extracted.issues.len())
        }
    };
    let confidence = raw.clamp(tuning.min_confidence, tuning.max_confidence);

    let entries: Vec<Entry> = extracted
        .entries
        .into_iter()
        .map(|mut e| {
            e.confidence = confidence;
            e
        })
        .collect();

    tracing::info!(
        kind = kind.as_str(),
        entries = entries.len(),
        content,
        confidence,
        "Fast path accepted"
    );

    Some(ExtractionResult::assemble(
        entries,
        confidence,
        Some(SourceType::FastPath),
        BTreeSet::from([SourceType::FastPath]),
        Vec::new(),
        Vec::new(),
        0,
        extracted.issues,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pages(text: &str) -> Vec<Page> {
        vec![Page::new(1, text)]
    }

    fn tuning() -> FastPathTuning {
        FastPathTuning::default()
    }

    const SITE_PLAN: &str = "SITE PLAN - SIGNAGE LEGEND\n\
        PARKING ROW A  7.P3.28\n\
        7.P3.28 AT ENTRY\n\
        SEE 7.P3.28\n\
        7.P3.29\n\
        7.P1.1   7.P1.2\n\
        7.P2.5\n";

    #[test]
    fn repeated_callouts_count_once() {
        let entries = extract_site_plan_callouts(&make_pages(
            "7.P3.28 NORTH\n7.P3.28 SOUTH\nREF 7.P3.28\n7.P3.29\n",
        ));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sign_type_code.as_deref(), Some("P3"));
        assert_eq!(entries[0].quantity, 2);
    }

    #[test]
    fn site_plan_extraction() {
        let result = extract(&make_pages(SITE_PLAN), &tuning()).unwrap();
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.total_count, 5);
        assert_eq!(result.primary_source, Some(SourceType::FastPath));
        assert!(result.converged);
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn index_gaps_are_issues() {
        let text = "SITE PLAN\n7.P3.1\n7.P3.4\n7.P1.1\n7.P1.2\n7.P2.1\n";
        let result = extract(&make_pages(text), &tuning()).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("skip 2"));
        // 5 callouts, one issue: 0.6 + 0.10 - 0.05
        assert!((result.confidence - 0.65).abs() < 1e-6);
    }

    #[test]
    fn schedule_extraction() {
        let text = "SIGNAGE SCHEDULE\n\
            SIGN TYPE    DESCRIPTION        QTY\n\
            A1           ROOM ID            12\n\
            A2           RESTROOM           4\n\
            B1           EXIT STAIR         2\n";
        let result = extract(&make_pages(text), &tuning()).unwrap();
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.total_count, 18);
        // 0.70 + 0.03 + 0.05
        assert!((result.confidence - 0.78).abs() < 1e-6);
    }

    #[test]
    fn legend_without_quantities_flags_issues() {
        let text = "SIGNAGE LEGEND\nSIGN TYPE\nA1: ROOM IDENTIFICATION\nA2: RESTROOM\nB1: EXIT\n";
        let result = extract(&make_pages(text), &tuning()).unwrap();
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.warnings.len(), 3);
        assert!((result.confidence - 0.73).abs() < 1e-6);
    }

    #[test]
    fn door_schedule_extraction() {
        let text = "DOOR SCHEDULE\n\
            DOOR NO.   ROOM NAME     HARDWARE SET\n\
            101        OFFICE        HW-1\n\
            101A       OFFICE        HW-1\n\
            102        STORAGE       HW-2\n\
            103        MECH ROOM     HW-3\n\
            104        LOBBY         HW-4\n";
        let result = extract(&make_pages(text), &tuning()).unwrap();
        let rooms: Vec<_> = result.entries.iter().filter_map(|e| e.room_number.as_deref()).collect();
        assert_eq!(rooms, vec!["101", "102", "104"]);
        assert!(result.warnings.iter().any(|w| w.contains("unsigned")));
    }

    #[test]
    fn low_content_declines() {
        let text = "GENERAL NOTES\nCONTRACTOR SHALL VERIFY ALL DIMENSIONS.\n7.P3.28\n";
        assert!(content_confidence(text) < 0.7);
        assert!(extract(&make_pages(text), &tuning()).is_none());
    }

    #[test]
    fn too_few_entries_declines() {
        let text = "SITE PLAN\nSIGNAGE LEGEND\n7.P3.28\n7.P3.29\n7.P1.1\n";
        assert!(extract(&make_pages(text), &tuning()).is_none());
    }

    #[test]
    fn confidence_stays_in_band() {
        let t = tuning();
        let many = (1..=60).map(|i| format!("7.P{}.{}\n", i % 4 + 1, i)).collect::<String>();
        let text = format!("SITE PLAN\n{many}");
        let result = extract(&make_pages(&text), &t).unwrap();
        assert!(result.confidence >= 0.5 && result.confidence <= 0.9);

        let rows = (1..=40).map(|i| format!("A{i}    ROOM SIGN    2\n")).collect::<String>();
        let text = format!("SIGNAGE SCHEDULE\nSIGN TYPE   DESCRIPTION   QTY\n{rows}");
        let result = extract(&make_pages(&text), &t).unwrap();
        assert!((result.confidence - 0.9).abs() < 1e-6);

        assert_eq!(site_plan_confidence(1, 12).clamp(t.min_confidence, t.max_confidence), 0.5);
    }
}
