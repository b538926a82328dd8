//! Source discovery: classifies pages into candidate evidence sources.
//!
//! Schedules are found by scanning every page against a fixed signature set
//! per evidence type. Floor plans are the weakest-signal fallback and are
//! found instead by sheet-number prefixes and room-tag density.
//!
//! Output is sorted by confidence, highest first; the head is the primary source.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::confidence::clamp_unit;
use super::text::{content_lines, is_list_line, is_tabular_line};
use super::types::{FoundSource, Page, SourceFormat, SourceMetadata, SourceType};
use crate::pipeline_config::DiscoveryTuning;

/// A compiled signature with a short description for metadata/logging.
struct Signature {
    regex: Regex,
    description: &'static str,
}

fn signature(pattern: &str, description: &'static str) -> Signature {
    Signature {
        regex: Regex::new(pattern).unwrap(),
        description,
    }
}

static SIGNAGE_SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    vec![
        signature(r"(?i)\bsign(?:age)?\s+schedule\b", "signage schedule title"),
        signature(r"(?i)\bsign(?:age)?\s+legend\b", "signage legend title"),
        signature(r"(?i)\bsign\s+type\b", "sign type column"),
        signature(r"(?i)\b(?:tactile|braille)\b", "tactile/braille callout"),
        signature(r"(?i)\broom\s+identification\s+sign", "room identification sign"),
    ]
});

static DOOR_SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    vec![
        signature(r"(?i)\bdoor\s+schedule\b", "door schedule title"),
        signature(r"(?i)\bdoor\s+(?:no\.?|number|#)", "door number column"),
        signature(r"(?i)\bhardware\s+(?:set|group)\b", "hardware set column"),
        signature(r"(?i)\bframe\s+(?:type|material)\b", "frame column"),
        signature(r"(?i)\bfire\s+rating\b", "fire rating column"),
    ]
});

static FINISH_SIGNATURES: LazyLock<Vec<Signature>> = LazyLock::new(|| {
    vec![
        signature(r"(?i)\b(?:room\s+)?finish\s+schedule\b", "finish schedule title"),
        signature(r"(?i)\bwall\s+finish", "wall finish column"),
        signature(r"(?i)\bfloor\s+finish", "floor finish column"),
        signature(r"(?i)\bceiling\s+(?:finish|height)\b", "ceiling column"),
        signature(r"(?i)\bbase\s+finish\b", "base finish column"),
    ]
});

/// Architectural floor-plan sheet numbers (A101, A-102, A1.1) or an explicit title.
static SHEET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bA-?1(?:\d{2}|\.\d{1,2})\b|\bfloor\s+plan\b").unwrap());

/// Room tag: one to three capitalised words followed by a 3-4 digit room number.
static ROOM_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Z&/'-]{2,}(?:[ \t]+[A-Z&/'-]{2,}){0,2}[ \t]+\d{3,4}[A-Z]?\b").unwrap()
});

/// Legend-style "CODE : description" line.
static TAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[A-Z]{1,3}-?\d{1,3}[A-Z]?\s*[:=–]\s*\S").unwrap());

/// Minimum room tags on a page carrying a floor-plan sheet prefix.
const PREFIXED_FLOOR_PLAN_MIN_TAGS: usize = 3;

/// Share of lines needed to call a layout tabular or a list.
const LAYOUT_RATIO: f32 = 0.30;

/// Share of tagged lines needed to call a layout tagged.
const TAGGED_RATIO: f32 = 0.20;

/// Everything discovery learned about a document.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub sources: Vec<FoundSource>,
    pub warnings: Vec<String>,
}

impl DiscoveryResult {
    /// Highest-confidence source, if any.
    pub fn primary(&self) -> Option<&FoundSource> {
        self.sources.first()
    }

    pub fn secondaries(&self) -> &[FoundSource] {
        self.sources.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Classify pages into evidence sources.
pub fn discover_sources(pages: &[Page], tuning: &DiscoveryTuning) -> DiscoveryResult {
    let mut sources = Vec::new();

    for source_type in [
        SourceType::SignageSchedule,
        SourceType::DoorSchedule,
        SourceType::FinishSchedule,
    ] {
        if let Some(found) = scan_signatures(pages, source_type, tuning) {
            sources.push(found);
        }
    }

    let schedule_pages: BTreeSet<u32> = sources
        .iter()
        .filter(|s| s.source_type == SourceType::SignageSchedule)
        .flat_map(|s| s.pages.iter().copied())
        .collect();

    if let Some(found) = scan_floor_plans(pages, &schedule_pages, tuning) {
        sources.push(found);
    }

    // Stable sort keeps the signage > door > finish > plan order on ties.
    sources.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let warnings = discovery_warnings(&sources, tuning);

    tracing::debug!(
        pages = pages.len(),
        sources = sources.len(),
        primary = sources.first().map(|s| s.source_type.as_str()).unwrap_or("none"),
        "Source discovery complete"
    );

    DiscoveryResult { sources, warnings }
}

fn signatures_for(source_type: SourceType) -> &'static [Signature] {
    match source_type {
        SourceType::SignageSchedule => SIGNAGE_SIGNATURES.as_slice(),
        SourceType::DoorSchedule => DOOR_SIGNATURES.as_slice(),
        SourceType::FinishSchedule => FINISH_SIGNATURES.as_slice(),
        _ => &[],
    }
}

fn scan_signatures(
    pages: &[Page],
    source_type: SourceType,
    tuning: &DiscoveryTuning,
) -> Option<FoundSource> {
    let signatures = signatures_for(source_type);
    let mut hit_pages = Vec::new();
    let mut match_count = 0;
    let mut matched: BTreeSet<&'static str> = BTreeSet::new();

    for page in pages {
        let mut page_hits = 0;
        for sig in signatures {
            let n = sig.regex.find_iter(&page.text).count();
            if n > 0 {
                matched.insert(sig.description);
                page_hits += n;
            }
        }
        if page_hits > 0 {
            hit_pages.push(page.page_number);
            match_count += page_hits;
        }
    }

    if hit_pages.is_empty() {
        return None;
    }

    let format = infer_format(pages, &hit_pages);
    Some(FoundSource {
        source_type,
        confidence: score_source(source_type, match_count, hit_pages.len(), tuning),
        pages: hit_pages,
        format,
        metadata: SourceMetadata {
            match_count,
            signatures: matched.into_iter().map(String::from).collect(),
        },
    })
}

fn scan_floor_plans(
    pages: &[Page],
    excluded: &BTreeSet<u32>,
    tuning: &DiscoveryTuning,
) -> Option<FoundSource> {
    let mut hit_pages = Vec::new();
    let mut match_count = 0;
    let mut prefixed = false;

    for page in pages.iter().filter(|p| !excluded.contains(&p.page_number)) {
        let tags = ROOM_TAG.find_iter(&page.text).count();
        let has_prefix = SHEET_PREFIX.is_match(&page.text);
        let qualifies = (has_prefix && tags >= PREFIXED_FLOOR_PLAN_MIN_TAGS)
            || tags >= tuning.floor_plan_min_room_tags;
        if qualifies {
            hit_pages.push(page.page_number);
            match_count += tags;
            prefixed |= has_prefix;
        }
    }

    if hit_pages.is_empty() {
        return None;
    }

    let mut signatures = vec!["room tag density".to_string()];
    if prefixed {
        signatures.push("floor plan sheet prefix".to_string());
    }

    Some(FoundSource {
        source_type: SourceType::FloorPlan,
        confidence: score_source(SourceType::FloorPlan, match_count, hit_pages.len(), tuning),
        format: infer_format(pages, &hit_pages),
        pages: hit_pages,
        metadata: SourceMetadata {
            match_count,
            signatures,
        },
    })
}

/// Base confidence by type with match/span boosts and the single-page penalty.
pub fn score_source(
    source_type: SourceType,
    match_count: usize,
    page_count: usize,
    tuning: &DiscoveryTuning,
) -> f32 {
    let base = match source_type {
        SourceType::SignageSchedule => tuning.signage_schedule_base,
        SourceType::DoorSchedule => tuning.door_schedule_base,
        SourceType::FinishSchedule => tuning.finish_schedule_base,
        SourceType::FloorPlan => tuning.floor_plan_base,
        SourceType::RawText | SourceType::FastPath | SourceType::Agentic => 0.0,
    };

    let mut score = base;
    if match_count > tuning.match_boost_threshold {
        score += tuning.match_boost;
    }
    if page_count > tuning.span_boost_threshold {
        score += tuning.span_boost;
    }
    if page_count == 1 && source_type != SourceType::SignageSchedule {
        score -= tuning.single_page_penalty;
    }
    clamp_unit(score)
}

/// Infer layout from column, bullet and tag density across the source's pages.
pub fn infer_format(pages: &[Page], page_numbers: &[u32]) -> SourceFormat {
    let mut total = 0usize;
    let mut tabular = 0usize;
    let mut list = 0usize;
    let mut tagged = 0usize;

    for page in pages.iter().filter(|p| page_numbers.contains(&p.page_number)) {
        for line in content_lines(&page.text) {
            total += 1;
            if is_tabular_line(line) {
                tabular += 1;
            }
            if is_list_line(line) {
                list += 1;
            }
            if TAG_LINE.is_match(line) || ROOM_TAG.is_match(line) {
                tagged += 1;
            }
        }
    }

    if total == 0 {
        return SourceFormat::Unknown;
    }

    let ratio = |n: usize| n as f32 / total as f32;
    if ratio(tabular) >= LAYOUT_RATIO {
        SourceFormat::Tabular
    } else if ratio(list) >= LAYOUT_RATIO {
        SourceFormat::List
    } else if ratio(tagged) >= TAGGED_RATIO {
        SourceFormat::Tagged
    } else {
        SourceFormat::Unknown
    }
}

fn discovery_warnings(sources: &[FoundSource], tuning: &DiscoveryTuning) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(top) = sources.first() {
        if top.confidence < tuning.low_confidence_warning {
            warnings.push(format!(
                "Best evidence source ({}) has low confidence {:.2}",
                top.source_type, top.confidence
            ));
        }
    }

    if !sources.is_empty() && sources.iter().all(|s| s.source_type == SourceType::FloorPlan) {
        warnings.push(
            "Only floor-plan evidence found; quantities are estimates from room counts".to_string(),
        );
    }

    for source in sources.iter().filter(|s| s.format == SourceFormat::Unknown) {
        warnings.push(format!(
            "Could not infer layout of {} on pages {:?}",
            source.source_type, source.pages
        ));
    }

    warnings
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
