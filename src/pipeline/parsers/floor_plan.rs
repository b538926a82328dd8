//! Floor plan room-count parser.
//!
//! The weakest evidence type: plans carry room tags, not signs. Room tags are
//! matched against a template library, deduplicated by room number, and the
//! per-category counts are turned into signage estimates:
//!
//! | Estimate          | Derived from                    | Confidence |
//! |-------------------|---------------------------------|------------|
//! | Direct count      | one sign per matched room       | 0.8        |
//! | Tactile / ADA     | stairwells + elevators          | 0.7        |
//! | Room ID (generic) | numbered tags no template knows | 0.6        |
//! | Egress            | stairwells × 2                  | 0.5        |
//!
//! Electrical and mechanical rooms are recognized so their tags are not
//! counted as generic rooms, but they produce no signage.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::exclusion::ExclusionTally;
use super::{select_pages, ParseContext, ParseError};
use crate::pipeline::confidence::weighted_entry_confidence;
use crate::pipeline::text::{content_lines, normalize_room_number};
use crate::pipeline::types::{Entry, Page, ParseResult, SourceType};

pub const DIRECT_COUNT_CONFIDENCE: f32 = 0.8;
pub const TACTILE_ESTIMATE_CONFIDENCE: f32 = 0.7;
pub const ROOM_ID_ESTIMATE_CONFIDENCE: f32 = 0.6;
pub const EGRESS_ESTIMATE_CONFIDENCE: f32 = 0.5;

/// Egress/exit-route signs assumed per stairwell.
pub const EGRESS_SIGNS_PER_STAIR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoomCategory {
    Restroom,
    Office,
    Conference,
    Storage,
    Janitor,
    BreakRoom,
    Electrical,
    Mechanical,
    Stairwell,
    Elevator,
}

impl RoomCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restroom => "RESTROOM",
            Self::Office => "OFFICE",
            Self::Conference => "CONFERENCE",
            Self::Storage => "STORAGE",
            Self::Janitor => "JANITOR",
            Self::BreakRoom => "BREAK ROOM",
            Self::Electrical => "ELECTRICAL",
            Self::Mechanical => "MECHANICAL",
            Self::Stairwell => "STAIRWELL",
            Self::Elevator => "ELEVATOR",
        }
    }

    /// Service spaces that never get signage.
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Electrical | Self::Mechanical)
    }

    /// Vertical circulation, counted only through the derived estimates.
    pub fn is_vertical(&self) -> bool {
        matches!(self, Self::Stairwell | Self::Elevator)
    }
}

struct RoomTemplate {
    category: RoomCategory,
    regex: Regex,
}

/// Optional room number after a label: "OFFICE 101", "STORAGE RM 104", "STAIR #2".
const NUMBER_SUFFIX: &str = r"(?:[ \t]+(?:RM\.?[ \t]*|ROOM[ \t]+|NO\.?[ \t]*|#[ \t]*)?(?P<num>\d{1,4}[A-Z]?))?\b";

fn template(category: RoomCategory, label: &str) -> RoomTemplate {
    RoomTemplate {
        category,
        regex: Regex::new(&format!(r"(?i)\b(?:{label}){NUMBER_SUFFIX}")).unwrap(),
    }
}

static ROOM_TEMPLATES: LazyLock<Vec<RoomTemplate>> = LazyLock::new(|| {
    vec![
        template(RoomCategory::Restroom, r"RESTROOM|TOILET|WOMEN'?S?|MEN'?S?|UNISEX|LAV(?:ATORY)?"),
        template(RoomCategory::Office, r"OFFICES?"),
        template(RoomCategory::Conference, r"CONFERENCE|CONF\.?"),
        template(RoomCategory::Storage, r"STORAGE|STOR\.?"),
        template(RoomCategory::Janitor, r"JANITOR|JAN\.|CUSTODIAL"),
        template(RoomCategory::BreakRoom, r"BREAK[ \t]+ROOM|BREAKROOM|LOUNGE"),
        template(RoomCategory::Electrical, r"ELECTRICAL|ELEC\.?"),
        template(RoomCategory::Mechanical, r"MECHANICAL|MECH\.?"),
        template(RoomCategory::Stairwell, r"STAIRWELL|STAIRS?"),
        template(RoomCategory::Elevator, r"ELEVATOR|ELEV\.?"),
    ]
});

/// Any uppercase room tag with a 3-4 digit number.
static GENERIC_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Z&/'-]{2,}(?:[ \t]+[A-Z&/'-]{2,}){0,2}[ \t]+(?P<num>\d{3,4}[A-Z]?)\b").unwrap()
});

/// Room numbers (3+ digits) identify a space across categories; short
/// ordinals ("STAIR 1", "ELEV 1") only within their own category.
fn claim_key(category: RoomCategory, number: &str) -> String {
    if number.chars().take_while(char::is_ascii_digit).count() >= 3 {
        number.to_string()
    } else {
        format!("{}:{number}", category.as_str())
    }
}

/// Room occurrences gathered across all plan pages.
#[derive(Default)]
struct RoomTally {
    /// Distinct room numbers per category, first category to claim a number wins.
    numbered: BTreeMap<RoomCategory, Vec<String>>,
    /// Stand-alone labels without a number ("STAIR", "ELEVATOR").
    unnumbered: BTreeMap<RoomCategory, u32>,
    claimed: HashSet<String>,
    generic: Vec<String>,
    pages: BTreeMap<RoomCategory, Vec<u32>>,
}

impl RoomTally {
    fn count(&self, category: RoomCategory) -> u32 {
        let numbered = self.numbered.get(&category).map_or(0, |v| v.len() as u32);
        numbered + self.unnumbered.get(&category).copied().unwrap_or(0)
    }

    fn note_page(&mut self, category: RoomCategory, page: u32) {
        let pages = self.pages.entry(category).or_default();
        if !pages.contains(&page) {
            pages.push(page);
        }
    }

    fn scan_line(&mut self, line: &str, page: u32) {
        let trimmed = line.trim();
        for template in ROOM_TEMPLATES.iter() {
            for caps in template.regex.captures_iter(trimmed) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                match caps.name("num") {
                    Some(num) => {
                        let number = normalize_room_number(num.as_str());
                        if self.claimed.insert(claim_key(template.category, &number)) {
                            self.numbered.entry(template.category).or_default().push(number);
                            self.note_page(template.category, page);
                        }
                    }
                    // A bare label only counts when it is the whole tag.
                    None if whole.start() == 0 && whole.end() == trimmed.len() => {
                        *self.unnumbered.entry(template.category).or_default() += 1;
                        self.note_page(template.category, page);
                    }
                    None => {}
                }
            }
        }
    }

    /// Numbered tags left over once every template has claimed its rooms.
    fn scan_generic(&mut self, line: &str) {
        for caps in GENERIC_TAG.captures_iter(line) {
            let number = normalize_room_number(&caps["num"]);
            if !self.claimed.contains(&number) && !self.generic.contains(&number) {
                self.generic.push(number);
            }
        }
    }
}

/// Parse floor plan pages into per-category signage estimates.
pub fn parse(pages: &[Page], relevant: &[u32], _ctx: &ParseContext) -> Result<ParseResult, ParseError> {
    let selected = select_pages(pages, relevant)?;
    let mut exclusions = ExclusionTally::default();
    let mut tally = RoomTally::default();
    let mut kept_lines = Vec::new();

    for page in &selected {
        for line in content_lines(&page.text) {
            if exclusions.check(line) {
                continue;
            }
            tally.scan_line(line, page.page_number);
            kept_lines.push(line);
        }
    }
    // Second sweep so a number claimed by a later template line is not
    // mistaken for a generic room.
    for line in &kept_lines {
        tally.scan_generic(line);
    }

    let mut entries = Vec::new();
    let mut service_rooms = 0u32;
    let raw_count = tally.numbered.values().map(Vec::len).sum::<usize>()
        + tally.unnumbered.values().sum::<u32>() as usize
        + tally.generic.len();

    let categories: BTreeSet<RoomCategory> = tally
        .numbered
        .keys()
        .chain(tally.unnumbered.keys())
        .copied()
        .collect();

    for category in categories {
        if category.is_service() {
            service_rooms += tally.count(category);
            continue;
        }
        if category.is_vertical() {
            continue;
        }
        let count = tally.count(category);
        if count == 0 {
            continue;
        }
        let mut entry = Entry::new(
            SourceType::FloorPlan,
            category.as_str(),
            category.as_str(),
            DIRECT_COUNT_CONFIDENCE,
        )
        .with_quantity(count)
        .with_notes(room_list_note(tally.numbered.get(&category)));
        for &p in tally.pages.get(&category).into_iter().flatten() {
            entry.add_page(p);
        }
        entries.push(entry);
    }

    if !tally.generic.is_empty() {
        entries.push(
            Entry::new(
                SourceType::FloorPlan,
                "ROOM-ID",
                "ROOM IDENTIFICATION",
                ROOM_ID_ESTIMATE_CONFIDENCE,
            )
            .with_quantity(tally.generic.len() as u32)
            .with_notes(format!("Estimated from rooms {}", tally.generic.join(", "))),
        );
    }

    let stairs = tally.count(RoomCategory::Stairwell);
    let elevators = tally.count(RoomCategory::Elevator);
    if stairs + elevators > 0 {
        entries.push(
            Entry::new(
                SourceType::FloorPlan,
                "TACTILE",
                "TACTILE EXIT / ELEVATOR",
                TACTILE_ESTIMATE_CONFIDENCE,
            )
            .with_quantity(stairs + elevators)
            .with_notes(format!("{stairs} stairwell(s), {elevators} elevator(s)")),
        );
    }
    if stairs > 0 {
        entries.push(
            Entry::new(SourceType::FloorPlan, "EGRESS", "EGRESS ROUTE", EGRESS_ESTIMATE_CONFIDENCE)
                .with_quantity(stairs * EGRESS_SIGNS_PER_STAIR)
                .with_notes(format!(
                    "{EGRESS_SIGNS_PER_STAIR} per stairwell x {stairs} stairwell(s)"
                )),
        );
    }

    let mut warnings = vec!["Floor plan counts are estimates; verify against a schedule".to_string()];
    if service_rooms > 0 {
        warnings.push(format!("Ignored {service_rooms} electrical/mechanical room(s)"));
    }
    if let Some(w) = exclusions.warning() {
        warnings.push(w);
    }
    if entries.is_empty() {
        warnings.push(format!("No room tags found on floor plan pages {relevant:?}"));
    }

    Ok(ParseResult {
        confidence: weighted_entry_confidence(&entries),
        raw_count: raw_count.max(entries.len()),
        entries,
        source_type: SourceType::FloorPlan,
        pages_parsed: selected.iter().map(|p| p.page_number).collect(),
        warnings,
    })
}

fn room_list_note(numbers: Option<&Vec<String>>) -> String {
    match numbers {
        Some(numbers) if !numbers.is_empty() => format!("Rooms {}", numbers.join(", ")),
        _ => "Unnumbered labels".to_string(),
    }
}
