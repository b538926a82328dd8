//! Door and finish schedule parsers.
//!
//! Both schedules are indirect sources: each row names a room, and every
//! room that needs signage gets exactly one sign no matter how many doors
//! open into it. Rows are matched by positional templates tried in order:
//!
//! 1. Column-aligned table row (tabs, pipes or wide gaps)
//! 2. Bulleted list row ("- 101: OFFICE (RM 101)")
//! 3. Numbered list row ("3. DOOR 101 OFFICE")
//!
//! Door schedules lead with the door number, finish schedules with the room
//! number; everything after row matching (denylist, grouped ranges, dedup)
//! is shared.

use std::sync::LazyLock;

use regex::Regex;

use super::exclusion::ExclusionTally;
use super::{select_pages, ParseContext, ParseError};
use crate::pipeline::confidence::weighted_entry_confidence;
use crate::pipeline::dedup::dedup_entries;
use crate::pipeline::text::{normalize_name, split_columns};
use crate::pipeline::types::{Entry, Page, ParseResult, SourceType};

// ═══════════════════════════════════════════
// Patterns
// ═══════════════════════════════════════════

static DOOR_NO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]?\d{2,4}[A-Z]?(?:[.-]\d{1,2}[A-Z]?)?$").unwrap());

/// Room number cell as written: "101", "102A", "102-A", "RM 104".
static ROOM_NO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:RM|ROOM)\.?\s*#?\s*)?[A-Z]?\d{2,4}(?:-?[A-Z])?$").unwrap()
});

/// A door number that doubles as its room number ("101", "101A" → "101").
static DOOR_AS_ROOM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{3,4})[A-Z]?$").unwrap());

/// Room name cell: starts with a letter, no schedule hardware noise.
static ROOM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9 &/'.#–-]*$").unwrap());

static BULLETED_DOOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*[-•*▪]\s*(?:DOOR\s*#?\s*)?(?P<door>[A-Z]?\d{2,4}[A-Z]?(?:[.-]\d{1,2}[A-Z]?)?)\s*[:=–-]?\s+(?P<name>[A-Z][A-Z0-9 &/'.–-]*?)(?:\s*[,(]?\s*(?:RM|ROOM)\.?\s*#?\s*(?P<room>[A-Z]?\d{2,4}[A-Z]?)\)?)?\s*$",
    )
    .unwrap()
});

static NUMBERED_DOOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*\d{1,3}[.)]\s+(?:DOOR\s*#?\s*)?(?P<door>[A-Z]?\d{2,4}[A-Z]?(?:[.-]\d{1,2}[A-Z]?)?)\s*[:=–-]?\s+(?P<name>[A-Z][A-Z0-9 &/'.–-]*?)(?:\s*[,(]?\s*(?:RM|ROOM)\.?\s*#?\s*(?P<room>[A-Z]?\d{2,4}[A-Z]?)\)?)?\s*$",
    )
    .unwrap()
});

static LISTED_ROOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-•*▪]\s*|\d{1,3}[.)]\s+)(?:(?:RM|ROOM)\.?\s*#?\s*)?(?P<room>[A-Z]?\d{2,4}[A-Z]?)\s*[:=–-]\s*(?P<name>[A-Z][A-Z0-9 &/'.–-]*?)\s*$",
    )
    .unwrap()
});

/// Rooms that structurally never receive signage.
static NO_SIGNAGE_ROOMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:MECH(?:ANICAL)?|ELEC(?:TRICAL)?|SHAFT|CHASE|TELECOM|TEL/DATA|RISER|PLENUM)\b")
        .unwrap()
});

/// True for mechanical, electrical and other unsigned service spaces.
pub fn is_unsigned_room(name: &str) -> bool {
    NO_SIGNAGE_ROOMS.is_match(name)
}

/// "BAY 1-3", "BAY 1 THRU BAY 3", "STALL 4 TO 6".
static GROUP_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<base>[A-Z][A-Z /&'.]*?)\s*#?\s*(?P<lo>\d{1,3})\s*(?:-|–|\bTHRU\b|\bTHROUGH\b|\bTO\b)\s*(?:(?P<base2>[A-Z][A-Z /&'.]*?)\s*#?\s*)?(?P<hi>\d{1,3})$",
    )
    .unwrap()
});

/// Confidence taken off entries whose room number was inferred from the door.
const INFERRED_ROOM_PENALTY: f32 = 0.05;

// ═══════════════════════════════════════════
// Row model
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowLayout {
    DoorFirst,
    RoomFirst,
}

#[derive(Debug)]
struct RoomRow {
    door: Option<String>,
    name: String,
    room: Option<String>,
    page: u32,
}

/// A parsed "base lo-hi" range.
#[derive(Debug, Clone, PartialEq)]
struct GroupRange {
    base: String,
    lo: u32,
    hi: u32,
}

impl GroupRange {
    fn span(&self) -> u32 {
        self.hi - self.lo + 1
    }
}

fn parse_group_range(name: &str) -> Option<GroupRange> {
    let caps = GROUP_RANGE.captures(name.trim())?;
    let base = normalize_name(&caps["base"]);
    if let Some(base2) = caps.name("base2") {
        if normalize_name(base2.as_str()) != base {
            return None;
        }
    }
    let lo: u32 = caps["lo"].parse().ok()?;
    let hi: u32 = caps["hi"].parse().ok()?;
    if hi <= lo || base.is_empty() {
        return None;
    }
    Some(GroupRange { base, lo, hi })
}

// ═══════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════

/// Parse door schedule pages into one entry per signed room.
pub fn parse_door_schedule(
    pages: &[Page],
    relevant: &[u32],
    ctx: &ParseContext,
) -> Result<ParseResult, ParseError> {
    parse_rooms(pages, relevant, ctx, RowLayout::DoorFirst)
}

/// Parse room finish schedule pages into one entry per signed room.
pub fn parse_finish_schedule(
    pages: &[Page],
    relevant: &[u32],
    ctx: &ParseContext,
) -> Result<ParseResult, ParseError> {
    parse_rooms(pages, relevant, ctx, RowLayout::RoomFirst)
}

fn parse_rooms(
    pages: &[Page],
    relevant: &[u32],
    ctx: &ParseContext,
    layout: RowLayout,
) -> Result<ParseResult, ParseError> {
    let source_type = match layout {
        RowLayout::DoorFirst => SourceType::DoorSchedule,
        RowLayout::RoomFirst => SourceType::FinishSchedule,
    };
    let selected = select_pages(pages, relevant)?;

    let mut exclusions = ExclusionTally::default();
    let mut denied = 0usize;
    let mut warnings = Vec::new();
    let mut candidates = Vec::new();

    for page in &selected {
        for line in page.text.lines() {
            let Some(row) = match_row(line, layout, page.page_number) else {
                continue;
            };
            if exclusions.check(line) {
                continue;
            }
            if is_unsigned_room(&row.name) {
                denied += 1;
                continue;
            }
            candidates.push(build_entry(row, source_type, ctx, &mut warnings));
        }
    }

    let raw_count = candidates.len();
    let outcome = dedup_entries(candidates);

    if outcome.removed > 0 {
        tracing::debug!(
            source = %source_type,
            removed = outcome.removed,
            "Collapsed rows sharing a room"
        );
    }
    if denied > 0 {
        warnings.push(format!(
            "Skipped {denied} room(s) that never carry signage (mechanical, electrical, shafts)"
        ));
    }
    if let Some(w) = exclusions.warning() {
        warnings.push(w);
    }
    if outcome.entries.is_empty() {
        warnings.push(format!("No room rows found on {source_type} pages {relevant:?}"));
    }

    Ok(ParseResult {
        confidence: weighted_entry_confidence(&outcome.entries),
        entries: outcome.entries,
        source_type,
        pages_parsed: selected.iter().map(|p| p.page_number).collect(),
        warnings,
        raw_count,
    })
}

// ═══════════════════════════════════════════
// Row templates
// ═══════════════════════════════════════════

fn match_row(line: &str, layout: RowLayout, page: u32) -> Option<RoomRow> {
    match layout {
        RowLayout::DoorFirst => column_door_row(line, page)
            .or_else(|| listed_door_row(&BULLETED_DOOR, line, page))
            .or_else(|| listed_door_row(&NUMBERED_DOOR, line, page)),
        RowLayout::RoomFirst => column_room_row(line, page).or_else(|| listed_room_row(line, page)),
    }
}

fn is_room_name(cell: &str) -> bool {
    ROOM_NAME.is_match(cell) && cell.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 2
}

fn column_door_row(line: &str, page: u32) -> Option<RoomRow> {
    let cols = split_columns(line);
    if cols.len() < 2 {
        return None;
    }
    let door = cols[0].to_uppercase();
    if !DOOR_NO.is_match(&door) || !is_room_name(cols[1]) {
        return None;
    }
    let room = cols
        .get(2)
        .map(|c| c.to_uppercase())
        .filter(|c| ROOM_NO.is_match(c));
    Some(RoomRow {
        door: Some(door),
        name: cols[1].to_string(),
        room,
        page,
    })
}

fn listed_door_row(template: &Regex, line: &str, page: u32) -> Option<RoomRow> {
    let caps = template.captures(line)?;
    let name = caps["name"].trim();
    if !is_room_name(name) {
        return None;
    }
    Some(RoomRow {
        door: Some(caps["door"].to_uppercase()),
        name: name.to_string(),
        room: caps.name("room").map(|m| m.as_str().to_uppercase()),
        page,
    })
}

fn column_room_row(line: &str, page: u32) -> Option<RoomRow> {
    let cols = split_columns(line);
    if cols.len() < 2 {
        return None;
    }
    let room = cols[0].to_uppercase();
    if !ROOM_NO.is_match(&room) || !is_room_name(cols[1]) {
        return None;
    }
    Some(RoomRow {
        door: None,
        name: cols[1].to_string(),
        room: Some(room),
        page,
    })
}

fn listed_room_row(line: &str, page: u32) -> Option<RoomRow> {
    let caps = LISTED_ROOM.captures(line)?;
    let name = caps["name"].trim();
    if !is_room_name(name) {
        return None;
    }
    Some(RoomRow {
        door: None,
        name: name.to_string(),
        room: Some(caps["room"].to_uppercase()),
        page,
    })
}

// ═══════════════════════════════════════════
// Entry construction
// ═══════════════════════════════════════════

fn build_entry(
    row: RoomRow,
    source_type: SourceType,
    ctx: &ParseContext,
    warnings: &mut Vec<String>,
) -> Entry {
    let name = normalize_name(&row.name);
    let mut confidence = ctx.source_confidence;
    let mut notes = Vec::new();

    let group = parse_group_range(&name);
    let grouped = match &group {
        Some(range) if range.span() <= ctx.max_group_span => true,
        Some(range) => {
            warnings.push(format!(
                "Range '{name}' spans {} spaces (limit {}); kept as a single ungrouped entry",
                range.span(),
                ctx.max_group_span
            ));
            false
        }
        None => false,
    };

    let mut room = row.room.clone();
    if room.is_none() && !grouped {
        if let Some(caps) = row.door.as_deref().and_then(|d| DOOR_AS_ROOM.captures(d)) {
            room = Some(caps[1].to_string());
            confidence -= INFERRED_ROOM_PENALTY;
            notes.push("room number inferred from door number".to_string());
        }
    }
    if let Some(door) = &row.door {
        notes.push(format!("door {door}"));
    }

    let identifier = room.clone().unwrap_or_else(|| name.clone());
    let mut entry = Entry::new(source_type, &identifier, &name, confidence).with_page(row.page);
    if let Some(room) = &room {
        entry = entry.with_room_number(room);
    }
    if let (true, Some(range)) = (grouped, &group) {
        notes.push(format!("one sign for {} {}-{}", range.base, range.lo, range.hi));
        entry = entry.grouped(range.lo, range.hi);
    }
    if !notes.is_empty() {
        entry = entry.with_notes(notes.join("; "));
    }
    entry
}
