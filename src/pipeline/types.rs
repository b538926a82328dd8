//! Core types shared by every stage of the takeoff pipeline.
//!
//! These types model the full lifecycle:
//! Pages → Discovery → Parse → Dedup → Verification → Resolution → ExtractionResult.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic entry ids (UUID v5).
const ENTRY_NAMESPACE: Uuid = Uuid::from_u128(0x5a1e_7b2c_4d0e_4f6a_9c3b_2e1d_0f8a_7b6c);

// ═══════════════════════════════════════════
// Input
// ═══════════════════════════════════════════

/// One page of extracted plain text. Text may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

// ═══════════════════════════════════════════
// Source types
// ═══════════════════════════════════════════

/// Where an entry came from. The first four are discoverable evidence types;
/// the rest tag entries produced by fallback strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    SignageSchedule,
    DoorSchedule,
    FinishSchedule,
    FloorPlan,
    RawText,
    FastPath,
    Agentic,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignageSchedule => "signage_schedule",
            Self::DoorSchedule => "door_schedule",
            Self::FinishSchedule => "finish_schedule",
            Self::FloorPlan => "floor_plan",
            Self::RawText => "raw_text",
            Self::FastPath => "fast_path",
            Self::Agentic => "agentic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "signage_schedule" => Some(Self::SignageSchedule),
            "door_schedule" => Some(Self::DoorSchedule),
            "finish_schedule" => Some(Self::FinishSchedule),
            "floor_plan" => Some(Self::FloorPlan),
            "raw_text" => Some(Self::RawText),
            "fast_path" => Some(Self::FastPath),
            "agentic" => Some(Self::Agentic),
            _ => None,
        }
    }

    /// Evidence types that source discovery can find in a document.
    pub fn discoverable() -> &'static [SourceType] {
        &[
            Self::SignageSchedule,
            Self::DoorSchedule,
            Self::FinishSchedule,
            Self::FloorPlan,
        ]
    }

    /// How entries from this source are keyed, which decides whether two
    /// sources can be compared entry-by-entry.
    pub fn key_space(&self) -> KeySpace {
        match self {
            Self::SignageSchedule | Self::FastPath => KeySpace::SignType,
            Self::DoorSchedule | Self::FinishSchedule | Self::RawText | Self::Agentic => {
                KeySpace::Room
            }
            Self::FloorPlan => KeySpace::Estimate,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity space of a source's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    /// Keyed by sign-type code (schedules, legends, callouts).
    SignType,
    /// Keyed by room number or room name.
    Room,
    /// Category estimates (floor-plan room counts). Never matched entry-by-entry.
    Estimate,
}

/// Layout of the pages a source lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Tabular,
    List,
    Tagged,
    Unknown,
}

// ═══════════════════════════════════════════
// Entries
// ═══════════════════════════════════════════

/// One signage item candidate.
///
/// Grouped entries ("BAY 1-3") are one physical sign: `quantity` is always 1
/// for them. Quantities above 1 only come from counted occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub identifier: String,
    pub name: String,
    pub room_number: Option<String>,
    pub sign_type_code: Option<String>,
    pub quantity: u32,
    pub is_grouped: bool,
    pub group_range: Option<(u32, u32)>,
    pub source_type: SourceType,
    pub sheet_refs: Vec<String>,
    pub page_numbers: Vec<u32>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub confidence: f32,
    pub notes: Option<String>,
}

impl Entry {
    pub fn new(source_type: SourceType, identifier: &str, name: &str, confidence: f32) -> Self {
        let identifier = identifier.trim().to_string();
        Self {
            id: entry_id(source_type, &identifier),
            identifier,
            name: name.trim().to_uppercase(),
            room_number: None,
            sign_type_code: None,
            quantity: 1,
            is_grouped: false,
            group_range: None,
            source_type,
            sheet_refs: Vec::new(),
            page_numbers: Vec::new(),
            locations: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            notes: None,
        }
    }

    pub fn with_room_number(mut self, room: &str) -> Self {
        let room = room.trim();
        if !room.is_empty() {
            self.room_number = Some(room.to_uppercase());
        }
        self
    }

    pub fn with_sign_type(mut self, code: &str) -> Self {
        self.sign_type_code = Some(code.trim().to_uppercase());
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.set_quantity(quantity);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.add_page(page);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Mark as one sign covering a numbered range. Forces quantity to 1.
    pub fn grouped(mut self, lo: u32, hi: u32) -> Self {
        self.is_grouped = true;
        self.group_range = Some((lo.min(hi), lo.max(hi)));
        self.quantity = 1;
        self
    }

    /// Quantity is at least 1 and grouped entries stay at 1.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = if self.is_grouped { 1 } else { quantity.max(1) };
    }

    pub fn add_page(&mut self, page: u32) {
        if !self.page_numbers.contains(&page) {
            self.page_numbers.push(page);
            self.page_numbers.sort_unstable();
        }
    }

    pub fn add_location(&mut self, location: &str) {
        let location = location.trim();
        if !location.is_empty() && !self.locations.iter().any(|l| l.eq_ignore_ascii_case(location)) {
            self.locations.push(location.to_string());
        }
    }

    pub fn add_sheet_ref(&mut self, sheet: &str) {
        if !self.sheet_refs.iter().any(|s| s == sheet) {
            self.sheet_refs.push(sheet.to_string());
        }
    }

    /// Fold another entry's provenance (pages, sheets, locations) into this one.
    pub fn absorb_provenance(&mut self, other: &Entry) {
        for &p in &other.page_numbers {
            self.add_page(p);
        }
        for s in &other.sheet_refs {
            self.add_sheet_ref(s);
        }
        for l in &other.locations {
            self.add_location(l);
        }
    }
}

/// Deterministic id so identical input produces identical output.
pub fn entry_id(source_type: SourceType, identifier: &str) -> String {
    let seed = format!("{}:{}", source_type.as_str(), identifier.to_uppercase());
    Uuid::new_v5(&ENTRY_NAMESPACE, seed.as_bytes()).to_string()
}

// ═══════════════════════════════════════════
// Discovery + parse outputs
// ═══════════════════════════════════════════

/// Extra facts about a discovered source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub match_count: usize,
    /// Signature descriptions that matched at least once.
    pub signatures: Vec<String>,
}

/// A candidate evidence source found by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundSource {
    pub source_type: SourceType,
    pub pages: Vec<u32>,
    pub confidence: f32,
    pub format: SourceFormat,
    pub metadata: SourceMetadata,
}

/// Output of one parser. `raw_count >= entries.len()` always.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub entries: Vec<Entry>,
    pub source_type: SourceType,
    pub pages_parsed: Vec<u32>,
    pub confidence: f32,
    pub warnings: Vec<String>,
    pub raw_count: usize,
}

impl ParseResult {
    pub fn empty(source_type: SourceType) -> Self {
        Self {
            entries: Vec::new(),
            source_type,
            pages_parsed: Vec::new(),
            confidence: 0.0,
            warnings: Vec::new(),
            raw_count: 0,
        }
    }

    pub fn total_quantity(&self) -> u32 {
        self.entries.iter().map(|e| e.quantity).sum()
    }
}

// ═══════════════════════════════════════════
// Verification
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    CountMismatch,
    MissingEntry,
    ExtraEntry,
    GroupedInterpretation,
    DuplicateSuspected,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CountMismatch => "count_mismatch",
            Self::MissingEntry => "missing_entry",
            Self::ExtraEntry => "extra_entry",
            Self::GroupedInterpretation => "grouped_interpretation",
            Self::DuplicateSuspected => "duplicate_suspected",
        }
    }
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Merge,
    Split,
    Remove,
    Add,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub confidence: f32,
    pub reason: String,
}

/// A disagreement between two sources.
///
/// `suggested` is what the verifier would do; `resolution` is set once the
/// suggestion has actually been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub source_a: SourceType,
    pub source_b: SourceType,
    pub description: String,
    /// Identifiers of the entries involved (first from source A, then source B).
    pub affected_entries: Vec<String>,
    pub auto_resolvable: bool,
    pub suggested: Option<Resolution>,
    pub resolution: Option<Resolution>,
    /// Conflicting values for reviewers, e.g. `("door_schedule", "3")`.
    #[serde(default)]
    pub values: Vec<(String, String)>,
    #[serde(default)]
    pub pages: Vec<u32>,
}

impl Discrepancy {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Identity used to recognise the same disagreement across verification passes.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind.as_str(),
            self.source_a.as_str(),
            self.source_b.as_str(),
            self.affected_entries.join(",")
        )
    }
}

// ═══════════════════════════════════════════
// Clarifications
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationCategory {
    Scope,
    Quantity,
    GroupedEntry,
    Specification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub priority: ClarificationPriority,
    pub category: ClarificationCategory,
    pub question: String,
    pub context: String,
    pub suggested_inquiry: Option<String>,
}

// ═══════════════════════════════════════════
// Final result
// ═══════════════════════════════════════════

/// The engine's only output. `total_count == Σ entry.quantity` and
/// `confidence ∈ [0, 1]` hold for every value built through `assemble`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entries: Vec<Entry>,
    pub total_count: u32,
    pub confidence: f32,
    pub primary_source: Option<SourceType>,
    pub sources_used: BTreeSet<SourceType>,
    pub discrepancies: Vec<Discrepancy>,
    pub clarifications: Vec<Clarification>,
    pub converged: bool,
    pub iterations: u32,
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    /// Build a result, deriving `total_count` and clamping confidence.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        entries: Vec<Entry>,
        confidence: f32,
        primary_source: Option<SourceType>,
        sources_used: BTreeSet<SourceType>,
        discrepancies: Vec<Discrepancy>,
        clarifications: Vec<Clarification>,
        iterations: u32,
        warnings: Vec<String>,
    ) -> Self {
        let total_count = entries.iter().map(|e| e.quantity).sum();
        let converged = discrepancies
            .iter()
            .all(|d| d.auto_resolvable || d.is_resolved());
        Self {
            entries,
            total_count,
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            primary_source,
            sources_used,
            discrepancies,
            clarifications,
            converged,
            iterations,
            warnings,
        }
    }

    /// Discrepancies that were never resolved.
    pub fn unresolved(&self) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(|d| !d.is_resolved())
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouped_entry_forces_quantity_one() {
        let mut entry = Entry::new(SourceType::DoorSchedule, "BAY", "bay", 0.8)
            .with_quantity(3)
            .grouped(1, 3);
        assert_eq!(entry.quantity, 1);
        entry.set_quantity(5);
        assert_eq!(entry.quantity, 1);
        assert_eq!(entry.group_range, Some((1, 3)));
    }

    #[test]
    fn quantity_never_below_one() {
        let entry = Entry::new(SourceType::SignageSchedule, "A1", "room id", 0.9).with_quantity(0);
        assert_eq!(entry.quantity, 1);
    }

    #[test]
    fn entry_ids_are_deterministic() {
        let a = Entry::new(SourceType::DoorSchedule, "101", "office", 0.8);
        let b = Entry::new(SourceType::DoorSchedule, "101", "OFFICE", 0.8);
        let c = Entry::new(SourceType::FinishSchedule, "101", "office", 0.8);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn names_are_uppercased() {
        let entry = Entry::new(SourceType::DoorSchedule, "101", "  Break Room ", 0.8);
        assert_eq!(entry.name, "BREAK ROOM");
    }

    #[test]
    fn assemble_sums_quantities() {
        let entries = vec![
            Entry::new(SourceType::SignageSchedule, "A1", "a", 0.9).with_quantity(4),
            Entry::new(SourceType::SignageSchedule, "A2", "b", 0.9).with_quantity(2),
        ];
        let result = ExtractionResult::assemble(
            entries,
            1.7,
            Some(SourceType::SignageSchedule),
            BTreeSet::new(),
            vec![],
            vec![],
            0,
            vec![],
        );
        assert_eq!(result.total_count, 6);
        assert_eq!(result.confidence, 1.0);
        assert!(result.converged);
    }

    #[test]
    fn unresolved_blocking_discrepancy_prevents_convergence() {
        let d = Discrepancy {
            kind: DiscrepancyKind::CountMismatch,
            source_a: SourceType::DoorSchedule,
            source_b: SourceType::FinishSchedule,
            description: "x".into(),
            affected_entries: vec!["101".into()],
            auto_resolvable: false,
            suggested: None,
            resolution: None,
            values: vec![],
            pages: vec![],
        };
        let result = ExtractionResult::assemble(
            vec![],
            0.5,
            None,
            BTreeSet::new(),
            vec![d],
            vec![],
            1,
            vec![],
        );
        assert!(!result.converged);
        assert_eq!(result.unresolved().count(), 1);
    }

    #[test]
    fn source_type_round_trips_through_str() {
        for t in SourceType::discoverable() {
            assert_eq!(SourceType::from_str(t.as_str()), Some(*t));
        }
        assert_eq!(SourceType::from_str("nope"), None);
    }

    #[test]
    fn absorb_provenance_unions_without_duplicates() {
        let mut a = Entry::new(SourceType::SignageSchedule, "A1", "x", 0.9).with_page(2);
        a.add_location("LOBBY");
        let mut b = Entry::new(SourceType::SignageSchedule, "A1", "x", 0.9).with_page(1).with_page(2);
        b.add_location("lobby");
        b.add_location("CORRIDOR");
        a.absorb_provenance(&b);
        assert_eq!(a.page_numbers, vec![1, 2]);
        assert_eq!(a.locations, vec!["LOBBY".to_string(), "CORRIDOR".to_string()]);
    }
}
