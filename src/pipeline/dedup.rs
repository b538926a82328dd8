//! Entry deduplication within a parse and across sources.
//!
//! Canonical key: room number when present, else sign-type code for
//! schedule rows, else the uppercased, whitespace-collapsed name. The first
//! occurrence wins; repeated schedule codes merge by max quantity and the
//! union of their locations.

use std::collections::{HashMap, HashSet};

use super::text::{normalize_code, normalize_name, normalize_room_number};
use super::types::{Entry, ParseResult};

/// Canonical identity of an entry across parsers and sources.
pub fn canonical_key(entry: &Entry) -> String {
    if let Some(room) = &entry.room_number {
        let normalized = normalize_room_number(room);
        if !normalized.is_empty() {
            return format!("ROOM:{normalized}");
        }
    }
    if let Some(code) = &entry.sign_type_code {
        let normalized = normalize_code(code);
        if !normalized.is_empty() {
            return format!("CODE:{normalized}");
        }
    }
    format!("NAME:{}", normalize_name(&entry.name))
}

/// Result of deduplicating one entry list.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub entries: Vec<Entry>,
    /// Entries dropped as repeats of an earlier one.
    pub removed: usize,
    /// Of those, how many were schedule rows merged into the kept entry.
    pub merged: usize,
}

/// Deduplicate entries from a single parse, preserving first-seen order.
pub fn dedup_entries(entries: Vec<Entry>) -> DedupOutcome {
    let mut kept: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut removed = 0;
    let mut merged = 0;

    for entry in entries {
        let key = canonical_key(&entry);
        match index.get(&key) {
            Some(&pos) => {
                removed += 1;
                let existing = &mut kept[pos];
                if existing.sign_type_code.is_some() && entry.sign_type_code.is_some() {
                    let quantity = existing.quantity.max(entry.quantity);
                    existing.set_quantity(quantity);
                    if existing.name.is_empty() {
                        existing.name = entry.name.clone();
                    }
                    merged += 1;
                }
                existing.absorb_provenance(&entry);
            }
            None => {
                index.insert(key, kept.len());
                kept.push(entry);
            }
        }
    }

    DedupOutcome {
        entries: kept,
        removed,
        merged,
    }
}

/// Entries other sources found that the primary set lacks.
///
/// Only sources keyed the same way as the primary are recombined; category
/// estimates and cross-space sources would only add noise. Sources are taken
/// in descending confidence so the most trusted duplicate wins.
pub fn cross_source_additions(primary: &[Entry], secondaries: &[ParseResult]) -> Vec<Entry> {
    let Some(space) = primary.first().map(|e| e.source_type.key_space()) else {
        return Vec::new();
    };

    let known: HashSet<String> = primary.iter().map(canonical_key).collect();

    let mut ordered: Vec<&ParseResult> = secondaries
        .iter()
        .filter(|r| r.source_type.key_space() == space)
        .collect();
    ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let candidates: Vec<Entry> = ordered
        .into_iter()
        .flat_map(|r| r.entries.iter())
        .filter(|e| !known.contains(&canonical_key(e)))
        .cloned()
        .collect();

    dedup_entries(candidates).entries
}
