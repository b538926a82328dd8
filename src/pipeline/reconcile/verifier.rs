//! Cross-source verification.
//!
//! Compares the deduplicated primary entry set against every secondary parse
//! and emits one `Discrepancy` per disagreement, each with a suggested
//! `Resolution`. Sources keyed the same way (rooms vs rooms, codes vs codes)
//! are compared entry by entry; everything else only gets an aggregate count
//! check.

use std::collections::{HashMap, HashSet};

use crate::pipeline::confidence::{clamp_unit, thresholds};
use crate::pipeline::dedup::canonical_key;
use crate::pipeline::text::normalize_name;
use crate::pipeline::types::{
    Discrepancy, DiscrepancyKind, Entry, ParseResult, Resolution, ResolutionAction,
};
use crate::pipeline_config::ReconcileTuning;

/// Confidence lost per discrepancy that needs a human.
const OPEN_DISCREPANCY_PENALTY: f32 = 0.05;
const MAX_OPEN_PENALTY: f32 = 0.30;
/// Bonus when every primary entry is confirmed by another source.
const CORROBORATION_BONUS: f32 = 0.05;

/// Primary and secondary evidence as it stands between resolution passes.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub primary: ParseResult,
    pub secondaries: Vec<ParseResult>,
}

#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub discrepancies: Vec<Discrepancy>,
    pub confidence: f32,
    /// Primary entries confirmed by at least one secondary.
    pub corroborated: usize,
}

impl Verification {
    pub fn auto_resolvable(&self) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(|d| d.auto_resolvable)
    }
}

/// Key as written, before normalization. Two entries with equal canonical
/// keys but different raw keys differ only in formatting.
pub fn raw_key(entry: &Entry) -> String {
    if let Some(room) = &entry.room_number {
        return format!("ROOM:{}", room.trim().to_uppercase());
    }
    if let Some(code) = &entry.sign_type_code {
        return format!("CODE:{}", code.trim().to_uppercase());
    }
    format!("NAME:{}", normalize_name(&entry.name))
}

/// Verify the primary against every secondary. Discrepancies whose
/// fingerprint is in `acknowledged` were settled by an earlier pass and are
/// not re-emitted.
pub fn verify(
    evidence: &Evidence,
    acknowledged: &HashSet<String>,
    tuning: &ReconcileTuning,
) -> Verification {
    let primary = &evidence.primary;
    let space = primary.source_type.key_space();
    let mut discrepancies = Vec::new();
    let mut corroborated = HashSet::new();

    for secondary in &evidence.secondaries {
        if secondary.entries.is_empty() {
            continue;
        }
        if secondary.source_type.key_space() == space && !primary.entries.is_empty() {
            compare_entries(primary, secondary, tuning, &mut discrepancies, &mut corroborated);
        } else {
            compare_totals(primary, secondary, tuning, &mut discrepancies);
        }
    }

    discrepancies.retain(|d| !acknowledged.contains(&d.fingerprint()));
    let confidence = verification_confidence(primary, &discrepancies, corroborated.len());

    tracing::debug!(
        discrepancies = discrepancies.len(),
        auto = discrepancies.iter().filter(|d| d.auto_resolvable).count(),
        corroborated = corroborated.len(),
        confidence,
        "Verification pass"
    );

    Verification {
        discrepancies,
        confidence,
        corroborated: corroborated.len(),
    }
}

fn verification_confidence(primary: &ParseResult, discrepancies: &[Discrepancy], corroborated: usize) -> f32 {
    if primary.entries.is_empty() {
        return clamp_unit(primary.confidence);
    }
    let open = discrepancies.iter().filter(|d| !d.auto_resolvable).count();
    let penalty = (OPEN_DISCREPANCY_PENALTY * open as f32).min(MAX_OPEN_PENALTY);
    let bonus = CORROBORATION_BONUS * corroborated as f32 / primary.entries.len() as f32;
    clamp_unit(primary.confidence - penalty + bonus)
}

// ═══════════════════════════════════════════
// Entry-level comparison
// ═══════════════════════════════════════════

fn compare_entries(
    primary: &ParseResult,
    secondary: &ParseResult,
    tuning: &ReconcileTuning,
    out: &mut Vec<Discrepancy>,
    corroborated: &mut HashSet<usize>,
) {
    let by_raw: HashMap<String, usize> = primary
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| (raw_key(e), i))
        .collect();
    let by_canonical: HashMap<String, usize> = primary
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| (canonical_key(e), i))
        .collect();

    let secondary_keys: HashSet<String> = secondary.entries.iter().map(canonical_key).collect();
    let is_superset = primary
        .entries
        .iter()
        .all(|e| secondary_keys.contains(&canonical_key(e)));

    let mut matched = vec![false; primary.entries.len()];

    for entry in &secondary.entries {
        if let Some(&i) = by_raw.get(&raw_key(entry)) {
            matched[i] = true;
            let found = &primary.entries[i];
            if found.quantity != entry.quantity && !found.is_grouped && !entry.is_grouped {
                out.push(count_mismatch(found, entry, primary, secondary, tuning));
            }
            continue;
        }

        if let Some(&i) = by_canonical.get(&canonical_key(entry)) {
            matched[i] = true;
            out.push(duplicate_suspected(&primary.entries[i], entry, primary, secondary));
            continue;
        }

        if let Some(i) = containing_group(&primary.entries, entry) {
            matched[i] = true;
            out.push(grouped_member(&primary.entries[i], entry, primary, secondary, tuning));
            continue;
        }

        let members = covered_members(&primary.entries, entry);
        if !members.is_empty() {
            for &i in &members {
                matched[i] = true;
            }
            let covered: Vec<&Entry> = members.iter().map(|&i| &primary.entries[i]).collect();
            out.push(grouped_collapse(&covered, entry, primary, secondary));
            continue;
        }

        out.push(missing_entry(entry, primary, secondary, is_superset, tuning));
    }

    for (i, entry) in primary.entries.iter().enumerate() {
        if matched[i] {
            corroborated.insert(i);
        } else {
            out.push(extra_entry(entry, primary, secondary));
        }
    }
}

/// Aggregate check between sources that cannot be matched entry by entry.
fn compare_totals(
    primary: &ParseResult,
    secondary: &ParseResult,
    tuning: &ReconcileTuning,
    out: &mut Vec<Discrepancy>,
) {
    let a = primary.total_quantity();
    let b = secondary.total_quantity();
    let larger = a.max(b);
    if larger == 0 {
        return;
    }
    let ratio = a.abs_diff(b) as f32 / larger as f32;
    if ratio <= tuning.aggregate_mismatch_ratio {
        return;
    }

    let margin = primary.confidence - secondary.confidence;
    let auto = margin >= tuning.aggregate_keep_margin;
    out.push(Discrepancy {
        kind: DiscrepancyKind::CountMismatch,
        source_a: primary.source_type,
        source_b: secondary.source_type,
        description: format!(
            "{} totals {a} signs, {} totals {b} ({:.0}% apart)",
            primary.source_type,
            secondary.source_type,
            ratio * 100.0
        ),
        affected_entries: Vec::new(),
        auto_resolvable: auto,
        suggested: Some(Resolution {
            action: ResolutionAction::Keep,
            confidence: clamp_unit(primary.confidence),
            reason: format!(
                "{} is the more reliable source ({:.2} vs {:.2})",
                primary.source_type, primary.confidence, secondary.confidence
            ),
        }),
        resolution: None,
        values: vec![
            (primary.source_type.to_string(), a.to_string()),
            (secondary.source_type.to_string(), b.to_string()),
        ],
        pages: merged_pages(&primary.pages_parsed, &secondary.pages_parsed),
    });
}

// ═══════════════════════════════════════════
// Discrepancy builders
// ═══════════════════════════════════════════

fn base(
    kind: DiscrepancyKind,
    primary: &ParseResult,
    secondary: &ParseResult,
    description: String,
    entries: &[&Entry],
) -> Discrepancy {
    let mut pages: Vec<u32> = entries.iter().flat_map(|e| e.page_numbers.iter().copied()).collect();
    pages.sort_unstable();
    pages.dedup();
    Discrepancy {
        kind,
        source_a: primary.source_type,
        source_b: secondary.source_type,
        description,
        affected_entries: entries.iter().map(|e| e.identifier.clone()).collect(),
        auto_resolvable: false,
        suggested: None,
        resolution: None,
        values: Vec::new(),
        pages,
    }
}

fn count_mismatch(
    found: &Entry,
    other: &Entry,
    primary: &ParseResult,
    secondary: &ParseResult,
    tuning: &ReconcileTuning,
) -> Discrepancy {
    let mut d = base(
        DiscrepancyKind::CountMismatch,
        primary,
        secondary,
        format!(
            "{} '{}': quantity {} vs {}",
            found.identifier, found.name, found.quantity, other.quantity
        ),
        &[found, other],
    );
    d.auto_resolvable = found.confidence - other.confidence >= tuning.auto_resolve_margin;
    d.suggested = Some(Resolution {
        action: ResolutionAction::Keep,
        confidence: found.confidence,
        reason: format!("Keep {} quantity {}", primary.source_type, found.quantity),
    });
    d.values = vec![
        (primary.source_type.to_string(), found.quantity.to_string()),
        (secondary.source_type.to_string(), other.quantity.to_string()),
    ];
    d
}

fn duplicate_suspected(
    found: &Entry,
    other: &Entry,
    primary: &ParseResult,
    secondary: &ParseResult,
) -> Discrepancy {
    let shown = |e: &Entry| e.room_number.clone().unwrap_or_else(|| e.identifier.clone());
    let mut d = base(
        DiscrepancyKind::DuplicateSuspected,
        primary,
        secondary,
        format!(
            "'{}' and '{}' differ only in formatting",
            shown(found),
            shown(other)
        ),
        &[found, other],
    );
    d.auto_resolvable = true;
    d.suggested = Some(Resolution {
        action: ResolutionAction::Merge,
        confidence: thresholds::VERY_HIGH,
        reason: format!("Exact match after normalization; align to '{}'", shown(found)),
    });
    d.values = vec![
        (primary.source_type.to_string(), shown(found)),
        (secondary.source_type.to_string(), shown(other)),
    ];
    d
}

fn grouped_member(
    group: &Entry,
    member: &Entry,
    primary: &ParseResult,
    secondary: &ParseResult,
    tuning: &ReconcileTuning,
) -> Discrepancy {
    let mut d = base(
        DiscrepancyKind::GroupedInterpretation,
        primary,
        secondary,
        format!(
            "{} lists '{}' separately; {} groups it under '{}'",
            secondary.source_type, member.name, primary.source_type, group.name
        ),
        &[group, member],
    );
    d.auto_resolvable = primary.confidence + tuning.auto_resolve_margin >= secondary.confidence;
    d.suggested = Some(if d.auto_resolvable {
        Resolution {
            action: ResolutionAction::Merge,
            confidence: thresholds::HIGH,
            reason: format!("'{}' falls inside grouped range '{}'", member.name, group.name),
        }
    } else {
        Resolution {
            action: ResolutionAction::Split,
            confidence: secondary.confidence,
            reason: format!("{} lists the grouped spaces individually", secondary.source_type),
        }
    });
    d
}

fn grouped_collapse(
    members: &[&Entry],
    group: &Entry,
    primary: &ParseResult,
    secondary: &ParseResult,
) -> Discrepancy {
    let mut entries: Vec<&Entry> = members.to_vec();
    entries.push(group);
    let mut d = base(
        DiscrepancyKind::GroupedInterpretation,
        primary,
        secondary,
        format!(
            "{} counts {} spaces individually; {} shows one sign for '{}'",
            primary.source_type,
            members.len(),
            secondary.source_type,
            group.name
        ),
        &entries,
    );
    d.suggested = Some(Resolution {
        action: ResolutionAction::Merge,
        confidence: secondary.confidence,
        reason: format!("Treat '{}' as one grouped sign", group.name),
    });
    d
}

fn missing_entry(
    entry: &Entry,
    primary: &ParseResult,
    secondary: &ParseResult,
    is_superset: bool,
    tuning: &ReconcileTuning,
) -> Discrepancy {
    let mut d = base(
        DiscrepancyKind::MissingEntry,
        primary,
        secondary,
        format!(
            "{} lists '{}' ({}) but {} does not",
            secondary.source_type, entry.name, entry.identifier, primary.source_type
        ),
        &[entry],
    );
    d.auto_resolvable = is_superset && secondary.confidence >= tuning.min_addition_confidence;
    d.suggested = Some(Resolution {
        action: ResolutionAction::Add,
        confidence: secondary.confidence,
        reason: if is_superset {
            format!("{} contains every primary entry plus this one", secondary.source_type)
        } else {
            format!("Only {} lists this entry", secondary.source_type)
        },
    });
    d
}

fn extra_entry(entry: &Entry, primary: &ParseResult, secondary: &ParseResult) -> Discrepancy {
    let mut d = base(
        DiscrepancyKind::ExtraEntry,
        primary,
        secondary,
        format!(
            "{} lists '{}' ({}) but {} does not",
            primary.source_type, entry.name, entry.identifier, secondary.source_type
        ),
        &[entry],
    );
    d.auto_resolvable = primary.confidence >= secondary.confidence;
    d.suggested = Some(Resolution {
        action: ResolutionAction::Keep,
        confidence: entry.confidence,
        reason: format!("{} is at least as reliable as {}", primary.source_type, secondary.source_type),
    });
    d
}

// ═══════════════════════════════════════════
// Grouped ranges
// ═══════════════════════════════════════════

/// Leading non-numeric part of a name: "BAY 1-3" → "BAY".
pub fn name_base(name: &str) -> String {
    let head = name.split(|c: char| c.is_ascii_digit()).next().unwrap_or("");
    normalize_name(head.trim().trim_end_matches('#'))
}

/// Trailing space number of a single member: "BAY 2" → 2.
pub fn member_number(name: &str) -> Option<u32> {
    let base_len = name.split(|c: char| c.is_ascii_digit()).next().unwrap_or("").len();
    name.get(base_len..)?.trim().parse().ok()
}

fn in_group(group: &Entry, member: &Entry) -> bool {
    let (Some((lo, hi)), false) = (group.group_range, member.is_grouped) else {
        return false;
    };
    member_number(&member.name).is_some_and(|n| (lo..=hi).contains(&n))
        && name_base(&member.name) == name_base(&group.name)
}

fn containing_group(entries: &[Entry], member: &Entry) -> Option<usize> {
    entries.iter().position(|g| g.is_grouped && in_group(g, member))
}

fn covered_members(entries: &[Entry], group: &Entry) -> Vec<usize> {
    if !group.is_grouped {
        return Vec::new();
    }
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| in_group(group, e))
        .map(|(i, _)| i)
        .collect()
}

fn merged_pages(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut pages: Vec<u32> = a.iter().chain(b).copied().collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}
