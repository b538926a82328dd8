//! Applies suggested resolutions to the working evidence.
//!
//! Only auto-resolvable discrepancies are applied here. Every applied
//! discrepancy comes back with `resolution` set so it can be kept in the
//! audit trail and acknowledged by later verification passes.

use crate::pipeline::dedup::canonical_key;
use crate::pipeline::types::{Discrepancy, DiscrepancyKind, Entry, ParseResult, ResolutionAction};

use super::verifier::{name_base, Evidence};

/// Apply every auto-resolvable discrepancy. Returns the ones actually applied.
pub fn apply_auto_resolutions(evidence: &mut Evidence, discrepancies: &[Discrepancy]) -> Vec<Discrepancy> {
    let mut resolved = Vec::new();
    for discrepancy in discrepancies.iter().filter(|d| d.auto_resolvable) {
        let Some(suggested) = &discrepancy.suggested else {
            continue;
        };
        if apply(evidence, discrepancy) {
            let mut done = discrepancy.clone();
            done.resolution = Some(suggested.clone());
            resolved.push(done);
        } else {
            tracing::debug!(
                kind = %discrepancy.kind,
                entries = ?discrepancy.affected_entries,
                "Resolution target no longer present"
            );
        }
    }
    resolved
}

/// Apply one discrepancy's suggested resolution. False when its entries are gone.
pub fn apply(evidence: &mut Evidence, discrepancy: &Discrepancy) -> bool {
    let Some(suggested) = &discrepancy.suggested else {
        return false;
    };
    match suggested.action {
        ResolutionAction::Keep => true,
        ResolutionAction::Merge => match discrepancy.kind {
            DiscrepancyKind::DuplicateSuspected => align_duplicate(evidence, discrepancy),
            DiscrepancyKind::GroupedInterpretation => merge_group(evidence, discrepancy),
            _ => false,
        },
        ResolutionAction::Add => add_missing(evidence, discrepancy),
        ResolutionAction::Remove => remove_entries(&mut evidence.primary, &discrepancy.affected_entries),
        ResolutionAction::Split => split_group(&mut evidence.primary, discrepancy),
    }
}

fn secondary_mut<'a>(evidence: &'a mut Evidence, discrepancy: &Discrepancy) -> Option<&'a mut ParseResult> {
    evidence
        .secondaries
        .iter_mut()
        .find(|s| s.source_type == discrepancy.source_b)
}

fn find_index(entries: &[Entry], identifier: &str) -> Option<usize> {
    entries.iter().position(|e| e.identifier == identifier)
}

/// Rewrite the secondary entry's room/identifier to the primary's spelling.
fn align_duplicate(evidence: &mut Evidence, discrepancy: &Discrepancy) -> bool {
    let [primary_id, secondary_id] = discrepancy.affected_entries.as_slice() else {
        return false;
    };
    let Some(i) = find_index(&evidence.primary.entries, primary_id) else {
        return false;
    };
    let (identifier, room) = {
        let found = &evidence.primary.entries[i];
        (found.identifier.clone(), found.room_number.clone())
    };
    let Some(secondary) = secondary_mut(evidence, discrepancy) else {
        return false;
    };
    let Some(j) = find_index(&secondary.entries, secondary_id) else {
        return false;
    };
    let entry = &mut secondary.entries[j];
    entry.identifier = identifier;
    entry.room_number = room;
    true
}

/// Fold secondary members into the primary group, or collapse primary
/// members into the secondary's group.
fn merge_group(evidence: &mut Evidence, discrepancy: &Discrepancy) -> bool {
    let Some((first, rest)) = discrepancy.affected_entries.split_first() else {
        return false;
    };

    if let Some(g) = find_index(&evidence.primary.entries, first) {
        if evidence.primary.entries[g].is_grouped {
            let Some(member_id) = rest.first() else {
                return false;
            };
            let Some(secondary) = secondary_mut(evidence, discrepancy) else {
                return false;
            };
            let Some(m) = find_index(&secondary.entries, member_id) else {
                return false;
            };
            let member = secondary.entries.remove(m);
            evidence.primary.entries[g].absorb_provenance(&member);
            return true;
        }
    }

    // Primary lists members; the last affected entry is the secondary group.
    let Some((group_id, member_ids)) = discrepancy.affected_entries.split_last() else {
        return false;
    };
    let Some(group) = evidence
        .secondaries
        .iter()
        .find(|s| s.source_type == discrepancy.source_b)
        .and_then(|s| s.entries.iter().find(|e| &e.identifier == group_id))
        .cloned()
    else {
        return false;
    };
    let mut merged = group;
    for id in member_ids {
        if let Some(i) = find_index(&evidence.primary.entries, id) {
            let member = evidence.primary.entries.remove(i);
            merged.absorb_provenance(&member);
        }
    }
    evidence.primary.entries.push(merged);
    true
}

fn add_missing(evidence: &mut Evidence, discrepancy: &Discrepancy) -> bool {
    let Some(id) = discrepancy.affected_entries.first() else {
        return false;
    };
    let Some(entry) = evidence
        .secondaries
        .iter()
        .find(|s| s.source_type == discrepancy.source_b)
        .and_then(|s| s.entries.iter().find(|e| &e.identifier == id))
        .cloned()
    else {
        return false;
    };
    let key = canonical_key(&entry);
    if evidence.primary.entries.iter().any(|e| canonical_key(e) == key) {
        return true;
    }
    evidence.primary.entries.push(entry);
    true
}

fn remove_entries(primary: &mut ParseResult, ids: &[String]) -> bool {
    let before = primary.entries.len();
    primary.entries.retain(|e| !ids.contains(&e.identifier));
    primary.entries.len() < before
}

/// Replace a grouped entry with one entry per numbered space.
fn split_group(primary: &mut ParseResult, discrepancy: &Discrepancy) -> bool {
    let Some(id) = discrepancy.affected_entries.first() else {
        return false;
    };
    let Some(i) = find_index(&primary.entries, id) else {
        return false;
    };
    let Some((lo, hi)) = primary.entries[i].group_range else {
        return false;
    };

    let group = primary.entries.remove(i);
    let base = name_base(&group.name);
    let members = (lo..=hi).map(|n| {
        let name = format!("{base} {n}");
        let mut member = Entry::new(group.source_type, &name, &name, group.confidence);
        member.absorb_provenance(&group);
        member
    });
    let tail = primary.entries.split_off(i);
    primary.entries.extend(members);
    primary.entries.extend(tail);
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::pipeline::reconcile::verifier::tests::{make_result, make_room};
    use crate::pipeline::reconcile::verifier::verify;
    use crate::pipeline::types::{Resolution, SourceType};
    use crate::pipeline_config::ReconcileTuning;

    fn make_evidence(primary: &[&str], secondary: &[&str]) -> Evidence {
        Evidence {
            primary: make_result(
                SourceType::DoorSchedule,
                primary
                    .iter()
                    .map(|r| make_room(SourceType::DoorSchedule, r, "OFFICE", 0.9))
                    .collect(),
                0.9,
            ),
            secondaries: vec![make_result(
                SourceType::FinishSchedule,
                secondary
                    .iter()
                    .map(|r| make_room(SourceType::FinishSchedule, r, "OFFICE", 0.7))
                    .collect(),
                0.7,
            )],
        }
    }

    fn make_discrepancy(kind: DiscrepancyKind, action: ResolutionAction, ids: &[&str], auto: bool) -> Discrepancy {
        Discrepancy {
            kind,
            source_a: SourceType::DoorSchedule,
            source_b: SourceType::FinishSchedule,
            description: String::new(),
            affected_entries: ids.iter().map(|s| s.to_string()).collect(),
            auto_resolvable: auto,
            suggested: Some(Resolution {
                action,
                confidence: 0.9,
                reason: "test".into(),
            }),
            resolution: None,
            values: Vec::new(),
            pages: Vec::new(),
        }
    }

    #[test]
    fn duplicate_alignment_clears_discrepancy() {
        let mut evidence = make_evidence(&["101", "102A"], &["101", "102-A"]);
        let tuning = ReconcileTuning::default();
        let first = verify(&evidence, &HashSet::new(), &tuning);
        assert_eq!(first.discrepancies.len(), 1);

        let resolved = apply_auto_resolutions(&mut evidence, &first.discrepancies);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].is_resolved());
        assert_eq!(evidence.secondaries[0].entries[1].room_number.as_deref(), Some("102A"));

        let second = verify(&evidence, &HashSet::new(), &tuning);
        assert!(second.discrepancies.is_empty());
    }

    #[test]
    fn non_auto_discrepancies_untouched() {
        let mut evidence = make_evidence(&["101"], &["101", "103"]);
        let d = make_discrepancy(DiscrepancyKind::MissingEntry, ResolutionAction::Add, &["103"], false);
        assert!(apply_auto_resolutions(&mut evidence, &[d]).is_empty());
        assert_eq!(evidence.primary.entries.len(), 1);
    }

    #[test]
    fn add_copies_secondary_entry_once() {
        let mut evidence = make_evidence(&["101"], &["101", "103"]);
        let d = make_discrepancy(DiscrepancyKind::MissingEntry, ResolutionAction::Add, &["103"], true);
        assert!(apply(&mut evidence, &d));
        assert!(apply(&mut evidence, &d));
        assert_eq!(evidence.primary.entries.len(), 2);
        assert_eq!(evidence.primary.entries[1].source_type, SourceType::FinishSchedule);
    }

    #[test]
    fn group_absorbs_secondary_member() {
        let mut evidence = make_evidence(&[], &[]);
        evidence.primary.entries.push(
            Entry::new(SourceType::DoorSchedule, "BAY 1-3", "BAY 1-3", 0.9)
                .grouped(1, 3)
                .with_page(1),
        );
        evidence.secondaries[0]
            .entries
            .push(Entry::new(SourceType::FinishSchedule, "BAY 2", "BAY 2", 0.7).with_page(5));

        let d = make_discrepancy(
            DiscrepancyKind::GroupedInterpretation,
            ResolutionAction::Merge,
            &["BAY 1-3", "BAY 2"],
            true,
        );
        assert!(apply(&mut evidence, &d));
        assert!(evidence.secondaries[0].entries.is_empty());
        assert_eq!(evidence.primary.entries[0].page_numbers, vec![1, 5]);
        assert_eq!(evidence.primary.entries[0].quantity, 1);
    }

    #[test]
    fn split_expands_group() {
        let mut evidence = make_evidence(&["101"], &[]);
        evidence
            .primary
            .entries
            .push(Entry::new(SourceType::DoorSchedule, "BAY 1-3", "BAY 1-3", 0.9).grouped(1, 3));
        let d = make_discrepancy(
            DiscrepancyKind::GroupedInterpretation,
            ResolutionAction::Split,
            &["BAY 1-3", "BAY 2"],
            true,
        );
        assert!(apply(&mut evidence, &d));
        let names: Vec<&str> = evidence.primary.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["OFFICE", "BAY 1", "BAY 2", "BAY 3"]);
        assert!(evidence.primary.entries.iter().all(|e| !e.is_grouped));
    }

    #[test]
    fn remove_drops_primary_entry() {
        let mut evidence = make_evidence(&["101", "102"], &[]);
        let d = make_discrepancy(DiscrepancyKind::ExtraEntry, ResolutionAction::Remove, &["102"], true);
        assert!(apply(&mut evidence, &d));
        assert_eq!(evidence.primary.entries.len(), 1);
        assert!(!apply(&mut evidence, &d));
    }

    #[test]
    fn keep_is_always_applicable() {
        let mut evidence = make_evidence(&["101"], &["101"]);
        let d = make_discrepancy(DiscrepancyKind::CountMismatch, ResolutionAction::Keep, &["101", "101"], true);
        let resolved = apply_auto_resolutions(&mut evidence, &[d]);
        assert_eq!(resolved[0].resolution.as_ref().unwrap().action, ResolutionAction::Keep);
    }
}
