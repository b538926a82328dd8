//! Turns unresolved discrepancies into reviewer questions.
//!
//! Pure transform: reads discrepancies, never touches entries.

use crate::pipeline::types::{
    Clarification, ClarificationCategory, ClarificationPriority, Discrepancy, DiscrepancyKind,
};

/// Quantity gap that always makes a count question high priority.
const HIGH_PRIORITY_DIFF: u32 = 3;
const HIGH_PRIORITY_RATIO: f32 = 0.25;

/// Questions for every discrepancy that is neither resolved nor auto-resolvable,
/// most urgent first.
pub fn generate(discrepancies: &[Discrepancy]) -> Vec<Clarification> {
    let mut questions: Vec<Clarification> = discrepancies
        .iter()
        .filter(|d| !d.is_resolved() && !d.auto_resolvable)
        .map(clarify)
        .collect();
    questions.sort_by_key(|c| c.priority);
    questions
}

pub fn clarify(d: &Discrepancy) -> Clarification {
    let subject = subject(d);
    let (priority, category, question, inquiry) = match d.kind {
        DiscrepancyKind::CountMismatch => (
            count_priority(d),
            ClarificationCategory::Quantity,
            format!("What is the correct quantity for {subject}?"),
            format!(
                "The {} and {} disagree on the quantity of {subject}. Please confirm the quantity to be provided.",
                d.source_a, d.source_b
            ),
        ),
        DiscrepancyKind::MissingEntry => (
            ClarificationPriority::Medium,
            ClarificationCategory::Scope,
            format!("Is {subject} in the signage scope?"),
            format!(
                "{subject} appears in the {} but not in the {}. Please confirm whether signage is required.",
                d.source_b, d.source_a
            ),
        ),
        DiscrepancyKind::ExtraEntry => (
            ClarificationPriority::Low,
            ClarificationCategory::Scope,
            format!("Is {subject} still part of the project?"),
            format!(
                "{subject} appears only in the {}. Please confirm it has not been removed from scope.",
                d.source_a
            ),
        ),
        DiscrepancyKind::GroupedInterpretation => (
            ClarificationPriority::High,
            ClarificationCategory::GroupedEntry,
            format!("Does {subject} receive one shared sign or one sign per space?"),
            format!(
                "The {} and {} treat {subject} differently. Please confirm whether these spaces share a single sign.",
                d.source_a, d.source_b
            ),
        ),
        DiscrepancyKind::DuplicateSuspected => (
            ClarificationPriority::Medium,
            ClarificationCategory::Specification,
            format!("Are {subject} the same space?"),
            format!(
                "The {} and {} identify {subject} differently. Please confirm the room numbering.",
                d.source_a, d.source_b
            ),
        ),
    };

    Clarification {
        priority,
        category,
        question,
        context: context(d),
        suggested_inquiry: Some(format!("RFI: {inquiry}")),
    }
}

fn subject(d: &Discrepancy) -> String {
    match d.affected_entries.as_slice() {
        [] => "the total sign count".to_string(),
        [one] => format!("'{one}'"),
        many => {
            let mut names: Vec<&str> = many.iter().map(String::as_str).collect();
            names.dedup();
            format!("'{}'", names.join("' / '"))
        }
    }
}

fn context(d: &Discrepancy) -> String {
    let mut parts = vec![d.description.clone()];
    if !d.values.is_empty() {
        let values: Vec<String> = d.values.iter().map(|(s, v)| format!("{s}: {v}")).collect();
        parts.push(values.join(", "));
    }
    if !d.pages.is_empty() {
        let pages: Vec<String> = d.pages.iter().map(u32::to_string).collect();
        parts.push(format!("pages {}", pages.join(", ")));
    }
    parts.join(" | ")
}

fn count_priority(d: &Discrepancy) -> ClarificationPriority {
    let counts: Vec<u32> = d.values.iter().filter_map(|(_, v)| v.parse().ok()).collect();
    let [a, b] = counts.as_slice() else {
        return ClarificationPriority::Medium;
    };
    let diff = a.abs_diff(*b);
    let ratio = diff as f32 / (*a).max(*b).max(1) as f32;
    if diff >= HIGH_PRIORITY_DIFF || ratio >= HIGH_PRIORITY_RATIO {
        ClarificationPriority::High
    } else {
        ClarificationPriority::Medium
    }
}
