//! Normalizing `submit_entries` payloads into engine entries.
//!
//! Parsing is lenient at the item level: an entry that fails to deserialize
//! or carries no usable name is skipped, not fatal. Only a payload that is
//! not an object with an `entries` array is rejected.

use serde::Deserialize;

use super::AgentError;
use crate::pipeline::confidence::clamp_unit;
use crate::pipeline::types::{Entry, SourceType};

/// A normalized submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub entries: Vec<Entry>,
    pub confidence: f32,
    pub notes: Option<String>,
}

impl Submission {
    pub fn total_quantity(&self) -> u32 {
        self.entries.iter().map(|e| e.quantity).sum()
    }
}

#[derive(Deserialize)]
struct RawSubmission {
    entries: Vec<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEntry {
    room_number: Option<String>,
    number: Option<String>,
    identifier: Option<String>,
    name: Option<String>,
    #[serde(alias = "sign_type_code")]
    sign_type: Option<String>,
    quantity: Option<u32>,
    is_grouped: bool,
    group_range: Option<[u32; 2]>,
    confidence: Option<f32>,
    pages: Vec<u32>,
    notes: Option<String>,
}

/// Parse the terminal tool's input.
pub fn parse_submission(input: &serde_json::Value) -> Result<Submission, AgentError> {
    let raw: RawSubmission = serde_json::from_value(input.clone())
        .map_err(|e| AgentError::MalformedSubmission(e.to_string()))?;
    let confidence = clamp_unit(raw.confidence.unwrap_or(0.0));

    let entries: Vec<Entry> = raw
        .entries
        .iter()
        .filter_map(|v| serde_json::from_value::<RawEntry>(v.clone()).ok())
        .filter_map(|e| normalize_entry(e, confidence))
        .collect();

    if entries.len() < raw.entries.len() {
        tracing::debug!(
            submitted = raw.entries.len(),
            kept = entries.len(),
            "Dropped unusable submitted entries"
        );
    }

    Ok(Submission {
        entries,
        confidence,
        notes: raw.notes,
    })
}

fn normalize_entry(raw: RawEntry, fallback_confidence: f32) -> Option<Entry> {
    let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    let room = non_empty(&raw.room_number).or_else(|| non_empty(&raw.number));
    let sign_type = non_empty(&raw.sign_type);
    let name = non_empty(&raw.name)
        .or_else(|| sign_type.clone())
        .or_else(|| room.clone())?;
    let identifier = room
        .clone()
        .or_else(|| non_empty(&raw.identifier))
        .or_else(|| sign_type.clone())
        .unwrap_or_else(|| name.clone());

    let confidence = raw.confidence.map(clamp_unit).unwrap_or(fallback_confidence);
    let mut entry = Entry::new(SourceType::Agentic, &identifier, &name, confidence)
        .with_quantity(raw.quantity.unwrap_or(1));
    if let Some(room) = &room {
        entry = entry.with_room_number(room);
    }
    if let Some(code) = &sign_type {
        entry = entry.with_sign_type(code);
    }
    for page in raw.pages {
        entry.add_page(page);
    }
    match (raw.is_grouped, raw.group_range) {
        (_, Some([lo, hi])) if raw.is_grouped => entry = entry.grouped(lo, hi),
        (true, None) => {
            entry.is_grouped = true;
            entry.quantity = 1;
        }
        _ => {}
    }
    if let Some(notes) = raw.notes {
        entry = entry.with_notes(notes);
    }
    Some(entry)
}

/// Best-effort recovery of a submission written as free text.
///
/// Looks for a fenced ```json block first, then the outermost `{ … }` span.
pub fn recover_from_text(text: &str) -> Option<Submission> {
    let candidate = fenced_json(text).or_else(|| braced_span(text))?;
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    parse_submission(&value).ok()
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + 7;
    let len = text[start..].find("```")?;
    Some(text[start..start + len].trim())
}

fn braced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_entries() {
        let submission = parse_submission(&json!({
            "entries": [
                {"room_number": "101", "name": "office"},
                {"number": "102", "name": "Storage", "quantity": 2, "confidence": 0.6},
                {"sign_type": "A1", "name": "room id", "quantity": 4},
                {"name": "bay 1-3", "is_grouped": true, "group_range": [1, 3], "quantity": 3}
            ],
            "confidence": 0.8,
            "notes": "checked plans"
        }))
        .unwrap();

        let e = &submission.entries;
        assert_eq!(e.len(), 4);
        assert_eq!(e[0].identifier, "101");
        assert_eq!(e[0].name, "OFFICE");
        assert_eq!(e[0].quantity, 1);
        assert_eq!(e[0].confidence, 0.8);
        assert_eq!(e[1].identifier, "102");
        assert_eq!(e[1].confidence, 0.6);
        assert_eq!(e[2].identifier, "A1");
        assert_eq!(e[2].sign_type_code.as_deref(), Some("A1"));
        assert!(e[3].is_grouped);
        assert_eq!(e[3].quantity, 1);
        assert_eq!(e[3].group_range, Some((1, 3)));
        assert_eq!(submission.total_quantity(), 8);
        assert!(e.iter().all(|x| x.source_type == SourceType::Agentic));
    }

    #[test]
    fn unusable_items_skipped() {
        let submission = parse_submission(&json!({
            "entries": [{"name": ""}, "not an object", {"name": "LOBBY"}],
            "confidence": 0.7
        }))
        .unwrap();
        assert_eq!(submission.entries.len(), 1);
    }

    #[test]
    fn missing_entries_is_malformed() {
        assert!(matches!(
            parse_submission(&json!({"confidence": 0.9})),
            Err(AgentError::MalformedSubmission(_))
        ));
    }

    #[test]
    fn recovers_fenced_json() {
        let text = "Here is my takeoff:\n```json\n{\"entries\": [{\"name\": \"LOBBY\"}], \"confidence\": 0.5}\n```\nDone.";
        let submission = recover_from_text(text).unwrap();
        assert_eq!(submission.entries.len(), 1);
        assert_eq!(submission.confidence, 0.5);
    }

    #[test]
    fn recovers_bare_object() {
        let text = "Final answer {\"entries\": [{\"room_number\": \"110\", \"name\": \"OFFICE\"}], \"confidence\": 0.6} thanks";
        assert_eq!(recover_from_text(text).unwrap().entries[0].identifier, "110");
    }

    #[test]
    fn prose_is_not_recovered() {
        assert!(recover_from_text("I could not finish the takeoff.").is_none());
    }
}
