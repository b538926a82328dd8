//! Fixed instructions and the loop's canned user turns.

use crate::pipeline::types::Page;

pub const SYSTEM_PROMPT: &str = "\
You are an estimator preparing a signage takeoff from construction bid documents.
Investigate the pages with the read-only tools, then call submit_entries exactly once.

Counting rules:
- One sign per signed room, regardless of how many doors open into it.
- Numbered spaces that share one sign (\"BAY 1-3\") are a single grouped entry with quantity 1.
- Skip anything marked BY OTHERS, NIC, DEMO, EXISTING or FUTURE.
- Mechanical, electrical, shaft and riser spaces do not receive room signs.
- Report a confidence between 0 and 1 for the submission and, where it differs, for each entry.";

pub const NUDGE: &str =
    "You have not called any tool. If your investigation is complete, call submit_entries now.";

pub const CONTINUE: &str =
    "Continue the investigation with the tools, or call submit_entries if you are done.";

pub const EXTRA_SUBMISSION: &str =
    "Ignored: only the first submit_entries call in a turn is processed.";

pub const FORCED_SUBMIT: &str = "\
The investigation budget is exhausted. Do not call any investigative tool. \
Call submit_entries immediately with your best takeoff so far.";

pub const SKIPPED_TOOL: &str = "Skipped: investigation budget exhausted.";

/// Opening user turn: what is in the document and what is already known.
pub fn initial_message(pages: &[Page], prior_warnings: &[String]) -> String {
    let with_text = pages.iter().filter(|p| !p.text.trim().is_empty()).count();
    let mut message = format!(
        "The bid set has {} page(s), {} with extractable text. Produce the signage takeoff.",
        pages.len(),
        with_text
    );
    if !prior_warnings.is_empty() {
        message.push_str("\n\nAutomatic extraction was inconclusive:\n");
        for warning in prior_warnings {
            message.push_str("- ");
            message.push_str(warning);
            message.push('\n');
        }
    }
    message
}

/// Acknowledgement for a submission that did not end the loop.
pub fn submission_ack(entries: usize, confidence: f32) -> String {
    format!(
        "Received {entries} entries at confidence {confidence:.2}. Keep verifying and resubmit if anything changes."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_message_counts_text_pages() {
        let pages = vec![Page::new(1, "OFFICE 101"), Page::new(2, " ")];
        let message = initial_message(&pages, &[]);
        assert!(message.contains("2 page(s), 1 with extractable text"));
        assert!(!message.contains("inconclusive"));
    }

    #[test]
    fn initial_message_lists_prior_warnings() {
        let message = initial_message(&[], &["No classified source found".to_string()]);
        assert!(message.contains("- No classified source found"));
    }
}
