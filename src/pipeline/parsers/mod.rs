//! Deterministic, pattern-based parsers, one per evidence type.
//!
//! Every parser takes (all pages, relevant page subset) and returns a
//! `ParseResult`. Dispatch is a closed match over `SourceType`; the raw-text
//! fallback is not a discovered source and is called directly by the
//! orchestrator when discovery comes back empty.

pub mod exclusion;
pub mod signage_schedule;
pub mod door_schedule;
pub mod floor_plan;
pub mod fallback;

pub use exclusion::{exclusion_marker, is_excluded};

use thiserror::Error;

use super::types::{FoundSource, Page, ParseResult, SourceFormat, SourceType};
use crate::pipeline_config::ReconcileTuning;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Page {0} is not part of the document")]
    PageNotFound(u32),

    #[error("No text on source pages {0:?}")]
    EmptySource(Vec<u32>),

    #[error("No deterministic parser for source type {0}")]
    Unsupported(SourceType),
}

/// Per-source inputs every parser needs beyond the page text.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub source_confidence: f32,
    pub format: SourceFormat,
    pub max_group_span: u32,
}

impl ParseContext {
    pub fn for_source(source: &FoundSource, tuning: &ReconcileTuning) -> Self {
        Self {
            source_confidence: source.confidence,
            format: source.format,
            max_group_span: tuning.max_group_span,
        }
    }
}

/// Parse one discovered source.
pub fn parse_source(
    source: &FoundSource,
    pages: &[Page],
    tuning: &ReconcileTuning,
) -> Result<ParseResult, ParseError> {
    let ctx = ParseContext::for_source(source, tuning);
    let result = match source.source_type {
        SourceType::SignageSchedule => signage_schedule::parse(pages, &source.pages, &ctx),
        SourceType::DoorSchedule => door_schedule::parse_door_schedule(pages, &source.pages, &ctx),
        SourceType::FinishSchedule => {
            door_schedule::parse_finish_schedule(pages, &source.pages, &ctx)
        }
        SourceType::FloorPlan => floor_plan::parse(pages, &source.pages, &ctx),
        SourceType::RawText | SourceType::FastPath | SourceType::Agentic => {
            Err(ParseError::Unsupported(source.source_type))
        }
    }?;

    tracing::debug!(
        source = %source.source_type,
        entries = result.entries.len(),
        raw = result.raw_count,
        confidence = result.confidence,
        "Parsed source"
    );

    Ok(result)
}

/// Resolve the relevant page subset, failing on unknown pages or no text at all.
pub fn select_pages<'a>(pages: &'a [Page], wanted: &[u32]) -> Result<Vec<&'a Page>, ParseError> {
    let mut selected = Vec::with_capacity(wanted.len());
    for &number in wanted {
        let page = pages
            .iter()
            .find(|p| p.page_number == number)
            .ok_or(ParseError::PageNotFound(number))?;
        selected.push(page);
    }

    if selected.iter().all(|p| p.text.trim().is_empty()) {
        return Err(ParseError::EmptySource(wanted.to_vec()));
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SourceMetadata;

    fn found(source_type: SourceType, pages: Vec<u32>) -> FoundSource {
        FoundSource {
            source_type,
            pages,
            confidence: 0.8,
            format: SourceFormat::Unknown,
            metadata: SourceMetadata::default(),
        }
    }

    #[test]
    fn select_pages_rejects_unknown_page() {
        let pages = vec![Page::new(1, "text")];
        assert_eq!(select_pages(&pages, &[2]), Err(ParseError::PageNotFound(2)));
    }

    #[test]
    fn select_pages_rejects_all_empty() {
        let pages = vec![Page::new(1, ""), Page::new(2, "  ")];
        assert!(matches!(select_pages(&pages, &[1, 2]), Err(ParseError::EmptySource(_))));
    }

    #[test]
    fn fallback_types_are_unsupported() {
        let pages = vec![Page::new(1, "OFFICE 101")];
        let err = parse_source(&found(SourceType::Agentic, vec![1]), &pages, &ReconcileTuning::default())
            .unwrap_err();
        assert_eq!(err, ParseError::Unsupported(SourceType::Agentic));
    }

    #[test]
    fn dispatch_reaches_door_parser() {
        let pages = vec![Page::new(1, "DOOR SCHEDULE\n101    OFFICE    101\n102    STORAGE    102\n")];
        let result = parse_source(
            &found(SourceType::DoorSchedule, vec![1]),
            &pages,
            &ReconcileTuning::default(),
        )
        .unwrap();
        assert_eq!(result.source_type, SourceType::DoorSchedule);
        assert_eq!(result.entries.len(), 2);
    }
}
