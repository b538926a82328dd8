//! Extraction strategy chain.
//!
//! Deterministic reconciliation runs first. When it has no primary source
//! or its confidence is below the adequate threshold, the fast path is
//! tried; when the fast path declines and an analysis service is
//! configured, the bounded agent loop runs. The most confident result wins
//! and carries the warnings of every strategy that ran.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::agentic::{AgentLoop, AnalysisService, PageStoreExecutor, ToolExecutor};
use crate::pipeline::fast_path;
use crate::pipeline::reconcile::Orchestrator;
use crate::pipeline::types::{ExtractionResult, Page, SourceType};
use crate::pipeline_config::EngineConfig;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which strategy produced the returned result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Deterministic,
    FastPath,
    Agentic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::FastPath => "fast_path",
            Self::Agentic => "agentic",
        }
    }

    fn of(result: &ExtractionResult) -> Self {
        match result.primary_source {
            Some(SourceType::FastPath) => Self::FastPath,
            Some(SourceType::Agentic) => Self::Agentic,
            _ => Self::Deterministic,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level entry point. Never fails: every path returns a full result.
pub struct ExtractionPipeline<'a> {
    config: EngineConfig,
    orchestrator: Orchestrator,
    service: Option<&'a dyn AnalysisService>,
    executor: Option<&'a dyn ToolExecutor>,
    document_root: PathBuf,
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

impl<'a> ExtractionPipeline<'a> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(&config),
            config,
            service: None,
            executor: None,
            document_root: PathBuf::from("."),
        }
    }

    /// Enable the agent loop as the last strategy.
    pub fn with_service(mut self, service: &'a dyn AnalysisService) -> Self {
        self.service = Some(service);
        self
    }

    /// Replace the default in-memory page executor.
    pub fn with_executor(mut self, executor: &'a dyn ToolExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Directory holding pre-rendered `page-<n>.png` images.
    pub fn with_document_root(mut self, document_root: impl Into<PathBuf>) -> Self {
        self.document_root = document_root.into();
        self
    }

    pub fn run(&self, pages: &[Page]) -> ExtractionResult {
        let deterministic = self.orchestrator.run(pages);
        let adequate = self.config.reconcile.adequate_confidence;

        if deterministic.primary_source.is_some() && deterministic.confidence >= adequate {
            tracing::info!(
                strategy = %Strategy::Deterministic,
                confidence = deterministic.confidence,
                "Extraction complete"
            );
            return deterministic;
        }

        let mut warnings = deterministic.warnings.clone();
        match deterministic.primary_source {
            None => warnings.push("No deterministic source produced entries".to_string()),
            Some(source) => warnings.push(format!(
                "Deterministic confidence {:.2} from {source} is below {adequate:.2}",
                deterministic.confidence
            )),
        }

        if let Some(fast) = fast_path::extract(pages, &self.config.fast_path) {
            return choose(deterministic, fast, warnings);
        }
        warnings.push("Fast path declined".to_string());

        let Some(service) = self.service else {
            tracing::debug!("No analysis service configured, keeping deterministic result");
            return with_warnings(deterministic, warnings);
        };

        let page_store;
        let executor: &dyn ToolExecutor = match self.executor {
            Some(executor) => executor,
            None => {
                page_store = PageStoreExecutor::new(pages.to_vec());
                &page_store
            }
        };
        let outcome = AgentLoop::new(service, executor, &self.config.agent, &self.document_root)
            .run(pages, &warnings);
        choose(deterministic, outcome.into_result(), warnings)
    }
}

/// Keep the more confident result; ties stay deterministic.
fn choose(
    deterministic: ExtractionResult,
    candidate: ExtractionResult,
    warnings: Vec<String>,
) -> ExtractionResult {
    let candidate_warnings = candidate.warnings.clone();
    let chosen = if candidate.confidence > deterministic.confidence {
        candidate
    } else {
        deterministic
    };

    tracing::info!(
        strategy = %Strategy::of(&chosen),
        confidence = chosen.confidence,
        entries = chosen.entries.len(),
        "Extraction complete"
    );

    let mut merged = warnings;
    merged.extend(candidate_warnings);
    with_warnings(chosen, merged)
}

fn with_warnings(mut result: ExtractionResult, warnings: Vec<String>) -> ExtractionResult {
    let mut merged: Vec<String> = Vec::with_capacity(warnings.len());
    for warning in warnings {
        if !merged.contains(&warning) {
            merged.push(warning);
        }
    }
    result.warnings = merged;
    result
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::agentic::types::{ServiceResponse, ToolCall, Usage};
    use crate::pipeline::agentic::ScriptedService;
    use serde_json::json;

    const SIGNAGE_PAGE: &str = "SIGNAGE SCHEDULE\n\
        SIGN TYPE    DESCRIPTION          QTY    LOCATION\n\
        A1           ROOM IDENTIFICATION  12     ALL OFFICES\n\
        A2           RESTROOM TACTILE     4      RESTROOMS\n\
        B1           EXIT STAIR           2      STAIRS\n";

    const SITE_PLAN_PAGE: &str = "SITE PLAN\n7.P3.1\n7.P3.2\n7.P1.1\n7.P1.2\n7.P2.1\n";

    const LOOSE_TAGS: &str = "LOBBY 100\nRECEPTION 101\n";

    fn make_pipeline<'a>() -> ExtractionPipeline<'a> {
        ExtractionPipeline::new(EngineConfig::default())
    }

    fn make_submission(confidence: f32) -> ServiceResponse {
        ServiceResponse {
            usage: Usage {
                input_tokens: 2_000,
                output_tokens: 200,
            },
            tool_calls: vec![ToolCall {
                id: "s1".into(),
                name: "submit_entries".into(),
                input: json!({
                    "entries": [
                        {"room_number": "100", "name": "LOBBY"},
                        {"room_number": "101", "name": "RECEPTION"},
                        {"room_number": "102", "name": "OFFICE"}
                    ],
                    "confidence": confidence
                }),
            }],
            text: None,
        }
    }

    #[test]
    fn adequate_schedule_skips_other_strategies() {
        let service = ScriptedService::new(vec![make_submission(0.99)]);
        let pipeline = make_pipeline().with_service(&service);
        let result = pipeline.run(&[Page::new(1, SIGNAGE_PAGE)]);

        assert_eq!(result.primary_source, Some(SourceType::SignageSchedule));
        assert_eq!(result.total_count, 18);
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn fast_path_beats_raw_scan() {
        let result = make_pipeline().run(&[Page::new(1, SITE_PLAN_PAGE)]);
        assert_eq!(result.primary_source, Some(SourceType::FastPath));
        assert_eq!(result.total_count, 5);
        assert!(result.warnings.iter().any(|w| w.contains("No deterministic source")));
    }

    #[test]
    fn agent_runs_when_fast_path_declines() {
        let service = ScriptedService::new(vec![make_submission(0.9)]);
        let pipeline = make_pipeline().with_service(&service);
        let result = pipeline.run(&[Page::new(1, LOOSE_TAGS)]);

        assert_eq!(service.calls(), 1);
        assert_eq!(result.primary_source, Some(SourceType::Agentic));
        assert_eq!(result.total_count, 3);
        assert!(result.warnings.iter().any(|w| w == "Fast path declined"));

        // The agent saw the earlier degradation.
        let requests = service.requests();
        let prompt = serde_json::to_string(&requests[0].messages[0]).unwrap();
        assert!(prompt.contains("Fast path declined"));
    }

    #[test]
    fn weaker_agent_result_is_discarded() {
        let service = ScriptedService::new(vec![make_submission(0.1)]).then(make_submission(0.1));
        let mut config = EngineConfig::default();
        config.agent.max_iterations = 2;
        let pipeline = ExtractionPipeline::new(config).with_service(&service);
        let result = pipeline.run(&[Page::new(1, LOOSE_TAGS)]);

        assert!(result.primary_source.is_none());
        assert!(result.sources_used.contains(&SourceType::RawText));
        assert!(result.confidence >= 0.2);
    }

    #[test]
    fn without_service_keeps_fallback_result() {
        let result = make_pipeline().run(&[Page::new(1, LOOSE_TAGS)]);
        assert!(result.primary_source.is_none());
        assert_eq!(result.entries.len(), 2);
        assert!(result.converged);
        assert!(result.warnings.iter().any(|w| w == "Fast path declined"));
    }

    #[test]
    fn zero_pages_still_produce_a_result() {
        let result = make_pipeline().run(&[]);
        assert!(result.converged);
        assert!(result.confidence >= 0.2);
        assert_eq!(result.total_count, result.entries.iter().map(|e| e.quantity).sum::<u32>());
    }

    #[test]
    fn warnings_are_not_duplicated() {
        let empty = ExtractionResult::assemble(
            Vec::new(),
            0.5,
            None,
            std::collections::BTreeSet::new(),
            Vec::new(),
            Vec::new(),
            0,
            Vec::new(),
        );
        let result = with_warnings(empty, vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(result.warnings, vec!["a".to_string(), "b".to_string()]);
    }
}
