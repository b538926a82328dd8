//! Self-healing verification state machine.
//!
//! ```text
//! DISCOVER → PARSE_PRIMARY → PARSE_SECONDARY → DEDUP → VERIFY ⇄ RESOLVE
//!                                                        ↓
//!                                   MERGE_SECONDARY → CLARIFY → DONE
//! ```
//!
//! `run` never fails. No discoverable source, or no source that parses to
//! anything, drops to the raw-text fallback scan.

use std::collections::{BTreeSet, HashSet};

use crate::pipeline::dedup::{cross_source_additions, dedup_entries};
use crate::pipeline::discovery::{discover_sources, DiscoveryResult};
use crate::pipeline::parsers::{fallback, parse_source};
use crate::pipeline::types::{
    Clarification, Discrepancy, DiscrepancyKind, ExtractionResult, Page, ParseResult, Resolution,
    ResolutionAction, SourceType,
};
use crate::pipeline_config::{DiscoveryTuning, EngineConfig, ReconcileTuning};

use super::clarify;
use super::resolver::apply_auto_resolutions;
use super::verifier::{verify, Evidence, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discover,
    ParsePrimary,
    ParseSecondary,
    Dedup,
    Verify,
    Resolve,
    MergeSecondary,
    Clarify,
    Fallback,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::ParsePrimary => "parse_primary",
            Self::ParseSecondary => "parse_secondary",
            Self::Dedup => "dedup",
            Self::Verify => "verify",
            Self::Resolve => "resolve",
            Self::MergeSecondary => "merge_secondary",
            Self::Clarify => "clarify",
            Self::Fallback => "fallback",
            Self::Done => "done",
        }
    }
}

/// Deterministic extraction over discovered sources.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    discovery: DiscoveryTuning,
    reconcile: ReconcileTuning,
}

/// Mutable state threaded through the stages of one run.
#[derive(Default)]
struct RunState {
    discovery: DiscoveryResult,
    /// Discovery index of the primary source and of every source already tried.
    primary_index: Option<usize>,
    attempted: HashSet<usize>,
    primary: Option<ParseResult>,
    secondaries: Vec<ParseResult>,
    evidence: Option<Evidence>,
    verification: Verification,
    acknowledged: HashSet<String>,
    resolved: Vec<Discrepancy>,
    passes: u32,
    clarifications: Vec<Clarification>,
    fallback: Option<ParseResult>,
    warnings: Vec<String>,
}

impl Orchestrator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            discovery: config.discovery.clone(),
            reconcile: config.reconcile.clone(),
        }
    }

    pub fn with_tuning(discovery: DiscoveryTuning, reconcile: ReconcileTuning) -> Self {
        Self {
            discovery,
            reconcile,
        }
    }

    /// Run the full state machine. Always returns a complete result.
    pub fn run(&self, pages: &[Page]) -> ExtractionResult {
        let mut state = RunState::default();
        let mut stage = Stage::Discover;

        while stage != Stage::Done {
            let next = match stage {
                Stage::Discover => self.discover(pages, &mut state),
                Stage::ParsePrimary => self.parse_primary(pages, &mut state),
                Stage::ParseSecondary => self.parse_secondary(pages, &mut state),
                Stage::Dedup => self.dedup(&mut state),
                Stage::Verify => self.verify(&mut state),
                Stage::Resolve => self.resolve(&mut state),
                Stage::MergeSecondary => self.merge_secondary(&mut state),
                Stage::Clarify => self.clarify(&mut state),
                Stage::Fallback => self.fallback(pages, &mut state),
                Stage::Done => Stage::Done,
            };
            tracing::debug!(from = stage.as_str(), to = next.as_str(), "Orchestrator transition");
            stage = next;
        }

        let result = self.finish(state);
        tracing::info!(
            entries = result.entries.len(),
            total = result.total_count,
            confidence = result.confidence,
            converged = result.converged,
            primary = result.primary_source.map(|s| s.as_str()).unwrap_or("none"),
            "Deterministic extraction complete"
        );
        result
    }

    // ═══════════════════════════════════════════
    // Stages
    // ═══════════════════════════════════════════

    fn discover(&self, pages: &[Page], state: &mut RunState) -> Stage {
        state.discovery = discover_sources(pages, &self.discovery);
        state.warnings.extend(state.discovery.warnings.iter().cloned());
        if state.discovery.is_empty() {
            Stage::Fallback
        } else {
            Stage::ParsePrimary
        }
    }

    /// Take the highest-confidence source that parses to at least one entry.
    fn parse_primary(&self, pages: &[Page], state: &mut RunState) -> Stage {
        for (index, source) in state.discovery.sources.iter().enumerate() {
            state.attempted.insert(index);
            match parse_source(source, pages, &self.reconcile) {
                Ok(result) if !result.entries.is_empty() => {
                    state.primary_index = Some(index);
                    state.primary = Some(result);
                    return Stage::ParseSecondary;
                }
                Ok(_) => state
                    .warnings
                    .push(format!("{} produced no entries", source.source_type)),
                Err(e) => {
                    tracing::warn!(source = %source.source_type, error = %e, "Parser failed");
                    state.warnings.push(format!("{} parser failed: {e}", source.source_type));
                }
            }
        }
        tracing::warn!("No discovered source yielded entries, using raw-text scan");
        Stage::Fallback
    }

    fn parse_secondary(&self, pages: &[Page], state: &mut RunState) -> Stage {
        for (index, source) in state.discovery.sources.iter().enumerate() {
            if state.attempted.contains(&index) {
                continue;
            }
            match parse_source(source, pages, &self.reconcile) {
                Ok(result) if !result.entries.is_empty() => state.secondaries.push(result),
                Ok(_) => state
                    .warnings
                    .push(format!("{} produced no entries", source.source_type)),
                Err(e) => {
                    tracing::warn!(source = %source.source_type, error = %e, "Parser failed");
                    state.warnings.push(format!("{} parser failed: {e}", source.source_type));
                }
            }
        }
        Stage::Dedup
    }

    fn dedup(&self, state: &mut RunState) -> Stage {
        let Some(mut primary) = state.primary.take() else {
            return Stage::Fallback;
        };

        let outcome = dedup_entries(std::mem::take(&mut primary.entries));
        primary.entries = outcome.entries;
        if outcome.removed > 0 {
            tracing::debug!(removed = outcome.removed, "Primary duplicates removed");
        }
        for secondary in &mut state.secondaries {
            secondary.entries = dedup_entries(std::mem::take(&mut secondary.entries)).entries;
        }

        for result in std::iter::once(&primary).chain(&state.secondaries) {
            state.warnings.extend(result.warnings.iter().cloned());
        }

        state.evidence = Some(Evidence {
            primary,
            secondaries: std::mem::take(&mut state.secondaries),
        });
        Stage::Verify
    }

    fn verify(&self, state: &mut RunState) -> Stage {
        let Some(evidence) = &state.evidence else {
            return Stage::Fallback;
        };
        state.verification = verify(evidence, &state.acknowledged, &self.reconcile);

        let pending_auto = state.verification.auto_resolvable().count();
        if pending_auto > 0 && state.passes < self.reconcile.max_resolution_passes {
            Stage::Resolve
        } else {
            Stage::MergeSecondary
        }
    }

    fn resolve(&self, state: &mut RunState) -> Stage {
        let Some(evidence) = state.evidence.as_mut() else {
            return Stage::Fallback;
        };
        state.passes += 1;
        let applied = apply_auto_resolutions(evidence, &state.verification.discrepancies);
        tracing::debug!(pass = state.passes, applied = applied.len(), "Resolution pass");

        if applied.is_empty() {
            return Stage::MergeSecondary;
        }
        for d in applied {
            state.acknowledged.insert(d.fingerprint());
            state.resolved.push(d);
        }
        Stage::Verify
    }

    /// Fold in entries only secondaries found, when verification trusts them.
    fn merge_secondary(&self, state: &mut RunState) -> Stage {
        let Some(evidence) = state.evidence.as_mut() else {
            return Stage::Fallback;
        };
        let additions = cross_source_additions(&evidence.primary.entries, &evidence.secondaries);
        if additions.is_empty() {
            return Stage::Clarify;
        }

        let confidence = state.verification.confidence;
        if confidence <= self.reconcile.secondary_merge_threshold {
            tracing::warn!(
                withheld = additions.len(),
                confidence,
                "Secondary-only entries withheld"
            );
            state.warnings.push(format!(
                "{} entries found only in secondary sources were withheld (verification confidence {confidence:.2})",
                additions.len()
            ));
            return Stage::Clarify;
        }

        let pending = std::mem::take(&mut state.verification.discrepancies);
        let (covered, open): (Vec<Discrepancy>, Vec<Discrepancy>) = pending.into_iter().partition(|d| {
            d.kind == DiscrepancyKind::MissingEntry
                && additions.iter().any(|e| {
                    e.source_type == d.source_b && d.affected_entries.first() == Some(&e.identifier)
                })
        });
        state.verification.discrepancies = open;
        for mut d in covered {
            d.resolution = Some(Resolution {
                action: ResolutionAction::Add,
                confidence,
                reason: format!("Merged from {} (verification confidence {confidence:.2})", d.source_b),
            });
            state.resolved.push(d);
        }

        tracing::debug!(added = additions.len(), "Secondary entries merged");
        evidence.primary.entries.extend(additions);
        Stage::Clarify
    }

    fn clarify(&self, state: &mut RunState) -> Stage {
        state.clarifications = clarify::generate(&state.verification.discrepancies);
        Stage::Done
    }

    fn fallback(&self, pages: &[Page], state: &mut RunState) -> Stage {
        state.fallback = Some(fallback::parse(pages));
        Stage::Done
    }

    // ═══════════════════════════════════════════
    // Result assembly
    // ═══════════════════════════════════════════

    fn finish(&self, mut state: RunState) -> ExtractionResult {
        if let Some(scan) = state.fallback.take() {
            state.warnings.extend(scan.warnings);
            let confidence = scan.confidence.max(self.reconcile.fallback_confidence_floor);
            return ExtractionResult::assemble(
                scan.entries,
                confidence,
                None,
                BTreeSet::from([SourceType::RawText]),
                Vec::new(),
                Vec::new(),
                0,
                state.warnings,
            );
        }

        let Some(evidence) = state.evidence.take() else {
            // Unreachable through `run`; kept total for direct callers.
            return ExtractionResult::assemble(
                Vec::new(),
                self.reconcile.final_confidence_floor,
                None,
                BTreeSet::new(),
                Vec::new(),
                Vec::new(),
                0,
                state.warnings,
            );
        };

        let primary_source = state
            .primary_index
            .and_then(|i| state.discovery.sources.get(i))
            .map(|s| s.source_type);
        let mut sources_used: BTreeSet<SourceType> =
            evidence.secondaries.iter().map(|s| s.source_type).collect();
        sources_used.insert(evidence.primary.source_type);

        let entries = evidence.primary.entries;
        let scale = if entries.is_empty() { 0.5 } else { 1.0 };
        let confidence =
            (state.verification.confidence * scale).max(self.reconcile.final_confidence_floor);

        let mut discrepancies = state.resolved;
        discrepancies.extend(state.verification.discrepancies);

        ExtractionResult::assemble(
            entries,
            confidence,
            primary_source,
            sources_used,
            discrepancies,
            state.clarifications,
            state.passes,
            state.warnings,
        )
    }
}
