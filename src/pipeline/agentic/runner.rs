//! The bounded agent loop.
//!
//! Each round sends the whole conversation plus the fixed tool schema,
//! records usage, handles any submission, then executes the round's
//! investigative tool calls and feeds their results back. Termination:
//!
//! - a submission at or above `accept_confidence`
//! - `stability_window` consecutive submissions with the same non-zero count
//! - the cost budget: pending calls are skipped and exactly one forced
//!   round asks for a submission, then free-text recovery, then an empty
//!   "budget exceeded" outcome
//! - the iteration cap

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use super::client::AnalysisService;
use super::pricing::{pricing_for, CostTracker};
use super::prompt;
use super::submission::{parse_submission, recover_from_text, Submission};
use super::tools::{tool_schema, ToolExecutor};
use super::types::{AnalysisRequest, ContentBlock, Conversation, Message, ToolCall, ToolOutput};
use crate::pipeline::types::{Entry, ExtractionResult, Page, SourceType};
use crate::pipeline_config::AgentTuning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Submission confident enough to accept.
    Submitted,
    /// Repeated submissions agreed on the entry count.
    Stable,
    /// Budget ran out; the forced round produced a submission.
    ForcedSubmission,
    /// Budget ran out; a payload was recovered from free text.
    Recovered,
    /// Budget ran out with nothing to show.
    BudgetExceeded,
    MaxIterations,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Stable => "stable",
            Self::ForcedSubmission => "forced_submission",
            Self::Recovered => "recovered",
            Self::BudgetExceeded => "budget exceeded",
            Self::MaxIterations => "max_iterations",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub entries: Vec<Entry>,
    pub confidence: f32,
    pub iterations: u32,
    pub cost_usd: f64,
    pub notes: Vec<String>,
}

impl AgentOutcome {
    pub fn total_count(&self) -> u32 {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    pub fn into_result(self) -> ExtractionResult {
        ExtractionResult::assemble(
            self.entries,
            self.confidence,
            Some(SourceType::Agentic),
            BTreeSet::from([SourceType::Agentic]),
            Vec::new(),
            Vec::new(),
            self.iterations,
            self.notes,
        )
    }
}

/// Mutable state of one run, threaded through every round.
struct LoopState {
    conversation: Conversation,
    cost: CostTracker,
    /// Entry count of every parsed submission, in order.
    counts: Vec<usize>,
    latest: Option<Submission>,
    last_text: Option<String>,
    nudged: bool,
    notes: Vec<String>,
}

pub struct AgentLoop<'a> {
    service: &'a dyn AnalysisService,
    executor: &'a dyn ToolExecutor,
    tuning: AgentTuning,
    document_root: PathBuf,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        service: &'a dyn AnalysisService,
        executor: &'a dyn ToolExecutor,
        tuning: &AgentTuning,
        document_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service,
            executor,
            tuning: tuning.clone(),
            document_root: document_root.into(),
        }
    }

    pub fn run(&self, pages: &[Page], prior_warnings: &[String]) -> AgentOutcome {
        let mut state = LoopState {
            conversation: Conversation::new(),
            cost: CostTracker::new(pricing_for(&self.tuning.model)),
            counts: Vec::new(),
            latest: None,
            last_text: None,
            nudged: false,
            notes: Vec::new(),
        };
        state
            .conversation
            .append(Message::user_text(prompt::initial_message(pages, prior_warnings)));

        for iteration in 1..=self.tuning.max_iterations {
            let response = match self.service.respond(&self.request(&state.conversation)) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(iteration, error = %e, "Analysis service call failed");
                    state.notes.push(format!("round {iteration}: service error: {e}"));
                    continue;
                }
            };
            state.cost.record(response.usage);
            let reply = response.to_message();
            let replied = !reply.content.is_empty();
            state.conversation.append(reply);
            if let Some(text) = &response.text {
                state.last_text = Some(text.clone());
            }

            tracing::debug!(
                iteration,
                tool_calls = response.tool_calls.len(),
                cost_usd = state.cost.cost_usd(),
                "Agent round"
            );

            let mut results = Vec::new();
            if let Some(call) = response.submission() {
                match parse_submission(&call.input) {
                    Ok(submission) => {
                        state.counts.push(submission.entries.len());
                        if submission.confidence >= self.tuning.accept_confidence {
                            return self.finish(AgentStatus::Submitted, submission, iteration, state);
                        }
                        if self.is_stable(&state.counts) {
                            return self.finish(AgentStatus::Stable, submission, iteration, state);
                        }
                        let ack = prompt::submission_ack(submission.entries.len(), submission.confidence);
                        results.push(ToolOutput::text(ack).into_block(&call.id));
                        state.latest = Some(submission);
                    }
                    Err(e) => results.push(ToolOutput::error(e.to_string()).into_block(&call.id)),
                }
            }
            results.extend(
                response
                    .extra_submissions()
                    .map(|call| ToolOutput::error(prompt::EXTRA_SUBMISSION).into_block(&call.id)),
            );

            let pending: Vec<&ToolCall> = response.investigations().collect();

            if state.cost.exceeds(self.tuning.budget_usd) {
                return self.forced_round(state, &pending, results, iteration);
            }

            // Silent round. A text reply always gets a user turn back; an
            // empty reply leaves the conversation ending on the user side.
            if pending.is_empty() && results.is_empty() {
                if replied || !state.nudged {
                    let text = if state.nudged { prompt::CONTINUE } else { prompt::NUDGE };
                    state.nudged = true;
                    state.conversation.append(Message::user_text(text));
                }
                continue;
            }

            results.extend(self.execute_all(&pending));
            state.conversation.append(Message::user(results));
        }

        let iterations = self.tuning.max_iterations;
        tracing::warn!(iterations, "Agent loop hit the iteration cap");
        state.notes.push(format!("max iterations reached ({iterations})"));
        let recovered = state
            .latest
            .take()
            .or_else(|| state.last_text.as_deref().and_then(recover_from_text));
        match recovered {
            Some(submission) => self.finish(AgentStatus::MaxIterations, submission, iterations, state),
            None => self.empty(AgentStatus::MaxIterations, iterations, state),
        }
    }

    fn request(&self, conversation: &Conversation) -> AnalysisRequest {
        AnalysisRequest {
            model: self.tuning.model.clone(),
            max_tokens: self.tuning.max_tokens,
            system: prompt::SYSTEM_PROMPT.to_string(),
            tools: tool_schema(),
            messages: conversation.messages().to_vec(),
        }
    }

    fn is_stable(&self, counts: &[usize]) -> bool {
        let window = self.tuning.stability_window;
        if window == 0 || counts.len() < window {
            return false;
        }
        let recent = &counts[counts.len() - window..];
        recent[0] > 0 && recent.iter().all(|&c| c == recent[0])
    }

    /// Run one round's investigative calls concurrently; results keep call order.
    fn execute_all(&self, calls: &[&ToolCall]) -> Vec<ContentBlock> {
        let executor = self.executor;
        let root = self.document_root.as_path();
        std::thread::scope(|scope| {
            let handles: Vec<_> = calls
                .iter()
                .map(|call| scope.spawn(move || executor.execute(&call.name, &call.input, root)))
                .collect();
            handles
                .into_iter()
                .zip(calls)
                .map(|(handle, call)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| ToolOutput::error(format!("Tool '{}' failed", call.name)))
                        .into_block(&call.id)
                })
                .collect()
        })
    }

    /// Budget exhausted: skip pending calls, ask once for a submission, then
    /// fall back to free-text recovery.
    fn forced_round(
        &self,
        mut state: LoopState,
        pending: &[&ToolCall],
        mut results: Vec<ContentBlock>,
        iteration: u32,
    ) -> AgentOutcome {
        let cost = state.cost.cost_usd();
        tracing::warn!(
            iteration,
            cost_usd = cost,
            budget_usd = self.tuning.budget_usd,
            skipped = pending.len(),
            "Agent budget exceeded, forcing submission"
        );
        state.notes.push(format!(
            "budget exceeded after round {iteration} (${cost:.2} of ${:.2})",
            self.tuning.budget_usd
        ));

        results.extend(
            pending
                .iter()
                .map(|call| ToolOutput::error(prompt::SKIPPED_TOOL).into_block(&call.id)),
        );
        results.push(ContentBlock::text(prompt::FORCED_SUBMIT));
        state.conversation.append(Message::user(results));

        let final_round = iteration + 1;
        match self.service.respond(&self.request(&state.conversation)) {
            Ok(response) => {
                state.cost.record(response.usage);
                state.conversation.append(response.to_message());
                if let Some(text) = &response.text {
                    state.last_text = Some(text.clone());
                }
                if let Some(call) = response.submission() {
                    match parse_submission(&call.input) {
                        Ok(submission) => {
                            return self.finish(AgentStatus::ForcedSubmission, submission, final_round, state)
                        }
                        Err(e) => state.notes.push(format!("forced submission rejected: {e}")),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Forced round failed");
                state.notes.push(format!("forced round failed: {e}"));
            }
        }

        if let Some(submission) = state.last_text.as_deref().and_then(recover_from_text) {
            return self.finish(AgentStatus::Recovered, submission, final_round, state);
        }
        self.empty(AgentStatus::BudgetExceeded, final_round, state)
    }

    fn finish(
        &self,
        status: AgentStatus,
        submission: Submission,
        iterations: u32,
        mut state: LoopState,
    ) -> AgentOutcome {
        if let Some(notes) = submission.notes {
            state.notes.push(notes);
        }
        let outcome = AgentOutcome {
            status,
            confidence: submission.confidence,
            entries: submission.entries,
            iterations,
            cost_usd: state.cost.cost_usd(),
            notes: state.notes,
        };
        tracing::info!(
            status = %outcome.status,
            entries = outcome.entries.len(),
            total = outcome.total_count(),
            iterations,
            cost_usd = outcome.cost_usd,
            "Agent loop finished"
        );
        outcome
    }

    fn empty(&self, status: AgentStatus, iterations: u32, mut state: LoopState) -> AgentOutcome {
        state.notes.push(status.as_str().to_string());
        tracing::warn!(status = %status, iterations, "Agent loop returned no entries");
        AgentOutcome {
            status,
            entries: Vec::new(),
            confidence: 0.0,
            iterations,
            cost_usd: state.cost.cost_usd(),
            notes: state.notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::agentic::client::ScriptedService;
    use crate::pipeline::agentic::tools::PageStoreExecutor;
    use crate::pipeline::agentic::types::{Role, ServiceResponse, Usage};
    use serde_json::json;

    fn make_executor() -> PageStoreExecutor {
        PageStoreExecutor::new(vec![Page::new(1, "OFFICE 101\nOFFICE 102\nLOBBY 100")])
    }

    fn make_tuning() -> AgentTuning {
        AgentTuning {
            model: "claude-sonnet-4-5".into(),
            ..AgentTuning::default()
        }
    }

    fn read_page(id: &str, input_tokens: u64) -> ServiceResponse {
        ServiceResponse {
            usage: Usage {
                input_tokens,
                output_tokens: 0,
            },
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: "read_page_text".into(),
                input: json!({"page": 1}),
            }],
            text: None,
        }
    }

    fn submit(rooms: &[&str], confidence: f32) -> ServiceResponse {
        let entries: Vec<_> = rooms
            .iter()
            .map(|r| json!({"room_number": r, "name": "office"}))
            .collect();
        ServiceResponse {
            usage: Usage {
                input_tokens: 1_000,
                output_tokens: 100,
            },
            tool_calls: vec![ToolCall {
                id: "submit".into(),
                name: "submit_entries".into(),
                input: json!({"entries": entries, "confidence": confidence}),
            }],
            text: None,
        }
    }

    fn text_only(text: &str) -> ServiceResponse {
        ServiceResponse {
            text: Some(text.into()),
            ..ServiceResponse::default()
        }
    }

    fn run(service: &ScriptedService, tuning: &AgentTuning) -> AgentOutcome {
        let executor = make_executor();
        AgentLoop::new(service, &executor, tuning, "/nonexistent").run(&[Page::new(1, "x")], &[])
    }

    #[test]
    fn confident_submission_ends_loop() {
        let service = ScriptedService::new(vec![read_page("t1", 1_000), submit(&["101", "102"], 0.9)]);
        let outcome = run(&service, &make_tuning());

        assert_eq!(outcome.status, AgentStatus::Submitted);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.total_count(), 2);
        assert_eq!(service.calls(), 2);

        // The tool result from round one was fed back before round two.
        let requests = service.requests();
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        let ContentBlock::ToolResult { tool_use_id, content, is_error } = &last.content[0] else {
            panic!("expected tool_result");
        };
        assert_eq!(tool_use_id, "t1");
        assert!(!is_error);
        assert!(matches!(&content[0], ContentBlock::Text { text } if text.contains("LOBBY 100")));
    }

    #[test]
    fn stable_counts_end_loop_on_third_submission() {
        let service = ScriptedService::repeating(submit(&["101", "102", "103"], 0.6));
        let outcome = run(&service, &make_tuning());

        assert_eq!(outcome.status, AgentStatus::Stable);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(service.calls(), 3);
        assert_eq!(outcome.entries.len(), 3);
    }

    #[test]
    fn zero_count_submissions_are_not_stable() {
        let tuning = AgentTuning {
            max_iterations: 5,
            ..make_tuning()
        };
        let service = ScriptedService::repeating(submit(&[], 0.5));
        let outcome = run(&service, &tuning);

        assert_eq!(outcome.status, AgentStatus::MaxIterations);
        assert_eq!(service.calls(), 5);
        assert!(outcome.entries.is_empty());
    }

    #[test]
    fn budget_forces_exactly_one_final_round() {
        // 200k input tokens at $3/M is $0.60 per round; the $1.50 budget
        // is crossed in round three.
        let service = ScriptedService::repeating(read_page("t", 200_000));
        let outcome = run(&service, &make_tuning());

        assert_eq!(service.calls(), 4);
        assert_eq!(outcome.status, AgentStatus::BudgetExceeded);
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.notes.iter().any(|n| n == "budget exceeded"));

        let forced = service.requests().pop().unwrap();
        assert_eq!(forced.last_user_text().as_deref(), Some(prompt::FORCED_SUBMIT));
        let last = forced.messages.last().unwrap();
        assert!(matches!(&last.content[0], ContentBlock::ToolResult { is_error: true, .. }));
    }

    #[test]
    fn forced_round_submission_is_used() {
        let service = ScriptedService::new(vec![read_page("t", 600_000), submit(&["101"], 0.4)]);
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::ForcedSubmission);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.entries.len(), 1);
    }

    #[test]
    fn forced_round_recovers_free_text() {
        let service = ScriptedService::new(vec![
            read_page("t", 600_000),
            text_only("```json\n{\"entries\": [{\"room_number\": \"101\", \"name\": \"OFFICE\"}], \"confidence\": 0.5}\n```"),
        ]);
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::Recovered);
        assert_eq!(outcome.entries[0].identifier, "101");
    }

    #[test]
    fn service_errors_count_as_no_progress() {
        let service = ScriptedService::default()
            .then_fail("connection reset")
            .then(submit(&["101"], 0.95));
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::Submitted);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.notes.iter().any(|n| n.contains("connection reset")));
    }

    #[test]
    fn silence_is_nudged_once() {
        let service = ScriptedService::new(vec![
            text_only("Thinking."),
            text_only("Still thinking."),
            submit(&["101"], 0.9),
        ]);
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::Submitted);

        let requests = service.requests();
        assert_eq!(requests[1].last_user_text().as_deref(), Some(prompt::NUDGE));
        let nudges = requests[2]
            .messages
            .iter()
            .filter(|m| m.content.iter().any(|b| matches!(b, ContentBlock::Text { text } if text == prompt::NUDGE)))
            .count();
        assert_eq!(nudges, 1);
    }

    fn assert_well_formed(request: &AnalysisRequest) {
        assert_eq!(request.messages.first().map(|m| m.role), Some(Role::User));
        for pair in request.messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
        assert!(request.messages.iter().all(|m| !m.content.is_empty()));
    }

    #[test]
    fn silent_rounds_keep_roles_alternating() {
        let service = ScriptedService::new(vec![
            ServiceResponse::default(),
            text_only("Looking at the plans."),
            text_only("Still looking."),
            submit(&["101"], 0.99),
        ]);
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::Submitted);
        assert_eq!(outcome.iterations, 4);

        let requests = service.requests();
        for request in &requests {
            assert_well_formed(request);
            assert_eq!(request.messages.last().map(|m| m.role), Some(Role::User));
        }
        assert_eq!(requests[2].last_user_text().as_deref(), Some(prompt::CONTINUE));
        assert_eq!(requests[3].messages.len(), 5);
    }

    #[test]
    fn every_submit_call_gets_a_result() {
        let call = |id: &str| ToolCall {
            id: id.into(),
            name: "submit_entries".into(),
            input: json!({"entries": [{"room_number": "101", "name": "OFFICE"}], "confidence": 0.3}),
        };
        let twice = ServiceResponse {
            tool_calls: vec![call("s1"), call("s2")],
            ..ServiceResponse::default()
        };
        let service = ScriptedService::new(vec![twice, submit(&["101"], 0.9)]);
        let outcome = run(&service, &make_tuning());
        assert_eq!(outcome.status, AgentStatus::Submitted);

        let requests = service.requests();
        assert_well_formed(&requests[1]);
        let answered: Vec<(&str, bool)> = requests[1]
            .messages
            .last()
            .unwrap()
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, is_error, .. } => Some((tool_use_id.as_str(), *is_error)),
                _ => None,
            })
            .collect();
        assert_eq!(answered, vec![("s1", false), ("s2", true)]);
    }

    #[test]
    fn outcome_converts_to_result() {
        let service = ScriptedService::new(vec![submit(&["101", "102"], 0.9)]);
        let result = run(&service, &make_tuning()).into_result();
        assert_eq!(result.primary_source, Some(SourceType::Agentic));
        assert_eq!(result.total_count, 2);
        assert!(result.converged);
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }
}
