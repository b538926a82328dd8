//! Bounded agentic extraction loop.
//!
//! Used only when deterministic extraction and the fast path both fall
//! short. An external document-analysis service investigates the pages
//! through a small read-only tool set and finishes by calling the single
//! terminal `submit_entries` tool. The loop is bounded three ways: an
//! iteration cap, a cost budget with one forced final round, and stability
//! detection over repeated submissions.

pub mod client;
pub mod pricing;
pub mod prompt;
pub mod runner;
pub mod submission;
pub mod tools;
pub mod types;

pub use client::{AnalysisService, HttpAnalysisClient, ScriptedService};
pub use runner::{AgentLoop, AgentOutcome, AgentStatus};
pub use tools::{PageStoreExecutor, ToolExecutor, ToolName};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Analysis service unreachable at {0}")]
    Connection(String),

    #[error("Analysis service returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("No API key configured (set SIGNAGE_API_KEY)")]
    MissingApiKey,

    #[error("Malformed submission: {0}")]
    MalformedSubmission(String),

    #[error("Scripted service has no response left")]
    ScriptExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
