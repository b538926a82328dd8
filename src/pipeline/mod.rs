pub mod types;
pub mod confidence;
pub mod text;
pub mod discovery; // Page classification into evidence sources
pub mod parsers;
pub mod dedup;
pub mod reconcile; // Verification, resolution, clarifications
pub mod fast_path;
pub mod agentic; // Bounded external-service loop
pub mod strategy; // Deterministic → fast path → agent chain
