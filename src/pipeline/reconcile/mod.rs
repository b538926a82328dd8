//! Multi-source reconciliation: verify, self-heal, clarify.

pub mod clarify;
pub mod orchestrator;
pub mod resolver;
pub mod verifier;

pub use orchestrator::{Orchestrator, Stage};
pub use verifier::{verify, Evidence, Verification};
