//! Hook pipeline
//!
//! Observability surface for a running assistant: normalizes host hook
//! envelopes, classifies tool invocations into observations, numbers
//! prompts, and folds finished sessions into summaries. Errors on this
//! path never block the host.

pub mod classify;
mod envelope;
mod pipeline;
pub mod summarizer;

pub use envelope::{project_from_cwd, HookInput, HookResponse, HookSpecificOutput, RawEnvelope};
pub use pipeline::{Enrichment, EnrichmentOracle, HookPipeline};
