//! Email classification.
//!
//! A deterministic multi-node pipeline: rule guards and extractors wrap a
//! single structured LLM call per message (or per batch), producing a typed
//! [`EmailState`] with class, extracted entities, stage, and action items.
//!
//! Submodules:
//!
//! - `llm`: chat-completion client and lenient JSON parsing
//! - `prompt`: per-class guidance and prompt builders
//! - `guards`: deterministic category overrides
//! - `title`: pattern-based job-title extraction
//! - `graph`: the pipeline itself

pub mod graph;
pub mod guards;
pub mod llm;
pub mod prompt;
pub mod title;

pub use graph::{ClassificationGraph, EmailState, NEEDS_REVIEW_THRESHOLD, ResumeMatch};
pub use llm::{ChatModel, ChatRequest, LlmError, OpenAiClient};
