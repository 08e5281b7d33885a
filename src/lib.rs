//! inferd: an inference orchestration service.
//!
//! Sits between an OpenAI-style chat API consumer and a local text-generation
//! backend. Transforms structured chat requests into backend prompts, drives
//! streaming generation with bounded self-healing retry on structured output,
//! persists optional multi-turn conversation history in an expiring key-value
//! store, and exposes in-flight generations to independent consumers through
//! a polling-based lateral stream.

pub mod api;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod functions;
pub mod lateral;
pub mod orchestrator;
pub mod prompt;
pub mod server;
pub mod store;

pub use error::{Error, Result};
