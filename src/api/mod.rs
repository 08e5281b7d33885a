//! Wire types for the HTTP surface.

pub mod infer;
pub mod openai_compat;
