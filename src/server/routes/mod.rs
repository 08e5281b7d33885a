//! HTTP route handlers

pub mod llm;
