//! Provider client implementations.

pub mod azure;
pub mod common;
pub mod ollama;
pub mod openai_compat;
