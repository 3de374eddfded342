//! LLM and embedding provider implementations for Cortex.
//!
//! All providers implement `cortex_core::Provider` and, where the backend
//! supports it, `cortex_core::Embedder`.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
