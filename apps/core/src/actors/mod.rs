//! Long-lived actors for the outbound model calls.

pub mod embedding;
pub mod llm;
pub mod messages;
pub mod traits;
