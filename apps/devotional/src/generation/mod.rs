// Devotional generation: prompt construction, provider output parsing,
// the bounded retry loop, and the deterministic fallback.

pub mod fallback;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
