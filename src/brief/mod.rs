//! Brief generation: the LLM client seam, the prompt contract, and the
//! iterative rewrite-and-gate loop.

pub mod llm;
pub mod prompt;
pub mod rewriter;

pub use llm::{HttpLlmClient, LlmClient, LlmError, LlmResponse};
pub use rewriter::{fallback_brief, BriefPolicy, BriefRewriter, RewriteError};
