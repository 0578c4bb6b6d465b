//! Ingestion: sweep scheduling, circuit breaking, article capture, novelty
//! filtering, and the holding queue feeding the batch pipeline.

pub mod breaker;
pub mod capture;
pub mod novelty;
pub mod queue;
pub mod scheduler;

pub use breaker::{CircuitRegistry, CircuitState};
pub use capture::{article_id, capture, derive_tags};
pub use novelty::NoveltyFilter;
pub use queue::{HoldingItem, HoldingQueue};
pub use scheduler::Poller;
