//! The batch pipeline: dedup, quota distribution, and the runner that drives
//! drain → dedup → distribute → rewrite → persist → log.

pub mod dedup;
pub mod quota;
pub mod runner;

pub use dedup::{deduplicate, score_article, DedupOutcome, DEDUP_SIMILARITY_THRESHOLD};
pub use quota::{distribute, Distribution, DAILY_ARTICLE_LIMIT, MAX_ARTICLES_PER_CATEGORY};
pub use runner::{CategoryUsage, DailyLimits, Newsroom, ProcessingResult, Status};
