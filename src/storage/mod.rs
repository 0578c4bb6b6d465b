//! Persistence adapter over SQLite.
//!
//! Operations express semantic intent (upserts, window queries, probe
//! updates), not SQL; every write is idempotent under replay of the same
//! batch.

mod articles;
mod briefs;
mod logs;
mod schema;
mod sources;
mod types;

pub use schema::Database;
pub use sources::SourceSeed;
pub use types::{
    Article, Brief, BriefStatus, Category, LlmMetadata, ProcessingLog, Source, StorageError,
};
