use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors surfaced by the persistence adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored row contained a value the domain model rejects
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Domain Enums
// ============================================================================

/// Topical category a source (and every article captured from it) belongs to.
///
/// The category of a source is immutable; articles inherit it at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "US_NATIONAL")]
    UsNational,
    #[serde(rename = "INTERNATIONAL")]
    International,
    #[serde(rename = "FINANCE_MACRO")]
    FinanceMacro,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::UsNational,
        Category::International,
        Category::FinanceMacro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::UsNational => "US_NATIONAL",
            Category::International => "INTERNATIONAL",
            Category::FinanceMacro => "FINANCE_MACRO",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "US_NATIONAL" => Some(Category::UsNational),
            "INTERNATIONAL" => Some(Category::International),
            "FINANCE_MACRO" => Some(Category::FinanceMacro),
            _ => None,
        }
    }

    /// Lowercase slug used in brief identifiers.
    pub fn slug(&self) -> &'static str {
        match self {
            Category::UsNational => "us-national",
            Category::International => "international",
            Category::FinanceMacro => "finance-macro",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editorial lifecycle of a brief. The rewriter only ever creates briefs in
/// the operator-configured initial status; transitions happen outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BriefStatus {
    Pending,
    Approved,
    Rejected,
    Published,
    Unpublished,
    Archived,
}

impl BriefStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BriefStatus::Pending => "pending",
            BriefStatus::Approved => "approved",
            BriefStatus::Rejected => "rejected",
            BriefStatus::Published => "published",
            BriefStatus::Unpublished => "unpublished",
            BriefStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<BriefStatus> {
        match s {
            "pending" => Some(BriefStatus::Pending),
            "approved" => Some(BriefStatus::Approved),
            "rejected" => Some(BriefStatus::Rejected),
            "published" => Some(BriefStatus::Published),
            "unpublished" => Some(BriefStatus::Unpublished),
            "archived" => Some(BriefStatus::Archived),
            _ => None,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A syndicated feed source. Loaded once at startup, rarely mutated afterwards;
/// only the probe fields (`last_checked_ms`, `last_error`) change at runtime.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: Category,
    pub active: bool,
    pub last_checked_ms: Option<i64>,
    pub last_error: Option<String>,
}

/// A captured news article.
///
/// The id is derived deterministically from `(source_id, guid, url)` so a
/// replayed feed collapses onto the same row. Articles are never mutated after
/// insert except for the `brief_generated` flag.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub source_id: String,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    /// Publish timestamp from the feed, falling back to capture time.
    pub published_ms: i64,
    pub captured_ms: i64,
    pub tags: Vec<String>,
    pub brief_generated: bool,
}

/// Per-call LLM accounting attached to a brief.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMetadata {
    pub model: String,
    pub prompt_version: String,
    pub tokens: u64,
    pub cost: f64,
    pub processing_ms: u64,
    /// `|biased terms matched| / |body words|`, clipped to [0, 1].
    pub subjectivity: f64,
    pub revision_count: u32,
}

/// A neutral, fact-checked brief produced from one or more articles.
#[derive(Debug, Clone)]
pub struct Brief {
    /// `<category>-<slug3>-<epoch_ms>` where slug3 is the first three
    /// alphanumeric words of the headline.
    pub id: String,
    pub headline: String,
    pub body: String,
    pub source_urls: Vec<String>,
    pub category: Category,
    pub published_ms: i64,
    pub tags: Vec<String>,
    pub status: BriefStatus,
    pub metadata: LlmMetadata,
}

/// Append-only structured outcome record, one per batch.
#[derive(Debug, Clone)]
pub struct ProcessingLog {
    pub success: bool,
    pub articles_processed: u32,
    pub briefs_generated: u32,
    pub errors: Vec<String>,
    pub processing_ms: u64,
    pub tokens_used: u64,
    pub cost: f64,
    pub model: String,
    pub prompt_version: String,
    pub timestamp_ms: i64,
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    pub active: bool,
    pub last_checked_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Result<Source, StorageError> {
        let category = Category::parse(&self.category).ok_or_else(|| {
            StorageError::CorruptRow(format!(
                "unknown category '{}' on source {}",
                self.category, self.id
            ))
        })?;
        Ok(Source {
            id: self.id,
            name: self.name,
            url: self.url,
            category,
            active: self.active,
            last_checked_ms: self.last_checked_ms,
            last_error: self.last_error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub id: String,
    pub source_id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub published_ms: i64,
    pub captured_ms: i64,
    pub tags: String,
    pub brief_generated: bool,
}

impl ArticleRow {
    pub(crate) fn into_article(self) -> Result<Article, StorageError> {
        let category = Category::parse(&self.category).ok_or_else(|| {
            StorageError::CorruptRow(format!(
                "unknown category '{}' on article {}",
                self.category, self.id
            ))
        })?;
        // Tags were serialized by us; a corrupt blob degrades to no tags.
        let tags: Vec<String> = serde_json::from_str(&self.tags).unwrap_or_default();
        Ok(Article {
            id: self.id,
            source_id: self.source_id,
            category,
            title: self.title,
            description: self.description,
            content: self.content,
            url: self.url,
            published_ms: self.published_ms,
            captured_ms: self.captured_ms,
            tags,
            brief_generated: self.brief_generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        assert_eq!(Category::parse("SPORTS"), None);
    }

    #[test]
    fn test_brief_status_round_trip() {
        for s in [
            BriefStatus::Pending,
            BriefStatus::Approved,
            BriefStatus::Rejected,
            BriefStatus::Published,
            BriefStatus::Unpublished,
            BriefStatus::Archived,
        ] {
            assert_eq!(BriefStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BriefStatus::parse("draft"), None);
    }

    #[test]
    fn test_corrupt_tags_degrade_to_empty() {
        let row = ArticleRow {
            id: "a".into(),
            source_id: "s".into(),
            category: "US_NATIONAL".into(),
            title: "t".into(),
            description: String::new(),
            content: String::new(),
            url: "https://example.com/a".into(),
            published_ms: 0,
            captured_ms: 0,
            tags: "not json".into(),
            brief_generated: false,
        };
        let article = row.into_article().unwrap();
        assert!(article.tags.is_empty());
    }
}
