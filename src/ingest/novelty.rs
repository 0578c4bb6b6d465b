use std::collections::HashSet;

use crate::storage::{Article, Database};

/// Word-ratio above which a stored title marks the candidate as a duplicate.
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Title prefix length used for the substring candidate lookup.
const TITLE_WINDOW_CHARS: usize = 100;

/// Pre-insert admission filter: rejects items already stored, by exact URL
/// and then by fuzzy title match.
pub struct NoveltyFilter {
    db: Database,
}

impl NoveltyFilter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether the candidate is new to the store.
    ///
    /// Lookup failures admit the candidate: downstream dedup can absorb a
    /// duplicate, but a dropped novel item is lost for good.
    pub async fn is_new(&self, candidate: &Article) -> bool {
        match self.db.article_url_exists(&candidate.url).await {
            Ok(true) => {
                tracing::debug!(url = %candidate.url, "Candidate rejected: URL already stored");
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, url = %candidate.url, "URL lookup failed, admitting candidate");
                return true;
            }
        }

        let new_words = word_set(&candidate.title);
        if new_words.is_empty() {
            return true;
        }

        let window: String = candidate.title.chars().take(TITLE_WINDOW_CHARS).collect();
        let stored_titles = match self.db.titles_containing(&window).await {
            Ok(titles) => titles,
            Err(e) => {
                tracing::warn!(error = %e, "Title lookup failed, admitting candidate");
                return true;
            }
        };

        for stored in &stored_titles {
            // Asymmetric on purpose: admission is one-sided, so only the
            // stored side's coverage of the candidate matters.
            let ratio = word_set(stored).len() as f64 / new_words.len() as f64;
            if ratio >= TITLE_SIMILARITY_THRESHOLD {
                tracing::debug!(
                    title = %candidate.title,
                    matched = %stored,
                    ratio = ratio,
                    "Candidate rejected: fuzzy title match"
                );
                return false;
            }
        }

        true
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Category, SourceSeed};

    async fn test_db() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.sync_sources(&[SourceSeed {
            id: "wire".into(),
            name: "Wire".into(),
            url: "https://feeds.example.com/wire.xml".into(),
            category: Category::UsNational,
            active: true,
        }])
        .await
        .unwrap();
        db
    }

    fn article(id: &str, title: &str, url: &str) -> Article {
        Article {
            id: id.to_string(),
            source_id: "wire".to_string(),
            category: Category::UsNational,
            title: title.to_string(),
            description: String::new(),
            content: String::new(),
            url: url.to_string(),
            published_ms: 1_700_000_000_000,
            captured_ms: 1_700_000_000_000,
            tags: vec![],
            brief_generated: false,
        }
    }

    #[tokio::test]
    async fn test_fresh_candidate_is_new() {
        let db = test_db().await;
        let filter = NoveltyFilter::new(db);
        assert!(
            filter
                .is_new(&article("a1", "Entirely new headline", "https://x/new"))
                .await
        );
    }

    #[tokio::test]
    async fn test_stored_url_rejected() {
        let db = test_db().await;
        db.upsert_articles(&[article("a1", "Some headline", "https://x/1")])
            .await;

        let filter = NoveltyFilter::new(db);
        assert!(
            !filter
                .is_new(&article("a2", "Different headline", "https://x/1"))
                .await
        );
    }

    #[tokio::test]
    async fn test_near_identical_title_rejected() {
        let db = test_db().await;
        db.upsert_articles(&[article(
            "a1",
            "Senate passes the annual defense spending bill",
            "https://x/1",
        )])
        .await;

        let filter = NoveltyFilter::new(db);
        // The stored title contains this candidate's full window and covers
        // its word set well past the 0.8 ratio.
        assert!(
            !filter
                .is_new(&article(
                    "a2",
                    "Senate passes the annual defense spending bill",
                    "https://x/2",
                ))
                .await
        );
    }

    #[tokio::test]
    async fn test_unrelated_title_admitted() {
        let db = test_db().await;
        db.upsert_articles(&[article("a1", "Fed holds rates", "https://x/1")])
            .await;

        let filter = NoveltyFilter::new(db);
        assert!(
            filter
                .is_new(&article("a2", "Wildfire forces evacuations", "https://x/2"))
                .await
        );
    }

    #[tokio::test]
    async fn test_empty_title_admitted_when_url_unseen() {
        let db = test_db().await;
        let filter = NoveltyFilter::new(db);
        assert!(filter.is_new(&article("a1", "", "https://x/untitled")).await);
    }
}
