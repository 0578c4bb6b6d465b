use std::collections::{HashMap, HashSet};

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleRow, Category, StorageError};

/// Batch size for article upserts. 11 columns * 50 rows = 550 parameters,
/// well under SQLite's 999 limit.
const UPSERT_CHUNK: usize = 50;

/// Cap on fuzzy-title candidate lookups.
const TITLE_MATCH_LIMIT: i64 = 5;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Idempotently upsert a batch of articles.
    ///
    /// Duplicates inside the batch are dropped first (by id and by URL, first
    /// occurrence wins), then rows are inserted in chunks of 50. A chunk that
    /// fails is reported but does not abort the remaining chunks. Existing
    /// rows are left untouched (`ON CONFLICT DO NOTHING` covers both the id
    /// and url uniqueness constraints), so replaying a batch is a no-op.
    ///
    /// Returns the number of rows actually inserted along with per-chunk
    /// error strings.
    pub async fn upsert_articles(&self, articles: &[Article]) -> (usize, Vec<String>) {
        if articles.is_empty() {
            return (0, Vec::new());
        }

        let mut seen_ids = HashSet::new();
        let mut seen_urls = HashSet::new();
        let deduped: Vec<&Article> = articles
            .iter()
            .filter(|a| seen_ids.insert(a.id.as_str()) && seen_urls.insert(a.url.as_str()))
            .collect();

        let mut inserted = 0usize;
        let mut errors = Vec::new();

        for chunk in deduped.chunks(UPSERT_CHUNK) {
            match self.insert_article_chunk(chunk).await {
                Ok(count) => inserted += count,
                Err(e) => {
                    tracing::warn!(error = %e, chunk_len = chunk.len(), "Article chunk insert failed");
                    errors.push(format!("article chunk insert failed: {}", e));
                }
            }
        }

        (inserted, errors)
    }

    async fn insert_article_chunk(&self, chunk: &[&Article]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO articles (id, source_id, category, title, description, content, url, \
             published_ms, captured_ms, tags, brief_generated) ",
        );
        builder.push_values(chunk, |mut b, article| {
            let tags = serde_json::to_string(&article.tags).unwrap_or_else(|_| "[]".to_string());
            b.push_bind(&article.id)
                .push_bind(&article.source_id)
                .push_bind(article.category.as_str())
                .push_bind(&article.title)
                .push_bind(&article.description)
                .push_bind(&article.content)
                .push_bind(&article.url)
                .push_bind(article.published_ms)
                .push_bind(article.captured_ms)
                .push_bind(tags)
                .push_bind(article.brief_generated);
        });
        builder.push(" ON CONFLICT DO NOTHING");
        builder.build().execute(&mut *tx).await?;

        // changes() counts inserted rows without a table scan
        let changes: (i64,) = sqlx::query_as("SELECT changes()")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(changes.0 as usize)
    }

    /// Articles whose publish timestamp falls in `[start_ms, end_ms)`.
    pub async fn articles_in_window(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Article>, StorageError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT id, source_id, category, title, description, content, url,
                   published_ms, captured_ms, tags, brief_generated
            FROM articles
            WHERE published_ms >= ? AND published_ms < ?
            ORDER BY published_ms ASC, id ASC
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    /// Exact-URL existence check used by the novelty filter.
    pub async fn article_url_exists(&self, url: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Up to five stored titles that contain `window` as a substring
    /// (case-insensitive). `window` is the candidate's first-100-char title
    /// prefix; the novelty filter scores the results.
    pub async fn titles_containing(&self, window: &str) -> Result<Vec<String>, StorageError> {
        // Escape LIKE metacharacters so a title containing % or _ cannot
        // widen the match.
        let escaped = window.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{}%", escaped);

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT title FROM articles WHERE title LIKE ? ESCAPE '\\' LIMIT ?",
        )
        .bind(pattern)
        .bind(TITLE_MATCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Per-category article counts with publish timestamps in
    /// `[start_ms, end_ms)`. Categories with no rows are absent from the map.
    pub async fn count_in_window_by_category(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<HashMap<Category, u32>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*)
            FROM articles
            WHERE published_ms >= ? AND published_ms < ?
            GROUP BY category
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (category, count) in rows {
            if let Some(c) = Category::parse(&category) {
                counts.insert(c, count as u32);
            }
        }
        Ok(counts)
    }

    /// Flip the brief-generated flag on the given articles. The only mutation
    /// an article row ever sees after insert.
    pub async fn mark_brief_generated(&self, ids: &[String]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE articles SET brief_generated = 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
