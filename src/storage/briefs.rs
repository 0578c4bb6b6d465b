use super::schema::Database;
use super::types::{Brief, BriefStatus, Category, LlmMetadata, StorageError};

#[derive(Debug, sqlx::FromRow)]
struct BriefRow {
    id: String,
    headline: String,
    body: String,
    source_urls: String,
    category: String,
    published_ms: i64,
    tags: String,
    status: String,
    model: String,
    prompt_version: String,
    tokens: i64,
    cost: f64,
    processing_ms: i64,
    subjectivity: f64,
    revision_count: i64,
}

impl BriefRow {
    fn into_brief(self) -> Result<Brief, StorageError> {
        let category = Category::parse(&self.category).ok_or_else(|| {
            StorageError::CorruptRow(format!("unknown category '{}' on brief {}", self.category, self.id))
        })?;
        let status = BriefStatus::parse(&self.status).ok_or_else(|| {
            StorageError::CorruptRow(format!("unknown status '{}' on brief {}", self.status, self.id))
        })?;
        Ok(Brief {
            id: self.id,
            headline: self.headline,
            body: self.body,
            source_urls: serde_json::from_str(&self.source_urls).unwrap_or_default(),
            category,
            published_ms: self.published_ms,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            status,
            metadata: LlmMetadata {
                model: self.model,
                prompt_version: self.prompt_version,
                tokens: self.tokens as u64,
                cost: self.cost,
                processing_ms: self.processing_ms as u64,
                subjectivity: self.subjectivity,
                revision_count: self.revision_count as u32,
            },
        })
    }
}

impl Database {
    // ========================================================================
    // Brief Operations
    // ========================================================================

    /// Upsert briefs, one statement per brief, conflict key on id.
    ///
    /// Replaying a batch overwrites each brief with identical content, so the
    /// operation is idempotent. Individual failures are reported without
    /// aborting the rest.
    pub async fn upsert_briefs(&self, briefs: &[Brief]) -> (usize, Vec<String>) {
        let mut stored = 0usize;
        let mut errors = Vec::new();

        for brief in briefs {
            match self.upsert_brief(brief).await {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::warn!(brief_id = %brief.id, error = %e, "Brief upsert failed");
                    errors.push(format!("brief {} upsert failed: {}", brief.id, e));
                }
            }
        }

        (stored, errors)
    }

    async fn upsert_brief(&self, brief: &Brief) -> Result<(), StorageError> {
        let source_urls =
            serde_json::to_string(&brief.source_urls).unwrap_or_else(|_| "[]".to_string());
        let tags = serde_json::to_string(&brief.tags).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO briefs (id, headline, body, source_urls, category, published_ms, tags,
                                status, model, prompt_version, tokens, cost, processing_ms,
                                subjectivity, revision_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                headline = excluded.headline,
                body = excluded.body,
                source_urls = excluded.source_urls,
                tags = excluded.tags,
                model = excluded.model,
                prompt_version = excluded.prompt_version,
                tokens = excluded.tokens,
                cost = excluded.cost,
                processing_ms = excluded.processing_ms,
                subjectivity = excluded.subjectivity,
                revision_count = excluded.revision_count
            "#,
        )
        .bind(&brief.id)
        .bind(&brief.headline)
        .bind(&brief.body)
        .bind(source_urls)
        .bind(brief.category.as_str())
        .bind(brief.published_ms)
        .bind(tags)
        .bind(brief.status.as_str())
        .bind(&brief.metadata.model)
        .bind(&brief.metadata.prompt_version)
        .bind(brief.metadata.tokens as i64)
        .bind(brief.metadata.cost)
        .bind(brief.metadata.processing_ms as i64)
        .bind(brief.metadata.subjectivity)
        .bind(brief.metadata.revision_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Briefs with publish timestamps in `[start_ms, end_ms)`, newest first.
    pub async fn briefs_in_window(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Brief>, StorageError> {
        let rows = sqlx::query_as::<_, BriefRow>(
            r#"
            SELECT id, headline, body, source_urls, category, published_ms, tags, status,
                   model, prompt_version, tokens, cost, processing_ms, subjectivity,
                   revision_count
            FROM briefs
            WHERE published_ms >= ? AND published_ms < ?
            ORDER BY published_ms DESC
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BriefRow::into_brief).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(id: &str) -> Brief {
        Brief {
            id: id.to_string(),
            headline: "Fed Holds Rates Steady".to_string(),
            body: "body ".repeat(40).trim_end().to_string(),
            source_urls: vec!["https://www.federalreserve.gov/newsevents".to_string()],
            category: Category::FinanceMacro,
            published_ms: 1_700_000_000_000,
            tags: vec!["economy".to_string()],
            status: BriefStatus::Pending,
            metadata: LlmMetadata {
                model: "gpt-4o-mini".to_string(),
                prompt_version: "v2".to_string(),
                tokens: 1234,
                cost: 0.00052,
                processing_ms: 4100,
                subjectivity: 0.01,
                revision_count: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let db = Database::open(":memory:").await.unwrap();
        let (stored, errors) = db.upsert_briefs(&[brief("finance-macro-fed-holds-rates-1")]).await;
        assert_eq!(stored, 1);
        assert!(errors.is_empty());

        let briefs = db
            .briefs_in_window(0, 2_000_000_000_000)
            .await
            .unwrap();
        assert_eq!(briefs.len(), 1);
        let b = &briefs[0];
        assert_eq!(b.headline, "Fed Holds Rates Steady");
        assert_eq!(b.status, BriefStatus::Pending);
        assert_eq!(b.metadata.tokens, 1234);
        assert_eq!(b.source_urls.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_overwrites_same_id() {
        let db = Database::open(":memory:").await.unwrap();
        let id = "finance-macro-fed-holds-rates-2";
        db.upsert_briefs(&[brief(id)]).await;

        let mut revised = brief(id);
        revised.metadata.revision_count = 3;
        db.upsert_briefs(&[revised]).await;

        let briefs = db.briefs_in_window(0, 2_000_000_000_000).await.unwrap();
        assert_eq!(briefs.len(), 1);
        assert_eq!(briefs[0].metadata.revision_count, 3);
    }
}
