use super::schema::Database;
use super::types::{ProcessingLog, StorageError};

impl Database {
    // ========================================================================
    // Processing Log Operations
    // ========================================================================

    /// Append one batch outcome record. Append-only; rows are never updated.
    pub async fn append_processing_log(&self, log: &ProcessingLog) -> Result<(), StorageError> {
        let errors = serde_json::to_string(&log.errors).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO processing_logs (success, articles_processed, briefs_generated, errors,
                                         processing_ms, tokens_used, cost, model, prompt_version,
                                         timestamp_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.success)
        .bind(log.articles_processed as i64)
        .bind(log.briefs_generated as i64)
        .bind(errors)
        .bind(log.processing_ms as i64)
        .bind(log.tokens_used as i64)
        .bind(log.cost)
        .bind(&log.model)
        .bind(&log.prompt_version)
        .bind(log.timestamp_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent batch records, newest first.
    pub async fn recent_processing_logs(
        &self,
        limit: i64,
    ) -> Result<Vec<ProcessingLog>, StorageError> {
        let rows: Vec<(bool, i64, i64, String, i64, i64, f64, String, String, i64)> =
            sqlx::query_as(
                r#"
                SELECT success, articles_processed, briefs_generated, errors, processing_ms,
                       tokens_used, cost, model, prompt_version, timestamp_ms
                FROM processing_logs
                ORDER BY timestamp_ms DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    success,
                    articles_processed,
                    briefs_generated,
                    errors,
                    processing_ms,
                    tokens_used,
                    cost,
                    model,
                    prompt_version,
                    timestamp_ms,
                )| ProcessingLog {
                    success,
                    articles_processed: articles_processed as u32,
                    briefs_generated: briefs_generated as u32,
                    errors: serde_json::from_str(&errors).unwrap_or_default(),
                    processing_ms: processing_ms as u64,
                    tokens_used: tokens_used as u64,
                    cost,
                    model,
                    prompt_version,
                    timestamp_ms,
                },
            )
            .collect())
    }
}
