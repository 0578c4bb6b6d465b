use super::schema::Database;
use super::types::{Category, Source, SourceRow, StorageError};

/// A source definition as loaded from the operator's sources file.
#[derive(Debug, Clone)]
pub struct SourceSeed {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: Category,
    pub active: bool,
}

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Sync the configured source set into the database.
    ///
    /// Inserts new sources and updates `name`/`url`/`active` of existing ones.
    /// The category of an existing row is deliberately left untouched: a
    /// source's category is immutable for its lifetime.
    pub async fn sync_sources(&self, seeds: &[SourceSeed]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for seed in seeds {
            sqlx::query(
                r#"
                INSERT INTO sources (id, name, url, category, active)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    url = excluded.url,
                    active = excluded.active
                "#,
            )
            .bind(&seed.id)
            .bind(&seed.name)
            .bind(&seed.url)
            .bind(seed.category.as_str())
            .bind(seed.active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All sources with the active flag set, in id order.
    pub async fn get_active_sources(&self) -> Result<Vec<Source>, StorageError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, category, active, last_checked_ms, last_error
            FROM sources
            WHERE active = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SourceRow::into_source).collect()
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>, StorageError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, category, active, last_checked_ms, last_error
            FROM sources
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SourceRow::into_source).transpose()
    }

    /// Record the outcome of a fetch probe against a source.
    ///
    /// `error = None` marks a successful probe and clears any stored error.
    pub async fn update_source_probe(
        &self,
        id: &str,
        checked_ms: i64,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE sources SET last_checked_ms = ?, last_error = ? WHERE id = ?")
            .bind(checked_ms)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(id: &str, category: Category) -> SourceSeed {
        SourceSeed {
            id: id.to_string(),
            name: format!("Source {}", id),
            url: format!("https://feeds.example.com/{}.xml", id),
            category,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_sync_inserts_and_lists_active() {
        let db = Database::open(":memory:").await.unwrap();
        db.sync_sources(&[
            seed("ap-politics", Category::UsNational),
            seed("reuters-world", Category::International),
        ])
        .await
        .unwrap();

        let sources = db.get_active_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "ap-politics");
        assert_eq!(sources[0].category, Category::UsNational);
    }

    #[tokio::test]
    async fn test_resync_never_changes_category() {
        let db = Database::open(":memory:").await.unwrap();
        db.sync_sources(&[seed("fed-news", Category::FinanceMacro)])
            .await
            .unwrap();

        let mut changed = seed("fed-news", Category::International);
        changed.name = "Renamed".to_string();
        db.sync_sources(&[changed]).await.unwrap();

        let source = db.get_source("fed-news").await.unwrap().unwrap();
        assert_eq!(source.name, "Renamed");
        assert_eq!(source.category, Category::FinanceMacro);
    }

    #[tokio::test]
    async fn test_probe_updates_and_clears_error() {
        let db = Database::open(":memory:").await.unwrap();
        db.sync_sources(&[seed("bbc-world", Category::International)])
            .await
            .unwrap();

        db.update_source_probe("bbc-world", 1_700_000_000_000, Some("timeout"))
            .await
            .unwrap();
        let source = db.get_source("bbc-world").await.unwrap().unwrap();
        assert_eq!(source.last_error.as_deref(), Some("timeout"));

        db.update_source_probe("bbc-world", 1_700_000_030_000, None)
            .await
            .unwrap();
        let source = db.get_source("bbc-world").await.unwrap().unwrap();
        assert_eq!(source.last_checked_ms, Some(1_700_000_030_000));
        assert!(source.last_error.is_none());
    }

    #[tokio::test]
    async fn test_inactive_sources_excluded() {
        let db = Database::open(":memory:").await.unwrap();
        let mut s = seed("dormant", Category::UsNational);
        s.active = false;
        db.sync_sources(&[s]).await.unwrap();

        assert!(db.get_active_sources().await.unwrap().is_empty());
        assert!(db.get_source("dormant").await.unwrap().is_some());
    }
}
