use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        // Create database URL
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        // Timestamps are fixed-width RFC 3339 strings, see clock::format_timestamp
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                id TEXT PRIMARY KEY,
                payload_kind TEXT NOT NULL CHECK (payload_kind IN ('text', 'file')),
                text_payload TEXT,
                file_path TEXT,
                file_name TEXT,
                mime_type TEXT,
                file_size INTEGER,
                expires_at TEXT NOT NULL,
                max_views INTEGER NOT NULL DEFAULT 1 CHECK (max_views >= 1),
                view_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                CHECK (view_count >= 0 AND view_count <= max_views),
                CHECK (
                    (payload_kind = 'text' AND text_payload IS NOT NULL AND file_path IS NULL)
                    OR (payload_kind = 'file' AND text_payload IS NULL
                        AND file_path IS NOT NULL AND file_name IS NOT NULL)
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_contents_expires_at ON contents(expires_at)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::temp_database;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_dir, db) = temp_database().await;
        db.run_migrations().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contents")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_schema_rejects_both_payloads() {
        let (_dir, db) = temp_database().await;

        let result = sqlx::query(
            r#"
            INSERT INTO contents (id, payload_kind, text_payload, file_path, file_name, expires_at, created_at)
            VALUES ('a', 'text', 'hi', 'contents/a', 'a.txt', '2030-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')
            "#,
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err());
    }
}
