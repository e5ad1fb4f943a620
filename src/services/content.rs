use chrono::{Datelike, Duration};
use uuid::Uuid;

use crate::clock::{format_timestamp, truncate, Clock};
use crate::config::ContentConfig;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{ContentRecord, FileRef, NewContent, NewPayload, Payload};
use crate::storage::StorageProvider;

/// Stored timestamps are fixed-width; a five-digit year would break ordering
const MAX_EXPIRY_YEAR: i32 = 9999;

pub struct ContentService;

impl ContentService {
    /// Create a content record, storing the blob first for File payloads.
    /// A zero `ttl` is allowed and yields a record expiring at creation time.
    pub async fn create_content(
        db: &Database,
        storage: &dyn StorageProvider,
        clock: &dyn Clock,
        req: NewContent,
    ) -> Result<ContentRecord> {
        if req.max_views < 1 {
            return Err(AppError::BadRequest("maxViews must be at least 1".to_string()));
        }
        if req.ttl < Duration::zero() {
            return Err(AppError::BadRequest("Expiry cannot be negative".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = truncate(clock.now());
        let expires_at = created_at
            .checked_add_signed(req.ttl)
            .map(truncate)
            .filter(|t| t.year() <= MAX_EXPIRY_YEAR)
            .ok_or_else(|| AppError::BadRequest("Expiry is out of range".to_string()))?;

        let payload = match req.payload {
            NewPayload::Text(text) => {
                if text.is_empty() {
                    return Err(AppError::BadRequest("Text cannot be empty".to_string()));
                }
                Payload::Text(text)
            }
            NewPayload::File {
                temp_path,
                file_name,
                mime_type,
                size,
            } => {
                let storage_path = format!("contents/{}", id);
                storage.put_file(&storage_path, &temp_path).await?;
                Payload::File(FileRef {
                    storage_path,
                    file_name,
                    mime_type,
                    size,
                })
            }
        };

        let record = ContentRecord {
            id,
            payload,
            expires_at,
            max_views: req.max_views,
            view_count: 0,
            created_at,
        };

        if let Err(e) = Self::insert(db, &record).await {
            // Don't leave an orphaned blob behind
            if let Some(file) = record.file_ref() {
                if let Err(cleanup) = storage.delete(&file.storage_path).await {
                    tracing::warn!(
                        "Failed to remove blob {} after insert error: {}",
                        file.storage_path,
                        cleanup
                    );
                }
            }
            return Err(e);
        }

        tracing::info!(
            id = %record.id,
            kind = record.payload.kind(),
            max_views = record.max_views,
            expires_at = %format_timestamp(record.expires_at),
            "Content created"
        );
        Ok(record)
    }

    async fn insert(db: &Database, record: &ContentRecord) -> Result<()> {
        let (text_payload, file) = match &record.payload {
            Payload::Text(text) => (Some(text.as_str()), None),
            Payload::File(file) => (None, Some(file)),
        };

        sqlx::query(
            r#"
            INSERT INTO contents (id, payload_kind, text_payload, file_path, file_name, mime_type, file_size, expires_at, max_views, view_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.payload.kind())
        .bind(text_payload)
        .bind(file.map(|f| f.storage_path.as_str()))
        .bind(file.map(|f| f.file_name.as_str()))
        .bind(file.and_then(|f| f.mime_type.as_deref()))
        .bind(file.map(|f| f.size))
        .bind(format_timestamp(record.expires_at))
        .bind(record.max_views)
        .bind(format_timestamp(record.created_at))
        .execute(db.pool())
        .await?;

        Ok(())
    }

    /// Shareable viewer link for a record
    pub fn share_link(public_url: &str, id: &str) -> String {
        format!("{}/view/{}", public_url.trim_end_matches('/'), id)
    }

    /// Resolve the `expiryMinutes` form field.
    /// Missing, blank, unparsable or zero fall back to the configured default.
    pub fn resolve_ttl(raw: Option<&str>, config: &ContentConfig) -> Result<Duration> {
        let minutes = match parse_number(raw) {
            Some(m) if m.is_nan() || m == 0.0 => config.default_ttl_minutes,
            Some(m) => m,
            None => config.default_ttl_minutes,
        };

        if minutes < 0.0 {
            return Err(AppError::BadRequest("expiryMinutes cannot be negative".to_string()));
        }
        if minutes > config.max_ttl_minutes {
            return Err(AppError::BadRequest(format!(
                "expiryMinutes cannot exceed {}",
                config.max_ttl_minutes
            )));
        }

        Ok(Duration::milliseconds((minutes * 60_000.0).round() as i64))
    }

    /// Resolve the `maxViews` form field.
    /// Missing, blank, unparsable or zero fall back to the configured default.
    pub fn resolve_max_views(raw: Option<&str>, config: &ContentConfig) -> Result<i64> {
        let views = match parse_number(raw) {
            Some(v) if v.is_nan() || v == 0.0 => return Ok(config.default_max_views),
            Some(v) => v,
            None => return Ok(config.default_max_views),
        };

        if views < 0.0 {
            return Err(AppError::BadRequest("maxViews must be at least 1".to_string()));
        }
        if views.fract() != 0.0 || !views.is_finite() || views > i64::MAX as f64 {
            return Err(AppError::BadRequest("maxViews must be a whole number".to_string()));
        }

        Ok(views as i64)
    }
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::testing::temp_database;
    use crate::storage::LocalStorage;
    use chrono::{TimeZone, Utc};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_create_text_content() {
        let (dir, db) = temp_database().await;
        let storage = LocalStorage::new(dir.path().join("uploads"));
        let clock = clock();

        let record = ContentService::create_content(
            &db,
            &storage,
            &clock,
            NewContent {
                payload: NewPayload::Text("secret".to_string()),
                ttl: Duration::minutes(10),
                max_views: 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(record.view_count, 0);
        assert_eq!(record.expires_at, clock.now() + Duration::minutes(10));

        let (kind, views): (String, i64) =
            sqlx::query_as("SELECT payload_kind, view_count FROM contents WHERE id = ?")
                .bind(&record.id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(kind, "text");
        assert_eq!(views, 0);
    }

    #[tokio::test]
    async fn test_create_file_content_stores_blob() {
        let (dir, db) = temp_database().await;
        let storage = LocalStorage::new(dir.path().join("uploads"));
        let temp_path = dir.path().join("upload.tmp");
        tokio::fs::write(&temp_path, b"pdf bytes").await.unwrap();

        let record = ContentService::create_content(
            &db,
            &storage,
            &clock(),
            NewContent {
                payload: NewPayload::File {
                    temp_path,
                    file_name: "report.pdf".to_string(),
                    mime_type: Some("application/pdf".to_string()),
                    size: 9,
                },
                ttl: Duration::minutes(5),
                max_views: 2,
            },
        )
        .await
        .unwrap();

        let file = record.file_ref().unwrap();
        assert_eq!(file.storage_path, format!("contents/{}", record.id));
        assert_eq!(&storage.get(&file.storage_path).await.unwrap()[..], b"pdf bytes");
    }

    #[tokio::test]
    async fn test_rejects_invalid_creation_contract() {
        let (dir, db) = temp_database().await;
        let storage = LocalStorage::new(dir.path().join("uploads"));

        for (payload, ttl, max_views) in [
            (NewPayload::Text("x".to_string()), Duration::minutes(1), 0),
            (NewPayload::Text("x".to_string()), Duration::minutes(-1), 1),
            (NewPayload::Text(String::new()), Duration::minutes(1), 1),
        ] {
            let err = ContentService::create_content(
                &db,
                &storage,
                &clock(),
                NewContent {
                    payload,
                    ttl,
                    max_views,
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_rejects_expiry_past_year_9999() {
        let (dir, db) = temp_database().await;
        let storage = LocalStorage::new(dir.path().join("uploads"));

        let err = ContentService::create_content(
            &db,
            &storage,
            &clock(),
            NewContent {
                payload: NewPayload::Text("forever".to_string()),
                ttl: Duration::days(365 * 9000),
                max_views: 1,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contents")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_resolve_ttl_defaults() {
        let config = ContentConfig::default();
        let ten = Duration::minutes(10);

        assert_eq!(ContentService::resolve_ttl(None, &config).unwrap(), ten);
        assert_eq!(ContentService::resolve_ttl(Some(""), &config).unwrap(), ten);
        assert_eq!(ContentService::resolve_ttl(Some("abc"), &config).unwrap(), ten);
        assert_eq!(ContentService::resolve_ttl(Some("0"), &config).unwrap(), ten);
        assert_eq!(
            ContentService::resolve_ttl(Some(" 30 "), &config).unwrap(),
            Duration::minutes(30)
        );
        assert_eq!(
            ContentService::resolve_ttl(Some("1.5"), &config).unwrap(),
            Duration::seconds(90)
        );
        assert!(ContentService::resolve_ttl(Some("-5"), &config).is_err());
        assert!(ContentService::resolve_ttl(Some("inf"), &config).is_err());
    }

    #[test]
    fn test_resolve_max_views_defaults() {
        let config = ContentConfig::default();

        assert_eq!(ContentService::resolve_max_views(None, &config).unwrap(), 1);
        assert_eq!(ContentService::resolve_max_views(Some("nope"), &config).unwrap(), 1);
        assert_eq!(ContentService::resolve_max_views(Some("0"), &config).unwrap(), 1);
        assert_eq!(ContentService::resolve_max_views(Some("3"), &config).unwrap(), 3);
        assert!(ContentService::resolve_max_views(Some("-2"), &config).is_err());
        assert!(ContentService::resolve_max_views(Some("1.5"), &config).is_err());
    }

    #[test]
    fn test_share_link() {
        assert_eq!(
            ContentService::share_link("http://localhost:5173/", "abc"),
            "http://localhost:5173/view/abc"
        );
    }
}
