use crate::clock::{format_timestamp, truncate, Clock};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{AccessKind, ContentRecord, ContentRow};

/// Single decision point for consuming a view.
///
/// The guard checks and the increment run as one conditional `UPDATE`, so
/// concurrent callers on the same id serialize in SQLite and a record can
/// never be granted more than `max_views` times. Only when nothing was
/// granted does a second read run to tell the caller why.
pub struct AccessGate;

impl AccessGate {
    /// Consume one view of `id`, returning the record with that view counted.
    pub async fn try_consume(
        db: &Database,
        clock: &dyn Clock,
        id: &str,
        kind: AccessKind,
    ) -> Result<ContentRecord> {
        let now = truncate(clock.now());

        let granted: Option<ContentRow> = sqlx::query_as(
            r#"
            UPDATE contents
            SET view_count = view_count + 1
            WHERE id = ?
              AND expires_at > ?
              AND view_count < max_views
              AND (? = 0 OR payload_kind = 'file')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(format_timestamp(now))
        .bind(kind.requires_file())
        .fetch_optional(db.pool())
        .await?;

        if let Some(row) = granted {
            let record = ContentRecord::try_from(row)?;
            tracing::debug!(
                id = %record.id,
                kind = ?kind,
                views = record.view_count,
                max_views = record.max_views,
                "View granted"
            );
            return Ok(record);
        }

        Err(Self::explain_denial(db, now, id, kind).await)
    }

    /// Work out which guard rejected the request.
    /// Order matters to callers: missing, then expired, then used up.
    async fn explain_denial(
        db: &Database,
        now: chrono::DateTime<chrono::Utc>,
        id: &str,
        kind: AccessKind,
    ) -> AppError {
        let row: Option<ContentRow> = match sqlx::query_as("SELECT * FROM contents WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await
        {
            Ok(row) => row,
            Err(e) => return e.into(),
        };

        // Absent, or swept between the update and this read
        let Some(row) = row else {
            return AppError::NotFound("Not found".to_string());
        };

        let record = match ContentRecord::try_from(row) {
            Ok(record) => record,
            Err(e) => return e,
        };

        if kind.requires_file() && record.file_ref().is_none() {
            return AppError::NotFound("File not found".to_string());
        }
        if record.is_expired_at(now) {
            return AppError::Expired("Expired".to_string());
        }
        if record.is_exhausted() {
            return AppError::LimitReached("Limit reached".to_string());
        }

        // view_count never decreases and `now` is fixed, so the update
        // cannot have failed on a record that still passes every guard
        AppError::Internal(format!("Access to {} denied for no recorded reason", id))
    }
}
