use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::path::PathBuf;

use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::{AppError, Result};

/// Stored payload, exactly one kind per record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    File(FileRef),
}

/// Handle to a blob in storage plus its original display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size: i64,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::File(_) => "file",
        }
    }
}

/// A shared piece of content with its expiry and view accounting
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub id: String,
    pub payload: Payload,
    pub expires_at: DateTime<Utc>,
    pub max_views: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Live window is `[created_at, expires_at)`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.view_count >= self.max_views
    }

    /// Views left after the caller's own view has been counted
    pub fn remaining_views(&self) -> i64 {
        (self.max_views - self.view_count).max(0)
    }

    pub fn file_ref(&self) -> Option<&FileRef> {
        match &self.payload {
            Payload::File(file) => Some(file),
            Payload::Text(_) => None,
        }
    }
}

/// Row layout of the `contents` table
#[derive(Debug, Clone, FromRow)]
pub struct ContentRow {
    pub id: String,
    pub payload_kind: String,
    pub text_payload: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub expires_at: String,
    pub max_views: i64,
    pub view_count: i64,
    pub created_at: String,
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = AppError;

    fn try_from(row: ContentRow) -> Result<Self> {
        let payload = match (row.payload_kind.as_str(), row.text_payload, row.file_path) {
            ("text", Some(text), None) => Payload::Text(text),
            ("file", None, Some(storage_path)) => Payload::File(FileRef {
                storage_path,
                file_name: row.file_name.unwrap_or_default(),
                mime_type: row.mime_type,
                size: row.file_size.unwrap_or(0),
            }),
            (kind, _, _) => {
                return Err(AppError::Internal(format!(
                    "Content {} has an inconsistent {} payload",
                    row.id, kind
                )))
            }
        };

        Ok(Self {
            id: row.id,
            payload,
            expires_at: parse_timestamp(&row.expires_at)?,
            max_views: row.max_views,
            view_count: row.view_count,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// What a request wants to do with the content; both cost one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Reveal,
    Download,
}

impl AccessKind {
    pub fn requires_file(&self) -> bool {
        matches!(self, AccessKind::Download)
    }
}

/// Payload handed to ingestion
#[derive(Debug)]
pub enum NewPayload {
    Text(String),
    /// Upload already spooled to a temp file
    File {
        temp_path: PathBuf,
        file_name: String,
        mime_type: Option<String>,
        size: i64,
    },
}

/// Creation request after form defaults are resolved
#[derive(Debug)]
pub struct NewContent {
    pub payload: NewPayload,
    pub ttl: Duration,
    pub max_views: i64,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub link: String,
    pub expires_at: String,
    pub max_views: i64,
}

/// What a viewer receives after a successful reveal
#[derive(Debug, Serialize)]
pub struct ContentView {
    pub id: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub views: i64,
    pub max_views: i64,
    pub remaining_views: i64,
    pub expires_at: String,
    pub created_at: String,
}

impl From<ContentRecord> for ContentView {
    fn from(record: ContentRecord) -> Self {
        let remaining_views = record.remaining_views();
        let kind = record.payload.kind();
        let (text, file_name, file_size, mime_type, download_url) = match record.payload {
            Payload::Text(text) => (Some(text), None, None, None, None),
            Payload::File(file) => (
                None,
                Some(file.file_name),
                Some(file.size),
                file.mime_type,
                Some(format!("/api/download/{}", record.id)),
            ),
        };

        Self {
            id: record.id,
            kind,
            text,
            file_name,
            file_size,
            mime_type,
            download_url,
            views: record.view_count,
            max_views: record.max_views,
            remaining_views,
            expires_at: format_timestamp(record.expires_at),
            created_at: format_timestamp(record.created_at),
        }
    }
}
