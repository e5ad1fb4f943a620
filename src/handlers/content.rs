use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{AccessKind, ContentView, NewContent, NewPayload, UploadResponse};
use crate::services::{AccessGate, ContentService};
use crate::AppState;

/// Liveness text
/// GET /
pub async fn index() -> &'static str {
    "LinkVault API is running"
}

/// Upload text or a single file
/// POST /api/upload (multipart: text | file, expiryMinutes, maxViews)
pub async fn upload_content(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>> {
    let mut temp_file_path: Option<PathBuf> = None;

    let result = process_upload(&state, multipart, &mut temp_file_path).await;

    // Cleanup temp file
    if let Some(temp_path) = temp_file_path {
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            tracing::error!("Failed to remove temp file {:?}: {}", temp_path, e);
        }
    }

    result.map(|response| Json(ApiResponse::success(response)))
}

struct SpooledFile {
    file_name: String,
    content_type: Option<String>,
    size: i64,
}

async fn process_upload(
    state: &AppState,
    mut multipart: Multipart,
    temp_file_path: &mut Option<PathBuf>,
) -> Result<UploadResponse> {
    let max_bytes = state.config.storage.max_upload_bytes;
    let mut text: Option<String> = None;
    let mut file: Option<SpooledFile> = None;
    let mut expiry_minutes: Option<String> = None;
    let mut max_views: Option<String> = None;

    // Process multipart fields
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                // Browsers send an empty part when no file was picked
                let Some(file_name) = field.file_name().filter(|n| !n.is_empty()).map(String::from)
                else {
                    continue;
                };
                if file.is_some() {
                    return Err(AppError::BadRequest("Only one file may be uploaded".to_string()));
                }
                let content_type = field.content_type().map(|s| s.to_string());

                // Create temp file for streaming upload
                let temp_path =
                    std::env::temp_dir().join(format!("linkvault_upload_{}", Uuid::new_v4()));
                let mut out = tokio::fs::File::create(&temp_path).await.map_err(|e| {
                    AppError::Internal(format!("Failed to create temp file: {}", e))
                })?;
                *temp_file_path = Some(temp_path);

                let mut size: u64 = 0;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    size += chunk.len() as u64;
                    if size > max_bytes {
                        return Err(AppError::PayloadTooLarge(format!(
                            "File exceeds the {} byte limit",
                            max_bytes
                        )));
                    }
                    out.write_all(&chunk).await.map_err(|e| {
                        AppError::Internal(format!("Failed to write to temp file: {}", e))
                    })?;
                }

                out.flush().await.map_err(|e| {
                    AppError::Internal(format!("Failed to flush temp file: {}", e))
                })?;

                file = Some(SpooledFile {
                    file_name,
                    content_type,
                    size: size as i64,
                });
            }
            "text" => {
                let value = field.text().await.map_err(multipart_error)?;
                if !value.is_empty() {
                    text = Some(value);
                }
            }
            "expiryMinutes" => {
                expiry_minutes = Some(field.text().await.map_err(multipart_error)?);
            }
            "maxViews" => {
                max_views = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let payload = match (text, file, temp_file_path.as_ref()) {
        (Some(text), None, _) => NewPayload::Text(text),
        (None, Some(file), Some(temp_path)) => NewPayload::File {
            temp_path: temp_path.clone(),
            file_name: file.file_name,
            mime_type: file.content_type,
            size: file.size,
        },
        _ => {
            return Err(AppError::BadRequest(
                "Upload either text OR file (not both)".to_string(),
            ))
        }
    };

    let content_config = &state.config.content;
    let req = NewContent {
        payload,
        ttl: ContentService::resolve_ttl(expiry_minutes.as_deref(), content_config)?,
        max_views: ContentService::resolve_max_views(max_views.as_deref(), content_config)?,
    };

    let record = ContentService::create_content(
        &state.db,
        state.storage.as_ref(),
        state.clock.as_ref(),
        req,
    )
    .await?;

    Ok(UploadResponse {
        link: ContentService::share_link(&state.config.server.public_url, &record.id),
        expires_at: crate::clock::format_timestamp(record.expires_at),
        max_views: record.max_views,
        id: record.id,
    })
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("Failed to process multipart: {}", e.body_text()))
    }
}

/// Reveal content, consuming one view
/// GET /api/content/:id
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContentView>>> {
    let record =
        AccessGate::try_consume(&state.db, state.clock.as_ref(), &id, AccessKind::Reveal).await?;
    Ok(Json(ApiResponse::success(ContentView::from(record))))
}

/// Download a shared file, consuming one view
/// GET /api/download/:id
pub async fn download_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let record =
        AccessGate::try_consume(&state.db, state.clock.as_ref(), &id, AccessKind::Download)
            .await?;
    let file = record
        .file_ref()
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let data = state.storage.get(&file.storage_path).await?;

    let content_type = file.mime_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&file.file_name)
            .first_or_octet_stream()
            .to_string()
    });

    let fallback_name = ascii_fallback_name(&file.file_name);
    let encoded_name = urlencoding::encode(&file.file_name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(header::CACHE_CONTROL, "no-store")
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Plain `filename=` value for clients that ignore `filename*`
fn ascii_fallback_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect()
}
