//! Local stand-in for the upload transport: store a file's bytes and
//! register the upload record, as the real transport does once a signed
//! PUT completes.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing::info;

use tender_index_core::models::UploadRecord;
use tender_index_core::resolver::content_sha256;
use tender_index_core::store::BlobStorage;

use crate::extract::{MIME_DOCX, MIME_HTML, MIME_PDF};
use crate::services::Services;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Owning org; `None` registers an anonymous upload.
    pub org_id: Option<String>,
    pub tender_id: String,
    pub published: bool,
    /// Overrides the extension-based guess.
    pub content_type: Option<String>,
}

/// Content type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "html" | "htm" => MIME_HTML,
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

pub async fn register_file(
    services: &Services,
    path: &Path,
    opts: &UploadOptions,
) -> Result<UploadRecord> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let storage_key = services.blobs.put(&bytes).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = opts
        .content_type
        .clone()
        .unwrap_or_else(|| guess_content_type(path).to_string());

    let upload = UploadRecord {
        upload_id: uuid::Uuid::new_v4().to_string(),
        file_id: uuid::Uuid::new_v4().to_string(),
        org_id: opts.org_id.clone(),
        tender_id: opts.tender_id.clone(),
        file_name,
        content_type,
        storage_key,
        content_sha256: content_sha256(&bytes),
        published: opts.published,
        created_at: Utc::now().timestamp(),
    };
    services.store.register_upload(&upload).await?;
    info!(
        upload_id = %upload.upload_id,
        tender_id = %upload.tender_id,
        content_type = %upload.content_type,
        bytes = bytes.len(),
        "upload registered"
    );
    Ok(upload)
}
