//! Document resolution: opaque file reference + caller -> stable identity.
//!
//! Members are looked up in their own org first. If that lookup is
//! refused and the caller only wants to read, a reduced-visibility public
//! lookup is tried, which only ever returns published uploads. Write
//! intents never take the public path.
//!
//! Content type is checked after the lookup and before anything is
//! written, so files that can never be indexed leave no pipeline state.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{AccessLevel, UploadRecord};
use crate::store::{MemberLookup, UploadCatalog};

/// Domain tag mixed into every document hash.
const DOC_HASH_DOMAIN: &str = "tender-index/v1";

/// What the caller intends to do with the resolved document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

/// How the document was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Member,
    Public,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDocument {
    pub upload_id: String,
    pub file_id: String,
    pub doc_hash: String,
    /// Owning org of the upload.
    pub org_id: String,
    pub tender_id: String,
    pub file_name: String,
    pub visibility: Visibility,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("file not found")]
    NotFound,
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("access to this file is forbidden")]
    Forbidden,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::NotFound => "NOT_FOUND",
            ResolveError::UnsupportedFileType(_) => "UNSUPPORTED_FILE_TYPE",
            ResolveError::Forbidden => "FORBIDDEN",
            ResolveError::Internal(_) => "INTERNAL",
        }
    }
}

/// Content types the extract stage can turn into text.
const INDEXABLE_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
];

/// True for content the pipeline can index. Parameters after `;` are
/// ignored (`text/plain; charset=utf-8`).
pub fn is_indexable(content_type: &str) -> bool {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    INDEXABLE_TYPES.contains(&base.as_str())
}

/// Content-derived document identifier, scoped to one org and tender.
pub fn doc_hash(org_id: &str, tender_id: &str, content_sha256: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOC_HASH_DOMAIN.as_bytes());
    hasher.update([0u8]);
    hasher.update(org_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(tender_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content_sha256.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of raw bytes, as recorded on uploads.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build the resolved identity for an upload without access checks.
/// Fails for anonymous uploads (no owning org) and unsupported types.
pub fn identify(
    upload: &UploadRecord,
    visibility: Visibility,
) -> Result<ResolvedDocument, ResolveError> {
    let org_id = upload.org_id.clone().ok_or(ResolveError::NotFound)?;
    if !is_indexable(&upload.content_type) {
        return Err(ResolveError::UnsupportedFileType(
            upload.content_type.clone(),
        ));
    }
    Ok(ResolvedDocument {
        upload_id: upload.upload_id.clone(),
        file_id: upload.file_id.clone(),
        doc_hash: doc_hash(&org_id, &upload.tender_id, &upload.content_sha256),
        org_id,
        tender_id: upload.tender_id.clone(),
        file_name: upload.file_name.clone(),
        visibility,
    })
}

/// Resolve `file_ref` for `access`.
pub async fn resolve<C: UploadCatalog + ?Sized>(
    catalog: &C,
    file_ref: &str,
    access: &AccessLevel,
    intent: Intent,
) -> Result<ResolvedDocument, ResolveError> {
    let file_ref = file_ref.trim();
    if file_ref.is_empty() {
        return Err(ResolveError::NotFound);
    }

    match access {
        AccessLevel::Member { org_id } => {
            match catalog.member_lookup(org_id, file_ref).await? {
                MemberLookup::Found(upload) => identify(&upload, Visibility::Member),
                MemberLookup::Missing => Err(ResolveError::NotFound),
                MemberLookup::Forbidden => {
                    if intent == Intent::Write {
                        return Err(ResolveError::Forbidden);
                    }
                    match catalog.public_lookup(file_ref).await? {
                        Some(upload) => identify(&upload, Visibility::Public),
                        None => Err(ResolveError::Forbidden),
                    }
                }
            }
        }
        AccessLevel::Public => {
            if intent == Intent::Write {
                return Err(ResolveError::Forbidden);
            }
            match catalog.public_lookup(file_ref).await? {
                Some(upload) => identify(&upload, Visibility::Public),
                None => Err(ResolveError::NotFound),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn upload(id: &str, org: Option<&str>, ct: &str, published: bool) -> UploadRecord {
        UploadRecord {
            upload_id: id.to_string(),
            file_id: format!("file-{}", id),
            org_id: org.map(str::to_string),
            tender_id: "t1".to_string(),
            file_name: format!("{}.pdf", id),
            content_type: ct.to_string(),
            storage_key: format!("k/{}", id),
            content_sha256: content_sha256(id.as_bytes()),
            published,
            created_at: 0,
        }
    }

    fn store() -> InMemoryStore {
        let s = InMemoryStore::new();
        s.add_upload(upload("u1", Some("org-a"), "application/pdf", false));
        s.add_upload(upload("u2", Some("org-a"), "application/pdf", true));
        s.add_upload(upload("img", Some("org-a"), "image/png", false));
        s
    }

    #[test]
    fn indexable_types() {
        assert!(is_indexable("application/pdf"));
        assert!(is_indexable("Text/Plain; charset=utf-8"));
        assert!(!is_indexable("image/jpeg"));
        assert!(!is_indexable("application/zip"));
    }

    #[test]
    fn doc_hash_scoped_by_org_and_tender() {
        let sha = content_sha256(b"same bytes");
        assert_ne!(doc_hash("org-a", "t1", &sha), doc_hash("org-a", "t2", &sha));
        assert_ne!(doc_hash("org-a", "t1", &sha), doc_hash("org-b", "t1", &sha));
        assert_eq!(doc_hash("org-a", "t1", &sha), doc_hash("org-a", "t1", &sha));
        assert_eq!(doc_hash("org-a", "t1", &sha).len(), 64);
    }

    #[tokio::test]
    async fn member_resolves_own_upload_by_either_id() {
        let s = store();
        let by_upload = resolve(&s, "u1", &AccessLevel::member("org-a"), Intent::Write)
            .await
            .unwrap();
        let by_file = resolve(&s, "file-u1", &AccessLevel::member("org-a"), Intent::Read)
            .await
            .unwrap();
        assert_eq!(by_upload.doc_hash, by_file.doc_hash);
        assert_eq!(by_upload.visibility, Visibility::Member);
    }

    #[tokio::test]
    async fn other_org_falls_back_to_public_for_reads_only() {
        let s = store();
        let other = AccessLevel::member("org-b");
        let read = resolve(&s, "u2", &other, Intent::Read).await.unwrap();
        assert_eq!(read.visibility, Visibility::Public);
        assert_eq!(read.org_id, "org-a");

        let write = resolve(&s, "u2", &other, Intent::Write).await;
        assert!(matches!(write, Err(ResolveError::Forbidden)));

        let unpublished = resolve(&s, "u1", &other, Intent::Read).await;
        assert!(matches!(unpublished, Err(ResolveError::Forbidden)));
    }

    #[tokio::test]
    async fn anonymous_sees_published_only() {
        let s = store();
        assert!(resolve(&s, "u2", &AccessLevel::Public, Intent::Read).await.is_ok());
        assert!(matches!(
            resolve(&s, "u1", &AccessLevel::Public, Intent::Read).await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn images_rejected_before_any_document_exists() {
        let s = store();
        let r = resolve(&s, "img", &AccessLevel::member("org-a"), Intent::Write).await;
        assert!(matches!(r, Err(ResolveError::UnsupportedFileType(_))));
        assert_eq!(s.document_count(), 0);
    }

    #[tokio::test]
    async fn unknown_reference_not_found() {
        let s = store();
        let r = resolve(&s, "nope", &AccessLevel::member("org-a"), Intent::Read).await;
        assert!(matches!(r, Err(ResolveError::NotFound)));
    }
}
