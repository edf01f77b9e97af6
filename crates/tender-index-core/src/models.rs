//! Core data models for the tender document pipeline.
//!
//! These types describe uploads as the transport layer registers them,
//! indexed documents and their chunks as the pipeline writes them, and
//! the org/plan records the entitlement gate reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline status of a document. Advances forward only; `Ready` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    Pending,
    Extracting,
    Chunking,
    Embedding,
    Ready,
    Failed,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Pending => "PENDING",
            DocStatus::Extracting => "EXTRACTING",
            DocStatus::Chunking => "CHUNKING",
            DocStatus::Embedding => "EMBEDDING",
            DocStatus::Ready => "READY",
            DocStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(DocStatus::Pending),
            "EXTRACTING" => Some(DocStatus::Extracting),
            "CHUNKING" => Some(DocStatus::Chunking),
            "EMBEDDING" => Some(DocStatus::Embedding),
            "READY" => Some(DocStatus::Ready),
            "FAILED" => Some(DocStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocStatus::Ready | DocStatus::Failed)
    }

    /// Position in the forward order. `Failed` ranks after every
    /// in-flight status so any in-flight status may move to it.
    pub fn rank(&self) -> u8 {
        match self {
            DocStatus::Pending => 0,
            DocStatus::Extracting => 1,
            DocStatus::Chunking => 2,
            DocStatus::Embedding => 3,
            DocStatus::Ready => 4,
            DocStatus::Failed => 5,
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a document is at (or failed at).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Extract,
    Chunk,
    Embed,
    Summary,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Summary => "summary",
            Stage::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Stage::Queued),
            "extract" => Some(Stage::Extract),
            "chunk" => Some(Stage::Chunk),
            "embed" => Some(Stage::Embed),
            "summary" => Some(Stage::Summary),
            "done" => Some(Stage::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking. Authentication happens upstream; this is its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessLevel {
    /// Authenticated member of `org_id`.
    Member { org_id: String },
    /// Anonymous visitor; only published content is visible.
    Public,
}

impl AccessLevel {
    pub fn member(org_id: impl Into<String>) -> Self {
        AccessLevel::Member {
            org_id: org_id.into(),
        }
    }

    pub fn org_id(&self) -> Option<&str> {
        match self {
            AccessLevel::Member { org_id } => Some(org_id),
            AccessLevel::Public => None,
        }
    }
}

/// An upload as registered by the external transport layer once its
/// bytes have landed in storage.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub file_id: String,
    /// Absent for anonymous uploads; such uploads are never indexed.
    pub org_id: Option<String>,
    pub tender_id: String,
    pub file_name: String,
    pub content_type: String,
    pub storage_key: String,
    /// Hex SHA-256 of the raw bytes, computed at upload time.
    pub content_sha256: String,
    /// Published tenders are visible to non-members (read-only).
    pub published: bool,
    pub created_at: i64,
}

/// One indexed document. Exactly one row exists per `doc_hash`.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub doc_hash: String,
    pub org_id: String,
    pub tender_id: String,
    pub upload_id: String,
    pub file_name: String,
    pub status: DocStatus,
    pub stage: Stage,
    pub error: Option<String>,
    pub page_count: Option<i64>,
    /// Mirrors the source upload's `published` flag.
    pub published: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// Read access: the owning org, or anyone once published.
    pub fn readable_by(&self, access: &AccessLevel) -> bool {
        match access {
            AccessLevel::Member { org_id } => *org_id == self.org_id || self.published,
            AccessLevel::Public => self.published,
        }
    }

    pub fn state(&self) -> IndexState {
        IndexState {
            doc_hash: self.doc_hash.clone(),
            status: self.status,
            stage: self.stage,
            error: self.error.clone(),
            created: false,
        }
    }
}

/// A retrieval-sized segment of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub doc_hash: String,
    pub chunk_index: i64,
    pub text: String,
    /// 1-based page number, when the source format has pages.
    pub page: Option<i64>,
    /// Byte offset of the chunk within its page text.
    pub offset: i64,
    pub hash: String,
}

/// A chunk paired with its stored embedding vector.
#[derive(Debug, Clone)]
pub struct ChunkVector {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Result of `ensure_index`: current state plus whether this call
/// created the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexState {
    pub doc_hash: String,
    pub status: DocStatus,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created: bool,
}

/// Read-only projection served to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub status: DocStatus,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: i64,
}

impl From<&Document> for Progress {
    fn from(doc: &Document) -> Self {
        Progress {
            status: doc.status,
            stage: doc.stage,
            error: doc.error.clone(),
            updated_at: doc.updated_at,
        }
    }
}

/// One entry of a document's append-only transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEvent {
    pub seq: i64,
    pub status: DocStatus,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: i64,
}

/// Derived ingestion state of all documents in a tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenderIngestion {
    Ready,
    Partial,
    Pending,
}

/// Derive the tender-level summary from its documents' statuses.
pub fn summarize_tender(statuses: &[DocStatus]) -> TenderIngestion {
    let ready = statuses.iter().filter(|s| **s == DocStatus::Ready).count();
    if ready == 0 {
        TenderIngestion::Pending
    } else if ready == statuses.len() {
        TenderIngestion::Ready
    } else {
        TenderIngestion::Partial
    }
}

/// Subscription tier of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Pro,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "free" | "trial" => Some(PlanTier::Free),
            "starter" => Some(PlanTier::Starter),
            "pro" => Some(PlanTier::Pro),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }

    /// Trial-tier orgs are metered per tender and against the shared
    /// trial credit pool; paid tiers against a monthly aggregate.
    pub fn is_trial(&self) -> bool {
        matches!(self, PlanTier::Free)
    }
}

/// Organization record as the gate sees it.
#[derive(Debug, Clone)]
pub struct OrgAccount {
    pub org_id: String,
    pub tier: PlanTier,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// Snapshot of an org's usage counters, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub tender_chats: i64,
    pub tender_briefs: i64,
    pub monthly_chats: i64,
    pub monthly_briefs: i64,
    pub trial_credits: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for s in [
            DocStatus::Pending,
            DocStatus::Extracting,
            DocStatus::Chunking,
            DocStatus::Embedding,
            DocStatus::Ready,
            DocStatus::Failed,
        ] {
            assert_eq!(DocStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DocStatus::parse("ready"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(DocStatus::Ready.is_terminal());
        assert!(DocStatus::Failed.is_terminal());
        assert!(!DocStatus::Embedding.is_terminal());
    }

    #[test]
    fn tender_summary_derivation() {
        assert_eq!(summarize_tender(&[]), TenderIngestion::Pending);
        assert_eq!(
            summarize_tender(&[DocStatus::Pending, DocStatus::Chunking]),
            TenderIngestion::Pending
        );
        assert_eq!(
            summarize_tender(&[DocStatus::Ready, DocStatus::Failed]),
            TenderIngestion::Partial
        );
        assert_eq!(
            summarize_tender(&[DocStatus::Ready, DocStatus::Ready]),
            TenderIngestion::Ready
        );
    }

    #[test]
    fn tier_parse_accepts_trial_alias() {
        assert_eq!(PlanTier::parse("Trial"), Some(PlanTier::Free));
        assert_eq!(PlanTier::parse("pro"), Some(PlanTier::Pro));
        assert_eq!(PlanTier::parse("gold"), None);
    }
}
