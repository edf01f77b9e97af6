//! In-memory implementation of every [`store`](super) trait.
//!
//! All state sits behind one `std::sync::Mutex` per concern; each trait
//! method takes the lock once, which makes insert-if-absent, status CAS
//! and ledger apply trivially atomic. Used by unit tests and for wiring
//! the pipeline without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::gate::{AuditEvent, Counter, LedgerAction};
use crate::models::{
    Chunk, ChunkVector, DocStatus, Document, DocumentEvent, OrgAccount, Stage, UploadRecord,
    UsageSnapshot,
};
use crate::resolver::content_sha256;
use crate::retrieval::{Brief, BriefLength};

use super::{
    AuditSink, BlobStorage, DocumentStore, MemberLookup, NewDocument, OrgDirectory, Transition,
    UploadCatalog, UsageLedger,
};

#[derive(Default)]
struct DocState {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, Vec<Chunk>>,
    vectors: HashMap<String, HashMap<String, Vec<f32>>>,
    events: HashMap<String, Vec<DocumentEvent>>,
    briefs: HashMap<(String, BriefLength), Brief>,
}

#[derive(Default, Clone)]
struct Ledger {
    tender: HashMap<(String, String), (i64, i64)>,
    monthly: HashMap<(String, String), (i64, i64)>,
    trial: HashMap<String, i64>,
}

/// In-process store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    docs: Mutex<DocState>,
    uploads: Mutex<Vec<UploadRecord>>,
    orgs: Mutex<HashMap<String, OrgAccount>>,
    ledger: Mutex<Ledger>,
    audit: Mutex<Vec<AuditEvent>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_upload(&self, upload: UploadRecord) {
        self.uploads.lock().unwrap().push(upload);
    }

    pub fn add_org(&self, org: OrgAccount) {
        self.orgs.lock().unwrap().insert(org.org_id.clone(), org);
    }

    pub fn document_count(&self) -> usize {
        self.docs.lock().unwrap().docs.len()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().unwrap().clone()
    }

    fn published(&self, upload_id: &str) -> bool {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.upload_id == upload_id && u.published)
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn matches_ref(u: &UploadRecord, file_ref: &str) -> bool {
    u.upload_id == file_ref || u.file_id == file_ref
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_if_absent(&self, doc: &NewDocument) -> Result<(Document, bool)> {
        let published = self.published(&doc.upload_id);
        let mut state = self.docs.lock().unwrap();
        if let Some(existing) = state.docs.get(&doc.doc_hash) {
            return Ok((existing.clone(), false));
        }
        let now = now_ts();
        let row = Document {
            doc_hash: doc.doc_hash.clone(),
            org_id: doc.org_id.clone(),
            tender_id: doc.tender_id.clone(),
            upload_id: doc.upload_id.clone(),
            file_name: doc.file_name.clone(),
            status: DocStatus::Pending,
            stage: Stage::Queued,
            error: None,
            page_count: None,
            published,
            created_at: now,
            updated_at: now,
        };
        state.docs.insert(doc.doc_hash.clone(), row.clone());
        state.events.insert(
            doc.doc_hash.clone(),
            vec![DocumentEvent {
                seq: 1,
                status: DocStatus::Pending,
                stage: Stage::Queued,
                error: None,
                at: now,
            }],
        );
        Ok((row, true))
    }

    async fn get_document(&self, doc_hash: &str) -> Result<Option<Document>> {
        let doc = self.docs.lock().unwrap().docs.get(doc_hash).cloned();
        Ok(doc.map(|mut d| {
            d.published = self.published(&d.upload_id);
            d
        }))
    }

    async fn transition(&self, doc_hash: &str, t: Transition<'_>) -> Result<bool> {
        let mut state = self.docs.lock().unwrap();
        let now = now_ts();
        let Some(doc) = state.docs.get_mut(doc_hash) else {
            return Ok(false);
        };
        if doc.status != t.from || t.from.is_terminal() || t.to.rank() < t.from.rank() {
            return Ok(false);
        }
        doc.status = t.to;
        doc.stage = t.stage;
        doc.error = t.error.map(str::to_string);
        doc.updated_at = now;
        let log = state.events.entry(doc_hash.to_string()).or_default();
        log.push(DocumentEvent {
            seq: log.len() as i64 + 1,
            status: t.to,
            stage: t.stage,
            error: t.error.map(str::to_string),
            at: now,
        });
        Ok(true)
    }

    async fn restart_failed(&self, doc_hash: &str) -> Result<bool> {
        let mut state = self.docs.lock().unwrap();
        let now = now_ts();
        match state.docs.get_mut(doc_hash) {
            Some(doc) if doc.status == DocStatus::Failed => {
                doc.status = DocStatus::Pending;
                doc.stage = Stage::Queued;
                doc.error = None;
                doc.page_count = None;
                doc.updated_at = now;
            }
            _ => return Ok(false),
        }
        state.chunks.remove(doc_hash);
        state.vectors.remove(doc_hash);
        state.briefs.retain(|(h, _), _| h != doc_hash);
        let log = state.events.entry(doc_hash.to_string()).or_default();
        log.push(DocumentEvent {
            seq: log.len() as i64 + 1,
            status: DocStatus::Pending,
            stage: Stage::Queued,
            error: None,
            at: now,
        });
        Ok(true)
    }

    async fn set_page_count(&self, doc_hash: &str, pages: i64) -> Result<()> {
        if let Some(doc) = self.docs.lock().unwrap().docs.get_mut(doc_hash) {
            doc.page_count = Some(pages);
        }
        Ok(())
    }

    async fn replace_chunks(&self, doc_hash: &str, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.docs.lock().unwrap();
        state.vectors.remove(doc_hash);
        state.chunks.insert(doc_hash.to_string(), chunks.to_vec());
        Ok(())
    }

    async fn store_vectors(&self, doc_hash: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        let mut state = self.docs.lock().unwrap();
        let owned: Vec<String> = state
            .chunks
            .get(doc_hash)
            .map(|cs| cs.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default();
        let slot = state.vectors.entry(doc_hash.to_string()).or_default();
        for (chunk_id, v) in vectors {
            if !owned.contains(chunk_id) {
                return Err(anyhow!("chunk {} does not belong to {}", chunk_id, doc_hash));
            }
            slot.insert(chunk_id.clone(), v.clone());
        }
        Ok(())
    }

    async fn chunks(&self, doc_hash: &str, limit: usize) -> Result<Vec<Chunk>> {
        let state = self.docs.lock().unwrap();
        let mut out = state.chunks.get(doc_hash).cloned().unwrap_or_default();
        out.sort_by_key(|c| c.chunk_index);
        out.truncate(limit);
        Ok(out)
    }

    async fn chunk_vectors(&self, doc_hash: &str) -> Result<Vec<ChunkVector>> {
        let state = self.docs.lock().unwrap();
        let (Some(chunks), Some(vectors)) =
            (state.chunks.get(doc_hash), state.vectors.get(doc_hash))
        else {
            return Ok(Vec::new());
        };
        Ok(chunks
            .iter()
            .filter_map(|c| {
                vectors.get(&c.id).map(|v| ChunkVector {
                    chunk: c.clone(),
                    vector: v.clone(),
                })
            })
            .collect())
    }

    async fn events(&self, doc_hash: &str) -> Result<Vec<DocumentEvent>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .events
            .get(doc_hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn tender_documents(&self, org_id: &str, tender_id: &str) -> Result<Vec<Document>> {
        let state = self.docs.lock().unwrap();
        let mut docs: Vec<Document> = state
            .docs
            .values()
            .filter(|d| d.org_id == org_id && d.tender_id == tender_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.doc_hash.cmp(&b.doc_hash)));
        Ok(docs)
    }

    async fn get_brief(&self, doc_hash: &str, length: BriefLength) -> Result<Option<Brief>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .briefs
            .get(&(doc_hash.to_string(), length))
            .cloned())
    }

    async fn put_brief(&self, doc_hash: &str, length: BriefLength, brief: &Brief) -> Result<()> {
        self.docs
            .lock()
            .unwrap()
            .briefs
            .insert((doc_hash.to_string(), length), brief.clone());
        Ok(())
    }
}

#[async_trait]
impl UploadCatalog for InMemoryStore {
    async fn upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.upload_id == upload_id)
            .cloned())
    }

    async fn member_lookup(&self, org_id: &str, file_ref: &str) -> Result<MemberLookup> {
        let uploads = self.uploads.lock().unwrap();
        let Some(u) = uploads.iter().find(|u| matches_ref(u, file_ref)) else {
            return Ok(MemberLookup::Missing);
        };
        if u.org_id.as_deref() == Some(org_id) {
            Ok(MemberLookup::Found(u.clone()))
        } else {
            Ok(MemberLookup::Forbidden)
        }
    }

    async fn public_lookup(&self, file_ref: &str) -> Result<Option<UploadRecord>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .find(|u| matches_ref(u, file_ref) && u.published)
            .cloned())
    }
}

#[async_trait]
impl OrgDirectory for InMemoryStore {
    async fn org(&self, org_id: &str) -> Result<Option<OrgAccount>> {
        Ok(self.orgs.lock().unwrap().get(org_id).cloned())
    }
}

fn bump(pair: &mut (i64, i64), counter: Counter, delta: i64) {
    let slot = match counter {
        Counter::Chats => &mut pair.0,
        Counter::Briefs => &mut pair.1,
    };
    *slot = (*slot + delta).max(0);
}

#[async_trait]
impl UsageLedger for InMemoryStore {
    async fn apply(&self, org_id: &str, actions: &[LedgerAction]) -> Result<Option<usize>> {
        let mut ledger = self.ledger.lock().unwrap();
        let mut next = ledger.clone();
        for (i, action) in actions.iter().enumerate() {
            match action {
                LedgerAction::IncrementTender {
                    tender_id,
                    counter,
                    ceiling,
                } => {
                    let row = next
                        .tender
                        .entry((org_id.to_string(), tender_id.clone()))
                        .or_default();
                    let used = match counter {
                        Counter::Chats => row.0,
                        Counter::Briefs => row.1,
                    };
                    if ceiling.is_some_and(|c| used >= c) {
                        return Ok(Some(i));
                    }
                    bump(row, *counter, 1);
                }
                LedgerAction::IncrementMonthly {
                    period,
                    counter,
                    ceiling,
                } => {
                    let row = next
                        .monthly
                        .entry((org_id.to_string(), period.clone()))
                        .or_default();
                    if ceiling.is_some_and(|c| row.0 + row.1 >= c) {
                        return Ok(Some(i));
                    }
                    bump(row, *counter, 1);
                }
                LedgerAction::DebitTrialCredit { initial } => {
                    let credits = next.trial.entry(org_id.to_string()).or_insert(*initial);
                    if *credits <= 0 {
                        return Ok(Some(i));
                    }
                    *credits -= 1;
                }
            }
        }
        *ledger = next;
        Ok(None)
    }

    async fn release(&self, org_id: &str, actions: &[LedgerAction]) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        for action in actions {
            match action {
                LedgerAction::IncrementTender {
                    tender_id, counter, ..
                } => {
                    if let Some(row) = ledger
                        .tender
                        .get_mut(&(org_id.to_string(), tender_id.clone()))
                    {
                        bump(row, *counter, -1);
                    }
                }
                LedgerAction::IncrementMonthly {
                    period, counter, ..
                } => {
                    if let Some(row) = ledger.monthly.get_mut(&(org_id.to_string(), period.clone()))
                    {
                        bump(row, *counter, -1);
                    }
                }
                LedgerAction::DebitTrialCredit { initial } => {
                    if let Some(c) = ledger.trial.get_mut(org_id) {
                        *c = (*c + 1).min(*initial);
                    }
                }
            }
        }
        Ok(())
    }

    async fn snapshot(&self, org_id: &str, tender_id: &str, period: &str) -> Result<UsageSnapshot> {
        let ledger = self.ledger.lock().unwrap();
        let tender = ledger
            .tender
            .get(&(org_id.to_string(), tender_id.to_string()))
            .copied()
            .unwrap_or_default();
        let monthly = ledger
            .monthly
            .get(&(org_id.to_string(), period.to_string()))
            .copied()
            .unwrap_or_default();
        Ok(UsageSnapshot {
            tender_chats: tender.0,
            tender_briefs: tender.1,
            monthly_chats: monthly.0,
            monthly_briefs: monthly.1,
            trial_credits: ledger.trial.get(org_id).copied(),
        })
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.audit.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for InMemoryStore {
    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let handle = content_sha256(bytes);
        self.blobs
            .lock()
            .unwrap()
            .insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| anyhow!("blob not found: {}", handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_doc(hash: &str) -> NewDocument {
        NewDocument {
            doc_hash: hash.to_string(),
            org_id: "org-a".to_string(),
            tender_id: "t1".to_string(),
            upload_id: "u1".to_string(),
            file_name: "rfp.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_if_absent_dedups() {
        let s = InMemoryStore::new();
        let (_, first) = s.insert_if_absent(&new_doc("h1")).await.unwrap();
        let (doc, second) = s.insert_if_absent(&new_doc("h1")).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(doc.status, DocStatus::Pending);
        assert_eq!(s.document_count(), 1);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let s = InMemoryStore::new();
        s.insert_if_absent(&new_doc("h1")).await.unwrap();
        let t = |from, to, stage| Transition {
            from,
            to,
            stage,
            error: None,
        };
        assert!(s
            .transition("h1", t(DocStatus::Pending, DocStatus::Extracting, Stage::Extract))
            .await
            .unwrap());
        // stale `from`
        assert!(!s
            .transition("h1", t(DocStatus::Pending, DocStatus::Extracting, Stage::Extract))
            .await
            .unwrap());
        // backwards
        assert!(!s
            .transition("h1", t(DocStatus::Extracting, DocStatus::Pending, Stage::Queued))
            .await
            .unwrap());
        let events = s.events("h1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, DocStatus::Extracting);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let s = InMemoryStore::new();
        s.insert_if_absent(&new_doc("h1")).await.unwrap();
        let steps = [
            (DocStatus::Pending, DocStatus::Extracting, Stage::Extract),
            (DocStatus::Extracting, DocStatus::Chunking, Stage::Chunk),
            (DocStatus::Chunking, DocStatus::Embedding, Stage::Embed),
            (DocStatus::Embedding, DocStatus::Ready, Stage::Done),
        ];
        for (from, to, stage) in steps {
            let t = Transition {
                from,
                to,
                stage,
                error: None,
            };
            assert!(s.transition("h1", t).await.unwrap());
        }
        let to_failed = Transition {
            from: DocStatus::Ready,
            to: DocStatus::Failed,
            stage: Stage::Done,
            error: Some("late failure"),
        };
        assert!(!s.transition("h1", to_failed).await.unwrap());
        let doc = s.get_document("h1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::Ready);
        assert!(doc.error.is_none());
    }

    #[tokio::test]
    async fn ledger_apply_is_all_or_nothing() {
        let s = InMemoryStore::new();
        let actions = vec![
            LedgerAction::IncrementTender {
                tender_id: "t1".to_string(),
                counter: Counter::Briefs,
                ceiling: Some(5),
            },
            LedgerAction::DebitTrialCredit { initial: 0 },
        ];
        assert_eq!(s.apply("org-a", &actions).await.unwrap(), Some(1));
        let snap = s.snapshot("org-a", "t1", "2026-01").await.unwrap();
        assert_eq!(snap.tender_briefs, 0);
        assert_eq!(snap.trial_credits, None);
    }

    #[tokio::test]
    async fn concurrent_last_unit_single_winner() {
        let s = Arc::new(InMemoryStore::new());
        let action = vec![LedgerAction::IncrementMonthly {
            period: "2026-01".to_string(),
            counter: Counter::Chats,
            ceiling: Some(1),
        }];
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            let a = action.clone();
            handles.push(tokio::spawn(async move { s.apply("org-a", &a).await.unwrap() }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap().is_none() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn release_restores_credit_without_exceeding_initial() {
        let s = InMemoryStore::new();
        let debit = vec![LedgerAction::DebitTrialCredit { initial: 2 }];
        s.apply("org-a", &debit).await.unwrap();
        s.release("org-a", &debit).await.unwrap();
        s.release("org-a", &debit).await.unwrap();
        let snap = s.snapshot("org-a", "t1", "p").await.unwrap();
        assert_eq!(snap.trial_credits, Some(2));
    }
}
