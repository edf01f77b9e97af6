//! Shared fixtures for the integration tests: a temporary SQLite-backed
//! [`Services`] with a deterministic embedder and a scripted completer.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use tender_index::config::Config;
use tender_index::services::Services;
use tender_index::upload::{register_file, UploadOptions};
use tender_index_core::embedding::{Completer, Embedder, HashEmbedder, Prompt};
use tender_index_core::models::{AccessLevel, DocStatus, OrgAccount, PlanTier, UploadRecord};
use tender_index_core::resolver::{resolve, Intent, ResolvedDocument};
use tender_index_core::store::DocumentStore;

pub const BRIEF_REPLY: &str = r#"{
  "purpose": ["Resurfacing of the municipal ring road"],
  "key_requirements": ["Asphalt layer of 50 mm", ""],
  "submission": {"deadline": "12 May 2026", "bid_security": "2% bid bond"},
  "risks": []
}"#;

/// Hash embedder that counts calls and can be held at the door.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    pub calls: AtomicUsize,
    hold: Option<Arc<Semaphore>>,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(512),
            calls: AtomicUsize::new(0),
            hold: None,
        }
    }

    /// Each `embed` call waits for one permit on `hold`.
    pub fn held(hold: Arc<Semaphore>) -> Self {
        Self {
            hold: Some(hold),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting-hash"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.acquire().await?.forget();
        }
        self.inner.embed(texts).await
    }
}

/// Answers questions with `answer` and brief prompts with [`BRIEF_REPLY`].
pub struct ScriptedCompleter {
    pub answer: String,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Completer for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.user.contains("Brief length:") {
            Ok(BRIEF_REPLY.to_string())
        } else {
            Ok(self.answer.clone())
        }
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub services: Services,
    pub embedder: Arc<CountingEmbedder>,
    pub completer: Arc<ScriptedCompleter>,
}

pub async fn harness(tweak: impl FnOnce(&mut Config)) -> Harness {
    harness_with(CountingEmbedder::new(), tweak).await
}

pub async fn harness_with(embedder: CountingEmbedder, tweak: impl FnOnce(&mut Config)) -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::rooted_at(tmp.path());
    tweak(&mut config);
    let embedder = Arc::new(embedder);
    let completer = Arc::new(ScriptedCompleter {
        answer: "The bid bond is 2% of the bid value.".to_string(),
        calls: AtomicUsize::new(0),
    });
    let services = Services::open_with(&config, embedder.clone(), completer.clone())
        .await
        .unwrap();
    Harness {
        tmp,
        services,
        embedder,
        completer,
    }
}

pub const TENDER_TEXT: &str = "Scope of works\n\nAsphalt resurfacing of the municipal ring road, \
including drainage and road markings.\n\nBid security\n\nA bid bond of two percent of the bid \
value must accompany every submission.\n\nClosing date\n\nBids close on 12 May 2026 at noon.";

impl Harness {
    /// Write `body` to a file named `name` and register it as an upload.
    pub async fn upload(
        &self,
        org: Option<&str>,
        tender: &str,
        name: &str,
        body: &str,
    ) -> UploadRecord {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, body).unwrap();
        register_file(
            &self.services,
            &path,
            &UploadOptions {
                org_id: org.map(str::to_string),
                tender_id: tender.to_string(),
                published: false,
                content_type: None,
            },
        )
        .await
        .unwrap()
    }

    pub async fn org(&self, org_id: &str, tier: PlanTier) {
        self.services
            .store
            .upsert_org(&OrgAccount {
                org_id: org_id.to_string(),
                tier,
                trial_ends_at: None,
            })
            .await
            .unwrap();
    }

    pub async fn resolve_member(&self, org: &str, file: &str, intent: Intent) -> ResolvedDocument {
        resolve(
            self.services.store.as_ref(),
            file,
            &AccessLevel::member(org),
            intent,
        )
        .await
        .unwrap()
    }

    /// Upload `TENDER_TEXT` for `org` on `tender` and index it to READY.
    pub async fn ready_document(&self, org: &str, tender: &str) -> ResolvedDocument {
        let upload = self
            .upload(Some(org), tender, &format!("{}-rfp.txt", tender), TENDER_TEXT)
            .await;
        let resolved = self.resolve_member(org, &upload.upload_id, Intent::Write).await;
        self.services
            .pipeline
            .ensure_index(&resolved, Default::default())
            .await
            .unwrap();
        self.services.pipeline.drain().await;
        let doc = self
            .services
            .store
            .get_document(&resolved.doc_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocStatus::Ready, "error: {:?}", doc.error);
        resolved
    }
}
