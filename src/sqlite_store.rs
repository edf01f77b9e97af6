//! SQLite implementation of the core storage traits.
//!
//! Atomicity rests on SQLite's single-writer model. Every multi-statement
//! path opens a transaction whose first statement is a write, so the
//! write lock is taken up front and competing writers queue on the busy
//! timeout instead of observing a half-applied change:
//!
//! - document creation: `INSERT .. ON CONFLICT(doc_hash) DO NOTHING`
//! - status change: `UPDATE .. WHERE status = ?` plus an event append
//! - ledger: `INSERT OR IGNORE` the row, then `UPDATE .. WHERE used < ?`
//!   per action; zero rows affected rolls the whole request back.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use tender_index_core::embedding::{blob_to_vec, vec_to_blob};
use tender_index_core::gate::{AuditEvent, Counter, LedgerAction};
use tender_index_core::models::{
    Chunk, ChunkVector, DocStatus, Document, DocumentEvent, OrgAccount, PlanTier, Stage,
    UploadRecord, UsageSnapshot,
};
use tender_index_core::retrieval::{Brief, BriefJson, BriefLength};
use tender_index_core::store::{
    AuditSink, DocumentStore, MemberLookup, NewDocument, OrgDirectory, Transition, UploadCatalog,
    UsageLedger,
};

const DOCUMENT_COLUMNS: &str = "d.doc_hash, d.org_id, d.tender_id, d.upload_id, d.file_name, \
     d.status, d.stage, d.error, d.page_count, d.created_at, d.updated_at, \
     COALESCE(u.published, 0) AS published";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register an upload. Re-registering the same `upload_id` updates
    /// its publish flag only.
    pub async fn register_upload(&self, upload: &UploadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (upload_id, file_id, org_id, tender_id, file_name,
                                 content_type, storage_key, content_sha256, published, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(upload_id) DO UPDATE SET published = excluded.published
            "#,
        )
        .bind(&upload.upload_id)
        .bind(&upload.file_id)
        .bind(&upload.org_id)
        .bind(&upload.tender_id)
        .bind(&upload.file_name)
        .bind(&upload.content_type)
        .bind(&upload.storage_key)
        .bind(&upload.content_sha256)
        .bind(upload.published)
        .bind(upload.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_org(&self, org: &OrgAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orgs (org_id, tier, trial_ends_at) VALUES (?, ?, ?)
            ON CONFLICT(org_id) DO UPDATE SET tier = excluded.tier,
                                              trial_ends_at = excluded.trial_ends_at
            "#,
        )
        .bind(&org.org_id)
        .bind(org.tier.as_str())
        .bind(org.trial_ends_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent gate decisions for an org, newest first.
    pub async fn audit_log(
        &self,
        org_id: &str,
        limit: i64,
    ) -> Result<Vec<(String, String, String, i64)>> {
        let rows = sqlx::query(
            "SELECT feature, result, reason, at FROM access_audit WHERE org_id = ? \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("feature"), r.get("result"), r.get("reason"), r.get("at")))
            .collect())
    }
}

fn parse_status(row: &SqliteRow) -> Result<(DocStatus, Stage)> {
    let status: String = row.get("status");
    let stage: String = row.get("stage");
    let status = DocStatus::parse(&status).ok_or_else(|| anyhow!("unknown status '{}'", status))?;
    let stage = Stage::parse(&stage).ok_or_else(|| anyhow!("unknown stage '{}'", stage))?;
    Ok((status, stage))
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let (status, stage) = parse_status(row)?;
    Ok(Document {
        doc_hash: row.get("doc_hash"),
        org_id: row.get("org_id"),
        tender_id: row.get("tender_id"),
        upload_id: row.get("upload_id"),
        file_name: row.get("file_name"),
        status,
        stage,
        error: row.get("error"),
        page_count: row.get("page_count"),
        published: row.get("published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        doc_hash: row.get("doc_hash"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        page: row.get("page"),
        offset: row.get("byte_offset"),
        hash: row.get("hash"),
    }
}

fn upload_from_row(row: &SqliteRow) -> UploadRecord {
    UploadRecord {
        upload_id: row.get("upload_id"),
        file_id: row.get("file_id"),
        org_id: row.get("org_id"),
        tender_id: row.get("tender_id"),
        file_name: row.get("file_name"),
        content_type: row.get("content_type"),
        storage_key: row.get("storage_key"),
        content_sha256: row.get("content_sha256"),
        published: row.get("published"),
        created_at: row.get("created_at"),
    }
}

async fn append_event(
    tx: &mut Transaction<'_, Sqlite>,
    doc_hash: &str,
    status: DocStatus,
    stage: Stage,
    error: Option<&str>,
    at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO document_events (doc_hash, seq, status, stage, error, at)
        SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?
        FROM document_events WHERE doc_hash = ?
        "#,
    )
    .bind(doc_hash)
    .bind(status.as_str())
    .bind(stage.as_str())
    .bind(error)
    .bind(at)
    .bind(doc_hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_if_absent(&self, doc: &NewDocument) -> Result<(Document, bool)> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (doc_hash, org_id, tender_id, upload_id, file_name,
                                   status, stage, error, page_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
            ON CONFLICT(doc_hash) DO NOTHING
            "#,
        )
        .bind(&doc.doc_hash)
        .bind(&doc.org_id)
        .bind(&doc.tender_id)
        .bind(&doc.upload_id)
        .bind(&doc.file_name)
        .bind(DocStatus::Pending.as_str())
        .bind(Stage::Queued.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            append_event(&mut tx, &doc.doc_hash, DocStatus::Pending, Stage::Queued, None, now)
                .await?;
        }
        tx.commit().await?;

        let row = self
            .get_document(&doc.doc_hash)
            .await?
            .ok_or_else(|| anyhow!("document {} vanished after insert", doc.doc_hash))?;
        Ok((row, inserted))
    }

    async fn get_document(&self, doc_hash: &str) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT {} FROM documents d LEFT JOIN uploads u ON u.upload_id = d.upload_id \
             WHERE d.doc_hash = ?",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(doc_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn transition(&self, doc_hash: &str, t: Transition<'_>) -> Result<bool> {
        if t.from.is_terminal() || t.to.rank() < t.from.rank() {
            return Ok(false);
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let changed = sqlx::query(
            "UPDATE documents SET status = ?, stage = ?, error = ?, updated_at = ? \
             WHERE doc_hash = ? AND status = ?",
        )
        .bind(t.to.as_str())
        .bind(t.stage.as_str())
        .bind(t.error)
        .bind(now)
        .bind(doc_hash)
        .bind(t.from.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        append_event(&mut tx, doc_hash, t.to, t.stage, t.error, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn restart_failed(&self, doc_hash: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let changed = sqlx::query(
            "UPDATE documents SET status = ?, stage = ?, error = NULL, page_count = NULL, \
             updated_at = ? WHERE doc_hash = ? AND status = ?",
        )
        .bind(DocStatus::Pending.as_str())
        .bind(Stage::Queued.as_str())
        .bind(now)
        .bind(doc_hash)
        .bind(DocStatus::Failed.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        for sql in [
            "DELETE FROM chunk_vectors WHERE doc_hash = ?",
            "DELETE FROM chunks WHERE doc_hash = ?",
            "DELETE FROM document_briefs WHERE doc_hash = ?",
        ] {
            sqlx::query(sql).bind(doc_hash).execute(&mut *tx).await?;
        }
        append_event(&mut tx, doc_hash, DocStatus::Pending, Stage::Queued, None, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn set_page_count(&self, doc_hash: &str, pages: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET page_count = ? WHERE doc_hash = ?")
            .bind(pages)
            .bind(doc_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_chunks(&self, doc_hash: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE doc_hash = ?")
            .bind(doc_hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE doc_hash = ?")
            .bind(doc_hash)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, doc_hash, chunk_index, text, page, byte_offset, hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(doc_hash)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.page)
            .bind(chunk.offset)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn store_vectors(&self, doc_hash: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in vectors {
            // The SELECT guard keeps a vector from attaching to another document's chunk.
            let written = sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, doc_hash, dims, embedding)
                SELECT id, doc_hash, ?, ? FROM chunks WHERE id = ? AND doc_hash = ?
                ON CONFLICT(chunk_id) DO UPDATE SET dims = excluded.dims,
                                                    embedding = excluded.embedding
                "#,
            )
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(chunk_id)
            .bind(doc_hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if written == 0 {
                tx.rollback().await?;
                return Err(anyhow!("chunk {} does not belong to {}", chunk_id, doc_hash));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn chunks(&self, doc_hash: &str, limit: usize) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, doc_hash, chunk_index, text, page, byte_offset, hash FROM chunks \
             WHERE doc_hash = ? ORDER BY chunk_index LIMIT ?",
        )
        .bind(doc_hash)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn chunk_vectors(&self, doc_hash: &str) -> Result<Vec<ChunkVector>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.doc_hash, c.chunk_index, c.text, c.page, c.byte_offset, c.hash,
                   v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE c.doc_hash = ? AND v.doc_hash = ?
            ORDER BY c.chunk_index
            "#,
        )
        .bind(doc_hash)
        .bind(doc_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkVector {
                    chunk: chunk_from_row(row),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn events(&self, doc_hash: &str) -> Result<Vec<DocumentEvent>> {
        let rows = sqlx::query(
            "SELECT seq, status, stage, error, at FROM document_events \
             WHERE doc_hash = ? ORDER BY seq",
        )
        .bind(doc_hash)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let (status, stage) = parse_status(row)?;
                Ok(DocumentEvent {
                    seq: row.get("seq"),
                    status,
                    stage,
                    error: row.get("error"),
                    at: row.get("at"),
                })
            })
            .collect()
    }

    async fn tender_documents(&self, org_id: &str, tender_id: &str) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents d LEFT JOIN uploads u ON u.upload_id = d.upload_id \
             WHERE d.org_id = ? AND d.tender_id = ? ORDER BY d.created_at, d.doc_hash",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(tender_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn get_brief(&self, doc_hash: &str, length: BriefLength) -> Result<Option<Brief>> {
        let row = sqlx::query(
            "SELECT brief_json, markdown FROM document_briefs WHERE doc_hash = ? AND length = ?",
        )
        .bind(doc_hash)
        .bind(length.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("brief_json");
        let brief_json: BriefJson =
            serde_json::from_str(&json).context("cached brief is not valid JSON")?;
        Ok(Some(Brief {
            brief_json,
            markdown: row.get("markdown"),
        }))
    }

    async fn put_brief(&self, doc_hash: &str, length: BriefLength, brief: &Brief) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_briefs (doc_hash, length, brief_json, markdown, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_hash, length) DO UPDATE SET brief_json = excluded.brief_json,
                                                        markdown = excluded.markdown,
                                                        created_at = excluded.created_at
            "#,
        )
        .bind(doc_hash)
        .bind(length.as_str())
        .bind(serde_json::to_string(&brief.brief_json)?)
        .bind(&brief.markdown)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UploadCatalog for SqliteStore {
    async fn upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        let row = sqlx::query("SELECT * FROM uploads WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(upload_from_row))
    }

    async fn member_lookup(&self, org_id: &str, file_ref: &str) -> Result<MemberLookup> {
        let row = sqlx::query("SELECT * FROM uploads WHERE upload_id = ? OR file_id = ? LIMIT 1")
            .bind(file_ref)
            .bind(file_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row.as_ref().map(upload_from_row) {
            None => MemberLookup::Missing,
            Some(u) if u.org_id.as_deref() == Some(org_id) => MemberLookup::Found(u),
            Some(_) => MemberLookup::Forbidden,
        })
    }

    async fn public_lookup(&self, file_ref: &str) -> Result<Option<UploadRecord>> {
        let row = sqlx::query(
            "SELECT * FROM uploads WHERE (upload_id = ? OR file_id = ?) AND published = 1 LIMIT 1",
        )
        .bind(file_ref)
        .bind(file_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(upload_from_row))
    }
}

#[async_trait]
impl OrgDirectory for SqliteStore {
    async fn org(&self, org_id: &str) -> Result<Option<OrgAccount>> {
        let row = sqlx::query("SELECT org_id, tier, trial_ends_at FROM orgs WHERE org_id = ?")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row.get("tier");
        let tier = PlanTier::parse(&tier).ok_or_else(|| anyhow!("unknown tier '{}'", tier))?;
        let trial_ends_at: Option<i64> = row.get("trial_ends_at");
        Ok(Some(OrgAccount {
            org_id: row.get("org_id"),
            tier,
            trial_ends_at: trial_ends_at.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        }))
    }
}

fn counter_column(counter: Counter) -> &'static str {
    match counter {
        Counter::Chats => "used_chats",
        Counter::Briefs => "used_briefs",
    }
}

/// Apply one action inside `tx`. Returns false when its ceiling is hit.
async fn apply_action(
    tx: &mut Transaction<'_, Sqlite>,
    org_id: &str,
    action: &LedgerAction,
) -> Result<bool> {
    let affected = match action {
        LedgerAction::IncrementTender {
            tender_id,
            counter,
            ceiling,
        } => {
            sqlx::query("INSERT OR IGNORE INTO org_tender_usage (org_id, tender_id) VALUES (?, ?)")
                .bind(org_id)
                .bind(tender_id)
                .execute(&mut **tx)
                .await?;
            let col = counter_column(*counter);
            let sql = format!(
                "UPDATE org_tender_usage SET {col} = {col} + 1 \
                 WHERE org_id = ? AND tender_id = ? AND (? IS NULL OR {col} < ?)"
            );
            sqlx::query(&sql)
                .bind(org_id)
                .bind(tender_id)
                .bind(ceiling)
                .bind(ceiling)
                .execute(&mut **tx)
                .await?
                .rows_affected()
        }
        LedgerAction::IncrementMonthly {
            period,
            counter,
            ceiling,
        } => {
            sqlx::query("INSERT OR IGNORE INTO org_monthly_usage (org_id, period) VALUES (?, ?)")
                .bind(org_id)
                .bind(period)
                .execute(&mut **tx)
                .await?;
            let col = counter_column(*counter);
            let sql = format!(
                "UPDATE org_monthly_usage SET {col} = {col} + 1 \
                 WHERE org_id = ? AND period = ? AND (? IS NULL OR used_chats + used_briefs < ?)"
            );
            sqlx::query(&sql)
                .bind(org_id)
                .bind(period)
                .bind(ceiling)
                .bind(ceiling)
                .execute(&mut **tx)
                .await?
                .rows_affected()
        }
        LedgerAction::DebitTrialCredit { initial } => {
            sqlx::query(
                "INSERT OR IGNORE INTO org_trial_usage (org_id, brief_credits) VALUES (?, ?)",
            )
            .bind(org_id)
            .bind((*initial).max(0))
            .execute(&mut **tx)
            .await?;
            sqlx::query(
                "UPDATE org_trial_usage SET brief_credits = brief_credits - 1 \
                 WHERE org_id = ? AND brief_credits > 0",
            )
            .bind(org_id)
            .execute(&mut **tx)
            .await?
            .rows_affected()
        }
    };
    Ok(affected == 1)
}

#[async_trait]
impl UsageLedger for SqliteStore {
    async fn apply(&self, org_id: &str, actions: &[LedgerAction]) -> Result<Option<usize>> {
        if actions.is_empty() {
            return Ok(None);
        }
        let mut tx = self.pool.begin().await?;
        for (i, action) in actions.iter().enumerate() {
            if !apply_action(&mut tx, org_id, action).await? {
                tx.rollback().await?;
                return Ok(Some(i));
            }
        }
        tx.commit().await?;
        Ok(None)
    }

    async fn release(&self, org_id: &str, actions: &[LedgerAction]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for action in actions {
            match action {
                LedgerAction::IncrementTender {
                    tender_id, counter, ..
                } => {
                    let col = counter_column(*counter);
                    let sql = format!(
                        "UPDATE org_tender_usage SET {col} = MAX({col} - 1, 0) \
                         WHERE org_id = ? AND tender_id = ?"
                    );
                    sqlx::query(&sql)
                        .bind(org_id)
                        .bind(tender_id)
                        .execute(&mut *tx)
                        .await?;
                }
                LedgerAction::IncrementMonthly {
                    period, counter, ..
                } => {
                    let col = counter_column(*counter);
                    let sql = format!(
                        "UPDATE org_monthly_usage SET {col} = MAX({col} - 1, 0) \
                         WHERE org_id = ? AND period = ?"
                    );
                    sqlx::query(&sql)
                        .bind(org_id)
                        .bind(period)
                        .execute(&mut *tx)
                        .await?;
                }
                LedgerAction::DebitTrialCredit { initial } => {
                    sqlx::query(
                        "UPDATE org_trial_usage SET brief_credits = MIN(brief_credits + 1, ?) \
                         WHERE org_id = ?",
                    )
                    .bind(initial)
                    .bind(org_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self, org_id: &str, tender_id: &str, period: &str) -> Result<UsageSnapshot> {
        let tender = sqlx::query(
            "SELECT used_chats, used_briefs FROM org_tender_usage \
             WHERE org_id = ? AND tender_id = ?",
        )
        .bind(org_id)
        .bind(tender_id)
        .fetch_optional(&self.pool)
        .await?;
        let monthly = sqlx::query(
            "SELECT used_chats, used_briefs FROM org_monthly_usage WHERE org_id = ? AND period = ?",
        )
        .bind(org_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;
        let credits: Option<i64> =
            sqlx::query_scalar("SELECT brief_credits FROM org_trial_usage WHERE org_id = ?")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        let pair = |row: Option<SqliteRow>| -> (i64, i64) {
            row.map(|r| (r.get("used_chats"), r.get("used_briefs")))
                .unwrap_or((0, 0))
        };
        let (tender_chats, tender_briefs) = pair(tender);
        let (monthly_chats, monthly_briefs) = pair(monthly);
        Ok(UsageSnapshot {
            tender_chats,
            tender_briefs,
            monthly_chats,
            monthly_briefs,
            trial_credits: credits,
        })
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO access_audit \
             (feature, org_id, tender_id, result, reason, resolved_plan, at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.feature.as_str())
        .bind(&event.org_id)
        .bind(&event.tender_id)
        .bind(event.result)
        .bind(event.reason)
        .bind(event.resolved_plan.as_str())
        .bind(event.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
