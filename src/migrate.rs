use anyhow::Result;
use sqlx::SqlitePool;

/// Idempotent schema setup. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Upload records as the transport layer registers them
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            upload_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL UNIQUE,
            org_id TEXT,
            tender_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            content_sha256 TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per doc_hash; the primary key is the dedup point
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_hash TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            tender_id TEXT NOT NULL,
            upload_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            status TEXT NOT NULL,
            stage TEXT NOT NULL,
            error TEXT,
            page_count INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_events (
            doc_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            status TEXT NOT NULL,
            stage TEXT NOT NULL,
            error TEXT,
            at INTEGER NOT NULL,
            PRIMARY KEY (doc_hash, seq),
            FOREIGN KEY (doc_hash) REFERENCES documents(doc_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            doc_hash TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            page INTEGER,
            byte_offset INTEGER NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(doc_hash, chunk_index),
            FOREIGN KEY (doc_hash) REFERENCES documents(doc_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            doc_hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_briefs (
            doc_hash TEXT NOT NULL,
            length TEXT NOT NULL,
            brief_json TEXT NOT NULL,
            markdown TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (doc_hash, length),
            FOREIGN KEY (doc_hash) REFERENCES documents(doc_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orgs (
            org_id TEXT PRIMARY KEY,
            tier TEXT NOT NULL,
            trial_ends_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Usage ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS org_tender_usage (
            org_id TEXT NOT NULL,
            tender_id TEXT NOT NULL,
            used_chats INTEGER NOT NULL DEFAULT 0,
            used_briefs INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (org_id, tender_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS org_monthly_usage (
            org_id TEXT NOT NULL,
            period TEXT NOT NULL,
            used_chats INTEGER NOT NULL DEFAULT 0,
            used_briefs INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (org_id, period)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS org_trial_usage (
            org_id TEXT PRIMARY KEY,
            brief_credits INTEGER NOT NULL CHECK (brief_credits >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS access_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feature TEXT NOT NULL,
            org_id TEXT NOT NULL,
            tender_id TEXT,
            result TEXT NOT NULL,
            reason TEXT NOT NULL,
            resolved_plan TEXT NOT NULL,
            at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_tender ON documents(org_id, tender_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_hash ON chunks(doc_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc_hash ON chunk_vectors(doc_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_org ON access_audit(org_id, at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
