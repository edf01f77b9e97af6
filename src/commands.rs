//! Implementations behind the `tdx` subcommands.
//!
//! Results go to stdout; logs and watch progress go to stderr.

use anyhow::{anyhow, bail, Result};
use chrono::{Duration, Utc};
use std::path::Path;

use tender_index_core::gate::AccessContext;
use tender_index_core::models::{AccessLevel, OrgAccount, PlanTier};
use tender_index_core::plan::Feature;
use tender_index_core::resolver::{resolve, Intent};
use tender_index_core::retrieval::BriefLength;
use tender_index_core::store::DocumentStore;

use crate::config::Config;
use crate::db;
use crate::migrate::run_migrations;
use crate::pipeline::EnsureOptions;
use crate::progress::{self, ProgressMode};
use crate::services::Services;
use crate::upload::{register_file, UploadOptions};

fn access_for(org: Option<&str>) -> AccessLevel {
    org.map(AccessLevel::member).unwrap_or(AccessLevel::Public)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    std::fs::create_dir_all(&config.storage.root)?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_org_set(
    services: &Services,
    org_id: &str,
    tier: &str,
    trial_days: Option<i64>,
) -> Result<()> {
    let tier = PlanTier::parse(tier).ok_or_else(|| anyhow!("unknown plan tier: {}", tier))?;
    let trial_ends_at = match (tier.is_trial(), trial_days) {
        (true, Some(days)) => Some(Utc::now() + Duration::days(days)),
        _ => None,
    };
    services
        .store
        .upsert_org(&OrgAccount {
            org_id: org_id.to_string(),
            tier,
            trial_ends_at,
        })
        .await?;
    println!("org {}  tier {}", org_id, tier.as_str());
    Ok(())
}

pub async fn run_upload(services: &Services, path: &Path, opts: &UploadOptions) -> Result<()> {
    let upload = register_file(services, path, opts).await?;
    println!("upload_id     {}", upload.upload_id);
    println!("file_id       {}", upload.file_id);
    println!("content_type  {}", upload.content_type);
    Ok(())
}

pub async fn run_ingest(services: &Services, upload_id: &str) -> Result<()> {
    match services.pipeline.trigger_ingestion(upload_id).await? {
        None => println!("upload {} skipped (anonymous or not indexable)", upload_id),
        Some(state) => {
            services.pipeline.drain().await;
            let org = services
                .store
                .get_document(&state.doc_hash)
                .await?
                .map(|d| d.org_id);
            report_final(services, &access_for(org.as_deref()), &state.doc_hash).await?;
        }
    }
    Ok(())
}

pub async fn run_ensure(services: &Services, file: &str, org: &str, restart: bool) -> Result<()> {
    let access = AccessLevel::member(org);
    let resolved = resolve(services.store.as_ref(), file, &access, Intent::Write).await?;
    let state = services
        .pipeline
        .ensure_index(
            &resolved,
            EnsureOptions {
                restart_failed: restart,
            },
        )
        .await?;
    println!(
        "doc_hash {}  {}  {}{}",
        state.doc_hash,
        state.status,
        state.stage,
        if state.created { "  (created)" } else { "" }
    );
    services.pipeline.drain().await;
    report_final(services, &access, &state.doc_hash).await
}

async fn report_final(services: &Services, access: &AccessLevel, doc_hash: &str) -> Result<()> {
    let p = progress::progress(services.store.as_ref(), access, doc_hash)
        .await?
        .ok_or_else(|| anyhow!("document not found: {}", doc_hash))?;
    match &p.error {
        Some(err) => println!("doc_hash {}  {}  {}  error: {}", doc_hash, p.status, p.stage, err),
        None => println!("doc_hash {}  {}  {}", doc_hash, p.status, p.stage),
    }
    Ok(())
}

pub async fn run_progress(
    services: &Services,
    doc_hash: &str,
    org: Option<&str>,
    watch: bool,
    json: bool,
) -> Result<()> {
    let access = access_for(org);
    if watch {
        let mode = if json {
            ProgressMode::Json
        } else {
            ProgressMode::default_for_tty()
        };
        let reporter = mode.reporter();
        let last = progress::watch(
            services.store.as_ref(),
            &access,
            doc_hash,
            services.config.pipeline.poll_interval(),
            reporter.as_ref(),
        )
        .await?;
        return print_json(&last);
    }
    let p = progress::progress(services.store.as_ref(), &access, doc_hash)
        .await?
        .ok_or_else(|| anyhow!("document not found: {}", doc_hash))?;
    print_json(&p)
}

pub async fn run_history(services: &Services, doc_hash: &str, org: Option<&str>) -> Result<()> {
    let events = progress::history(services.store.as_ref(), &access_for(org), doc_hash)
        .await?
        .ok_or_else(|| anyhow!("document not found: {}", doc_hash))?;
    for e in events {
        let err = e.error.map(|m| format!("  error: {}", m)).unwrap_or_default();
        println!(
            "{:>3}  {:<10}  {:<8}  {}{}",
            e.seq,
            e.status.as_str(),
            e.stage.as_str(),
            e.at,
            err
        );
    }
    Ok(())
}

pub async fn run_tender(services: &Services, tender_id: &str, org: &str) -> Result<()> {
    let summary = progress::tender_summary(services.store.as_ref(), org, tender_id).await?;
    print_json(&summary)
}

pub async fn run_ask(services: &Services, file: &str, question: &str, org: &str) -> Result<()> {
    let access = AccessLevel::member(org);
    let resolved = resolve(services.store.as_ref(), file, &access, Intent::Read).await?;
    services.engine.require_ready(&resolved).await?;
    let ctx = AccessContext::tender(resolved.tender_id.clone());
    let answer = services
        .gate
        .metered(org, Feature::Chat, &ctx, async {
            services
                .engine
                .ask(&resolved, question)
                .await
                .map_err(anyhow::Error::from)
        })
        .await?;

    println!("{}", answer.answer);
    for c in &answer.citations {
        match c.page {
            Some(page) => println!("  [{} p.{}]", c.doc_name, page),
            None => println!("  [{}]", c.doc_name),
        }
    }
    Ok(())
}

pub async fn run_brief(
    services: &Services,
    file: &str,
    length: &str,
    org: &str,
    json: bool,
) -> Result<()> {
    let Some(length) = BriefLength::parse(length) else {
        bail!("unknown brief length: {} (short, medium, long)", length);
    };
    let access = AccessLevel::member(org);
    let resolved = resolve(services.store.as_ref(), file, &access, Intent::Read).await?;
    services.engine.require_ready(&resolved).await?;
    let ctx = AccessContext::tender(resolved.tender_id.clone());
    let brief = services
        .gate
        .metered(org, Feature::Brief, &ctx, async {
            services
                .engine
                .brief(&resolved, length)
                .await
                .map_err(anyhow::Error::from)
        })
        .await?;

    if json {
        print_json(&brief.brief_json)
    } else {
        print!("{}", brief.markdown);
        Ok(())
    }
}

pub async fn run_usage(services: &Services, org: &str, tender_id: &str, audit: bool) -> Result<()> {
    let snapshot = services.gate.usage(org, tender_id).await?;
    print_json(&snapshot)?;
    if audit {
        for (feature, result, reason, at) in services.store.audit_log(org, 20).await? {
            println!("{}  {:<12}  {:<5}  {}", at, feature, result, reason);
        }
    }
    Ok(())
}
