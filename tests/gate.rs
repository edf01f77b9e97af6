//! Entitlement gate over the SQLite ledger: precedence, atomic quota
//! enforcement under concurrency, and compensation on failure.

mod common;

use std::collections::HashMap;

use common::harness;
use tender_index::gate::GateError;
use tender_index_core::gate::{AccessContext, PlanError};
use tender_index_core::models::PlanTier;
use tender_index_core::plan::{Feature, PlanMatrix, PlanSpec};
use tender_index_core::retrieval::BriefLength;

fn free_plan(
    brief_per_tender: Option<i64>,
    briefs_per_trial: Option<i64>,
) -> HashMap<String, PlanSpec> {
    let mut plans = HashMap::new();
    plans.insert(
        "free".to_string(),
        PlanSpec {
            brief_per_tender,
            briefs_per_trial,
            ..PlanMatrix::default().spec(PlanTier::Free).clone()
        },
    );
    plans
}

fn plan_error(err: &anyhow::Error) -> Option<PlanError> {
    match err.downcast_ref::<GateError>() {
        Some(GateError::Denied(e)) => Some(*e),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tender_brief_limit_reported_before_trial_credits() {
    let h = harness(|_| {}).await;
    h.org("org-a", PlanTier::Free).await;
    let resolved = h.ready_document("org-a", "t1").await;
    let s = &h.services;
    let ctx = AccessContext::tender("t1");

    let brief = s
        .gate
        .metered("org-a", Feature::Brief, &ctx, async {
            s.engine
                .brief(&resolved, BriefLength::Medium)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
        .unwrap();
    assert!(!brief.markdown.is_empty());

    let snap = s.gate.usage("org-a", "t1").await.unwrap();
    assert_eq!(snap.tender_briefs, 1);
    assert_eq!(snap.trial_credits, Some(2));

    let err = s
        .gate
        .metered("org-a", Feature::Brief, &ctx, async {
            s.engine
                .brief(&resolved, BriefLength::Medium)
                .await
                .map_err(anyhow::Error::from)
        })
        .await
        .unwrap_err();
    assert_eq!(plan_error(&err), Some(PlanError::TenderBriefLimit));
    assert_eq!(s.gate.usage("org-a", "t1").await.unwrap().trial_credits, Some(2));

    let log = s.store.audit_log("org-a", 10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].1, "deny");
    assert_eq!(log[0].2, "TENDER_BRIEF_LIMIT");
    assert_eq!(log[1].1, "allow");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_briefs_never_exceed_the_tender_limit() {
    const K: i64 = 3;
    let h = harness(|c| c.plans = free_plan(Some(K), Some(50))).await;
    h.org("org-a", PlanTier::Free).await;

    let mut tasks = Vec::new();
    for _ in 0..(K + 1) {
        let gate = h.services.gate.clone();
        tasks.push(tokio::spawn(async move {
            gate.enforce_access("org-a", Feature::Brief, &AccessContext::tender("t1"))
                .await
        }));
    }
    let mut ok = 0;
    let mut limited = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => ok += 1,
            Err(GateError::Denied(PlanError::TenderBriefLimit)) => limited += 1,
            Err(other) => panic!("unexpected: {}", other),
        }
    }
    assert_eq!(ok, K);
    assert_eq!(limited, 1);

    let snap = h.services.gate.usage("org-a", "t1").await.unwrap();
    assert_eq!(snap.tender_briefs, K);
    assert_eq!(snap.trial_credits, Some(50 - K));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trial_credits_floor_at_zero() {
    let h = harness(|c| c.plans = free_plan(None, Some(2))).await;
    h.org("org-a", PlanTier::Free).await;

    let mut tasks = Vec::new();
    for i in 0..6 {
        let gate = h.services.gate.clone();
        tasks.push(tokio::spawn(async move {
            gate.enforce_access(
                "org-a",
                Feature::Brief,
                &AccessContext::tender(format!("t{}", i)),
            )
            .await
        }));
    }
    let mut ok = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => ok += 1,
            Err(GateError::Denied(PlanError::TrialLimit)) => {}
            Err(other) => panic!("unexpected: {}", other),
        }
    }
    assert_eq!(ok, 2);
    assert_eq!(
        h.services.gate.usage("org-a", "t0").await.unwrap().trial_credits,
        Some(0)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_operation_returns_credit_once() {
    let h = harness(|_| {}).await;
    h.org("org-a", PlanTier::Free).await;
    let s = &h.services;
    let ctx = AccessContext::tender("t1");

    // The operation fails after the grant, so the grant is released.
    let err = s
        .gate
        .metered("org-a", Feature::Brief, &ctx, async {
            Err::<(), _>(anyhow::anyhow!("completion provider unavailable"))
        })
        .await
        .unwrap_err();
    assert!(plan_error(&err).is_none());

    let snap = s.gate.usage("org-a", "t1").await.unwrap();
    assert_eq!(snap.tender_briefs, 0);
    assert_eq!(snap.trial_credits, Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paid_tier_counts_chats_and_briefs_against_one_monthly_pool() {
    let h = harness(|c| {
        let mut plans = HashMap::new();
        plans.insert(
            "starter".to_string(),
            PlanSpec {
                ai_monthly_limit: Some(3),
                ..PlanMatrix::default().spec(PlanTier::Starter).clone()
            },
        );
        c.plans = plans;
    })
    .await;
    h.org("org-s", PlanTier::Starter).await;
    let g = &h.services.gate;

    g.enforce_access("org-s", Feature::Chat, &AccessContext::tender("t1"))
        .await
        .unwrap();
    g.enforce_access("org-s", Feature::Brief, &AccessContext::tender("t2"))
        .await
        .unwrap();
    g.enforce_access("org-s", Feature::CoverLetter, &AccessContext::tender("t3"))
        .await
        .unwrap();
    let denied = g
        .enforce_access("org-s", Feature::Chat, &AccessContext::tender("t1"))
        .await;
    assert!(matches!(
        denied,
        Err(GateError::Denied(PlanError::PlanLimitReached))
    ));

    let snap = g.usage("org-s", "t1").await.unwrap();
    assert_eq!(snap.monthly_chats, 1);
    assert_eq!(snap.monthly_briefs, 2);
    assert_eq!(snap.trial_credits, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_org_is_rejected_without_audit() {
    let h = harness(|_| {}).await;
    let r = h
        .services
        .gate
        .enforce_access("ghost", Feature::Chat, &AccessContext::tender("t1"))
        .await;
    assert!(matches!(r, Err(GateError::UnknownOrg(_))));
    assert!(h.services.store.audit_log("ghost", 10).await.unwrap().is_empty());
}
