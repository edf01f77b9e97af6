//! Entitlement gate service.
//!
//! Wires the pure policy in [`tender_index_core::gate`] to the org
//! directory, the usage ledger and the audit sink. A request is allowed
//! only if the policy allows it *and* the ledger applied every metered
//! action in one atomic step.
//!
//! Every decision is logged on the `audit` tracing target and persisted
//! through the [`AuditSink`].

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use tender_index_core::gate::{
    billing_period, evaluate, AccessContext, AuditEvent, Grant, PlanError,
};
use tender_index_core::models::{OrgAccount, UsageSnapshot};
use tender_index_core::plan::{Feature, PlanMatrix};
use tender_index_core::store::{AuditSink, OrgDirectory, UsageLedger};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Denied(#[from] PlanError),
    #[error("unknown organization: {0}")]
    UnknownOrg(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct Gate {
    orgs: Arc<dyn OrgDirectory>,
    ledger: Arc<dyn UsageLedger>,
    audit: Arc<dyn AuditSink>,
    matrix: Arc<PlanMatrix>,
}

impl Gate {
    pub fn new(
        orgs: Arc<dyn OrgDirectory>,
        ledger: Arc<dyn UsageLedger>,
        audit: Arc<dyn AuditSink>,
        matrix: PlanMatrix,
    ) -> Self {
        Self {
            orgs,
            ledger,
            audit,
            matrix: Arc::new(matrix),
        }
    }

    pub async fn enforce_access(
        &self,
        org_id: &str,
        feature: Feature,
        ctx: &AccessContext,
    ) -> Result<Grant, GateError> {
        self.enforce_access_at(org_id, feature, ctx, Utc::now()).await
    }

    /// [`enforce_access`](Self::enforce_access) against an explicit clock.
    pub async fn enforce_access_at(
        &self,
        org_id: &str,
        feature: Feature,
        ctx: &AccessContext,
        now: DateTime<Utc>,
    ) -> Result<Grant, GateError> {
        let org = self
            .orgs
            .org(org_id)
            .await?
            .ok_or_else(|| GateError::UnknownOrg(org_id.to_string()))?;

        let decision = match evaluate(&org, self.matrix.spec(org.tier), feature, ctx, now) {
            Ok(actions) => match self.ledger.apply(org_id, &actions).await? {
                None => Ok(actions),
                Some(i) => Err(actions[i].denial()),
            },
            Err(denied) => Err(denied),
        };

        self.audit(&org, feature, ctx, decision.as_ref().map(|_| ()).map_err(|e| *e), now)
            .await;

        let actions = decision?;
        Ok(Grant {
            plan: org.tier,
            actions,
        })
    }

    async fn audit(
        &self,
        org: &OrgAccount,
        feature: Feature,
        ctx: &AccessContext,
        outcome: Result<(), PlanError>,
        now: DateTime<Utc>,
    ) {
        let event = AuditEvent::new(org, feature, ctx, outcome, now);
        info!(
            target: "audit",
            feature = feature.as_str(),
            org_id = %event.org_id,
            tender_id = ?event.tender_id,
            result = event.result,
            reason = event.reason,
            resolved_plan = event.resolved_plan.as_str(),
            "access decision"
        );
        if let Err(e) = self.audit.record(&event).await {
            warn!(org_id = %event.org_id, error = %e, "failed to persist audit event");
        }
    }

    /// Undo a grant's ledger mutations.
    pub async fn release(&self, org_id: &str, grant: &Grant) -> anyhow::Result<()> {
        if grant.actions.is_empty() {
            return Ok(());
        }
        self.ledger.release(org_id, &grant.actions).await
    }

    /// Enforce, run `op`, and release the grant if `op` fails, so usage is
    /// only counted for operations that succeeded.
    pub async fn metered<T, E, Fut>(
        &self,
        org_id: &str,
        feature: Feature,
        ctx: &AccessContext,
        op: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<GateError>,
    {
        let grant = self.enforce_access(org_id, feature, ctx).await?;
        match op.await {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(release_err) = self.release(org_id, &grant).await {
                    error!(
                        org_id,
                        feature = feature.as_str(),
                        error = %release_err,
                        "failed to release usage after failed operation"
                    );
                }
                Err(e)
            }
        }
    }

    /// Current counters for one org and tender in this billing period.
    pub async fn usage(&self, org_id: &str, tender_id: &str) -> anyhow::Result<UsageSnapshot> {
        self.ledger
            .snapshot(org_id, tender_id, &billing_period(Utc::now()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tender_index_core::models::PlanTier;
    use tender_index_core::store::memory::InMemoryStore;

    fn gate(store: &Arc<InMemoryStore>) -> Gate {
        Gate::new(
            store.clone(),
            store.clone(),
            store.clone(),
            PlanMatrix::default(),
        )
    }

    fn store_with(
        org_id: &str,
        tier: PlanTier,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.add_org(OrgAccount {
            org_id: org_id.to_string(),
            tier,
            trial_ends_at,
        });
        store
    }

    fn denied(r: Result<Grant, GateError>) -> PlanError {
        match r {
            Err(GateError::Denied(e)) => e,
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_org_is_not_a_plan_error() {
        let store = Arc::new(InMemoryStore::new());
        let r = gate(&store)
            .enforce_access("ghost", Feature::Chat, &AccessContext::tender("t1"))
            .await;
        assert!(matches!(r, Err(GateError::UnknownOrg(_))));
        assert!(store.audit_events().is_empty());
    }

    #[tokio::test]
    async fn expired_trial_outranks_quota() {
        let store = store_with("org-a", PlanTier::Free, Some(Utc::now() - Duration::hours(1)));
        let g = gate(&store);
        let e = denied(
            g.enforce_access("org-a", Feature::Brief, &AccessContext::tender("t1"))
                .await,
        );
        assert_eq!(e, PlanError::TrialExpired);
        let events = store.audit_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, "deny");
        assert_eq!(events[0].reason, "TRIAL_EXPIRED");
    }

    #[tokio::test]
    async fn second_trial_brief_on_same_tender_is_tender_limited() {
        let store = store_with("org-a", PlanTier::Free, None);
        let g = gate(&store);
        let ctx = AccessContext::tender("t1");
        let grant = g.enforce_access("org-a", Feature::Brief, &ctx).await.unwrap();
        assert_eq!(grant.plan, PlanTier::Free);
        assert_eq!(grant.actions.len(), 2);
        let e = denied(g.enforce_access("org-a", Feature::Brief, &ctx).await);
        assert_eq!(e, PlanError::TenderBriefLimit);

        let snap = g.usage("org-a", "t1").await.unwrap();
        assert_eq!(snap.tender_briefs, 1);
        assert_eq!(snap.trial_credits, Some(2));
    }

    #[tokio::test]
    async fn trial_credits_run_out_across_tenders() {
        let store = store_with("org-a", PlanTier::Free, None);
        let g = gate(&store);
        for t in ["t1", "t2", "t3"] {
            g.enforce_access("org-a", Feature::Brief, &AccessContext::tender(t))
                .await
                .unwrap();
        }
        let e = denied(
            g.enforce_access("org-a", Feature::Brief, &AccessContext::tender("t4"))
                .await,
        );
        assert_eq!(e, PlanError::TrialLimit);
        // The rejected request left no trace on the fourth tender.
        assert_eq!(g.usage("org-a", "t4").await.unwrap().tender_briefs, 0);
    }

    #[tokio::test]
    async fn preview_limit_leaves_ledger_alone() {
        let store = store_with("org-a", PlanTier::Free, None);
        let g = gate(&store);
        let ok = g
            .enforce_access("org-a", Feature::PagePreview, &AccessContext::tender("t1").page(5))
            .await
            .unwrap();
        assert!(ok.actions.is_empty());
        let e = denied(
            g.enforce_access("org-a", Feature::PagePreview, &AccessContext::tender("t1").page(6))
                .await,
        );
        assert_eq!(e, PlanError::PreviewLimit);
        assert_eq!(g.usage("org-a", "t1").await.unwrap(), UsageSnapshot::default());
    }

    #[tokio::test]
    async fn metered_failure_returns_the_credit() {
        let store = store_with("org-a", PlanTier::Free, None);
        let g = gate(&store);
        let ctx = AccessContext::tender("t1");

        let r: Result<(), GateError> = g
            .metered("org-a", Feature::Brief, &ctx, async {
                Err(GateError::Internal(anyhow::anyhow!("model unavailable")))
            })
            .await;
        assert!(matches!(r, Err(GateError::Internal(_))));
        let snap = g.usage("org-a", "t1").await.unwrap();
        assert_eq!(snap.tender_briefs, 0);
        assert_eq!(snap.trial_credits, Some(3));

        let r: Result<&str, GateError> = g
            .metered("org-a", Feature::Brief, &ctx, async { Ok("brief") })
            .await;
        assert_eq!(r.unwrap(), "brief");
        assert_eq!(g.usage("org-a", "t1").await.unwrap().trial_credits, Some(2));
    }

    #[tokio::test]
    async fn paid_feature_exclusion_is_not_upgrade() {
        let store = store_with("org-s", PlanTier::Starter, None);
        let g = gate(&store);
        let e = denied(
            g.enforce_access("org-s", Feature::FolderChat, &AccessContext::tender("t1"))
                .await,
        );
        assert_eq!(e, PlanError::FeatureNotAvailable);
        g.enforce_access("org-s", Feature::CoverLetter, &AccessContext::tender("t1"))
            .await
            .unwrap();
        assert_eq!(g.usage("org-s", "t1").await.unwrap().monthly_briefs, 1);
    }
}
