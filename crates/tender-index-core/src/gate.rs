//! Entitlement policy.
//!
//! [`evaluate`] is the pure half of the gate: given an org, its plan and
//! the requested feature it either denies with a [`PlanError`] or returns
//! the ledger mutations that must be applied for the request to proceed.
//! Quota ceilings travel inside the [`LedgerAction`]s, so the ledger can
//! enforce them in the same atomic statement that increments the counter.
//!
//! Precedence, first match wins:
//!
//! 1. trial expired
//! 2. feature not included in the tier
//! 3. numeric quota (per-tender + trial credits, or monthly aggregate)
//! 4. page preview cap (its own axis; no ledger mutation)

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{OrgAccount, PlanTier};
use crate::plan::{Feature, PlanSpec};

/// Typed entitlement denial. Expected control flow, not an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("trial period has ended")]
    TrialExpired,
    #[error("feature is not available on this plan")]
    FeatureNotAvailable,
    #[error("plan usage limit reached")]
    PlanLimitReached,
    #[error("trial brief credits exhausted")]
    TrialLimit,
    #[error("brief limit for this tender reached")]
    TenderBriefLimit,
    #[error("preview page limit reached")]
    PreviewLimit,
    #[error("upgrade required for this feature")]
    UpgradeRequired,
}

impl PlanError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::TrialExpired => "TRIAL_EXPIRED",
            PlanError::FeatureNotAvailable => "FEATURE_NOT_AVAILABLE",
            PlanError::PlanLimitReached => "PLAN_LIMIT_REACHED",
            PlanError::TrialLimit => "TRIAL_LIMIT",
            PlanError::TenderBriefLimit => "TENDER_BRIEF_LIMIT",
            PlanError::PreviewLimit => "PREVIEW_LIMIT",
            PlanError::UpgradeRequired => "UPGRADE_REQUIRED",
        }
    }
}

/// Request context for a gated call.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub tender_id: String,
    /// 1-based page requested, for [`Feature::PagePreview`].
    pub page: Option<i64>,
}

impl AccessContext {
    pub fn tender(tender_id: impl Into<String>) -> Self {
        Self {
            tender_id: tender_id.into(),
            page: None,
        }
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }
}

/// Which counter of a usage row an action touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Chats,
    Briefs,
}

/// One ledger mutation. `ceiling` is enforced atomically by the ledger:
/// the increment applies only while the current value is below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "pool", rename_all = "snake_case")]
pub enum LedgerAction {
    /// Per-org-tender counter.
    IncrementTender {
        tender_id: String,
        counter: Counter,
        ceiling: Option<i64>,
    },
    /// Monthly counter; the ceiling caps chats + briefs together.
    IncrementMonthly {
        period: String,
        counter: Counter,
        ceiling: Option<i64>,
    },
    /// Debit one credit from the shared trial pool, which is created with
    /// `initial` credits on first use.
    DebitTrialCredit { initial: i64 },
}

impl LedgerAction {
    /// The denial reported when this action cannot be applied.
    pub fn denial(&self) -> PlanError {
        match self {
            LedgerAction::IncrementTender {
                counter: Counter::Briefs,
                ..
            } => PlanError::TenderBriefLimit,
            LedgerAction::IncrementTender { .. } => PlanError::PlanLimitReached,
            LedgerAction::IncrementMonthly { .. } => PlanError::PlanLimitReached,
            LedgerAction::DebitTrialCredit { .. } => PlanError::TrialLimit,
        }
    }
}

/// An allow decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub plan: PlanTier,
    pub actions: Vec<LedgerAction>,
}

/// Structured record of one gate decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub feature: Feature,
    pub org_id: String,
    pub tender_id: Option<String>,
    /// `"allow"` or `"deny"`.
    pub result: &'static str,
    /// `"ok"` or a [`PlanError::code`].
    pub reason: &'static str,
    pub resolved_plan: PlanTier,
    pub at: i64,
}

impl AuditEvent {
    pub fn new(
        org: &OrgAccount,
        feature: Feature,
        ctx: &AccessContext,
        outcome: Result<(), PlanError>,
        at: DateTime<Utc>,
    ) -> Self {
        let (result, reason) = match outcome {
            Ok(()) => ("allow", "ok"),
            Err(e) => ("deny", e.code()),
        };
        Self {
            feature,
            org_id: org.org_id.clone(),
            tender_id: Some(ctx.tender_id.clone()),
            result,
            reason,
            resolved_plan: org.tier,
            at: at.timestamp(),
        }
    }
}

/// Billing period key for monthly counters.
pub fn billing_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Evaluate the policy for one request. Returns the ledger actions to
/// apply, in precedence order.
pub fn evaluate(
    org: &OrgAccount,
    spec: &PlanSpec,
    feature: Feature,
    ctx: &AccessContext,
    now: DateTime<Utc>,
) -> Result<Vec<LedgerAction>, PlanError> {
    if org.tier.is_trial() {
        if let Some(ends) = org.trial_ends_at {
            if ends <= now {
                return Err(PlanError::TrialExpired);
            }
        }
    }

    if !spec.includes(feature) {
        return Err(if org.tier.is_trial() {
            PlanError::UpgradeRequired
        } else {
            PlanError::FeatureNotAvailable
        });
    }

    if feature == Feature::PagePreview {
        let page = ctx.page.unwrap_or(1);
        return match spec.page_limit {
            Some(limit) if page > limit => Err(PlanError::PreviewLimit),
            _ => Ok(Vec::new()),
        };
    }

    let counter = match feature {
        Feature::Chat | Feature::FolderChat => Counter::Chats,
        _ => Counter::Briefs,
    };

    if org.tier.is_trial() {
        let ceiling = match counter {
            Counter::Chats => spec.chat_per_tender,
            Counter::Briefs => spec.brief_per_tender,
        };
        let mut actions = vec![LedgerAction::IncrementTender {
            tender_id: ctx.tender_id.clone(),
            counter,
            ceiling,
        }];
        if counter == Counter::Briefs {
            if let Some(initial) = spec.briefs_per_trial {
                actions.push(LedgerAction::DebitTrialCredit { initial });
            }
        }
        Ok(actions)
    } else {
        Ok(vec![LedgerAction::IncrementMonthly {
            period: billing_period(now),
            counter,
            ceiling: spec.ai_monthly_limit,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanMatrix;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    fn org(tier: PlanTier, trial_ends_at: Option<DateTime<Utc>>) -> OrgAccount {
        OrgAccount {
            org_id: "org-1".to_string(),
            tier,
            trial_ends_at,
        }
    }

    #[test]
    fn trial_expiry_wins_over_everything() {
        let m = PlanMatrix::default();
        let o = org(PlanTier::Free, Some(now() - Duration::days(1)));
        let r = evaluate(
            &o,
            m.spec(PlanTier::Free),
            Feature::CoverLetter,
            &AccessContext::tender("t1"),
            now(),
        );
        assert_eq!(r, Err(PlanError::TrialExpired));
    }

    #[test]
    fn expiry_ignored_for_paid_tiers() {
        let m = PlanMatrix::default();
        let o = org(PlanTier::Pro, Some(now() - Duration::days(30)));
        let r = evaluate(
            &o,
            m.spec(PlanTier::Pro),
            Feature::Chat,
            &AccessContext::tender("t1"),
            now(),
        );
        assert!(r.is_ok());
    }

    #[test]
    fn excluded_feature_maps_by_tier() {
        let m = PlanMatrix::default();
        let ctx = AccessContext::tender("t1");
        let free = org(PlanTier::Free, None);
        assert_eq!(
            evaluate(&free, m.spec(PlanTier::Free), Feature::CoverLetter, &ctx, now()),
            Err(PlanError::UpgradeRequired)
        );
        let starter = org(PlanTier::Starter, None);
        assert_eq!(
            evaluate(&starter, m.spec(PlanTier::Starter), Feature::FolderChat, &ctx, now()),
            Err(PlanError::FeatureNotAvailable)
        );
    }

    #[test]
    fn trial_brief_checks_tender_before_credits() {
        let m = PlanMatrix::default();
        let actions = evaluate(
            &org(PlanTier::Free, None),
            m.spec(PlanTier::Free),
            Feature::Brief,
            &AccessContext::tender("t1"),
            now(),
        )
        .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].denial(), PlanError::TenderBriefLimit);
        assert_eq!(actions[1], LedgerAction::DebitTrialCredit { initial: 3 });
    }

    #[test]
    fn trial_chat_is_per_tender_only() {
        let m = PlanMatrix::default();
        let actions = evaluate(
            &org(PlanTier::Free, None),
            m.spec(PlanTier::Free),
            Feature::Chat,
            &AccessContext::tender("t9"),
            now(),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![LedgerAction::IncrementTender {
                tender_id: "t9".to_string(),
                counter: Counter::Chats,
                ceiling: Some(5),
            }]
        );
    }

    #[test]
    fn paid_tiers_meter_monthly() {
        let m = PlanMatrix::default();
        let actions = evaluate(
            &org(PlanTier::Starter, None),
            m.spec(PlanTier::Starter),
            Feature::Brief,
            &AccessContext::tender("t1"),
            now(),
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![LedgerAction::IncrementMonthly {
                period: "2026-03".to_string(),
                counter: Counter::Briefs,
                ceiling: Some(200),
            }]
        );
    }

    #[test]
    fn preview_is_its_own_axis() {
        let m = PlanMatrix::default();
        let free = org(PlanTier::Free, None);
        let spec = m.spec(PlanTier::Free);
        let within = AccessContext::tender("t1").page(5);
        let ok = evaluate(&free, spec, Feature::PagePreview, &within, now());
        assert_eq!(ok, Ok(Vec::new()));
        let beyond = AccessContext::tender("t1").page(6);
        let denied = evaluate(&free, spec, Feature::PagePreview, &beyond, now());
        assert_eq!(denied, Err(PlanError::PreviewLimit));
    }

    #[test]
    fn audit_event_records_reason_code() {
        let o = org(PlanTier::Free, None);
        let ev = AuditEvent::new(
            &o,
            Feature::Brief,
            &AccessContext::tender("t1"),
            Err(PlanError::TenderBriefLimit),
            now(),
        );
        assert_eq!(ev.result, "deny");
        assert_eq!(ev.reason, "TENDER_BRIEF_LIMIT");
        assert_eq!(ev.resolved_plan, PlanTier::Free);
    }
}
