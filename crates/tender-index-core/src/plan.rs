//! Plan-tier feature and limit matrix.
//!
//! Every limit the entitlement gate enforces comes from this table,
//! keyed by [`PlanTier`]. `None` means unlimited (or not applicable to
//! the tier's metering scheme).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::PlanTier;

/// A metered or tier-gated capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Document question answering (`ask`).
    Chat,
    /// Structured tender brief (`brief`).
    Brief,
    CoverLetter,
    /// Chat across a tender's whole folder of files.
    FolderChat,
    /// Viewing a document's pages before purchase.
    PagePreview,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Chat => "chat",
            Feature::Brief => "brief",
            Feature::CoverLetter => "cover_letter",
            Feature::FolderChat => "folder_chat",
            Feature::PagePreview => "page_preview",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Feature::Chat),
            "brief" => Some(Feature::Brief),
            "cover_letter" => Some(Feature::CoverLetter),
            "folder_chat" => Some(Feature::FolderChat),
            "page_preview" => Some(Feature::PagePreview),
            _ => None,
        }
    }
}

/// Limits and inclusions for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub page_limit: Option<i64>,
    #[serde(default)]
    pub chat_per_tender: Option<i64>,
    #[serde(default)]
    pub brief_per_tender: Option<i64>,
    #[serde(default)]
    pub briefs_per_trial: Option<i64>,
    #[serde(default)]
    pub ai_monthly_limit: Option<i64>,
    #[serde(default)]
    pub includes_cover_letter: bool,
    #[serde(default)]
    pub includes_folder_chat: bool,
}

impl PlanSpec {
    pub fn includes(&self, feature: Feature) -> bool {
        match feature {
            Feature::Chat | Feature::Brief | Feature::PagePreview => true,
            Feature::CoverLetter => self.includes_cover_letter,
            Feature::FolderChat => self.includes_folder_chat,
        }
    }
}

/// The full tier -> spec table.
#[derive(Debug, Clone)]
pub struct PlanMatrix {
    specs: HashMap<PlanTier, PlanSpec>,
}

impl PlanMatrix {
    pub fn new(specs: HashMap<PlanTier, PlanSpec>) -> Self {
        Self { specs }
    }

    /// Replace the spec for each tier present in `overrides`.
    pub fn with_overrides(mut self, overrides: HashMap<PlanTier, PlanSpec>) -> Self {
        self.specs.extend(overrides);
        self
    }

    pub fn spec(&self, tier: PlanTier) -> &PlanSpec {
        // `new` callers may omit tiers; the default table is complete.
        self.specs.get(&tier).unwrap_or(&LOCKED)
    }
}

/// Fallback for a tier missing from a custom table: nothing metered is
/// granted beyond the base features and every quota is zero.
static LOCKED: PlanSpec = PlanSpec {
    page_limit: Some(0),
    chat_per_tender: Some(0),
    brief_per_tender: Some(0),
    briefs_per_trial: Some(0),
    ai_monthly_limit: Some(0),
    includes_cover_letter: false,
    includes_folder_chat: false,
};

impl Default for PlanMatrix {
    fn default() -> Self {
        let mut specs = HashMap::new();
        specs.insert(
            PlanTier::Free,
            PlanSpec {
                page_limit: Some(5),
                chat_per_tender: Some(5),
                brief_per_tender: Some(1),
                briefs_per_trial: Some(3),
                ai_monthly_limit: None,
                includes_cover_letter: false,
                includes_folder_chat: false,
            },
        );
        specs.insert(
            PlanTier::Starter,
            PlanSpec {
                page_limit: None,
                chat_per_tender: None,
                brief_per_tender: None,
                briefs_per_trial: None,
                ai_monthly_limit: Some(200),
                includes_cover_letter: true,
                includes_folder_chat: false,
            },
        );
        specs.insert(
            PlanTier::Pro,
            PlanSpec {
                page_limit: None,
                chat_per_tender: None,
                brief_per_tender: None,
                briefs_per_trial: None,
                ai_monthly_limit: Some(1000),
                includes_cover_letter: true,
                includes_folder_chat: true,
            },
        );
        specs.insert(
            PlanTier::Enterprise,
            PlanSpec {
                page_limit: None,
                chat_per_tender: None,
                brief_per_tender: None,
                briefs_per_trial: None,
                ai_monthly_limit: None,
                includes_cover_letter: true,
                includes_folder_chat: true,
            },
        );
        Self { specs }
    }
}
