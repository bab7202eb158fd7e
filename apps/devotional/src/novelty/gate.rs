//! Novelty Gate: the accept/reject decision for a candidate against the ledger.
//!
//! Three independent checks run in a fixed order: title, content, scripture.
//! The first failure short-circuits, so callers always learn exactly which
//! rule tripped and can build a targeted corrective hint.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::artifact::Candidate;
use crate::novelty::ledger::Ledger;

// ────────────────────────────────────────────────────────────────────────────
// Rejection reasons
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateField {
    Title,
    Content,
}

/// Why a candidate was turned away. Surfaced to logs and to the next prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    ExactDuplicate {
        field: DuplicateField,
        matched_date: NaiveDate,
    },
    SimilarTitle {
        score: f64,
        matched_date: NaiveDate,
        matched_title: String,
    },
    SimilarContent {
        score: f64,
        matched_date: NaiveDate,
    },
    RecentScriptureReuse {
        reference: String,
        days_ago: i64,
        last_used: NaiveDate,
    },
}

impl RejectionReason {
    pub fn matched_date(&self) -> NaiveDate {
        match self {
            RejectionReason::ExactDuplicate { matched_date, .. }
            | RejectionReason::SimilarTitle { matched_date, .. }
            | RejectionReason::SimilarContent { matched_date, .. } => *matched_date,
            RejectionReason::RecentScriptureReuse { last_used, .. } => *last_used,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::ExactDuplicate {
                field,
                matched_date,
            } => {
                let field = match field {
                    DuplicateField::Title => "title",
                    DuplicateField::Content => "content",
                };
                write!(f, "exact duplicate {field} of {matched_date}")
            }
            RejectionReason::SimilarTitle {
                score,
                matched_date,
                matched_title,
            } => write!(
                f,
                "title {:.0}% similar to \"{matched_title}\" ({matched_date})",
                score * 100.0
            ),
            RejectionReason::SimilarContent {
                score,
                matched_date,
            } => write!(
                f,
                "content {:.0}% similar to {matched_date}",
                score * 100.0
            ),
            RejectionReason::RecentScriptureReuse {
                reference,
                days_ago,
                last_used,
            } => write!(
                f,
                "scripture {reference} reused after {days_ago} days (last used {last_used})"
            ),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Policy
// ────────────────────────────────────────────────────────────────────────────

/// What to do when a candidate reuses a recent scripture reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScripturePolicy {
    #[default]
    Reject,
    /// Accept the candidate but surface the reuse as a warning.
    Warn,
}

impl FromStr for ScripturePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ScripturePolicy::Reject),
            "warn" => Ok(ScripturePolicy::Warn),
            other => Err(format!("unknown scripture policy '{other}' (expected reject or warn)")),
        }
    }
}

/// Thresholds and windows for the three novelty checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyPolicy {
    /// Title token overlap strictly above this rejects.
    pub title_threshold: f64,
    /// Content token overlap at or above this counts as an exact duplicate.
    pub content_exact_threshold: f64,
    /// Content token overlap strictly above this rejects.
    pub content_overlap_threshold: f64,
    /// Number of most recent entries the content overlap check considers.
    pub content_window: usize,
    pub scripture_lookback_days: i64,
    pub scripture_policy: ScripturePolicy,
}

impl Default for NoveltyPolicy {
    fn default() -> Self {
        Self {
            title_threshold: 0.7,
            content_exact_threshold: 1.0,
            content_overlap_threshold: 0.5,
            content_window: 20,
            scripture_lookback_days: 21,
            scripture_policy: ScripturePolicy::Reject,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gate
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted { warnings: Vec<RejectionReason> },
    Rejected(RejectionReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    pub fn reason(&self) -> Option<&RejectionReason> {
        match self {
            Verdict::Accepted { .. } => None,
            Verdict::Rejected(reason) => Some(reason),
        }
    }
}

/// Runs title → content → scripture checks, stopping at the first failure.
pub fn validate(
    candidate: &Candidate,
    ledger: &Ledger,
    policy: &NoveltyPolicy,
    today: NaiveDate,
) -> Verdict {
    let title = ledger.is_title_novel(&candidate.title, policy.title_threshold);
    if let Some(reason) = title.reason {
        return Verdict::Rejected(reason);
    }

    let content = ledger.is_content_novel(
        &candidate.content,
        policy.content_exact_threshold,
        policy.content_overlap_threshold,
        policy.content_window,
    );
    if let Some(reason) = content.reason {
        return Verdict::Rejected(reason);
    }

    let mut warnings = Vec::new();
    if let Some(reference) = candidate.scripture_reference.as_deref() {
        let scripture = ledger.is_scripture_fresh(reference, today, policy.scripture_lookback_days);
        if let (false, Some(last_used), Some(days_ago)) =
            (scripture.fresh, scripture.last_used, scripture.days_ago)
        {
            let reason = RejectionReason::RecentScriptureReuse {
                reference: reference.trim().to_string(),
                days_ago,
                last_used,
            };
            match policy.scripture_policy {
                ScripturePolicy::Reject => return Verdict::Rejected(reason),
                ScripturePolicy::Warn => warnings.push(reason),
            }
        }
    }

    debug!(
        "Candidate \"{}\" passed novelty checks against {} ledger entries",
        candidate.title,
        ledger.len()
    );
    Verdict::Accepted { warnings }
}
