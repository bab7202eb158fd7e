use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Meteorological season (northern hemisphere) used to decorate prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn for_date(date: NaiveDate) -> Self {
        match date.month() {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
            Season::Winter => "Winter",
        };
        f.write_str(label)
    }
}

/// Where an artifact's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "name", rename_all = "snake_case")]
pub enum Provenance {
    Provider(String),
    Fallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Provider(name) => write!(f, "provider:{name}"),
            Provenance::Fallback => f.write_str("fallback"),
        }
    }
}

/// An in-flight devotional produced by a provider (or the fallback table)
/// that has not yet passed the novelty gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub title: String,
    pub content: String,
    pub scripture_reference: Option<String>,
    pub theme: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    pub prayer: Option<String>,
}

/// One persisted devotional. The date is the unique key.
///
/// CRITICAL: `title` and `content` are never empty in a persisted artifact;
/// the store refuses to write one that violates this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Uuid,
    pub date: NaiveDate,
    pub title: String,
    pub content: String,
    pub scripture_reference: Option<String>,
    pub theme: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    pub prayer: Option<String>,
    pub season: Season,
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub is_fallback: bool,
    /// Fields the parser had to fill with placeholders.
    #[serde(default)]
    pub defaulted_fields: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl Artifact {
    pub fn from_candidate(
        date: NaiveDate,
        candidate: Candidate,
        provenance: Provenance,
        attempts: u32,
        defaulted_fields: Vec<String>,
    ) -> Self {
        let is_fallback = provenance == Provenance::Fallback;
        let word_count = candidate.content.split_whitespace().count();
        Self {
            id: Uuid::new_v4(),
            date,
            title: candidate.title,
            content: candidate.content,
            scripture_reference: candidate.scripture_reference,
            theme: candidate.theme,
            questions: candidate.questions,
            prayer: candidate.prayer,
            season: Season::for_date(date),
            word_count,
            created_at: Utc::now(),
            provenance,
            is_fallback,
            defaulted_fields,
            attempts,
        }
    }

    /// Returns the reason this artifact may not be persisted, if any.
    pub fn persistence_violation(&self) -> Option<&'static str> {
        if self.title.trim().is_empty() {
            Some("title is empty")
        } else if self.content.trim().is_empty() {
            Some("content is empty")
        } else {
            None
        }
    }
}

/// Record shape written by earlier releases of the generator: the whole
/// devotional as one markdown document. Read only, to seed the ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRecord {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub content_markdown: String,
}
