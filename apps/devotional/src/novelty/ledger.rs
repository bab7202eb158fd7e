//! History Ledger: the bounded, date-ordered record of accepted devotionals.
//!
//! Loaded once per run from the artifact store, mutated in memory, and kept
//! to the most recent `capacity` entries so comparison cost stays bounded and
//! old scripture references become usable again.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::generation::parser::{parse_markdown, ParseError};
use crate::models::artifact::{Artifact, LegacyRecord};
use crate::novelty::fingerprint::{content_hash, jaccard, token_set};
use crate::novelty::gate::{DuplicateField, RejectionReason};
use crate::novelty::normalize::{normalize, normalize_optional};
use crate::storage::store::{ArtifactStore, StoreError};

/// Reduced projection of an artifact, sufficient for novelty checks.
/// Entries are created on acceptance and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    /// Display title, kept for prompt hints.
    pub title: String,
    pub normalized_title: String,
    pub title_tokens: BTreeSet<String>,
    pub content_tokens: BTreeSet<String>,
    pub content_hash: String,
    /// Display reference, kept for prompt hints.
    pub scripture_reference: Option<String>,
    pub normalized_scripture: Option<String>,
    pub theme: Option<String>,
}

impl LedgerEntry {
    pub fn new(
        date: NaiveDate,
        title: &str,
        content: &str,
        scripture_reference: Option<&str>,
        theme: Option<&str>,
        token_min_len: usize,
    ) -> Self {
        let scripture_reference = scripture_reference
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            date,
            title: title.trim().to_string(),
            normalized_title: normalize(title),
            title_tokens: token_set(title, token_min_len),
            content_tokens: token_set(content, token_min_len),
            content_hash: content_hash(content),
            normalized_scripture: normalize_optional(scripture_reference.as_deref()),
            scripture_reference,
            theme: normalize_optional(theme),
        }
    }

    pub fn from_artifact(artifact: &Artifact, token_min_len: usize) -> Self {
        Self::new(
            artifact.date,
            &artifact.title,
            &artifact.content,
            artifact.scripture_reference.as_deref(),
            artifact.theme.as_deref(),
            token_min_len,
        )
    }

    /// Projects an older markdown-only record. A record without a `# Title`
    /// line gets an empty title, which never matches anything.
    pub fn from_legacy(
        date: NaiveDate,
        record: &LegacyRecord,
        token_min_len: usize,
    ) -> Result<Self, ParseError> {
        let parsed = parse_markdown(&record.content_markdown)?;
        let title = if parsed.defaulted.iter().any(|f| f == "title") {
            ""
        } else {
            parsed.candidate.title.as_str()
        };
        Ok(Self::new(
            record.date.unwrap_or(date),
            title,
            &parsed.candidate.content,
            parsed.candidate.scripture_reference.as_deref(),
            parsed.candidate.theme.as_deref(),
            token_min_len,
        ))
    }
}

/// Result of a title or content novelty check.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyCheck {
    pub novel: bool,
    pub reason: Option<RejectionReason>,
    pub matched_date: Option<NaiveDate>,
}

impl NoveltyCheck {
    fn novel() -> Self {
        Self {
            novel: true,
            reason: None,
            matched_date: None,
        }
    }

    fn rejected(reason: RejectionReason) -> Self {
        Self {
            novel: false,
            matched_date: Some(reason.matched_date()),
            reason: Some(reason),
        }
    }
}

/// Result of a scripture recency check.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptureCheck {
    pub fresh: bool,
    pub last_used: Option<NaiveDate>,
    pub days_ago: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    /// Ascending by date; at most one entry per date.
    entries: Vec<LedgerEntry>,
    capacity: usize,
    token_min_len: usize,
}

impl Ledger {
    pub fn new(capacity: usize, token_min_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            token_min_len,
        }
    }

    /// Reads the most recent `capacity` artifacts from the store.
    ///
    /// Records that fail to read or parse are skipped with a warning; only a
    /// failure to list the store at all is an error.
    pub fn load(
        store: &ArtifactStore,
        capacity: usize,
        token_min_len: usize,
    ) -> Result<Self, StoreError> {
        let mut ledger = Self::new(capacity, token_min_len);
        let dates = store.list_dates()?;
        let start = dates.len().saturating_sub(ledger.capacity);

        let mut skipped = 0usize;
        let mut legacy = 0usize;
        for date in &dates[start..] {
            match store.read(*date) {
                Ok(artifact) => ledger.append(LedgerEntry::from_artifact(&artifact, token_min_len)),
                Err(e @ StoreError::Parse { .. }) => {
                    match load_legacy(store, *date, token_min_len) {
                        Some(entry) => {
                            legacy += 1;
                            ledger.append(entry);
                        }
                        None => {
                            skipped += 1;
                            warn!("Skipping unreadable devotional for {date}: {e}");
                        }
                    }
                }
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping unreadable devotional for {date}: {e}");
                }
            }
        }

        info!(
            "Loaded {} recent devotionals into the ledger ({} legacy, {} skipped)",
            ledger.len(),
            legacy,
            skipped
        );
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn token_min_len(&self) -> usize {
        self.token_min_len
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Adds an entry in date order, replacing any entry for the same date,
    /// then drops the oldest entries beyond capacity.
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.retain(|e| e.date != entry.date);
        let position = self.entries.partition_point(|e| e.date < entry.date);
        self.entries.insert(position, entry);

        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    /// Drops the entry for `date`, if present. Used before a forced
    /// regeneration so the old artifact does not block its replacement.
    pub fn remove_date(&mut self, date: NaiveDate) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.date != date);
        before != self.entries.len()
    }

    /// Display titles of the `n` most recent entries that have one, oldest first.
    pub fn recent_titles(&self, n: usize) -> Vec<String> {
        let mut titles: Vec<String> = self
            .entries
            .iter()
            .rev()
            .filter(|e| !e.title.is_empty())
            .map(|e| e.title.clone())
            .take(n)
            .collect();
        titles.reverse();
        titles
    }

    /// Scripture references of the `n` most recent entries that have one, oldest first.
    pub fn recent_scriptures(&self, n: usize) -> Vec<String> {
        let mut refs: Vec<String> = self
            .entries
            .iter()
            .rev()
            .filter_map(|e| e.scripture_reference.clone())
            .take(n)
            .collect();
        refs.reverse();
        refs
    }

    /// Exact normalized match rejects outright; token overlap strictly above
    /// `threshold` rejects as similar. The most recent match wins.
    pub fn is_title_novel(&self, title: &str, threshold: f64) -> NoveltyCheck {
        let normalized = normalize(title);

        if !normalized.is_empty() {
            if let Some(hit) = self
                .entries
                .iter()
                .rev()
                .find(|e| e.normalized_title == normalized)
            {
                return NoveltyCheck::rejected(RejectionReason::ExactDuplicate {
                    field: DuplicateField::Title,
                    matched_date: hit.date,
                });
            }
        }

        let tokens = token_set(title, self.token_min_len);
        for entry in self.entries.iter().rev() {
            let score = jaccard(&tokens, &entry.title_tokens);
            if score > threshold {
                return NoveltyCheck::rejected(RejectionReason::SimilarTitle {
                    score,
                    matched_date: entry.date,
                    matched_title: entry.title.clone(),
                });
            }
        }

        NoveltyCheck::novel()
    }

    /// Hash match against every entry is an exact duplicate. Token overlap is
    /// only compared against the `window` most recent entries: at or above
    /// `exact_threshold` is an exact duplicate, above `overlap_threshold` is similar.
    pub fn is_content_novel(
        &self,
        content: &str,
        exact_threshold: f64,
        overlap_threshold: f64,
        window: usize,
    ) -> NoveltyCheck {
        let hash = content_hash(content);
        if let Some(hit) = self.entries.iter().rev().find(|e| e.content_hash == hash) {
            return NoveltyCheck::rejected(RejectionReason::ExactDuplicate {
                field: DuplicateField::Content,
                matched_date: hit.date,
            });
        }

        let tokens = token_set(content, self.token_min_len);
        if tokens.is_empty() {
            return NoveltyCheck::novel();
        }

        for entry in self.entries.iter().rev().take(window) {
            let score = jaccard(&tokens, &entry.content_tokens);
            if score >= exact_threshold {
                return NoveltyCheck::rejected(RejectionReason::ExactDuplicate {
                    field: DuplicateField::Content,
                    matched_date: entry.date,
                });
            }
            if score > overlap_threshold {
                return NoveltyCheck::rejected(RejectionReason::SimilarContent {
                    score,
                    matched_date: entry.date,
                });
            }
        }

        NoveltyCheck::novel()
    }

    /// A reference is stale when an entry within `lookback_days` of `today`
    /// used the same normalized reference. Blank references are always fresh.
    pub fn is_scripture_fresh(
        &self,
        reference: &str,
        today: NaiveDate,
        lookback_days: i64,
    ) -> ScriptureCheck {
        let fresh = ScriptureCheck {
            fresh: true,
            last_used: None,
            days_ago: None,
        };

        let Some(normalized) = normalize_optional(Some(reference)) else {
            return fresh;
        };

        self.entries
            .iter()
            .rev()
            .filter(|e| e.normalized_scripture.as_deref() == Some(normalized.as_str()))
            .map(|e| (e.date, (today - e.date).num_days().abs()))
            .find(|(_, days)| *days <= lookback_days)
            .map(|(last_used, days_ago)| ScriptureCheck {
                fresh: false,
                last_used: Some(last_used),
                days_ago: Some(days_ago),
            })
            .unwrap_or(fresh)
    }
}

fn load_legacy(store: &ArtifactStore, date: NaiveDate, token_min_len: usize) -> Option<LedgerEntry> {
    let record = store.read_legacy(date).ok()?;
    match LedgerEntry::from_legacy(date, &record, token_min_len) {
        Ok(entry) => {
            debug!("Read {date} from a legacy markdown record");
            Some(entry)
        }
        Err(e) => {
            debug!("Legacy record for {date} has no usable content: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::{Candidate, Provenance};
    use crate::novelty::fingerprint::DEFAULT_TOKEN_MIN_LEN;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn day(days_ago: i64) -> NaiveDate {
        today() - chrono::Duration::days(days_ago)
    }

    fn entry(days_ago: i64, title: &str, content: &str, scripture: Option<&str>) -> LedgerEntry {
        LedgerEntry::new(
            day(days_ago),
            title,
            content,
            scripture,
            Some("Creation"),
            DEFAULT_TOKEN_MIN_LEN,
        )
    }

    #[test]
    fn test_entry_normalizes_fields() {
        let e = entry(0, " Stars of Hope! ", "Body text here", Some("Psalm 19:1"));
        assert_eq!(e.title, "Stars of Hope!");
        assert_eq!(e.normalized_title, "stars of hope");
        assert_eq!(e.normalized_scripture.as_deref(), Some("psalm 19 1"));
        assert_eq!(e.theme.as_deref(), Some("creation"));
    }

    #[test]
    fn test_blank_scripture_is_none() {
        let e = entry(0, "Title", "Body", Some("   "));
        assert_eq!(e.scripture_reference, None);
        assert_eq!(e.normalized_scripture, None);
    }

    #[test]
    fn test_append_keeps_date_order_and_trims_oldest() {
        let mut ledger = Ledger::new(3, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(1, "One", "a", None));
        ledger.append(entry(4, "Four", "b", None));
        ledger.append(entry(2, "Two", "c", None));
        ledger.append(entry(0, "Zero", "d", None));

        assert_eq!(ledger.len(), 3);
        let dates: Vec<NaiveDate> = ledger.entries().iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![day(2), day(1), day(0)]);
    }

    #[test]
    fn test_append_replaces_same_date() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(1, "First", "a", None));
        ledger.append(entry(1, "Second", "b", None));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].title, "Second");
    }

    #[test]
    fn test_remove_date() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(0, "Today", "a", None));
        assert!(ledger.remove_date(today()));
        assert!(!ledger.remove_date(today()));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_recent_titles_and_scriptures() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(3, "Three", "a", Some("Genesis 1:1")));
        ledger.append(entry(2, "Two", "b", None));
        ledger.append(entry(1, "One", "c", Some("Job 38:7")));

        assert_eq!(ledger.recent_titles(2), vec!["Two", "One"]);
        assert_eq!(ledger.recent_titles(10).len(), 3);
        assert_eq!(ledger.recent_scriptures(1), vec!["Job 38:7"]);
        assert_eq!(ledger.recent_scriptures(5), vec!["Genesis 1:1", "Job 38:7"]);
    }

    #[test]
    fn test_title_exact_match_reports_matched_date() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(2, "Stars of Hope", "a", None));
        let check = ledger.is_title_novel("STARS of hope?", 0.7);
        assert!(!check.novel);
        assert_eq!(check.matched_date, Some(day(2)));
    }

    #[test]
    fn test_title_short_words_only_still_exact_matched() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(2, "Joy", "a", None));
        assert!(!ledger.is_title_novel("joy!", 0.7).novel);
        assert!(ledger.is_title_novel("Awe", 0.7).novel);
    }

    #[test]
    fn test_content_overlap_only_within_window() {
        let body = "Constellations wheel across winter skies declaring steadfast promises";
        let mut ledger = Ledger::new(50, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(30, "Old", body, None));
        for i in 0..3 {
            ledger.append(entry(i, &format!("Filler {i}"), "unrelated meadow words", None));
        }
        let near = "Constellations wheel across winter skies declaring steadfast mercies";

        let inside = ledger.is_content_novel(near, 1.0, 0.5, 20);
        assert!(matches!(
            inside.reason,
            Some(RejectionReason::SimilarContent { matched_date, .. }) if matched_date == day(30)
        ));

        let outside = ledger.is_content_novel(near, 1.0, 0.5, 3);
        assert!(outside.novel);
    }

    #[test]
    fn test_content_hash_checked_against_all_entries() {
        let body = "Constellations wheel across winter skies declaring steadfast promises";
        let mut ledger = Ledger::new(50, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(30, "Old", body, None));
        for i in 0..3 {
            ledger.append(entry(i, &format!("Filler {i}"), "unrelated meadow words", None));
        }
        let check = ledger.is_content_novel(body, 1.0, 0.5, 1);
        assert_eq!(
            check.reason,
            Some(RejectionReason::ExactDuplicate {
                field: DuplicateField::Content,
                matched_date: day(30),
            })
        );
    }

    #[test]
    fn test_reordered_content_counts_as_exact_duplicate() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(1, "Old", "morning stars sang together joyfully", None));
        let check = ledger.is_content_novel("together joyfully sang morning stars", 1.0, 0.5, 20);
        assert!(matches!(
            check.reason,
            Some(RejectionReason::ExactDuplicate {
                field: DuplicateField::Content,
                ..
            })
        ));
    }

    #[test]
    fn test_scripture_lookback_boundaries() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(20, "Twenty", "a", Some("Psalm 19:1")));
        let check = ledger.is_scripture_fresh("psalm 19:1", today(), 21);
        assert!(!check.fresh);
        assert_eq!(check.days_ago, Some(20));
        assert_eq!(check.last_used, Some(day(20)));

        let mut older = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        older.append(entry(22, "TwentyTwo", "a", Some("Psalm 19:1")));
        assert!(older.is_scripture_fresh("Psalm 19:1", today(), 21).fresh);
    }

    #[test]
    fn test_blank_scripture_always_fresh() {
        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry(1, "One", "a", Some("John 1:5")));
        assert!(ledger.is_scripture_fresh("", today(), 21).fresh);
        assert!(ledger.is_scripture_fresh(" : ", today(), 21).fresh);
    }

    fn artifact(date: NaiveDate, title: &str) -> Artifact {
        Artifact::from_candidate(
            date,
            Candidate {
                title: title.to_string(),
                content: format!("Reflection for {title}"),
                scripture_reference: None,
                theme: None,
                questions: vec![],
                prayer: None,
            },
            Provenance::Provider("stub".to_string()),
            1,
            vec![],
        )
    }

    #[test]
    fn test_load_skips_corrupt_records_and_caps_window() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(tmp.path(), false).unwrap();
        for i in 0..4 {
            store.write(&artifact(day(i), &format!("Entry {i}")), false).unwrap();
        }
        std::fs::write(tmp.path().join(format!("{}.json", day(5))), "{ not json").unwrap();

        let ledger = Ledger::load(&store, 10, DEFAULT_TOKEN_MIN_LEN).unwrap();
        assert_eq!(ledger.len(), 4);

        let capped = Ledger::load(&store, 2, DEFAULT_TOKEN_MIN_LEN).unwrap();
        assert_eq!(capped.recent_titles(10), vec!["Entry 1", "Entry 0"]);
    }

    #[test]
    fn test_load_reads_legacy_markdown_records() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(tmp.path(), false).unwrap();
        let legacy = serde_json::json!({
            "app": "Our Night Sky",
            "date": day(3).format("%Y-%m-%d").to_string(),
            "provider": "multi-fallback",
            "words": 24,
            "hemisphere": "Northern",
            "content_markdown": "# Stars of Hope\n\n## Scripture\n> Genesis 15:5\n\n## Reflection\nGod brought Abram outside and told him to count the stars.\n\n## Prayer\nLord, keep my hope bright.",
            "generated_at": "2026-10-13T06:00:00.000Z",
            "uniqueness_check": "passed"
        });
        std::fs::write(
            store.path_for(day(3)),
            serde_json::to_string_pretty(&legacy).unwrap(),
        )
        .unwrap();
        store.write(&artifact(day(1), "Newer Entry"), false).unwrap();

        let ledger = Ledger::load(&store, 10, DEFAULT_TOKEN_MIN_LEN).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.recent_titles(10), vec!["Stars of Hope", "Newer Entry"]);

        let check = ledger.is_title_novel("Stars of Hope", 0.7);
        assert!(!check.novel);
        assert_eq!(check.matched_date, Some(day(3)));

        let scripture = ledger.is_scripture_fresh("Genesis 15:5", today(), 21);
        assert!(!scripture.fresh);
        assert_eq!(scripture.days_ago, Some(3));
    }

    #[test]
    fn test_legacy_record_without_title_has_blank_title() {
        let record = LegacyRecord {
            date: None,
            content_markdown: "Just a reflection about the moon.".to_string(),
        };
        let entry = LedgerEntry::from_legacy(day(2), &record, DEFAULT_TOKEN_MIN_LEN).unwrap();
        assert_eq!(entry.date, day(2));
        assert_eq!(entry.title, "");

        let mut ledger = Ledger::new(10, DEFAULT_TOKEN_MIN_LEN);
        ledger.append(entry);
        assert!(ledger.recent_titles(10).is_empty());
        assert!(ledger.is_title_novel("Daily Devotional", 0.7).novel);
    }

    #[test]
    fn test_load_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().join("absent"), false);
        let ledger = Ledger::load(&store, 10, DEFAULT_TOKEN_MIN_LEN).unwrap();
        assert!(ledger.is_empty());
    }
}
