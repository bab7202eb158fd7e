//! Generation Orchestrator: one run produces at most one devotional.
//!
//! Init loads the ledger and short-circuits when the date already exists.
//! Each attempt builds a prompt from ledger state plus what went wrong last
//! time, asks the provider chain, and runs the novelty gate. When attempts
//! run out (or no provider is configured) the deterministic fallback is
//! persisted instead, so a run always ends with an artifact on disk.

use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::generation::fallback::fallback_candidate;
use crate::generation::parser::{parse_candidate, ParseStage};
use crate::generation::prompts::{
    build_prompt, corrective_hint, PromptContext, DEVOTIONAL_SYSTEM, PROVIDER_FAILURE_HINT,
};
use crate::models::artifact::{Artifact, Provenance};
use crate::novelty::gate::{validate, RejectionReason, Verdict};
use crate::novelty::ledger::{Ledger, LedgerEntry};
use crate::providers::chain::ProviderChain;
use crate::providers::GenerationRequest;
use crate::storage::index;
use crate::storage::store::{ArtifactStore, StoreError};

/// Recent titles and scriptures offered to the model as things to avoid.
const RECENT_TITLE_HINTS: usize = 10;
const RECENT_SCRIPTURE_HINTS: usize = 30;
/// Caps once rejected candidates from this run are added to the hints.
const MAX_TITLE_HINTS: usize = 15;
const MAX_SCRIPTURE_HINTS: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub date: NaiveDate,
    /// Regenerate and overwrite an existing artifact for `date`.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// An artifact for the date already existed; nothing was written.
    Skipped { date: NaiveDate },
    Accepted {
        artifact: Artifact,
        path: PathBuf,
        /// Non-blocking novelty findings (scripture reuse under the warn policy).
        warnings: Vec<RejectionReason>,
    },
    Fallback { artifact: Artifact, path: PathBuf },
}

pub struct Orchestrator {
    config: Config,
    store: ArtifactStore,
    chain: ProviderChain,
}

impl Orchestrator {
    pub fn new(config: Config, store: ArtifactStore, chain: ProviderChain) -> Self {
        Self {
            config,
            store,
            chain,
        }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome, AppError> {
        let RunOptions { date, force } = options;

        if self.store.exists(date) && !force {
            info!("Devotional for {date} already exists. Skipping.");
            return Ok(RunOutcome::Skipped { date });
        }

        let mut ledger = Ledger::load(
            &self.store,
            self.config.ledger_capacity,
            self.config.token_min_len,
        )
        .map_err(AppError::LedgerUnavailable)?;
        if force && ledger.remove_date(date) {
            info!("Force regenerating {date}; its previous entry is excluded from novelty checks");
        }
        if ledger.is_empty() {
            info!("No devotional history found; novelty checks start from scratch");
        }

        if self.chain.is_empty() {
            warn!("No providers configured; using fallback devotional");
            return self.persist_fallback(date, force, &mut ledger, 0);
        }

        let mut avoid_titles = ledger.recent_titles(RECENT_TITLE_HINTS);
        let mut avoid_scriptures = ledger.recent_scriptures(RECENT_SCRIPTURE_HINTS);
        let mut hint: Option<String> = None;
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            info!("Generation attempt {attempt}/{max_attempts} for {date}");

            let ctx = PromptContext {
                avoid_titles: avoid_titles.clone(),
                avoid_scriptures: avoid_scriptures.clone(),
                corrective_hint: hint.take(),
                attempt,
            };
            let request = GenerationRequest {
                system: DEVOTIONAL_SYSTEM.to_string(),
                prompt: build_prompt(date, &ctx),
                temperature: self.config.temperature_for(attempt),
                max_tokens: self.config.max_tokens,
            };

            let generated = match self
                .chain
                .generate_with(&request, |_, text| {
                    parse_candidate(text).map_err(|e| e.to_string())
                })
                .await
            {
                Ok(generated) => generated,
                Err(e) => {
                    warn!("Attempt {attempt}: {e}");
                    hint = Some(PROVIDER_FAILURE_HINT.to_string());
                    continue;
                }
            };

            let parsed = generated.value;
            if parsed.stage == ParseStage::Extracted {
                info!(
                    "Provider {} returned non-conforming output; fields recovered by extraction",
                    generated.provider
                );
            }
            if !parsed.defaulted.is_empty() {
                warn!("Placeholder values used for: {}", parsed.defaulted.join(", "));
            }

            let candidate = parsed.candidate;
            match validate(&candidate, &ledger, &self.config.novelty, date) {
                Verdict::Accepted { warnings } => {
                    for w in &warnings {
                        warn!("Accepted with warning: {w}");
                    }
                    info!(
                        "Candidate \"{}\" from {} accepted on attempt {attempt}",
                        candidate.title, generated.provider
                    );
                    let artifact = Artifact::from_candidate(
                        date,
                        candidate,
                        Provenance::Provider(generated.provider),
                        attempt,
                        parsed.defaulted,
                    );
                    return match self.persist(&artifact, force, &mut ledger)? {
                        Some(path) => Ok(RunOutcome::Accepted {
                            artifact,
                            path,
                            warnings,
                        }),
                        None => Ok(RunOutcome::Skipped { date }),
                    };
                }
                Verdict::Rejected(reason) => {
                    warn!(
                        "Attempt {attempt} rejected \"{}\": {reason}",
                        candidate.title
                    );
                    hint = Some(corrective_hint(&reason));
                    push_capped(&mut avoid_titles, candidate.title, MAX_TITLE_HINTS);
                    if let Some(reference) = candidate.scripture_reference {
                        push_capped(&mut avoid_scriptures, reference, MAX_SCRIPTURE_HINTS);
                    }
                }
            }
        }

        warn!("Could not produce a novel devotional after {max_attempts} attempts; applying fallback");
        self.persist_fallback(date, force, &mut ledger, max_attempts)
    }

    fn persist_fallback(
        &self,
        date: NaiveDate,
        force: bool,
        ledger: &mut Ledger,
        attempts: u32,
    ) -> Result<RunOutcome, AppError> {
        let candidate = fallback_candidate(date, ledger, &self.config.novelty);
        let artifact = Artifact::from_candidate(date, candidate, Provenance::Fallback, attempts, vec![]);
        match self.persist(&artifact, force, ledger)? {
            Some(path) => Ok(RunOutcome::Fallback { artifact, path }),
            None => Ok(RunOutcome::Skipped { date }),
        }
    }

    /// Writes the artifact, records it in the ledger and refreshes the index.
    /// `None` means another run persisted the same date first.
    fn persist(
        &self,
        artifact: &Artifact,
        force: bool,
        ledger: &mut Ledger,
    ) -> Result<Option<PathBuf>, AppError> {
        let path = match self.store.write(artifact, force) {
            Ok(path) => path,
            Err(StoreError::AlreadyExists(date)) => {
                info!("Devotional for {date} was written by a concurrent run. Skipping.");
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to persist devotional for {}: {e}", artifact.date);
                return Err(AppError::Store(e));
            }
        };

        ledger.append(LedgerEntry::from_artifact(artifact, ledger.token_min_len()));

        if let Err(e) = index::refresh(&self.store, &self.config.tracker_path) {
            warn!("Devotional saved but the tracker index was not refreshed: {e}");
        }
        Ok(Some(path))
    }
}

fn push_capped(list: &mut Vec<String>, value: String, cap: usize) {
    list.push(value);
    if list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::Candidate;
    use crate::providers::retry::RetryPolicy;
    use crate::providers::{ProviderError, TextProvider};
    use crate::storage::index::TrackerIndex;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Replays scripted responses, repeating the last one, and records requests.
    struct Scripted {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        last: Mutex<Option<Result<String, ProviderError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextProvider for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            last.clone()
                .unwrap_or(Err(ProviderError::Unavailable("no script".into())))
        }
    }

    /// Persists a competing artifact for the date mid-generation.
    struct Racing {
        store: ArtifactStore,
        date: NaiveDate,
        reply: String,
    }

    #[async_trait]
    impl TextProvider for Racing {
        fn name(&self) -> &str {
            "racer"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            let winner = artifact(self.date, "The Other Run", "Written by a concurrent run.");
            self.store
                .write(&winner, false)
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
            Ok(self.reply.clone())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        config: Config,
        store: ArtifactStore,
    }

    fn fixture(extra: &[(&str, &str)]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("devotionals");
        let tracker = tmp.path().join("content_tracker.json");
        let mut vars: HashMap<String, String> = HashMap::from([
            ("DEVOTIONAL_DIR".to_string(), dir.display().to_string()),
            ("TRACKER_PATH".to_string(), tracker.display().to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = Config::from_vars(|k| vars.get(k).cloned()).unwrap();
        let store = ArtifactStore::open(&config.devotional_dir, config.write_markdown).unwrap();
        Fixture {
            _tmp: tmp,
            config,
            store,
        }
    }

    fn orchestrator_with(f: &Fixture, providers: Vec<Arc<dyn TextProvider>>) -> Orchestrator {
        Orchestrator::new(
            f.config.clone(),
            f.store.clone(),
            ProviderChain::new(providers, RetryPolicy::none()),
        )
    }

    fn orchestrator(f: &Fixture, providers: &[&Arc<Scripted>]) -> Orchestrator {
        let providers = providers
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn TextProvider>)
            .collect();
        orchestrator_with(f, providers)
    }

    fn accepted(outcome: RunOutcome) -> (Artifact, Vec<RejectionReason>) {
        match outcome {
            RunOutcome::Accepted {
                artifact, warnings, ..
            } => (artifact, warnings),
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    fn fell_back(outcome: RunOutcome) -> (Artifact, PathBuf) {
        match outcome {
            RunOutcome::Fallback { artifact, path } => (artifact, path),
            other => panic!("expected Fallback, got {other:?}"),
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn artifact(date: NaiveDate, title: &str, content: &str) -> Artifact {
        Artifact::from_candidate(
            date,
            Candidate {
                title: title.to_string(),
                content: content.to_string(),
                scripture_reference: Some("Psalm 19:1".to_string()),
                theme: None,
                questions: vec![],
                prayer: None,
            },
            Provenance::Provider("seed".to_string()),
            1,
            vec![],
        )
    }

    fn reply(title: &str, scripture: &str, content: &str) -> Result<String, ProviderError> {
        Ok(serde_json::json!({
            "title": title,
            "scriptureReference": scripture,
            "content": content,
            "questions": ["What stirred in you?"],
            "prayer": "Amen.",
            "theme": "wonder",
        })
        .to_string())
    }

    const FRESH: &str = "Orion strides across winter darkness while hunters sleep, \
                         reminding watchers that patient faithfulness outlasts restless striving.";
    const SEEDED: &str = "Crickets hum beneath summer constellations as farmers rest \
                          after harvest labor, trusting rain and sunshine to their Maker.";

    #[tokio::test]
    async fn test_accepts_novel_candidate_and_writes_everything() {
        let f = fixture(&[]);
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);
        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();

        let path = match &outcome {
            RunOutcome::Accepted { path, .. } => path.clone(),
            other => panic!("expected Accepted, got {other:?}"),
        };
        let (artifact, warnings) = accepted(outcome);
        assert_eq!(artifact.title, "Orion's Patience");
        assert_eq!(artifact.provenance, Provenance::Provider("groq".into()));
        assert!(!artifact.is_fallback);
        assert_eq!(artifact.attempts, 1);
        assert!(warnings.is_empty());
        assert_eq!(path, f.store.path_for(date(16)));
        assert_eq!(f.store.read(date(16)).unwrap(), artifact);
        assert!(f.store.markdown_path_for(date(16)).is_file());

        let index = TrackerIndex::read(&f.config.tracker_path).unwrap();
        assert_eq!(index.count, 1);

        let requests = p.requests();
        assert_eq!(requests.len(), 1);
        assert!((requests[0].temperature - 0.95).abs() < 1e-6);
        assert_eq!(requests[0].max_tokens, 900);
    }

    #[tokio::test]
    async fn test_existing_date_is_a_no_op() {
        let f = fixture(&[]);
        f.store.write(&artifact(date(16), "Already Here", SEEDED), false).unwrap();
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Skipped { date: date(16) });
        assert_eq!(p.calls(), 0);
        assert_eq!(f.store.read(date(16)).unwrap().title, "Already Here");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let f = fixture(&[]);
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);
        let orch = orchestrator(&f, &[&p]);
        let opts = RunOptions {
            date: date(16),
            force: false,
        };

        assert!(matches!(orch.run(opts).await.unwrap(), RunOutcome::Accepted { .. }));
        assert_eq!(orch.run(opts).await.unwrap(), RunOutcome::Skipped { date: date(16) });
        assert_eq!(p.calls(), 1);
        assert_eq!(f.store.list_dates().unwrap(), vec![date(16)]);
    }

    #[tokio::test]
    async fn test_duplicates_exhaust_attempts_then_fall_back() {
        let f = fixture(&[]);
        f.store.write(&artifact(date(10), "Summer Crickets", SEEDED), false).unwrap();
        let p = Scripted::new("groq", vec![reply("Summer Crickets", "Job 38:31", SEEDED)]);

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();

        let (artifact, _) = fell_back(outcome);
        assert!(artifact.is_fallback);
        assert_eq!(artifact.provenance, Provenance::Fallback);
        assert_eq!(artifact.attempts, 3);
        assert_eq!(p.calls(), 3);
        assert_eq!(f.store.read(date(16)).unwrap(), artifact);
    }

    #[tokio::test]
    async fn test_rejection_feeds_corrective_hint_and_rising_temperature() {
        let f = fixture(&[]);
        f.store.write(&artifact(date(10), "Summer Crickets", SEEDED), false).unwrap();
        let p = Scripted::new(
            "groq",
            vec![
                reply("Crickets of Summer", "Job 38:31", FRESH),
                reply("Orion's Patience", "Job 38:31", FRESH),
            ],
        );

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        let (artifact, _) = accepted(outcome);
        assert_eq!(artifact.attempts, 2);

        let requests = p.requests();
        assert!(!requests[0].prompt.contains("ATTEMPT #"));
        assert!(requests[0].prompt.contains("- \"Summer Crickets\""));
        assert!(requests[1]
            .prompt
            .contains("Your title was too similar to a previous one (\"Summer Crickets\")"));
        assert!(requests[1].prompt.contains("- \"Crickets of Summer\""));
        assert!(requests[1].temperature > requests[0].temperature);
    }

    #[tokio::test]
    async fn test_recent_scripture_reuse_is_rejected() {
        let f = fixture(&[("MAX_ATTEMPTS", "1")]);
        f.store.write(&artifact(date(10), "Summer Crickets", SEEDED), false).unwrap();
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Psalm 19:1", FRESH)]);

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Fallback { .. }));
    }

    #[tokio::test]
    async fn test_warn_policy_accepts_scripture_reuse() {
        let f = fixture(&[("SCRIPTURE_REUSE_POLICY", "warn")]);
        f.store.write(&artifact(date(10), "Summer Crickets", SEEDED), false).unwrap();
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Psalm 19:1", FRESH)]);

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        let (_, warnings) = accepted(outcome);
        assert!(matches!(
            warnings.as_slice(),
            [RejectionReason::RecentScriptureReuse { days_ago: 6, .. }]
        ));
    }

    #[tokio::test]
    async fn test_failover_records_second_provider() {
        let f = fixture(&[]);
        let a = Scripted::new(
            "groq",
            vec![Err(ProviderError::Http {
                status: 401,
                message: "bad key".into(),
            })],
        );
        let b = Scripted::new("openai", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);

        let outcome = orchestrator(&f, &[&a, &b])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        let (artifact, _) = accepted(outcome);
        assert_eq!(artifact.provenance, Provenance::Provider("openai".into()));
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_unusable_output_counts_as_provider_failure() {
        let f = fixture(&[]);
        let a = Scripted::new("groq", vec![Ok("{\"title\": \"Trunc".into())]);
        let b = Scripted::new("openai", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);

        let outcome = orchestrator(&f, &[&a, &b])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        let (artifact, _) = accepted(outcome);
        assert_eq!(artifact.provenance.to_string(), "provider:openai");
    }

    #[tokio::test]
    async fn test_salvageable_json_is_accepted_without_failover() {
        let f = fixture(&[]);
        let raw = format!(
            "{{\"title\": \"Orion's Patience\", \"scriptureReference\": \"Job 38:31\",\n\
             \"content\": \"{}\nKeep watch.\",}}",
            FRESH
        );
        let a = Scripted::new("groq", vec![Ok(raw)]);
        let b = Scripted::new("openai", vec![reply("Unused", "Psalm 1:1", SEEDED)]);

        let outcome = orchestrator(&f, &[&a, &b])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        let (artifact, _) = accepted(outcome);
        assert_eq!(artifact.provenance.to_string(), "provider:groq");
        assert_eq!(artifact.title, "Orion's Patience");
        assert!(artifact.content.ends_with("\nKeep watch."));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_providers_failing_every_attempt_falls_back() {
        let f = fixture(&[]);
        let a = Scripted::new("groq", vec![Err(ProviderError::EmptyResponse)]);

        let outcome = orchestrator(&f, &[&a])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Fallback { .. }));
        assert_eq!(a.calls(), 3);
        assert!(a.requests()[1]
            .prompt
            .contains("The previous response could not be used."));
    }

    #[tokio::test]
    async fn test_zero_providers_goes_straight_to_fallback() {
        let f = fixture(&[]);
        let outcome = orchestrator(&f, &[])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();

        let (artifact, path) = fell_back(outcome);
        assert_eq!(artifact.attempts, 0);
        assert!(path.is_file());
        assert_eq!(
            TrackerIndex::read(&f.config.tracker_path).unwrap().count,
            1
        );
    }

    #[tokio::test]
    async fn test_force_replaces_and_ignores_own_previous_entry() {
        let f = fixture(&[]);
        f.store.write(&artifact(date(16), "Orion's Patience", FRESH), false).unwrap();
        let p = Scripted::new("groq", vec![reply("Orion's Patience", "Job 38:31", FRESH)]);

        let outcome = orchestrator(&f, &[&p])
            .run(RunOptions {
                date: date(16),
                force: true,
            })
            .await
            .unwrap();
        let (artifact, _) = accepted(outcome);
        assert_eq!(artifact.provenance.to_string(), "provider:groq");
        assert_eq!(f.store.read(date(16)).unwrap().id, artifact.id);
    }

    #[tokio::test]
    async fn test_concurrent_writer_wins_and_run_reports_skipped() {
        let f = fixture(&[]);
        let racer: Arc<dyn TextProvider> = Arc::new(Racing {
            store: f.store.clone(),
            date: date(16),
            reply: reply("Orion's Patience", "Job 38:31", FRESH).unwrap(),
        });

        let outcome = orchestrator_with(&f, vec![racer])
            .run(RunOptions {
                date: date(16),
                force: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Skipped { date: date(16) });
        assert_eq!(f.store.read(date(16)).unwrap().title, "The Other Run");
    }

    #[test]
    fn test_push_capped_drops_oldest() {
        let mut list: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        push_capped(&mut list, "3".into(), 3);
        assert_eq!(list, vec!["1", "2", "3"]);
    }
}
