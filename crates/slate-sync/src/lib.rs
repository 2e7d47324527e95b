//! Reconciliation runs: scaffold game files for matched intents and prompt for empty ones.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slate_core::{
    match_event, CanonicalEvent, CompletionState, FileIdentity, IntendedEvent, IntendedEventEntry,
    TeamPair, ToleranceWindow,
};
use slate_feed::{
    load_canonical_events, load_intended_events, EventFeed, SavedFeed, ScoresFeed,
};
use slate_storage::{
    classify, replace_atomically, GameStore, HttpClientConfig, HttpFetcher, ScaffoldOutcome,
};
use strsim::jaro_winkler;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "slate-sync";

pub const DEFAULT_CONFIG_FILE: &str = "slate.yaml";
pub const DEFAULT_CONTENT_TEMPLATE: &str = include_str!("../../../templates/game_content.md");

const NEAR_MISS_THRESHOLD: f64 = 0.9;

/// Optional settings read from `slate.yaml`. Environment variables take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub my_events: Option<PathBuf>,
    pub events: Option<PathBuf>,
    pub sport_key: Option<String>,
    pub days_from: Option<u32>,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub feed_base_url: Option<String>,
    pub prompt_template: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SlateConfig {
    pub data_dir: PathBuf,
    pub my_events: Option<PathBuf>,
    pub events: Option<PathBuf>,
    pub odds_api_key: Option<String>,
    pub sport_key: String,
    pub days_from: u32,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub feed_base_url: String,
    pub prompt_template: Option<PathBuf>,
}

impl SlateConfig {
    pub fn from_env() -> Self {
        Self::resolve(FileConfig::default(), |key| std::env::var(key).ok())
    }

    /// Layer the environment over `config_file`, or over `./slate.yaml` when it exists.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = match config_file {
            Some(path) => FileConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                FileConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => return Ok(Self::from_env()),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        Self {
            data_dir: env("SLATE_DATA_DIR")
                .map(PathBuf::from)
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from("./data")),
            my_events: env("SLATE_MY_EVENTS").map(PathBuf::from).or(file.my_events),
            events: env("SLATE_EVENTS").map(PathBuf::from).or(file.events),
            odds_api_key: env("ODDS_API_KEY"),
            sport_key: env("SLATE_SPORT_KEY")
                .or(file.sport_key)
                .unwrap_or_else(|| "americanfootball_ncaaf".to_string()),
            days_from: env("DAYS_FROM")
                .and_then(|v| v.parse().ok())
                .or(file.days_from)
                .unwrap_or(3),
            http_timeout_secs: env("SLATE_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(file.http_timeout_secs)
                .unwrap_or(20),
            user_agent: env("SLATE_USER_AGENT")
                .or(file.user_agent)
                .unwrap_or_else(|| "slate-bot/0.1".to_string()),
            feed_base_url: env("SLATE_FEED_BASE_URL")
                .or(file.feed_base_url)
                .unwrap_or_else(|| "https://api.the-odds-api.com/v4".to_string()),
            prompt_template: env("SLATE_PROMPT_TEMPLATE")
                .map(PathBuf::from)
                .or(file.prompt_template),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn my_events_path(&self) -> PathBuf {
        self.my_events
            .clone()
            .unwrap_or_else(|| self.data_dir.join("my_events.json"))
    }

    pub fn events_path(&self) -> PathBuf {
        self.events
            .clone()
            .unwrap_or_else(|| self.data_dir.join("events.json"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugCollision {
    pub filename: String,
    pub kept_id: String,
    pub rejected_id: String,
}

/// Per-run bookkeeping. Nothing here outlives a single reconcile call.
#[derive(Debug, Default)]
struct RunLedger {
    claims: BTreeMap<String, String>,
    inspected: BTreeSet<String>,
    processed: BTreeSet<String>,
    collisions: Vec<SlugCollision>,
}

impl RunLedger {
    /// Bind `filename` to `event_id`. Returns false when another event already owns it.
    fn claim(&mut self, filename: &str, event_id: &str) -> bool {
        let kept_id = match self.claims.get(filename) {
            None => {
                self.claims
                    .insert(filename.to_string(), event_id.to_string());
                return true;
            }
            Some(owner) if owner == event_id => return true,
            Some(owner) => owner.clone(),
        };
        self.record_collision(filename, &kept_id, event_id);
        false
    }

    fn record_collision(&mut self, filename: &str, kept_id: &str, rejected_id: &str) {
        let collision = SlugCollision {
            filename: filename.to_string(),
            kept_id: kept_id.to_string(),
            rejected_id: rejected_id.to_string(),
        };
        if self.collisions.contains(&collision) {
            return;
        }
        warn!(
            filename,
            kept_id, rejected_id, "two feed events derive the same game file; keeping the first"
        );
        self.collisions.push(collision);
    }

    fn inspect(&mut self, filename: &str) {
        self.inspected.insert(filename.to_string());
    }

    fn was_inspected(&self, filename: &str) -> bool {
        self.inspected.contains(filename)
    }

    /// True the first time a filename is marked.
    fn mark_processed(&mut self, filename: &str) -> bool {
        self.processed.insert(filename.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrigin {
    IntendedEvent,
    ExistingFile,
}

/// One game file that still needs authored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptWork {
    pub away_team: String,
    pub home_team: String,
    pub event_id: String,
    pub filename: String,
    pub origin: WorkOrigin,
}

impl PromptWork {
    fn new(event: &CanonicalEvent, filename: &str, origin: WorkOrigin) -> Self {
        Self {
            away_team: event.away_team.clone(),
            home_team: event.home_team.clone(),
            event_id: event.id.clone(),
            filename: filename.to_string(),
            origin,
        }
    }
}

pub fn render_prompt(work: &PromptWork, template: &str) -> String {
    let mut out = format!(
        "Following the project instructions, prepare the game file for {} at {}. Use {} for the game_id.\nPaste content into: {}\n",
        work.away_team, work.home_team, work.event_id, work.filename
    );
    let template = template.trim();
    if !template.is_empty() {
        out.push('\n');
        out.push_str(template);
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub malformed_intents: usize,
    pub unmatched_intents: usize,
    pub unparsable_files: usize,
    pub unmatched_files: usize,
    pub unreadable_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub prompts: Vec<PromptWork>,
    pub skips: SkipCounts,
    pub collisions: Vec<SlugCollision>,
}

impl PromptReport {
    pub fn units_of_work(&self) -> usize {
        self.prompts.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaffoldReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub skips: SkipCounts,
    pub collisions: Vec<SlugCollision>,
}

impl ScaffoldReport {
    pub fn units_of_work(&self) -> usize {
        self.created.len()
    }
}

/// Intent matched to a feed event, with the filename it owns this run.
struct ResolvedIntent<'e> {
    event: &'e CanonicalEvent,
    identity: FileIdentity,
    filename: String,
}

/// Closest same-window feed pairing by Jaro-Winkler, when it is close enough to be a likely typo.
fn near_miss<'e>(
    intent: &IntendedEvent,
    canonical: &'e [CanonicalEvent],
) -> Option<(&'e CanonicalEvent, f64)> {
    let wanted = TeamPair::new(&intent.team1, &intent.team2).joined();
    let window = ToleranceWindow::around(&intent.date);
    let best = window
        .candidates(canonical)
        .map(|event| (event, jaro_winkler(&wanted, &TeamPair::of_event(event).joined())))
        .filter(|(_, score)| *score >= NEAR_MISS_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    best
}

/// Drives both reconciliation passes against one game-file directory.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: GameStore,
    template: String,
}

impl Reconciler {
    pub fn new(store: GameStore, template: impl Into<String>) -> Self {
        Self {
            store,
            template: template.into(),
        }
    }

    pub fn from_config(config: &SlateConfig) -> Result<Self> {
        let template = match &config.prompt_template {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading prompt template {}", path.display()))?,
            None => DEFAULT_CONTENT_TEMPLATE.to_string(),
        };
        Ok(Self::new(GameStore::new(config.data_dir.clone()), template))
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    pub fn render(&self, work: &PromptWork) -> String {
        render_prompt(work, &self.template)
    }

    fn resolve_intents<'e>(
        &self,
        intended: &[IntendedEventEntry],
        canonical: &'e [CanonicalEvent],
        ledger: &mut RunLedger,
        skips: &mut SkipCounts,
    ) -> Vec<ResolvedIntent<'e>> {
        let mut resolved = Vec::new();
        for (index, entry) in intended.iter().enumerate() {
            let intent = match entry.validate() {
                Ok(intent) => intent,
                Err(err) => {
                    warn!(index, entry = ?entry, "skipping malformed intended event ({err})");
                    skips.malformed_intents += 1;
                    continue;
                }
            };

            let Some(event) = match_event(&intent, canonical) else {
                skips.unmatched_intents += 1;
                match near_miss(&intent, canonical) {
                    Some((closest, score)) => debug!(
                        date = %intent.date,
                        team1 = %intent.team1,
                        team2 = %intent.team2,
                        closest_id = %closest.id,
                        closest = %format!("{} at {}", closest.away_team, closest.home_team),
                        score,
                        "no feed match; a similar event exists in the window"
                    ),
                    None => debug!(
                        date = %intent.date,
                        team1 = %intent.team1,
                        team2 = %intent.team2,
                        "no feed match yet"
                    ),
                }
                continue;
            };

            let identity = FileIdentity::for_match(event, &intent.date);
            let filename = identity.filename();
            if !ledger.claim(&filename, &event.id) {
                continue;
            }
            resolved.push(ResolvedIntent {
                event,
                identity,
                filename,
            });
        }
        resolved
    }

    /// Create an empty file for every matched intent whose file does not exist yet.
    pub fn scaffold(
        &self,
        intended: &[IntendedEventEntry],
        canonical: &[CanonicalEvent],
    ) -> Result<ScaffoldReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let _span = info_span!("reconcile", %run_id, mode = "scaffold").entered();

        let mut ledger = RunLedger::default();
        let mut skips = SkipCounts::default();
        let mut created = Vec::new();
        let mut existing = Vec::new();

        for resolved in self.resolve_intents(intended, canonical, &mut ledger, &mut skips) {
            if !ledger.mark_processed(&resolved.filename) {
                continue;
            }
            match self.store.scaffold(&resolved.identity)? {
                ScaffoldOutcome::Created => {
                    info!(filename = %resolved.filename, event_id = %resolved.event.id, "created empty game file");
                    created.push(resolved.filename);
                }
                ScaffoldOutcome::AlreadyExists => {
                    debug!(filename = %resolved.filename, "game file exists; leaving it alone");
                    existing.push(resolved.filename);
                }
            }
        }

        Ok(ScaffoldReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            created,
            existing,
            skips,
            collisions: ledger.collisions,
        })
    }

    /// Pass A walks the intents, pass B walks the files already on disk. Each filename yields
    /// at most one prompt per run.
    pub fn prompts(
        &self,
        intended: &[IntendedEventEntry],
        canonical: &[CanonicalEvent],
    ) -> Result<PromptReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let _span = info_span!("reconcile", %run_id, mode = "prompts").entered();

        let mut ledger = RunLedger::default();
        let mut skips = SkipCounts::default();
        let mut prompts = Vec::new();

        for resolved in self.resolve_intents(intended, canonical, &mut ledger, &mut skips) {
            ledger.inspect(&resolved.filename);
            match self.store.classify(&resolved.identity) {
                CompletionState::Empty => {
                    if ledger.mark_processed(&resolved.filename) {
                        prompts.push(PromptWork::new(
                            resolved.event,
                            &resolved.filename,
                            WorkOrigin::IntendedEvent,
                        ));
                    }
                }
                CompletionState::Unreadable => {
                    warn!(filename = %resolved.filename, "cannot inspect game file; skipping");
                    skips.unreadable_files += 1;
                }
                CompletionState::Absent | CompletionState::Populated => {}
            }
        }

        for filename in self.store.list_game_files()? {
            if ledger.was_inspected(&filename) {
                continue;
            }
            ledger.inspect(&filename);

            let Some(identity) = FileIdentity::parse_filename(&filename) else {
                warn!(%filename, "skipping game file with unparsable name");
                skips.unparsable_files += 1;
                continue;
            };

            match classify(&self.store.path_of(&filename)) {
                CompletionState::Empty => {}
                CompletionState::Unreadable => {
                    warn!(%filename, "cannot inspect game file; skipping");
                    skips.unreadable_files += 1;
                    continue;
                }
                CompletionState::Absent | CompletionState::Populated => continue,
            }

            let matches = identity.matching_events(canonical);
            let Some(kept) = matches.first().copied() else {
                debug!(%filename, "no feed event matches this game file");
                skips.unmatched_files += 1;
                continue;
            };
            for other in matches.iter().skip(1).filter(|e| e.id != kept.id) {
                ledger.record_collision(&filename, &kept.id, &other.id);
            }
            if !ledger.claim(&filename, &kept.id) || !ledger.mark_processed(&filename) {
                continue;
            }
            prompts.push(PromptWork::new(kept, &filename, WorkOrigin::ExistingFile));
        }

        Ok(PromptReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            prompts,
            skips,
            collisions: ledger.collisions,
        })
    }
}

/// Both input documents, already split into usable records.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub intended: Vec<IntendedEventEntry>,
    pub canonical: Vec<CanonicalEvent>,
}

pub fn load_inputs(config: &SlateConfig) -> Result<Inputs> {
    let my_events = config.my_events_path();
    let events = config.events_path();
    let intended = load_intended_events(&my_events)
        .with_context(|| format!("loading intended events from {}", my_events.display()))?;
    let load = load_canonical_events(&events)
        .with_context(|| format!("loading feed events from {}", events.display()))?;
    for skipped in &load.skipped {
        warn!(index = skipped.index, reason = %skipped.reason, "skipping feed record");
    }
    info!(
        intended = intended.len(),
        canonical = load.events.len(),
        skipped = load.skipped.len(),
        "loaded inputs"
    );
    Ok(Inputs {
        intended,
        canonical: load.events,
    })
}

pub fn run_scaffold(config: &SlateConfig) -> Result<ScaffoldReport> {
    let inputs = load_inputs(config)?;
    Reconciler::from_config(config)?.scaffold(&inputs.intended, &inputs.canonical)
}

/// Prompts plus the rendered text for each, in emission order.
pub fn run_prompts(config: &SlateConfig) -> Result<(PromptReport, Vec<String>)> {
    let inputs = load_inputs(config)?;
    let reconciler = Reconciler::from_config(config)?;
    let report = reconciler.prompts(&inputs.intended, &inputs.canonical)?;
    let rendered = report.prompts.iter().map(|w| reconciler.render(w)).collect();
    Ok((report, rendered))
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub scaffold: ScaffoldReport,
    pub prompts: PromptReport,
    #[serde(skip)]
    pub rendered: Vec<String>,
}

/// Scaffold then prompt over one load of the inputs. Each phase keeps its own dedup scope.
pub fn run_sync(config: &SlateConfig) -> Result<SyncSummary> {
    let inputs = load_inputs(config)?;
    let reconciler = Reconciler::from_config(config)?;
    let scaffold = reconciler.scaffold(&inputs.intended, &inputs.canonical)?;
    let prompts = reconciler.prompts(&inputs.intended, &inputs.canonical)?;
    let rendered = prompts.prompts.iter().map(|w| reconciler.render(w)).collect();
    Ok(SyncSummary {
        scaffold,
        prompts,
        rendered,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub feed_id: String,
    pub total: usize,
    pub valid: usize,
    pub path: String,
    pub content_hash: String,
    pub bytes: usize,
}

/// Fetch the scores feed (or replay a saved response) and atomically replace the events file.
pub async fn run_fetch(config: &SlateConfig, from_file: Option<PathBuf>) -> Result<FetchSummary> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;
    let feed: Box<dyn EventFeed> = match from_file {
        Some(path) => Box::new(SavedFeed { path }),
        None => Box::new(ScoresFeed::new(
            config.feed_base_url.clone(),
            config.sport_key.clone(),
            config.days_from,
            config.odds_api_key.clone(),
        )?),
    };

    info!(
        feed = feed.feed_id(),
        sport = %config.sport_key,
        days_from = config.days_from,
        "fetching event feed"
    );
    let payload = feed.fetch(&http).await?;
    info!(
        total = payload.total,
        valid = payload.records.len(),
        "feed passed basic validation"
    );

    let target = config.events_path();
    let stored = replace_atomically(&target, &payload.to_pretty_json()?).await?;
    info!(
        path = %stored.path.display(),
        sha256 = %stored.content_hash,
        bytes = stored.byte_size,
        "replaced events file"
    );

    Ok(FetchSummary {
        feed_id: feed.feed_id().to_string(),
        total: payload.total,
        valid: payload.records.len(),
        path: stored.path.display().to_string(),
        content_hash: stored.content_hash,
        bytes: stored.byte_size,
    })
}
