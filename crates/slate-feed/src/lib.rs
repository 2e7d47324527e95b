//! Input documents and event-feed adapters.
//!
//! Whole-document problems (missing file, bad JSON, not an array) are fatal [`InputError`]s.
//! Problems with individual records are reported back to the caller and skipped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use slate_core::{CanonicalEvent, IntendedEventEntry};
use slate_storage::{FetchError, HttpFetcher};
use thiserror::Error;

pub const CRATE_NAME: &str = "slate-feed";

const HOME_KEYS: &[&str] = &["home_team", "home", "homeTeam"];
const AWAY_KEYS: &[&str] = &["away_team", "away", "awayTeam"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("missing input file {}", .path.display())]
    Missing { path: PathBuf },
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", .path.display())]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{} must contain a JSON array", .path.display())]
    NotASequence { path: PathBuf },
}

/// Read `path` and require the document to be a JSON array.
pub fn read_json_array(path: impl AsRef<Path>) -> Result<Vec<JsonValue>, InputError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => InputError::Missing {
            path: path.to_path_buf(),
        },
        _ => InputError::Read {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let value: JsonValue = serde_json::from_str(&text).map_err(|source| InputError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        JsonValue::Array(items) => Ok(items),
        _ => Err(InputError::NotASequence {
            path: path.to_path_buf(),
        }),
    }
}

/// A record dropped while loading, with its position in the source array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalLoad {
    pub events: Vec<CanonicalEvent>,
    pub skipped: Vec<SkippedRecord>,
}

/// Loosely typed JSON truthiness: null, false, zero, and empty strings/arrays/objects are falsy.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) if is_truthy(value) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(record: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find_map(|v| match v {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

fn canonical_from_value(record: &JsonValue) -> Result<CanonicalEvent, String> {
    if !record.is_object() {
        return Err("record is not an object".to_string());
    }
    let id = record
        .get("id")
        .and_then(scalar_text)
        .ok_or_else(|| "missing id".to_string())?;
    let home_team = first_text(record, HOME_KEYS);
    let away_team = first_text(record, AWAY_KEYS);
    let (Some(home_team), Some(away_team)) = (home_team, away_team) else {
        return Err(format!("event {id} is missing a team name"));
    };
    let commence_time = record
        .get("commence_time")
        .and_then(JsonValue::as_str)
        .map(ToString::to_string);
    Ok(CanonicalEvent {
        id,
        home_team,
        away_team,
        commence_time,
    })
}

/// Convert raw feed records into canonical events, keeping feed order.
pub fn canonical_events_from_values(values: &[JsonValue]) -> CanonicalLoad {
    let mut load = CanonicalLoad::default();
    for (index, record) in values.iter().enumerate() {
        match canonical_from_value(record) {
            Ok(event) => load.events.push(event),
            Err(reason) => load.skipped.push(SkippedRecord { index, reason }),
        }
    }
    load
}

pub fn load_canonical_events(path: impl AsRef<Path>) -> Result<CanonicalLoad, InputError> {
    Ok(canonical_events_from_values(&read_json_array(path)?))
}

/// Map each raw item onto an entry. Non-string fields read as missing, so validation later
/// reports them instead of failing the whole list.
pub fn intended_entries_from_values(values: &[JsonValue]) -> Vec<IntendedEventEntry> {
    let text = |record: &JsonValue, key: &str| {
        record
            .get(key)
            .and_then(JsonValue::as_str)
            .map(ToString::to_string)
    };
    values
        .iter()
        .map(|record| IntendedEventEntry {
            date: text(record, "date"),
            team1: text(record, "team1"),
            team2: text(record, "team2"),
        })
        .collect()
}

pub fn load_intended_events(path: impl AsRef<Path>) -> Result<Vec<IntendedEventEntry>, InputError> {
    Ok(intended_entries_from_values(&read_json_array(path)?))
}

/// Validated feed payload. `records` keeps every field the feed sent.
#[derive(Debug, Clone, Default)]
pub struct FeedPayload {
    pub total: usize,
    pub records: Vec<JsonValue>,
}

impl FeedPayload {
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, FeedError> {
        serde_json::to_vec_pretty(&self.records).map_err(FeedError::Json)
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse feed JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unexpected feed format (expected a list)")]
    NotAList,
    #[error("{0}")]
    Config(String),
}

/// Keep objects carrying a truthy `id`, `home_team` and `away_team`.
pub fn validate_feed_body(body: &[u8]) -> Result<FeedPayload, FeedError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(FeedError::Json)?;
    let JsonValue::Array(items) = value else {
        return Err(FeedError::NotAList);
    };
    let total = items.len();
    let records = items
        .into_iter()
        .filter(|item| {
            item.is_object()
                && ["id", "home_team", "away_team"]
                    .iter()
                    .all(|key| item.get(*key).map(is_truthy).unwrap_or(false))
        })
        .collect();
    Ok(FeedPayload { total, records })
}

#[async_trait]
pub trait EventFeed: Send + Sync {
    fn feed_id(&self) -> &'static str;

    async fn fetch_raw(&self, http: &HttpFetcher) -> Result<Vec<u8>, FeedError>;

    fn parse(&self, body: &[u8]) -> Result<FeedPayload, FeedError> {
        validate_feed_body(body)
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<FeedPayload, FeedError> {
        let body = self.fetch_raw(http).await?;
        self.parse(&body)
    }
}

/// `GET {base}/sports/{sport}/scores` on the-odds-api.
#[derive(Debug, Clone)]
pub struct ScoresFeed {
    pub base_url: String,
    pub sport_key: String,
    pub days_from: u32,
    pub api_key: String,
}

impl ScoresFeed {
    pub fn new(
        base_url: impl Into<String>,
        sport_key: impl Into<String>,
        days_from: u32,
        api_key: Option<String>,
    ) -> Result<Self, FeedError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FeedError::Config("ODDS_API_KEY environment variable is not set".into()))?;
        Ok(Self {
            base_url: base_url.into(),
            sport_key: sport_key.into(),
            days_from,
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/sports/{}/scores",
            self.base_url.trim_end_matches('/'),
            self.sport_key
        )
    }
}

#[async_trait]
impl EventFeed for ScoresFeed {
    fn feed_id(&self) -> &'static str {
        "odds-api-scores"
    }

    async fn fetch_raw(&self, http: &HttpFetcher) -> Result<Vec<u8>, FeedError> {
        let days_from = self.days_from.to_string();
        let query = [
            ("apiKey", self.api_key.as_str()),
            ("daysFrom", days_from.as_str()),
            ("dateFormat", "iso"),
        ];
        let body = http
            .fetch_bytes(self.feed_id(), &self.endpoint(), &query)
            .await?;
        Ok(body)
    }
}

/// Replays a previously saved feed response from disk through the same validation.
#[derive(Debug, Clone)]
pub struct SavedFeed {
    pub path: PathBuf,
}

#[async_trait]
impl EventFeed for SavedFeed {
    fn feed_id(&self) -> &'static str {
        "saved-file"
    }

    async fn fetch_raw(&self, _http: &HttpFetcher) -> Result<Vec<u8>, FeedError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| FeedError::Read {
                path: self.path.clone(),
                source,
            })
    }
}
