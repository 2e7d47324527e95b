//! Core domain model and matching rules for slate.
//!
//! Everything here is pure: team-name normalization, the timezone tolerance window,
//! intent-to-feed matching and the deterministic game-file identity.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "slate-core";

/// Slug used when a team name renders to nothing filesystem-safe.
pub const FALLBACK_SLUG: &str = "team";

pub const GAME_FILE_PREFIX: &str = "game-";
pub const GAME_FILE_SEPARATOR: &str = "-vs-";
pub const GAME_FILE_EXTENSION: &str = ".json";

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Authoritative event record from the external feed. Read-only within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: Option<String>,
}

impl CanonicalEvent {
    /// Calendar-date portion of `commence_time`, if the feed supplied one.
    pub fn commence_date(&self) -> Option<&str> {
        self.commence_time.as_deref().map(calendar_date_of)
    }
}

/// Operator-authored entry as it appears in the intended-event list, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntendedEventEntry {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub team1: Option<String>,
    #[serde(default)]
    pub team2: Option<String>,
}

/// A validated "game I care about on this date". Teams are unordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntendedEvent {
    pub date: String,
    pub team1: String,
    pub team2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    pub missing: Vec<&'static str>,
}

impl fmt::Display for MalformedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing {}", self.missing.join("/"))
    }
}

impl IntendedEventEntry {
    /// Trim every field and reject the entry if any of date/team1/team2 is blank.
    pub fn validate(&self) -> Result<IntendedEvent, MalformedEntry> {
        fn field(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        }

        let date = field(&self.date);
        let team1 = field(&self.team1);
        let team2 = field(&self.team2);

        match (date, team1, team2) {
            (Some(date), Some(team1), Some(team2)) => Ok(IntendedEvent { date, team1, team2 }),
            (date, team1, team2) => {
                let mut missing = Vec::new();
                if date.is_none() {
                    missing.push("date");
                }
                if team1.is_none() {
                    missing.push("team1");
                }
                if team2.is_none() {
                    missing.push("team2");
                }
                Err(MalformedEntry { missing })
            }
        }
    }
}

/// Lowercase `input` and drop every `(...)` group, the way a lazy `\(.*?\)` pass would.
/// A group never spans a newline; an unclosed `(` is left in place.
fn strip_parentheticals(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        match after.find(|c| c == ')' || c == '\n') {
            Some(close) if after[close..].starts_with(')') => {
                out.push_str(&rest[..open]);
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse every run outside `[a-z0-9]` into one hyphen, with no leading or trailing hyphen.
fn collapse_to_hyphens(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut gap = false;
    for c in input.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if gap && !out.is_empty() {
                out.push('-');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out
}

/// Comparison key for team names. Total, deterministic and idempotent.
pub fn normalize_key(name: &str) -> String {
    collapse_to_hyphens(&strip_parentheticals(&name.to_lowercase()))
}

/// Filesystem-safe slug for team names. `&` reads as "and"; an empty result becomes
/// [`FALLBACK_SLUG`].
pub fn slugify(name: &str) -> String {
    let stripped = strip_parentheticals(&name.to_lowercase()).replace('&', " and ");
    let slug = collapse_to_hyphens(&stripped);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Date part of a feed timestamp: everything before the first `T` or space.
pub fn calendar_date_of(timestamp: &str) -> &str {
    let trimmed = timestamp.trim();
    trimmed
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed)
}

/// Set of dates treated as "the same day" for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToleranceWindow {
    /// The anchor parsed; holds the previous day, the anchor and the next day.
    Calendar { anchor: NaiveDate, dates: Vec<String> },
    /// The anchor did not parse as `YYYY-MM-DD`; only the literal string is accepted.
    Verbatim(String),
}

impl ToleranceWindow {
    pub fn around(date: &str) -> Self {
        let Ok(anchor) = NaiveDate::parse_from_str(date, ISO_DATE_FORMAT) else {
            return Self::Verbatim(date.to_string());
        };
        let dates = [anchor.pred_opt(), Some(anchor), anchor.succ_opt()]
            .into_iter()
            .flatten()
            .map(|d| d.format(ISO_DATE_FORMAT).to_string())
            .collect();
        Self::Calendar { anchor, dates }
    }

    /// The anchor as `YYYY-MM-DD`, or the literal string when it did not parse.
    pub fn anchor_date(&self) -> String {
        match self {
            Self::Calendar { anchor, .. } => anchor.format(ISO_DATE_FORMAT).to_string(),
            Self::Verbatim(date) => date.clone(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Verbatim(_))
    }

    pub fn dates(&self) -> Vec<&str> {
        match self {
            Self::Calendar { dates, .. } => dates.iter().map(String::as_str).collect(),
            Self::Verbatim(date) => vec![date.as_str()],
        }
    }

    pub fn contains(&self, date: &str) -> bool {
        match self {
            Self::Calendar { dates, .. } => dates.iter().any(|d| d == date),
            Self::Verbatim(literal) => literal == date,
        }
    }

    /// Feed events whose commence date lies inside the window, in feed order.
    pub fn candidates<'w, 'e: 'w>(
        &'w self,
        events: &'e [CanonicalEvent],
    ) -> impl Iterator<Item = &'e CanonicalEvent> + 'w {
        events.iter().filter(move |e| {
            e.commence_date()
                .map(|date| self.contains(date))
                .unwrap_or(false)
        })
    }
}

pub fn tolerance_window(date: &str) -> ToleranceWindow {
    ToleranceWindow::around(date)
}

/// Unordered pair of normalized team keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TeamPair {
    low: String,
    high: String,
}

impl TeamPair {
    pub fn new(a: &str, b: &str) -> Self {
        let (a, b) = (normalize_key(a), normalize_key(b));
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn of_event(event: &CanonicalEvent) -> Self {
        Self::new(&event.home_team, &event.away_team)
    }

    /// Single string form, used for similarity hints.
    pub fn joined(&self) -> String {
        format!("{} {}", self.low, self.high)
    }
}

/// First feed event in the intended date window whose team pair equals the intended pair,
/// in either orientation. `None` is the ordinary "not scheduled yet" outcome.
pub fn match_event<'a>(
    intended: &IntendedEvent,
    events: &'a [CanonicalEvent],
) -> Option<&'a CanonicalEvent> {
    let window = ToleranceWindow::around(&intended.date);
    let wanted = TeamPair::new(&intended.team1, &intended.team2);
    let found = window
        .candidates(events)
        .find(|event| TeamPair::of_event(event) == wanted);
    found
}

/// Deterministic `(away, home, date)` triple naming a game file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    pub away_slug: String,
    pub home_slug: String,
    pub date: String,
}

impl FileIdentity {
    pub fn derive(away_name: &str, home_name: &str, date: &str) -> Self {
        Self {
            away_slug: slugify(away_name),
            home_slug: slugify(home_name),
            date: date.to_string(),
        }
    }

    /// Identity for a matched feed event. The intended (local) date is embedded, never the
    /// feed's UTC date, zero-padded whenever it parses so the name stays `YYYY-MM-DD`.
    pub fn for_match(event: &CanonicalEvent, intended_date: &str) -> Self {
        let date = ToleranceWindow::around(intended_date).anchor_date();
        Self::derive(&event.away_team, &event.home_team, &date)
    }

    pub fn filename(&self) -> String {
        format!(
            "{GAME_FILE_PREFIX}{}{GAME_FILE_SEPARATOR}{}-{}{GAME_FILE_EXTENSION}",
            self.away_slug, self.home_slug, self.date
        )
    }

    /// Inverse of [`FileIdentity::filename`]. When `-vs-` occurs more than once the rightmost
    /// split leaving both sides non-empty wins.
    pub fn parse_filename(name: &str) -> Option<Self> {
        let stem = name
            .strip_prefix(GAME_FILE_PREFIX)?
            .strip_suffix(GAME_FILE_EXTENSION)?;
        let split = stem.len().checked_sub(10)?;
        let date = stem.get(split..)?;
        if !looks_like_iso_date(date) {
            return None;
        }
        let pair = stem.get(..split)?.strip_suffix('-')?;

        (0..pair.len()).rev().find_map(|idx| {
            let tail = pair.get(idx..)?;
            if !tail.starts_with(GAME_FILE_SEPARATOR) {
                return None;
            }
            let away = &pair[..idx];
            let home = &tail[GAME_FILE_SEPARATOR.len()..];
            if away.is_empty() || home.is_empty() {
                return None;
            }
            Some(Self {
                away_slug: away.to_string(),
                home_slug: home.to_string(),
                date: date.to_string(),
            })
        })
    }

    /// True when the event's slugified teams equal this identity's slugs, in either orientation.
    /// Uses the same [`slugify`] as [`FileIdentity::derive`].
    pub fn matches_event(&self, event: &CanonicalEvent) -> bool {
        let away = slugify(&event.away_team);
        let home = slugify(&event.home_team);
        (away == self.away_slug && home == self.home_slug)
            || (away == self.home_slug && home == self.away_slug)
    }

    /// Every feed event in this identity's date window that matches its slugs, in feed order.
    pub fn matching_events<'a>(&self, events: &'a [CanonicalEvent]) -> Vec<&'a CanonicalEvent> {
        let window = ToleranceWindow::around(&self.date);
        window
            .candidates(events)
            .filter(|event| self.matches_event(event))
            .collect()
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}

fn looks_like_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// What the reconciler sees when it looks at a game file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Absent,
    /// Exists and is whitespace-only.
    Empty,
    Populated,
    /// Exists but could not be read as text. Treated like `Populated`.
    Unreadable,
}

impl CompletionState {
    pub fn is_empty(self) -> bool {
        self == Self::Empty
    }

    pub fn needs_scaffold(self) -> bool {
        self == Self::Absent
    }
}
