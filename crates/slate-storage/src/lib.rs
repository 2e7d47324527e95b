//! Game-file storage, feed snapshot writes and the HTTP fetch wrapper for slate.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};
use slate_core::{
    CompletionState, FileIdentity, GAME_FILE_EXTENSION, GAME_FILE_PREFIX, GAME_FILE_SEPARATOR,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "slate-storage";

/// Inspect a game file. Anything that exists but cannot be read as text is `Unreadable`,
/// which callers treat as populated.
pub fn classify(path: &Path) -> CompletionState {
    match fs::metadata(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => return CompletionState::Absent,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "stat failed");
            return CompletionState::Unreadable;
        }
        Ok(_) => {}
    }

    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => CompletionState::Empty,
        Ok(_) => CompletionState::Populated,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "read failed");
            CompletionState::Unreadable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaffoldOutcome {
    Created,
    AlreadyExists,
}

/// Directory of `game-<away>-vs-<home>-<date>.json` files.
#[derive(Debug, Clone)]
pub struct GameStore {
    root: PathBuf,
}

impl GameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, identity: &FileIdentity) -> PathBuf {
        self.root.join(identity.filename())
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn classify(&self, identity: &FileIdentity) -> CompletionState {
        classify(&self.path_for(identity))
    }

    /// Names shaped like `game-*-vs-*.json`, sorted lexicographically. A missing directory
    /// yields no names. The names are not guaranteed to parse back into an identity.
    pub fn list_game_files(&self) -> anyhow::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.root.display()))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("reading {}", self.root.display()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(GAME_FILE_PREFIX)
                && name.ends_with(GAME_FILE_EXTENSION)
                && name.contains(GAME_FILE_SEPARATOR)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create a zero-byte file for `identity`. Never truncates: an existing file of any
    /// content is left alone.
    pub fn scaffold(&self, identity: &FileIdentity) -> anyhow::Result<ScaffoldOutcome> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.path_for(identity);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(ScaffoldOutcome::Created),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(ScaffoldOutcome::AlreadyExists),
            Err(err) => Err(err).with_context(|| format!("creating {}", path.display())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Replace `path` with `bytes` via a temp file in the same directory and a rename, so readers
/// never observe a half-written feed.
pub async fn replace_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<StoredSnapshot> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = tokio::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }

    Ok(StoredSnapshot {
        path: path.to_path_buf(),
        content_hash: sha256_hex(bytes),
        byte_size: bytes.len(),
    })
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// One-shot HTTP GET client: a single timeout, no retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// URL without its query string; query parameters may carry credentials.
pub fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<u8>, FetchError> {
        let span = info_span!("http_fetch", source_id, url = redact_query(url));
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: redact_query(resp.url().as_str()).to_string(),
                });
            }
            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched");
            Ok(body)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn identity(away: &str, home: &str, date: &str) -> FileIdentity {
        FileIdentity::derive(away, home, date)
    }

    #[test]
    fn snapshot_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn classify_distinguishes_absent_empty_and_populated() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("game-a-vs-b-2025-09-20.json");
        assert_eq!(classify(&path), CompletionState::Absent);

        fs::write(&path, "").unwrap();
        assert_eq!(classify(&path), CompletionState::Empty);

        fs::write(&path, "   \n\t ").unwrap();
        assert_eq!(classify(&path), CompletionState::Empty);

        fs::write(&path, "{}").unwrap();
        assert_eq!(classify(&path), CompletionState::Populated);
    }

    #[test]
    fn undecodable_content_is_never_treated_as_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("game-a-vs-b-2025-09-20.json");
        fs::write(&path, [0xff, 0xfe, 0x20]).unwrap();
        assert_eq!(classify(&path), CompletionState::Unreadable);

        let as_dir = dir.path().join("game-c-vs-d-2025-09-20.json");
        fs::create_dir(&as_dir).unwrap();
        assert_eq!(classify(&as_dir), CompletionState::Unreadable);
    }

    #[test]
    fn scaffold_creates_once_and_never_truncates() {
        let dir = tempdir().expect("tempdir");
        let store = GameStore::new(dir.path().join("data"));
        let id = identity("Alabama", "Tennessee", "2025-09-20");

        assert_eq!(store.scaffold(&id).unwrap(), ScaffoldOutcome::Created);
        assert_eq!(store.classify(&id), CompletionState::Empty);
        assert_eq!(store.scaffold(&id).unwrap(), ScaffoldOutcome::AlreadyExists);

        fs::write(store.path_for(&id), "{\"game_id\":\"abc\"}").unwrap();
        assert_eq!(store.scaffold(&id).unwrap(), ScaffoldOutcome::AlreadyExists);
        assert_eq!(
            fs::read_to_string(store.path_for(&id)).unwrap(),
            "{\"game_id\":\"abc\"}"
        );
    }

    #[test]
    fn listing_filters_and_sorts_game_files() {
        let dir = tempdir().expect("tempdir");
        let store = GameStore::new(dir.path());
        for name in [
            "game-zeta-vs-alpha-2025-09-20.json",
            "game-alpha-vs-zeta-2025-09-20.json",
            "game-missing-separator-2025-09-20.json",
            "my_events.json",
            "events.json",
            "game-alpha-vs-zeta-2025-09-20.md",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(
            store.list_game_files().unwrap(),
            vec![
                "game-alpha-vs-zeta-2025-09-20.json".to_string(),
                "game-zeta-vs-alpha-2025-09-20.json".to_string(),
            ]
        );
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let dir = tempdir().expect("tempdir");
        let store = GameStore::new(dir.path().join("nope"));
        assert!(store.list_game_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn atomic_replace_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("events.json");
        fs::write(&target, "[]").unwrap();

        let stored = replace_atomically(&target, b"[{\"id\":\"a\"}]")
            .await
            .expect("replace");
        assert_eq!(stored.byte_size, 12);
        assert_eq!(stored.content_hash, sha256_hex(b"[{\"id\":\"a\"}]"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "[{\"id\":\"a\"}]");

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn redaction_drops_query_string() {
        assert_eq!(
            redact_query("https://api.example.test/v4/sports/x/scores?apiKey=secret"),
            "https://api.example.test/v4/sports/x/scores"
        );
        assert_eq!(redact_query("https://a.test/b"), "https://a.test/b");
    }
}
