//! Cached, TTL-bounded corpus snapshot loading from a URL or a local file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};

use crate::clock::Clock;
use crate::codec;
use crate::error::{MemoryError, Result};
use crate::snapshot::CorpusSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusLocation {
    Remote(Url),
    Local(PathBuf),
    Unconfigured,
}

impl CorpusLocation {
    /// `http(s)://` strings become remote locations; anything else is a path.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Unconfigured;
        };
        if raw.starts_with("http://") || raw.starts_with("https://") {
            match Url::parse(raw) {
                Ok(url) => return Self::Remote(url),
                Err(e) => tracing::warn!(location = raw, error = %e, "invalid corpus URL, treating as path"),
            }
        }
        Self::Local(PathBuf::from(raw))
    }
}

impl std::fmt::Display for CorpusLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Unconfigured => f.write_str("<unconfigured>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub location: CorpusLocation,
    pub fallback_path: Option<PathBuf>,
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    /// Serve an empty corpus instead of failing while nothing has loaded yet.
    pub allow_empty_on_failure: bool,
}

impl LoaderConfig {
    #[must_use]
    pub fn new(location: CorpusLocation) -> Self {
        Self {
            location,
            fallback_path: None,
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            allow_empty_on_failure: false,
        }
    }
}

/// Last loaded snapshot with its freshness timestamp and entity tag.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    snapshot: Option<Arc<CorpusSnapshot>>,
    loaded_at: Option<DateTime<Utc>>,
    etag: Option<String>,
    ever_loaded: bool,
}

impl SnapshotCache {
    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<CorpusSnapshot>> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn fresh(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&Arc<CorpusSnapshot>> {
        let loaded_at = self.loaded_at?;
        let age = now.signed_duration_since(loaded_at).to_std().ok()?;
        if age < ttl { self.snapshot.as_ref() } else { None }
    }
}

enum Fetched {
    Loaded {
        snapshot: CorpusSnapshot,
        etag: Option<String>,
    },
    NotModified,
}

#[derive(Debug)]
pub struct CorpusLoader {
    config: LoaderConfig,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    cache: RwLock<SnapshotCache>,
}

impl CorpusLoader {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: LoaderConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = repolens_llm::http::client_with_timeout(config.fetch_timeout)?;
        Ok(Self {
            config,
            client,
            clock,
            cache: RwLock::new(SnapshotCache::default()),
        })
    }

    #[must_use]
    pub fn location(&self) -> &CorpusLocation {
        &self.config.location
    }

    /// Copy of the current cache state.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn cache(&self) -> Result<SnapshotCache> {
        self.cache
            .read()
            .map(|c| c.clone())
            .map_err(|e| MemoryError::Other(format!("snapshot cache lock poisoned: {e}")))
    }

    /// Mark the cached snapshot stale so the next `load` goes to the source.
    ///
    /// The snapshot and entity tag are kept so a failed reload leaves them intact.
    pub fn invalidate(&self) {
        match self.cache.write() {
            Ok(mut c) => c.loaded_at = None,
            Err(e) => tracing::warn!(error = %e, "snapshot cache lock poisoned"),
        }
    }

    /// Return the cached snapshot if fresh, otherwise fetch it.
    ///
    /// # Errors
    ///
    /// Returns transport, timeout, schema or IO errors from the fetch. With
    /// `allow_empty_on_failure`, transport failures before the first
    /// successful load yield an empty snapshot instead. Schema errors are
    /// always returned.
    pub async fn load(&self) -> Result<Arc<CorpusSnapshot>> {
        self.load_inner(false).await
    }

    /// Invalidate and reload; failures are always returned.
    ///
    /// # Errors
    ///
    /// See [`CorpusLoader::load`].
    pub async fn refresh(&self) -> Result<Arc<CorpusSnapshot>> {
        self.invalidate();
        self.load_inner(true).await
    }

    async fn load_inner(&self, strict: bool) -> Result<Arc<CorpusSnapshot>> {
        let now = self.clock.now();
        let (cached, etag, ever_loaded) = {
            let cache = self.cache()?;
            if let Some(s) = cache.fresh(now, self.config.ttl) {
                return Ok(Arc::clone(s));
            }
            (cache.snapshot, cache.etag, cache.ever_loaded)
        };

        let secs = self.config.fetch_timeout.as_secs();
        let fetched = tokio::time::timeout(
            self.config.fetch_timeout,
            self.fetch(cached.is_some().then_some(etag.as_deref()).flatten()),
        )
        .await
        .unwrap_or(Err(MemoryError::Timeout(secs)));

        match fetched {
            Ok(Fetched::Loaded { snapshot, etag }) => {
                let snapshot = Arc::new(snapshot);
                tracing::info!(
                    location = %self.config.location,
                    records = snapshot.len(),
                    dimension = snapshot.dimension(),
                    "corpus snapshot loaded"
                );
                self.store(SnapshotCache {
                    snapshot: Some(Arc::clone(&snapshot)),
                    loaded_at: Some(now),
                    etag,
                    ever_loaded: true,
                })?;
                Ok(snapshot)
            }
            Ok(Fetched::NotModified) => {
                let Some(snapshot) = cached else {
                    return Err(MemoryError::Transport(format!(
                        "{}: not modified but nothing cached",
                        self.config.location
                    )));
                };
                tracing::debug!(location = %self.config.location, "corpus snapshot not modified");
                self.store(SnapshotCache {
                    snapshot: Some(Arc::clone(&snapshot)),
                    loaded_at: Some(now),
                    etag,
                    ever_loaded,
                })?;
                Ok(snapshot)
            }
            Err(e)
                if !strict
                    && !ever_loaded
                    && self.config.allow_empty_on_failure
                    && e.is_transient() =>
            {
                tracing::warn!(
                    location = %self.config.location,
                    error = %e,
                    "corpus load failed, serving empty corpus"
                );
                let empty = Arc::new(CorpusSnapshot::empty(now));
                self.store(SnapshotCache {
                    snapshot: Some(Arc::clone(&empty)),
                    loaded_at: Some(now),
                    etag: None,
                    ever_loaded: false,
                })?;
                Ok(empty)
            }
            Err(e) => Err(e),
        }
    }

    fn store(&self, state: SnapshotCache) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| MemoryError::Other(format!("snapshot cache lock poisoned: {e}")))?;
        *cache = state;
        Ok(())
    }

    async fn fetch(&self, etag: Option<&str>) -> Result<Fetched> {
        match &self.config.location {
            CorpusLocation::Remote(url) => self.fetch_remote(url, etag).await,
            CorpusLocation::Local(path) => match tokio::fs::read(path).await {
                Ok(bytes) => Ok(Fetched::Loaded {
                    snapshot: decode_snapshot(bytes, &path.display().to_string())?,
                    etag: None,
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "corpus file missing, using fallback");
                    self.fallback().await
                }
                Err(e) => Err(e.into()),
            },
            CorpusLocation::Unconfigured => self.fallback().await,
        }
    }

    async fn fetch_remote(&self, url: &Url, etag: Option<&str>) -> Result<Fetched> {
        let mut req = self.client.get(url.clone());
        if let Some(tag) = etag {
            req = req.header(IF_NONE_MATCH, tag);
        }
        let resp = req.send().await.map_err(|e| self.transport_error(url, &e))?;
        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%url, "corpus not found upstream, using fallback");
            return self.fallback().await;
        }
        if !status.is_success() {
            return Err(MemoryError::Transport(format!("GET {url}: HTTP {status}")));
        }
        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, &e))?;
        Ok(Fetched::Loaded {
            snapshot: decode_snapshot(bytes.to_vec(), url.as_str())?,
            etag,
        })
    }

    fn transport_error(&self, url: &Url, e: &reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::Timeout(self.config.fetch_timeout.as_secs())
        } else {
            MemoryError::Transport(format!("GET {url}: {e}"))
        }
    }

    async fn fallback(&self) -> Result<Fetched> {
        if let Some(path) = &self.config.fallback_path
            && tokio::fs::try_exists(path).await.unwrap_or(false)
        {
            let bytes = tokio::fs::read(path).await?;
            tracing::info!(path = %path.display(), "loading fallback corpus");
            return Ok(Fetched::Loaded {
                snapshot: decode_snapshot(bytes, &path.display().to_string())?,
                etag: None,
            });
        }
        Ok(Fetched::Loaded {
            snapshot: CorpusSnapshot::empty(self.clock.now()),
            etag: None,
        })
    }
}

fn decode_snapshot(bytes: Vec<u8>, source: &str) -> Result<CorpusSnapshot> {
    let json = codec::decode(bytes)
        .map_err(|e| MemoryError::Transport(format!("{source}: corrupt payload: {e}")))?;
    CorpusSnapshot::from_json_slice(&json)
}

/// Read and parse a snapshot file directly, bypassing any cache.
///
/// # Errors
///
/// Returns IO, transport (corrupt gzip) or schema errors.
pub async fn read_snapshot_file(path: &Path) -> Result<CorpusSnapshot> {
    let bytes = tokio::fs::read(path).await?;
    decode_snapshot(bytes, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::test_support::{chunk_record, ts};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(ts("2026-05-01T12:00:00Z")))
    }

    fn write_snapshot(dir: &Path, name: &str, ids: &[&str]) -> PathBuf {
        let records = ids
            .iter()
            .map(|id| chunk_record(id, "body", vec![1.0, 0.0]))
            .collect();
        let snapshot = CorpusSnapshot::build(records, ts("2026-04-01T00:00:00Z"));
        let path = dir.join(name);
        let bytes = codec::compress(&snapshot.to_json_vec().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn location_parsing() {
        assert_eq!(CorpusLocation::parse(None), CorpusLocation::Unconfigured);
        assert_eq!(CorpusLocation::parse(Some("  ")), CorpusLocation::Unconfigured);
        assert!(matches!(
            CorpusLocation::parse(Some("https://cdn.example.com/corpus.json.gz")),
            CorpusLocation::Remote(_)
        ));
        assert_eq!(
            CorpusLocation::parse(Some("data/corpus.json.gz")),
            CorpusLocation::Local(PathBuf::from("data/corpus.json.gz"))
        );
    }

    #[tokio::test]
    async fn local_file_is_cached_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path(), "corpus.json.gz", &["a"]);
        let clock = clock();
        let loader = CorpusLoader::new(
            LoaderConfig::new(CorpusLocation::Local(path.clone())),
            clock.clone(),
        )
        .unwrap();

        let first = loader.load().await.unwrap();
        assert_eq!(first.len(), 1);

        write_snapshot(dir.path(), "corpus.json.gz", &["a", "b"]);
        clock.advance(chrono::Duration::seconds(299));
        let cached = loader.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        clock.advance(chrono::Duration::seconds(1));
        let reloaded = loader.load().await.unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path(), "c.json.gz", &["a"]);
        let loader =
            CorpusLoader::new(LoaderConfig::new(CorpusLocation::Local(path)), clock()).unwrap();
        loader.load().await.unwrap();
        write_snapshot(dir.path(), "c.json.gz", &["a", "b", "c"]);
        loader.invalidate();
        assert_eq!(loader.load().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_file_uses_fallback_then_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = write_snapshot(dir.path(), "fallback.json.gz", &["f1", "f2"]);

        let mut config = LoaderConfig::new(CorpusLocation::Local(dir.path().join("nope.gz")));
        config.fallback_path = Some(fallback);
        let loader = CorpusLoader::new(config, clock()).unwrap();
        assert_eq!(loader.load().await.unwrap().len(), 2);

        let loader = CorpusLoader::new(
            LoaderConfig::new(CorpusLocation::Local(dir.path().join("nope.gz"))),
            clock(),
        )
        .unwrap();
        let empty = loader.load().await.unwrap();
        assert!(empty.is_empty());
        empty.validate().unwrap();
    }

    #[tokio::test]
    async fn unconfigured_location_is_empty() {
        let loader =
            CorpusLoader::new(LoaderConfig::new(CorpusLocation::Unconfigured), clock()).unwrap();
        assert!(loader.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_json_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.json");
        let records = vec![chunk_record("p", "x", vec![1.0])];
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();
        let loader =
            CorpusLoader::new(LoaderConfig::new(CorpusLocation::Local(path)), clock()).unwrap();
        let s = loader.load().await.unwrap();
        assert_eq!(s.records[0].id, "p");
    }

    #[tokio::test]
    async fn schema_error_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(dir.path(), "c.json.gz", &["a"]);
        let loader = CorpusLoader::new(
            LoaderConfig::new(CorpusLocation::Local(path.clone())),
            clock(),
        )
        .unwrap();
        loader.load().await.unwrap();
        std::fs::write(&path, br#"{"schemaVersion": 9}"#).unwrap();
        let err = loader.refresh().await.unwrap_err();
        assert!(matches!(err, MemoryError::Schema(_)));
        let cache = loader.cache().unwrap();
        assert_eq!(cache.snapshot().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_local_file_degrades_only_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gz");
        std::fs::write(&path, [0x1f, 0x8b, 0x00, 0x01]).unwrap();

        let strict =
            CorpusLoader::new(LoaderConfig::new(CorpusLocation::Local(path.clone())), clock())
                .unwrap();
        assert!(matches!(
            strict.load().await,
            Err(MemoryError::Transport(_))
        ));

        let mut config = LoaderConfig::new(CorpusLocation::Local(path));
        config.allow_empty_on_failure = true;
        let lenient = CorpusLoader::new(config, clock()).unwrap();
        assert!(lenient.load().await.unwrap().is_empty());
        assert!(lenient.refresh().await.is_err());
    }

    #[tokio::test]
    async fn lenient_loader_still_rejects_unknown_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.json");
        std::fs::write(&path, br#"{"schemaVersion": 9, "records": []}"#).unwrap();

        let mut config = LoaderConfig::new(CorpusLocation::Local(path));
        config.allow_empty_on_failure = true;
        let loader = CorpusLoader::new(config, clock()).unwrap();
        assert!(matches!(loader.load().await, Err(MemoryError::Schema(_))));
        assert!(loader.cache().unwrap().snapshot().is_none());
    }
}
