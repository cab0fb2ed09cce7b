//! Last processed marker per upstream source, persisted as a small JSON file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub marker: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
    marks: BTreeMap<String, Watermark>,
}

impl WatermarkStore {
    /// Open the store at `path`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let marks = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, marks })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, source: &str) -> Option<&Watermark> {
        self.marks.get(source)
    }

    #[must_use]
    pub fn is_current(&self, source: &str, marker: &str) -> bool {
        self.marks.get(source).is_some_and(|w| w.marker == marker)
    }

    /// Record `marker` for `source` and rewrite the file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn advance(&mut self, source: &str, marker: &str, now: DateTime<Utc>) -> Result<()> {
        self.marks.insert(
            source.to_owned(),
            Watermark {
                marker: marker.to_owned(),
                updated_at: now,
            },
        );
        let bytes = serde_json::to_vec_pretty(&self.marks)?;
        write_atomic(&self.path, &bytes)?;
        tracing::debug!(source, marker, path = %self.path.display(), "watermark advanced");
        Ok(())
    }
}

/// Write `bytes` to a temporary file next to `path`, then rename over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
