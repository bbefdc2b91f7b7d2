//!
//! src/cursor.rs  Oct 18th, 2026
//!
//! Run state shared across one batch: which (artist, title) pairs were
//! already downloaded (persisted between runs) and which normalized video
//! titles were already seen (in memory only).
//!

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::errors::IngestError;

#[derive(Debug, Default)]
pub struct IngestContext {
    pub downloaded: HashSet<String>,
    pub seen_titles: HashSet<String>
}

impl IngestContext {
    pub fn key(artist: &str, title: &str) -> String {
        format!("{artist}-{title}")
    }

    pub fn is_downloaded(&self, artist: &str, title: &str) -> bool {
        self.downloaded.contains(&Self::key(artist, title))
    }

    pub fn mark_downloaded(&mut self, artist: &str, title: &str) -> bool {
        self.downloaded.insert(Self::key(artist, title))
    }

    /// A missing or unreadable cursor starts an empty run
    pub fn load(path: &Path) -> Self {
        let downloaded = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(keys) => keys.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "cursor.corrupt");
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "cursor.unreadable");
                HashSet::new()
            }
        };
        Self { downloaded, seen_titles: HashSet::new() }
    }

    /// Writes the downloaded set as a sorted json array, atomically
    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new(".")
        };
        std::fs::create_dir_all(parent)?;

        let sorted: BTreeSet<&String> = self.downloaded.iter().collect();
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, &sorted)?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| IngestError::Io(e.error))?;
        Ok(())
    }
}
