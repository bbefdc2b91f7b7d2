//!
//! src/ingest.rs  Oct 18th, 2026
//!
//! Per-candidate ingestion: file check, fingerprint, dedup gate, upload,
//! record write. The local audio file is removed on every path out,
//! whichever branch was taken.
//!

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::download::audio_path;
use crate::errors::IngestError;
use crate::fingerprint::FingerprintExtractor;
use crate::hasher::dedup_key;
use crate::storage::AssetUploader;
use crate::store::{DedupStore, DocumentStore};
use crate::types::{Candidate, TrackRecord};

const AUDIO_MIME: &str = "audio/mpeg";

/// Terminal branch a candidate ended in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    MissingFile,
    ExtractionFailed,
    Duplicate { matches: usize },
    StoreUnavailable,
    UploadFailed,
    PersistFailed { id: String },
    Persisted { id: String, audio_url: String }
}

impl IngestOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, IngestOutcome::Persisted { .. })
    }
}

/// `music_<unix millis>_<uuid v4 hex>`; creates are upserts, so ids must
/// not collide across runs
pub fn mint_record_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("music_{millis}_{}", Uuid::new_v4().simple())
}

/// Deterministic from the external id, so re-uploads overwrite
pub fn destination_key(candidate: &Candidate) -> String {
    format!("tracks/{}.mp3", candidate.video_id.as_str())
}

pub struct Orchestrator {
    extractor: Arc<dyn FingerprintExtractor>,
    dedup: Arc<dyn DedupStore>,
    uploader: Arc<dyn AssetUploader>,
    writer: Arc<dyn DocumentStore>,
    cfg: IngestConfig,
    files_dir: PathBuf
}

impl Orchestrator {
    pub fn new(
        extractor: Arc<dyn FingerprintExtractor>,
        dedup: Arc<dyn DedupStore>,
        uploader: Arc<dyn AssetUploader>,
        writer: Arc<dyn DocumentStore>,
        cfg: IngestConfig,
        files_dir: impl Into<PathBuf>
    ) -> Self {
        Self { extractor, dedup, uploader, writer, cfg, files_dir: files_dir.into() }
    }

    /// Never fails: every error becomes an outcome and the temp file is
    /// deleted before returning
    pub async fn ingest(&self, candidate: &Candidate) -> IngestOutcome {
        let path = audio_path(&self.files_dir, &candidate.video_id);
        let outcome = self.process(candidate, &path).await;
        Self::cleanup(&path).await;

        info!(
            video_id = %candidate.video_id,
            artist = %candidate.artist,
            title = %candidate.title,
            outcome = ?outcome,
            "ingest.done"
        );
        outcome
    }

    async fn process(&self, candidate: &Candidate, path: &Path) -> IngestOutcome {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "no such file");
            return IngestOutcome::MissingFile;
        }

        let fingerprint = match self.extractor.extract(path).await {
            Ok(f) => f,
            Err(e) => {
                let diagnostics = self.extractor.diagnose().await;
                error!(
                    error = %e,
                    path = %path.display(),
                    diagnostics = ?diagnostics,
                    "ingest.extract.failed"
                );
                return IngestOutcome::ExtractionFailed;
            }
        };

        let key = dedup_key(&fingerprint.raw_fingerprint);
        match self.dedup.find_by_fingerprint(&key).await {
            Ok(matches) if !matches.is_empty() => {
                info!(fingerprint = %key, matches = matches.len(), "ingest.duplicate");
                return IngestOutcome::Duplicate { matches: matches.len() };
            }
            Ok(_) => debug!(fingerprint = %key, "ingest.unique"),
            Err(e) if self.proceeds_on(&e) => {
                warn!(error = %e, fingerprint = %key, "ingest.dedup.failed_open");
            }
            Err(e) => {
                error!(error = %e, fingerprint = %key, "ingest.dedup.failed");
                return IngestOutcome::StoreUnavailable;
            }
        }

        let audio_url = match self.uploader
            .upload(path, &destination_key(candidate), AUDIO_MIME)
            .await {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, video_id = %candidate.video_id, "ingest.upload.failed");
                return IngestOutcome::UploadFailed;
            }
        };

        let id = mint_record_id();
        let mut record = TrackRecord::new(
            id.clone(),
            candidate,
            &audio_url,
            fingerprint.duration_seconds,
            &key,
            &self.cfg.location
        );
        if record.album_art.is_empty() {
            record.album_art = self.cfg.placeholder_art.clone();
        }

        let doc = match serde_json::to_value(&record) {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, id = %id, "ingest.record.encode");
                return IngestOutcome::PersistFailed { id };
            }
        };

        if self.writer.create(&self.cfg.collection, &id, &doc).await {
            IngestOutcome::Persisted { id, audio_url }
        } else {
            IngestOutcome::PersistFailed { id }
        }
    }

    /// Only transient store errors may be read as "no match"
    fn proceeds_on(&self, e: &IngestError) -> bool {
        self.cfg.dedup_fail_open && e.is_transient()
    }

    async fn cleanup(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "ingest.cleanup"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "ingest.cleanup.absent");
            }
            Err(e) => warn!(error = %e, path = %path.display(), "ingest.cleanup.failed")
        }
    }
}
