//!
//! src/crawler.rs  Oct 18th, 2026
//!
//! Batch runner. Walks the artist list in order, their catalog tracks in
//! result order, and hands the first acceptable video of each track to the
//! orchestrator after downloading it. One candidate at a time.
//!

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::cursor::IngestContext;
use crate::discovery::{filter_videos, Catalog, VideoSearch};
use crate::download::Downloader;
use crate::errors::IngestError;
use crate::ingest::{IngestOutcome, Orchestrator};
use crate::sink::{DiskZstdSink, RawType};
use crate::types::{ArtistEntry, Candidate, CatalogTrack, VideoHit};

/// Reads `[{"artist": "...", "genres": [...]}]`
pub fn load_artists(path: &Path) -> Result<Vec<ArtistEntry>, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IngestError::Config(format!("artists file {}: {e}", path.display())))?;
    let artists: Vec<ArtistEntry> = serde_json::from_slice(&bytes)?;
    Ok(artists.into_iter().filter(|a| !a.artist.trim().is_empty()).collect())
}

/// Counters reported when a run ends
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlerStats {
    pub artists: usize,
    pub tracks_seen: usize,
    pub tracks_skipped: usize,
    pub no_video: usize,
    pub downloads_failed: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub failed: usize
}

impl CrawlerStats {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Persisted { .. } => self.persisted += 1,
            IngestOutcome::Duplicate { .. } => self.duplicates += 1,
            _ => self.failed += 1
        }
    }
}

#[derive(Clone)]
pub struct Sources {
    pub catalog: Arc<dyn Catalog>,
    pub search: Arc<dyn VideoSearch>,
    pub downloader: Arc<dyn Downloader>
}

pub struct Crawler {
    artists: Vec<ArtistEntry>,
    sources: Sources,
    orchestrator: Arc<Orchestrator>,
    sink: Option<Arc<DiskZstdSink>>,
    cursor_path: PathBuf,
    max_duration_secs: u32,

    // stops the batch between candidates
    shutdown: CancellationToken
}

impl Crawler {
    pub fn new(
        cfg: &AppConfig,
        artists: Vec<ArtistEntry>,
        sources: Sources,
        orchestrator: Arc<Orchestrator>,
        sink: Option<DiskZstdSink>
    ) -> Self {
        Self {
            artists,
            sources,
            orchestrator,
            sink: sink.map(Arc::new),
            cursor_path: cfg.discovery.cursor_path.clone(),
            max_duration_secs: cfg.discovery.max_duration_secs,
            shutdown: CancellationToken::new()
        }
    }

    /// Shares a token with the rest of the process
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[cfg(test)]
    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<CrawlerStats, IngestError> {
        info!(artists = self.artists.len(), cursor = %self.cursor_path.display(), "crawler.start");

        let mut ctx = IngestContext::load(&self.cursor_path);
        let stats = self.run_with(&mut ctx).await;

        info!(stats = ?stats, "crawler.exit");
        Ok(stats)
    }

    /// Whole batch against a caller-owned context
    pub async fn run_with(&self, ctx: &mut IngestContext) -> CrawlerStats {
        let mut stats = CrawlerStats::default();

        for entry in &self.artists {
            if self.shutdown.is_cancelled() {
                info!(reason = "shutdown token", "crawler.stop");
                break;
            }
            stats.artists += 1;

            let tracks = match self.sources.catalog.tracks_for(&entry.artist).await {
                Ok(tracks) => tracks,
                Err(e) => {
                    error!(error = %e, artist = %entry.artist, "crawler.catalog.failed");
                    continue;
                }
            };
            info!(artist = %entry.artist, tracks = tracks.len(), "crawler.artist");

            for track in &tracks {
                if self.shutdown.is_cancelled() {
                    break;
                }
                stats.tracks_seen += 1;
                self.process_track(entry, track, ctx, &mut stats).await;
            }
        }
        stats
    }

    async fn process_track(
        &self,
        entry: &ArtistEntry,
        track: &CatalogTrack,
        ctx: &mut IngestContext,
        stats: &mut CrawlerStats
    ) {
        let title = track.title.trim();
        if title.is_empty() || ctx.is_downloaded(&entry.artist, title) {
            stats.tracks_skipped += 1;
            return;
        }

        let query = format!("{} {}", entry.artist, title);
        let videos = match self.sources.search.search(&query).await {
            Ok(videos) => videos,
            Err(e) => {
                error!(error = %e, query = %query, "crawler.search.failed");
                return;
            }
        };

        let Some(video) = filter_videos(videos, &mut ctx.seen_titles, self.max_duration_secs)
            .into_iter()
            .next() else {
            debug!(query = %query, "crawler.no_video");
            stats.no_video += 1;
            return;
        };

        match self.sources.downloader.download(&video.video_id).await {
            Ok(_) => {
                ctx.mark_downloaded(&entry.artist, title);
                if let Err(e) = ctx.save(&self.cursor_path) {
                    warn!(error = %e, path = %self.cursor_path.display(), "crawler.cursor.save");
                }
            }
            Err(e) => {
                // the orchestrator still runs and reports the missing file
                error!(error = %e, video_id = %video.video_id, "crawler.download.failed");
                stats.downloads_failed += 1;
            }
        }

        let candidate = candidate_for(entry, track, video);
        let outcome = self.orchestrator.ingest(&candidate).await;
        stats.record(&outcome);

        if outcome.is_persisted() {
            self.archive(entry, track);
        }
    }

    fn archive(&self, entry: &ArtistEntry, track: &CatalogTrack) {
        let Some(sink) = &self.sink else { return };
        let key = format!("{}-{}", entry.artist, track.title);
        match sink.write_json(RawType::DeezerTrack, &key, track.raw.clone()) {
            Ok(path) => debug!(path = %path.display(), "crawler.archive"),
            Err(e) => warn!(error = %e, key = %key, "crawler.archive.failed")
        }
    }
}

/// The stored title is the video's; the artist prefers the catalog's
/// spelling over the configured one
pub fn candidate_for(entry: &ArtistEntry, track: &CatalogTrack, video: VideoHit) -> Candidate {
    Candidate {
        video_id: video.video_id,
        title: video.title,
        artist: track.artist.clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| entry.artist.clone()),
        cover_url: track.cover_url.clone().unwrap_or_default(),
        genres: entry.genres.clone()
    }
}
