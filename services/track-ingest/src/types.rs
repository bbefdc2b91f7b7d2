use std::fmt;

use serde::{Deserialize, Serialize};

// External identifier of a video on the video-sharing site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `[A-Za-z0-9_-]+`; the id becomes a local file name
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Hex sha-256 of a raw chromaprint fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed fpcalc output. `raw` keeps the whole payload for callers that
/// want to echo it back.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRecord {
    pub raw_fingerprint: String,
    pub duration_seconds: f64,
    pub raw: serde_json::Value
}

/// One entry of the configured artist list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistEntry {
    pub artist: String,
    #[serde(default)]
    pub genres: Vec<String>
}

/// A track returned by the catalog search
#[derive(Debug, Clone)]
pub struct CatalogTrack {
    pub title: String,
    pub artist: Option<String>,
    pub cover_url: Option<String>,
    pub raw: serde_json::Value
}

/// A video returned by the video search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHit {
    pub video_id: VideoId,
    pub title: String,
    pub duration_raw: Option<String>
}

/// (artist, track, video) tuple handed to the ingest orchestrator
#[derive(Debug, Clone)]
pub struct Candidate {
    pub video_id: VideoId,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub genres: Vec<String>
}

/// Document persisted once per unique fingerprint. Missing fields decode
/// to their defaults so older documents still read back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub active: bool,
    pub genres: Vec<String>,
    pub album_art: String,
    pub audio_url: String,
    pub url: String,
    pub duration: f64,
    pub owner_id: String,
    pub upload_date: String,
    pub play_count: i64,
    pub file_name: String,
    pub current_bid: i64,
    pub fingerprint: String,
    pub title_lower_case: String,
    pub artist_lower_case: String,
    pub album_lower_case: String,
    pub location: String,
    pub free_plays: i64,
    pub premium_plays: i64,
    pub credit_plays: i64,
    pub credit_plays_claimed: i64
}

impl TrackRecord {
    pub fn new(
        id: String,
        candidate: &Candidate,
        audio_url: &str,
        duration: f64,
        key: &DedupKey,
        location: &str
    ) -> Self {
        Self {
            id,
            title: candidate.title.clone(),
            artist: candidate.artist.clone(),
            active: true,
            genres: candidate.genres.clone(),
            album_art: candidate.cover_url.clone(),
            audio_url: audio_url.to_string(),
            url: audio_url.to_string(),
            duration,
            owner_id: String::new(),
            upload_date: chrono::Utc::now().to_rfc3339(),
            play_count: 0,
            file_name: String::new(),
            current_bid: 0,
            fingerprint: key.0.clone(),
            title_lower_case: candidate.title.to_lowercase(),
            artist_lower_case: candidate.artist.to_lowercase(),
            album_lower_case: String::new(),
            location: location.to_string(),
            free_plays: 0,
            premium_plays: 0,
            credit_plays: 0,
            credit_plays_claimed: 0
        }
    }
}
