//!
//! src/discovery.rs  Oct 18th, 2026
//!
//! Finds candidates: catalog tracks per artist (deezer), then videos per
//! track (youtube results page), filtered down to official uploads of a
//! sane length whose normalized title has not been seen yet.
//!

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use scraper::{Html, Selector};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::errors::IngestError;
use crate::fetch::{DeezerClient, YoutubeClient};
use crate::types::{CatalogTrack, VideoHit, VideoId};

const OFFICIAL_MARKERS: [&str; 5] = ["official", "video", "audio", "mv", "hq"];
const BLACKLIST: [&str; 5] = ["live", "cover", "tribute", "remix", "karaoke"];

/// Simple function to generate random wait for send_with_retry
fn generate_backoff(ms: u64, attempt: usize, rng: &mut SmallRng) -> Duration {
    let exp = (1_u64 << attempt.min(6)) * ms;
    let jitter = rng.gen_range(50..=200) as u64;
    Duration::from_millis(exp + jitter)
}

/// Sends an idempotent request, retrying 429/5xx and transport errors with
/// exponential backoff. Only used for searches.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: usize,
    backoff_ms: u64
) -> Result<reqwest::Response, IngestError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| IngestError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    return Ok(resp);
                }
                let status = resp.status();
                let retryable = status.as_u16() == 429 || status.is_server_error();
                if !retryable || attempt >= max_retries {
                    return Err(IngestError::Http(
                        format!("status {} after {} retries", status, attempt)
                    ));
                }
                let backoff = generate_backoff(backoff_ms, attempt, &mut rng);
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt >= max_retries {
                    return Err(e.into());
                }
                let backoff = generate_backoff(backoff_ms, attempt, &mut rng);
                warn!(error = %e, backoff = ?backoff.as_millis(), "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

pub async fn http_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: usize,
    backoff_ms: u64
) -> Result<Value, IngestError> {
    let resp = send_with_retry(request, max_retries, backoff_ms).await?;
    Ok(resp.json::<Value>().await?)
}

fn words(title: &str) -> impl Iterator<Item = String> + '_ {
    title
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Whole-word, case-insensitive: needs an official marker and no
/// blacklisted word; the blacklist wins.
pub fn is_official(title: &str) -> bool {
    let mut official = false;
    for word in words(title) {
        if BLACKLIST.contains(&word.as_str()) {
            return false;
        }
        official |= OFFICIAL_MARKERS.contains(&word.as_str());
    }
    official
}

/// Lowercase, drop `(...)` groups, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let mut stripped = String::with_capacity(lower.len());
    let mut rest = lower.as_str();

    // non-greedy: each '(' pairs with the next ')'; unclosed is kept
    while let Some(open) = rest.find('(') {
        match rest[open..].find(')') {
            Some(close) => {
                stripped.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break
        }
    }
    stripped.push_str(rest);

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `m:ss` (or `h:mm:ss`) to seconds; anything else is rejected
pub fn parse_duration(raw: &str) -> Option<u32> {
    let parts = raw.trim()
        .split(':')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [m, s] => m.checked_mul(60)?.checked_add(*s),
        [h, m, s] => h.checked_mul(3600)?
            .checked_add(m.checked_mul(60)?)?
            .checked_add(*s),
        _ => None
    }
}

/// Drops unofficial, unparseable and over-long hits, then hits whose
/// normalized title is already in `seen` (which is updated as it goes)
pub fn filter_videos(
    videos: Vec<VideoHit>,
    seen: &mut HashSet<String>,
    max_duration_secs: u32
) -> Vec<VideoHit> {
    videos.into_iter()
        .filter(|v| {
            is_official(&v.title)
                && v.duration_raw.as_deref()
                    .and_then(parse_duration)
                    .is_some_and(|d| d <= max_duration_secs)
        })
        .filter(|v| seen.insert(normalize_title(&v.title)))
        .collect()
}

/// Deezer `/search` payload to catalog tracks; entries without a title
/// are kept so callers can skip them explicitly
pub fn parse_deezer_tracks(payload: &Value) -> Vec<CatalogTrack> {
    payload.get("data")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(|t| CatalogTrack {
            title: t.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            artist: t.pointer("/artist/name").and_then(|v| v.as_str()).map(str::to_string),
            cover_url: t.pointer("/album/cover_big")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            raw: t.clone()
        }).collect())
        .unwrap_or_default()
}

fn collect_video_renderers(v: &Value, out: &mut Vec<VideoHit>) {
    match v {
        Value::Object(map) => {
            if let Some(renderer) = map.get("videoRenderer") {
                if let Some(hit) = video_hit(renderer) {
                    out.push(hit);
                }
            }
            for (key, child) in map {
                if key != "videoRenderer" {
                    collect_video_renderers(child, out);
                }
            }
        }
        Value::Array(arr) => {
            for element in arr {
                collect_video_renderers(element, out);
            }
        }
        _ => {}
    }
}

fn video_hit(renderer: &Value) -> Option<VideoHit> {
    let video_id = VideoId(renderer.get("videoId")?.as_str()?.to_string());
    if !video_id.is_well_formed() {
        warn!(video_id = %video_id, "youtube.video_id.rejected");
        return None;
    }
    let title = renderer.pointer("/title/runs/0/text")
        .or_else(|| renderer.pointer("/title/simpleText"))?
        .as_str()?
        .to_string();
    let duration_raw = renderer.pointer("/lengthText/simpleText")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Some(VideoHit { video_id, title, duration_raw })
}

/// Pulls `ytInitialData` out of a results page and lists its videos in
/// page order
pub fn parse_results_page(html: &str) -> Result<Vec<VideoHit>, IngestError> {
    let document = Html::parse_document(html);
    let scripts = Selector::parse("script")
        .map_err(|e| IngestError::Parse(format!("script selector: {e:?}")))?;

    for script in document.select(&scripts) {
        let text: String = script.text().collect();
        let Some(pos) = text.find("ytInitialData") else { continue };
        let Some(start) = text[pos..].find('{') else { continue };

        let mut stream = serde_json::Deserializer::from_str(&text[pos + start..])
            .into_iter::<Value>();
        if let Some(Ok(data)) = stream.next() {
            let mut hits = Vec::new();
            collect_video_renderers(&data, &mut hits);
            return Ok(hits);
        }
    }
    Err(IngestError::Parse("no ytInitialData on results page".into()))
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn tracks_for(&self, artist: &str) -> Result<Vec<CatalogTrack>, IngestError>;
}

#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<VideoHit>, IngestError>;
}

pub struct DeezerCatalog {
    client: DeezerClient,
    max_retries: usize,
    backoff_ms: u64
}

impl DeezerCatalog {
    pub fn new(client: DeezerClient, http: &HttpConfig) -> Self {
        Self { client, max_retries: http.max_retries, backoff_ms: http.backoff_ms }
    }
}

#[async_trait]
impl Catalog for DeezerCatalog {
    async fn tracks_for(&self, artist: &str) -> Result<Vec<CatalogTrack>, IngestError> {
        let payload = http_with_retry(
            self.client.search(artist)?, self.max_retries, self.backoff_ms
        ).await?;
        if let Some(err) = payload.get("error") {
            return Err(IngestError::Http(format!("deezer: {err}")));
        }
        let tracks = parse_deezer_tracks(&payload);
        debug!(artist, count = tracks.len(), "deezer.search");
        Ok(tracks)
    }
}

pub struct YoutubeSearch {
    client: YoutubeClient,
    max_retries: usize,
    backoff_ms: u64
}

impl YoutubeSearch {
    pub fn new(client: YoutubeClient, http: &HttpConfig) -> Self {
        Self { client, max_retries: http.max_retries, backoff_ms: http.backoff_ms }
    }
}

#[async_trait]
impl VideoSearch for YoutubeSearch {
    async fn search(&self, query: &str) -> Result<Vec<VideoHit>, IngestError> {
        let resp = send_with_retry(
            self.client.results(query)?, self.max_retries, self.backoff_ms
        ).await?;
        let body = resp.text().await?;
        let hits = parse_results_page(&body)?;
        debug!(query, count = hits.len(), "youtube.search");
        Ok(hits)
    }
}
