//!
//! src/config.rs  Oct 18th, 2026
//!
//! Loads every setting the service needs from the environment (and .env)
//! at program start. Remote endpoints are validated here so clients can
//! assume well-formed https urls.
//!

use std::{path::PathBuf, time};
use url::Url;

use crate::IngestError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 30000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 5000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: usize = 3;
pub const RETRY_BASE_BACKOFF: u64 = 500;

/// Candidates longer than this are never downloaded
pub const MAX_DURATION_SECONDS: u32 = 12 * 60;
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const PLACEHOLDER_ART: &str = "https://mrdocs.empiredigitals.org/playIcon.png";

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, IngestError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(IngestError::Config(format!("{s} was not set"))),
    }
}

fn env_or(s: &str, default: &str) -> String {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string()
    }
}

fn env_to_u64(s: &str, default: u64) -> u64 {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn narrow_u32(s: &str, value: u64) -> Result<u32, IngestError> {
    u32::try_from(value)
        .map_err(|_| IngestError::Config(format!("{s}={value} does not fit in u32")))
}

fn env_to_u32(s: &str, default: u32) -> Result<u32, IngestError> {
    narrow_u32(s, env_to_u64(s, u64::from(default)))
}

fn env_to_bool(s: &str, default: bool) -> bool {
    match std::env::var(s).ok().as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

/// Parses an https base url for `host`, guaranteeing a trailing slash so
/// that `join` appends instead of replacing the last segment
fn base_url(var: &str, default: &str, host: &str) -> Result<Url, IngestError> {
    let raw = env_or(var, default);
    let mut url = Url::parse(&raw)
        .map_err(|e| IngestError::Config(format!("{var} invalid {e}")))?;

    ensure_https(&url).map_err(IngestError::Config)?;
    ensure_host(&url, host).map_err(IngestError::Config)?;

    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    Ok(url)
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub max_retries: usize,
    pub backoff_ms: u64
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            max_retries: RETRY_MAX_ATTEMPTS,
            backoff_ms: RETRY_BASE_BACKOFF
        }
    }
}

fn build_http() -> HttpConfig {
    let default = HttpConfig::default();
    HttpConfig {
        timeout: time::Duration::from_millis(env_to_u64("HTTP_TIMEOUT_MS", HTTP_TIMEOUT)),
        max_retries: env_to_u64("HTTP_MAX_RETRIES", RETRY_MAX_ATTEMPTS as u64) as usize,
        ..default
    }
}

///
/// Configuration for the external fingerprinting tool (chromaprint's fpcalc)
///
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub fpcalc_path: String,
    pub timeout: time::Duration
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            fpcalc_path: "fpcalc".to_string(),
            timeout: time::Duration::from_secs(120)
        }
    }
}

fn build_fingerprint() -> FingerprintConfig {
    FingerprintConfig {
        fpcalc_path: env_or("FPCALC_PATH", "fpcalc"),
        timeout: time::Duration::from_millis(env_to_u64("FPCALC_TIMEOUT_MS", 120_000))
    }
}

///
/// Configuration for discovery (deezer + youtube search) and download
///
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub artists_file: PathBuf,
    pub deezer_base: Url,
    pub youtube_base: Url,
    pub ytdlp_path: String,
    pub download_timeout: time::Duration,
    pub files_dir: PathBuf,
    pub cursor_path: PathBuf,
    pub max_duration_secs: u32
}

fn build_discovery() -> Result<DiscoveryConfig, IngestError> {
    let deezer_base  = base_url("DEEZER_BASE_URL", "https://api.deezer.com/", "api.deezer.com")?;
    let youtube_base = base_url(
        "YOUTUBE_BASE_URL", "https://www.youtube.com/", "www.youtube.com"
    )?;

    Ok( DiscoveryConfig {
        artists_file: PathBuf::from(env_or("ARTISTS_FILE", "./artists.json")),
        deezer_base,
        youtube_base,
        ytdlp_path: env_or("YTDLP_PATH", "yt-dlp"),
        download_timeout: time::Duration::from_millis(
            env_to_u64("DOWNLOAD_TIMEOUT_MS", 300_000)
        ),
        files_dir: PathBuf::from(env_or("FILES_DIR", "./files")),
        cursor_path: PathBuf::from(env_or("CURSOR_PATH", "./downloaded.json")),
        max_duration_secs: env_to_u32("MAX_DURATION_SECONDS", MAX_DURATION_SECONDS)?
    })
}

///
/// Configuration for the document + object store backends
///
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub project_id: String,
    pub api_key: String,
    pub storage_bucket: String,
    pub auth_token: Option<String>,
    pub firestore_base: Url,
    pub storage_base: Url
}

#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub db_url: String,
    pub asset_dir: PathBuf
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite:./data/tracks.db".to_string(),
            asset_dir: PathBuf::from("./data/assets")
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Firebase(FirebaseConfig),
    Local(LocalStoreConfig)
}

fn build_firebase() -> Result<FirebaseConfig, IngestError> {
    let project_id     = env_check("FIREBASE_PROJECT_ID")?;
    let api_key        = env_check("FIREBASE_API_KEY")?;
    let storage_bucket = env_check("FIREBASE_STORAGE_BUCKET")?;
    let auth_token     = std::env::var("FIREBASE_AUTH_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    let firestore_base = base_url(
        "FIRESTORE_BASE_URL",
        "https://firestore.googleapis.com/v1/",
        "firestore.googleapis.com"
    )?;
    let storage_base = base_url(
        "FIREBASE_STORAGE_BASE_URL",
        "https://firebasestorage.googleapis.com/v0/",
        "firebasestorage.googleapis.com"
    )?;

    Ok( FirebaseConfig {
        project_id, api_key, storage_bucket, auth_token, firestore_base, storage_base
    })
}

fn build_store() -> Result<StoreConfig, IngestError> {
    match env_or("STORE_BACKEND", "firebase").to_ascii_lowercase().as_str() {
        "firebase" | "firestore" => Ok(StoreConfig::Firebase(build_firebase()?)),
        "local" | "sqlite" => {
            let default = LocalStoreConfig::default();
            Ok(StoreConfig::Local(LocalStoreConfig {
                db_url: env_or("LOCAL_DB_URL", &default.db_url),
                asset_dir: std::env::var("LOCAL_ASSET_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(default.asset_dir)
            }))
        }
        other => Err(IngestError::Config(format!("unknown STORE_BACKEND {other}")))
    }
}

///
/// Configuration for how candidates become track records
///
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub collection: String,
    pub placeholder_art: String,
    pub location: String,
    pub dedup_fail_open: bool     // store errors during dedup count as no match
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collection: "tracks".to_string(),
            placeholder_art: PLACEHOLDER_ART.to_string(),
            location: "South Africa".to_string(),
            dedup_fail_open: true
        }
    }
}

fn build_ingest() -> IngestConfig {
    let default = IngestConfig::default();
    IngestConfig {
        collection: env_or("TRACKS_COLLECTION", &default.collection),
        placeholder_art: env_or("PLACEHOLDER_ART", &default.placeholder_art),
        location: env_or("TRACK_LOCATION", &default.location),
        dedup_fail_open: env_to_bool("DEDUP_FAIL_OPEN", default.dedup_fail_open)
    }
}

///
/// Configuration for the fingerprint http endpoint
///
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub run_batch: bool
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            uploads_dir: PathBuf::from("./uploads"),
            public_dir: PathBuf::from("./public"),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            run_batch: true
        }
    }
}

fn build_server() -> Result<ServerConfig, IngestError> {
    let default = ServerConfig::default();
    let port = match std::env::var("PORT") {
        Ok(p) => p.trim().parse::<u16>()
            .map_err(|e| IngestError::Config(format!("PORT invalid {e}")))?,
        Err(_) => default.port
    };

    Ok( ServerConfig {
        port,
        uploads_dir: PathBuf::from(env_or("UPLOADS_DIR", "./uploads")),
        public_dir: PathBuf::from(env_or("PUBLIC_DIR", "./public")),
        max_upload_bytes: default.max_upload_bytes,
        run_batch: env_to_bool("RUN_BATCH", default.run_batch)
    })
}

///
/// Configuration for the compressed archive of raw discovery payloads
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub raw_store_root: PathBuf,
    pub zstd_level: i32
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            raw_store_root: PathBuf::from("./data/raw"),
            zstd_level: 3
        }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,track_ingest=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: false,
            include_file_line: true,
            include_target: true
        }
    }
}

fn build_logging() -> LoggingConfig {
    let default = LoggingConfig::default();
    let format = match env_or("LOG_FORMAT", "json").to_ascii_lowercase().as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json
    };
    LoggingConfig {
        format,
        with_ansi: format == LogFormat::Pretty,
        ..default
    }
}

///
/// AppConfig which holds everything main wires together
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub fingerprint: FingerprintConfig,
    pub discovery: DiscoveryConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, IngestError> {
    dotenvy::dotenv().ok();

    let http        = build_http();
    let fingerprint = build_fingerprint();
    let discovery   = build_discovery()?;
    let store       = build_store()?;
    let ingest      = build_ingest();
    let server      = build_server()?;
    let persistence = PersistenceConfig {
        raw_store_root: PathBuf::from(env_or("RAW_STORE_ROOT", "./data/raw")),
        ..PersistenceConfig::default()
    };
    let logging     = build_logging();

    Ok( AppConfig {
        http, fingerprint, discovery, store, ingest, server, persistence, logging
    } )
}
