//!
//! src/storage.rs  Oct 18th, 2026
//!
//! Object storage for audio assets. Uploads a local file under a
//! destination key and hands back a url that can be fetched later.
//!

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{FirebaseConfig, HttpConfig, LocalStoreConfig};
use crate::errors::IngestError;
use crate::fetch::base_client;

#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn upload(&self, path: &Path, destination_key: &str, mime: &str) ->
        Result<String, IngestError>;
}

#[derive(Clone, Debug)]
pub struct FirebaseStorage {
    http: Client,
    base: Url,
    bucket: String,
    auth_token: Option<String>
}

impl FirebaseStorage {
    pub fn new(http_config: &HttpConfig, cfg: &FirebaseConfig) ->
        Result<Self, IngestError> {
        Ok( Self {
            http: base_client(http_config)?,
            base: cfg.storage_base.clone(),
            bucket: cfg.storage_bucket.clone(),
            auth_token: cfg.auth_token.clone()
        })
    }

    fn objects_url(&self) -> Result<Url, IngestError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| IngestError::Config(format!("cannot-be-a-base url {}", self.base)))?
            .pop_if_empty()
            .extend(["b", self.bucket.as_str(), "o"]);
        Ok(url)
    }

    /// POST b/{bucket}/o?uploadType=media&name={key}
    pub fn upload_request(&self, destination_key: &str, mime: &str, body: Vec<u8>) ->
        Result<RequestBuilder, IngestError> {
        let url = self.objects_url()?;
        let req = self.http.post(url)
            .query(&[("uploadType", "media"), ("name", destination_key)])
            .header(header::CONTENT_TYPE, mime)
            .body(body);
        Ok(match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req
        })
    }

    /// Public download url for an uploaded object; the object name is a
    /// single encoded path segment
    pub fn download_url(&self, name: &str, token: Option<&str>) -> Result<String, IngestError> {
        let mut url = self.objects_url()?;
        url.path_segments_mut()
            .map_err(|_| IngestError::Config(format!("cannot-be-a-base url {}", self.base)))?
            .push(name);
        url.query_pairs_mut().append_pair("alt", "media");
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl AssetUploader for FirebaseStorage {
    async fn upload(&self, path: &Path, destination_key: &str, mime: &str) ->
        Result<String, IngestError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::Upload(format!("read {}: {e}", path.display())))?;

        let resp = self.upload_request(destination_key, mime, bytes)?
            .send()
            .await
            .map_err(|e| IngestError::Upload(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Upload(format!("storage {status}: {}", body.trim())));
        }

        let meta: Value = resp.json()
            .await
            .map_err(|e| IngestError::Upload(format!("upload response: {e}")))?;
        let name = meta.get("name").and_then(|v| v.as_str()).unwrap_or(destination_key);
        // several tokens may come back comma separated; any works
        let token = meta.get("downloadTokens")
            .and_then(|v| v.as_str())
            .and_then(|t| t.split(',').next());

        debug!(name, "storage.upload");
        self.download_url(name, token)
    }
}

/// Copies assets into a directory and returns file:// urls
#[derive(Clone, Debug)]
pub struct LocalAssetStore {
    root: PathBuf
}

impl LocalAssetStore {
    pub fn new(cfg: &LocalStoreConfig) -> Self {
        Self { root: cfg.asset_dir.clone() }
    }
}

#[async_trait]
impl AssetUploader for LocalAssetStore {
    async fn upload(&self, path: &Path, destination_key: &str, _mime: &str) ->
        Result<String, IngestError> {
        if destination_key.split('/').any(|s| s.is_empty() || s == "..") {
            return Err(IngestError::Upload(format!("bad destination key {destination_key}")));
        }

        let target = self.root.join(destination_key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::Upload(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| IngestError::Upload(format!("copy to {}: {e}", target.display())))?;

        let absolute = tokio::fs::canonicalize(&target)
            .await
            .map_err(|e| IngestError::Upload(e.to_string()))?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| IngestError::Upload(format!("no file url for {}", absolute.display())))?;

        debug!(path = %absolute.display(), "storage.local.upload");
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firebase() -> FirebaseStorage {
        let cfg = FirebaseConfig {
            project_id: "demo-proj".into(),
            api_key: "k".into(),
            storage_bucket: "demo-proj.appspot.com".into(),
            auth_token: Some("t0ken".into()),
            firestore_base: Url::parse("https://firestore.googleapis.com/v1/").unwrap(),
            storage_base: Url::parse("https://firebasestorage.googleapis.com/v0/").unwrap()
        };
        FirebaseStorage::new(&HttpConfig::default(), &cfg).unwrap()
    }

    #[test]
    fn upload_request_shape() {
        let req = firebase()
            .upload_request("tracks/music_1_2.mp3", "audio/mpeg", vec![1, 2, 3])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            req.url().as_str(),
            "https://firebasestorage.googleapis.com/v0/b/demo-proj.appspot.com/o?uploadType=media&name=tracks%2Fmusic_1_2.mp3"
        );
        assert_eq!(req.headers()[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(req.headers()[header::AUTHORIZATION], "Bearer t0ken");
    }

    #[test]
    fn download_url_encodes_object_name() {
        let url = firebase().download_url("tracks/music_1_2.mp3", Some("abc")).unwrap();
        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/demo-proj.appspot.com/o/tracks%2Fmusic_1_2.mp3?alt=media&token=abc"
        );
    }

    #[tokio::test]
    async fn local_store_copies_and_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mp3");
        std::fs::write(&src, b"ID3").unwrap();

        let store = LocalAssetStore::new(&LocalStoreConfig {
            db_url: "sqlite::memory:".into(),
            asset_dir: dir.path().join("assets")
        });
        let url = store.upload(&src, "tracks/music_1_2.mp3", "audio/mpeg").await.unwrap();

        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/assets/tracks/music_1_2.mp3"));
        assert!(src.exists(), "source is left for the caller to clean up");
        assert_eq!(std::fs::read(dir.path().join("assets/tracks/music_1_2.mp3")).unwrap(), b"ID3");
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAssetStore::new(&LocalStoreConfig {
            db_url: "sqlite::memory:".into(),
            asset_dir: dir.path().to_path_buf()
        });
        let err = store.upload(&dir.path().join("x"), "../x.mp3", "audio/mpeg").await.unwrap_err();
        assert!(matches!(err, IngestError::Upload(_)));
    }
}
