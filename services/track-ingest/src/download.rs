//!
//! src/download.rs  Oct 18th, 2026
//!
//! Fetches the audio of a video as mp3 into the files directory using
//! yt-dlp. The resulting path is `<files_dir>/<video id>.mp3`, the same
//! path the orchestrator looks for.
//!

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::config::DiscoveryConfig;
use crate::errors::IngestError;
use crate::types::VideoId;

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, video_id: &VideoId) -> Result<PathBuf, IngestError>;
}

/// Local path a downloaded candidate is expected at
pub fn audio_path(files_dir: &Path, video_id: &VideoId) -> PathBuf {
    files_dir.join(format!("{}.mp3", video_id.as_str()))
}

pub fn watch_url(base: &Url, video_id: &VideoId) -> Result<Url, IngestError> {
    let mut url = base.join("watch")?;
    url.query_pairs_mut().append_pair("v", video_id.as_str());
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    program: String,
    youtube_base: Url,
    files_dir: PathBuf,
    timeout: Duration
}

impl YtDlpDownloader {
    pub fn new(cfg: &DiscoveryConfig) -> Self {
        Self {
            program: cfg.ytdlp_path.clone(),
            youtube_base: cfg.youtube_base.clone(),
            files_dir: cfg.files_dir.clone(),
            timeout: cfg.download_timeout
        }
    }

    /// yt-dlp arguments; the output template keeps the id as the stem
    pub fn args(&self, video_id: &VideoId) -> Result<Vec<String>, IngestError> {
        let template = self.files_dir.join(format!("{}.%(ext)s", video_id.as_str()));
        Ok(vec![
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            template.display().to_string(),
            watch_url(&self.youtube_base, video_id)?.to_string()
        ])
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, video_id: &VideoId) -> Result<PathBuf, IngestError> {
        if !video_id.is_well_formed() {
            return Err(IngestError::Validation(format!("malformed video id {:?}", video_id.as_str())));
        }
        tokio::fs::create_dir_all(&self.files_dir).await?;

        let target = audio_path(&self.files_dir, video_id);
        // stale leftovers from an interrupted run
        match tokio::fs::remove_file(&target).await {
            Ok(()) => debug!(path = %target.display(), "download.stale.removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into())
        }

        let child = Command::new(&self.program)
            .args(self.args(video_id)?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(IngestError::Http(
                format!("failed to run {}: {e}", self.program)
            )),
            Err(_) => return Err(IngestError::Http(
                format!("download of {video_id} timed out after {:?}", self.timeout)
            ))
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestError::Http(format!(
                "{} exited with {}: {}", self.program, output.status, stderr.trim()
            )));
        }

        info!(video_id = %video_id, path = %target.display(), "download.done");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader(files_dir: &Path) -> YtDlpDownloader {
        YtDlpDownloader {
            program: "yt-dlp".into(),
            youtube_base: Url::parse("https://www.youtube.com/").unwrap(),
            files_dir: files_dir.to_path_buf(),
            timeout: Duration::from_secs(5)
        }
    }

    #[test]
    fn builds_watch_url_and_args() {
        let id = VideoId("yViZn6Z9Wq8".into());
        let base = Url::parse("https://www.youtube.com/").unwrap();
        assert_eq!(
            watch_url(&base, &id).unwrap().as_str(),
            "https://www.youtube.com/watch?v=yViZn6Z9Wq8"
        );

        let args = downloader(Path::new("files")).args(&id).unwrap();
        assert_eq!(&args[..3], &["-x", "--audio-format", "mp3"]);
        assert_eq!(args[5], "files/yViZn6Z9Wq8.%(ext)s");
        assert_eq!(audio_path(Path::new("files"), &id), PathBuf::from("files/yViZn6Z9Wq8.mp3"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error_and_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let id = VideoId("abc".into());
        let stale = audio_path(dir.path(), &id);
        std::fs::write(&stale, b"partial").unwrap();

        let mut dl = downloader(dir.path());
        dl.program = "/nonexistent/yt-dlp".into();
        assert!(dl.download(&id).await.is_err());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn path_like_ids_never_reach_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("files");
        let outside = dir.path().join("x.mp3");
        std::fs::write(&outside, b"keep").unwrap();

        let dl = downloader(&files);
        let result = dl.download(&VideoId("../x".into())).await;
        assert!(matches!(result, Err(IngestError::Validation(_))));
        assert!(outside.exists());
        assert!(!files.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_download_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-yt-dlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut dl = downloader(dir.path());
        dl.program = script.display().to_string();
        dl.timeout = Duration::from_millis(50);

        let started = std::time::Instant::now();
        let err = dl.download(&VideoId("abc".into())).await.unwrap_err();
        assert!(matches!(&err, IngestError::Http(msg) if msg.contains("timed out")), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
