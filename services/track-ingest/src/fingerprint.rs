//!
//! src/fingerprint.rs  Oct 18th, 2026
//!
//! Runs chromaprint's `fpcalc -json` against a local audio file and parses
//! the payload. One process per call; the input file is never touched.
//!

use std::{ffi::OsStr, path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::FingerprintConfig;
use crate::errors::IngestError;
use crate::types::FingerprintRecord;

#[async_trait]
pub trait FingerprintExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<FingerprintRecord, IngestError>;

    /// Operator-facing context gathered after a failed extraction
    async fn diagnose(&self) -> Diagnostics;

    /// The command line as an operator would type it
    fn command_line(&self, path: &Path) -> String {
        format!("fpcalc -json \"{}\"", path.display())
    }
}

/// Troubleshooting fields reported next to a failed extraction
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fpcalc_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fpcalc_version_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fpcalc_path: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fpcalc_not_found: bool
}

#[derive(Debug, Clone)]
pub struct FpcalcExtractor {
    program: String,
    timeout: Duration
}

impl FpcalcExtractor {
    pub fn new(cfg: &FingerprintConfig) -> Self {
        Self { program: cfg.fpcalc_path.clone(), timeout: cfg.timeout }
    }

    async fn run(&self, args: &[&OsStr]) -> Result<std::process::Output, IngestError> {
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(IngestError::Extraction(
                format!("failed to run {}: {e}", self.program)
            )),
            Err(_) => Err(IngestError::Extraction(
                format!("{} timed out after {:?}", self.program, self.timeout)
            ))
        }
    }

    async fn version(&self) -> Result<String, IngestError> {
        let output = self.run(&[OsStr::new("-version")]).await?;
        if !output.status.success() {
            return Err(IngestError::Extraction(
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn resolve(&self) -> Option<String> {
        let output = Command::new("which")
            .arg(&self.program)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!path.is_empty()).then_some(path)
    }
}

#[async_trait]
impl FingerprintExtractor for FpcalcExtractor {
    async fn extract(&self, path: &Path) -> Result<FingerprintRecord, IngestError> {
        debug!(path = %path.display(), "fpcalc.run");

        let output = self.run(&[OsStr::new("-json"), path.as_os_str()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestError::Extraction(format!(
                "fpcalc exited with {}: {}", output.status, stderr.trim()
            )));
        }

        if !output.stderr.is_empty() {
            warn!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "fpcalc.stderr");
        }
        parse_fpcalc_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn diagnose(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics {
            os: std::env::consts::OS.to_string(),
            ..Diagnostics::default()
        };

        match self.version().await {
            Ok(v) => diagnostics.fpcalc_version = Some(v),
            Err(e) => {
                diagnostics.fpcalc_version_error = Some(e.to_string());
                match self.resolve().await {
                    Some(p) => diagnostics.fpcalc_path = Some(p),
                    None => diagnostics.fpcalc_not_found = true
                }
            }
        }
        diagnostics
    }

    fn command_line(&self, path: &Path) -> String {
        format!("{} -json \"{}\"", self.program, path.display())
    }
}

/// fpcalc prints `{"duration": 231.45, "fingerprint": "AQAD..."}`
pub fn parse_fpcalc_output(stdout: &str) -> Result<FingerprintRecord, IngestError> {
    let raw: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| IngestError::Parse(format!("fpcalc output: {e}")))?;

    let raw_fingerprint = raw.get("fingerprint")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IngestError::Parse("fpcalc output missing fingerprint".into()))?
        .to_string();

    let duration_seconds = raw.get("duration")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| IngestError::Parse("fpcalc output missing duration".into()))?;

    Ok( FingerprintRecord { raw_fingerprint, duration_seconds, raw } )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fpcalc_json() {
        let record = parse_fpcalc_output(
            r#"{"duration": 180.5, "fingerprint": "AQADtNIyRUkkZUqS"}"#
        ).unwrap();
        assert_eq!(record.raw_fingerprint, "AQADtNIyRUkkZUqS");
        assert_eq!(record.duration_seconds, 180.5);
        assert_eq!(record.raw["duration"], 180.5);
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        for bad in [
            "",
            "not json",
            r#"{"duration": 12}"#,
            r#"{"fingerprint": "AQAD"}"#,
            r#"{"duration": "long", "fingerprint": "AQAD"}"#,
            r#"{"duration": 1, "fingerprint": ""}"#
        ] {
            assert!(
                matches!(parse_fpcalc_output(bad), Err(IngestError::Parse(_))),
                "expected parse error for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn missing_tool_is_an_extraction_error() {
        let extractor = FpcalcExtractor::new(&FingerprintConfig {
            fpcalc_path: "fpcalc-definitely-not-installed".into(),
            timeout: Duration::from_secs(5)
        });
        let result = extractor.extract(Path::new("/nonexistent/file.mp3")).await;
        assert!(matches!(result, Err(IngestError::Extraction(_))));

        let diagnostics = extractor.diagnose().await;
        assert!(diagnostics.fpcalc_version.is_none());
        assert!(diagnostics.fpcalc_version_error.is_some());
        assert!(diagnostics.fpcalc_not_found);
        assert_eq!(diagnostics.os, std::env::consts::OS);
    }

    #[test]
    fn command_line_quotes_the_path() {
        let extractor = FpcalcExtractor::new(&FingerprintConfig::default());
        assert_eq!(
            extractor.command_line(Path::new("uploads/a b.mp3")),
            "fpcalc -json \"uploads/a b.mp3\""
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_fpcalc_times_out_as_extraction_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-fpcalc");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let extractor = FpcalcExtractor::new(&FingerprintConfig {
            fpcalc_path: script.display().to_string(),
            timeout: Duration::from_millis(50)
        });

        let started = std::time::Instant::now();
        let err = extractor.extract(Path::new("song.mp3")).await.unwrap_err();
        assert!(matches!(&err, IngestError::Extraction(msg) if msg.contains("timed out")), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
