//!
//! src/errors.rs  Oct 18th, 2026
//!
//! Defines enums and methods of error conversion
//! for errors the ingest pipeline and fingerprint endpoint use
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("extraction error: {0}")]
    Extraction(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("upload error: {0}")]
    Upload(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl IngestError {
    /// Validation failures are permanent; everything the remote side reports
    /// may clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Http(_) | IngestError::StoreUnavailable(_) | IngestError::Db(_)
        )
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self { IngestError::Http(e.to_string()) }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self { IngestError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self { IngestError::Db(e.to_string()) }
}

impl From<url::ParseError> for IngestError {
    fn from(e: url::ParseError) -> Self { IngestError::Config(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_transient_validation_is_not() {
        assert!(IngestError::StoreUnavailable("503".into()).is_transient());
        assert!(IngestError::Db("locked".into()).is_transient());
        assert!(!IngestError::Validation("bad mime".into()).is_transient());
        assert!(!IngestError::Upload("denied".into()).is_transient());
    }

    #[test]
    fn json_errors_map_to_parse() {
        let e: IngestError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(e, IngestError::Parse(_)));
    }
}
