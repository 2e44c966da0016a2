//! Error types shared across the content pipeline.
//!
//! Storage failures are deliberately narrow: callers on the cache path log them
//! and carry on, so they never surface to the page.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A single location could not be retrieved from a [`crate::source::ContentSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{location} returned HTTP {status}")]
    Status { location: String, status: u16 },

    #[error("request for {location} failed: {source}")]
    Http {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("reading {location} failed: {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid location: {0}")]
    InvalidLocation(String),
}

/// Ordered-fallback retrieval failed for every candidate.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found (tried: {})", .attempts.join(", "))]
    NotFound { attempts: Vec<String> },
}

/// Failures of the content and initiative loaders.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("content is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("invalid initiative id: {0:?}")]
    InvalidId(String),
}

impl LoadError {
    /// True for every variant that means "there is nothing to show".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LoadError::Fetch(FetchError::NotFound { .. }) | LoadError::InvalidId(_)
        )
    }
}

/// Key-value store write failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },

    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
