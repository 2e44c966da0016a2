//! Content retrieval with an ordered fallback over candidate locations.
//!
//! A [`ContentSource`] answers one location at a time. [`fetch_first`] walks
//! a candidate list front to back, attempting each location exactly once with
//! no delay between attempts, and stops at the first success.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::error::{FetchError, SourceError};
use crate::html;

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Retrieve the text at `location`. Any non-success outcome is an error.
    async fn get(&self, location: &str) -> Result<String, SourceError>;
}

/// Content successfully retrieved from one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub location: String,
    pub body: String,
}

/// Try `candidates` in order and return the first one that succeeds.
///
/// Returns [`FetchError::NotFound`] listing every attempted location when all
/// of them fail (or when the list is empty).
pub async fn fetch_first<S, I>(source: &S, candidates: I) -> Result<Fetched, FetchError>
where
    S: ContentSource + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut attempts = Vec::new();
    for candidate in candidates {
        let location = candidate.as_ref();
        match source.get(location).await {
            Ok(body) => {
                tracing::debug!(location, attempt = attempts.len() + 1, "fetch succeeded");
                return Ok(Fetched {
                    location: location.to_owned(),
                    body,
                });
            }
            Err(e) => {
                tracing::debug!(location, error = %e, "candidate failed, trying next");
                attempts.push(location.to_owned());
            }
        }
    }
    tracing::info!(attempts = attempts.len(), "all candidates failed");
    Err(FetchError::NotFound { attempts })
}

/// Fetch an HTML fragment (e.g. the shared header). On failure the fixed
/// component error fragment is returned instead.
pub async fn load_fragment<S: ContentSource + ?Sized>(source: &S, path: &str) -> String {
    match source.get(path).await {
        Ok(html) => html,
        Err(e) => {
            tracing::error!(path, error = %e, "failed to load component");
            html::component_error()
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Fetches over HTTP relative to a base URL: `a/b.md` resolves against the
/// base URL's directory, `/a/b.md` against its origin.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base: Url,
}

impl HttpSource {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn resolve(&self, location: &str) -> Result<Url, SourceError> {
        self.base
            .join(location)
            .map_err(|_| SourceError::InvalidLocation(location.to_owned()))
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    async fn get(&self, location: &str) -> Result<String, SourceError> {
        let url = self.resolve(location)?;
        let http_err = |source| SourceError::Http {
            location: url.to_string(),
            source,
        };
        let resp = self.client.get(url.clone()).send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                location: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(http_err)
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Reads from a site root on disk. `page_dir` (relative to the root) plays
/// the role of the current page's directory for relative locations.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
    page_dir: String,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_dir: String::new(),
        }
    }

    pub fn with_page_dir(mut self, page_dir: impl Into<String>) -> Self {
        self.page_dir = page_dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a location to a path under the root, or `None` when it is a remote
    /// URL or would escape the root.
    pub fn resolve(&self, location: &str) -> Option<PathBuf> {
        if location.contains("://") || location.starts_with("//") {
            return None;
        }
        let (path, _suffix) = split_url_suffix(location);
        let joined = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("{}/{}", self.page_dir, path)
        };
        normalize_path(&joined).map(|rel| self.root.join(rel))
    }
}

#[async_trait]
impl ContentSource for DirSource {
    async fn get(&self, location: &str) -> Result<String, SourceError> {
        let path = self
            .resolve(location)
            .ok_or_else(|| SourceError::InvalidLocation(location.to_owned()))?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|source| SourceError::Io {
                location: location.to_owned(),
                source,
            })?;
        if !meta.is_file() {
            return Err(SourceError::Io {
                location: location.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a file"),
            });
        }
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Io {
                location: location.to_owned(),
                source,
            })
    }
}

/// Split a URL into its path and trailing query/fragment suffix.
pub fn split_url_suffix(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(pos) => (&url[..pos], &url[pos..]),
        None => (url, ""),
    }
}

/// Normalize a decoded URL path, stripping `.` and `..` components.
///
/// Returns `None` if a `..` would climb above the root.
pub fn normalize_path(decoded: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts.iter().collect())
}
