//! Initiative article pipeline: id, candidate paths, fetch, split, render.
//!
//! The article for id `robotica` lives at `assets/initiatives/robotica.md`.
//! The relative location is tried first, then the same path from the site
//! root. When neither resolves the page shows the error panel with a link
//! back home.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{ContentCache, ContentRequest};
use crate::config::SiteConfig;
use crate::error::LoadError;
use crate::frontmatter::{self, FrontMatter, InitiativeMeta};
use crate::html::{self, ErrorAction, PageShell, RenderedArticle};
use crate::source::{fetch_first, ContentSource, Fetched};

pub const NOT_FOUND_MESSAGE: &str = "Iniciativa não encontrada";
pub const ERROR_TITLE: &str = "Erro";

/// Cache-key modifier for raw initiative documents.
const CACHE_MODIFIER: &str = "initiative";

/// A fully loaded initiative.
#[derive(Debug, Clone)]
pub struct Initiative {
    pub id: String,
    /// Candidate location the document was read from.
    pub location: String,
    pub front_matter: FrontMatter,
    pub meta: InitiativeMeta,
    pub article: RenderedArticle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Ok,
    NotFound,
}

/// What the initiative page shows: the article, or the error panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativePage {
    pub status: PageStatus,
    pub document_title: String,
    pub heading: String,
    pub meta_html: String,
    pub article_html: String,
}

impl InitiativePage {
    pub fn not_found(message: &str, site_name: &str) -> Self {
        Self {
            status: PageStatus::NotFound,
            document_title: format!("{ERROR_TITLE} - {site_name}"),
            heading: ERROR_TITLE.to_owned(),
            meta_html: String::new(),
            article_html: html::render_error_panel(message, ErrorAction::Home),
        }
    }

    /// Complete HTML document for this page.
    pub fn to_document(&self, header_html: Option<&str>) -> String {
        html::build_page_shell(&PageShell {
            document_title: &self.document_title,
            heading: &self.heading,
            meta_html: &self.meta_html,
            article_html: &self.article_html,
            header_html,
        })
    }
}

impl From<Initiative> for InitiativePage {
    fn from(initiative: Initiative) -> Self {
        let article = initiative.article;
        Self {
            status: PageStatus::Ok,
            document_title: article.document_title,
            heading: article.title,
            meta_html: article.meta_html,
            article_html: article.article_html,
        }
    }
}

/// Cached form of a fetched document.
#[derive(Serialize, Deserialize)]
struct CachedDocument {
    location: String,
    text: String,
}

/// Accept ids made only of ASCII letters, digits, `-` and `_`.
pub fn validate_id(id: Option<&str>) -> Result<&str, LoadError> {
    let id = id.map(str::trim).unwrap_or_default();
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(LoadError::InvalidId(id.to_owned()))
    }
}

pub struct InitiativeLoader<S> {
    source: S,
    prefix: String,
    site_name: String,
    cache: Option<ContentCache>,
}

impl<S: ContentSource> InitiativeLoader<S> {
    pub fn new(source: S, prefix: &str, site_name: impl Into<String>) -> Self {
        Self {
            source,
            prefix: prefix.trim_matches('/').to_owned(),
            site_name: site_name.into(),
            cache: None,
        }
    }

    pub fn from_config(source: S, config: &SiteConfig) -> Self {
        Self::new(source, &config.content.initiatives_prefix, config.site_name.clone())
    }

    pub fn with_cache(mut self, cache: ContentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    /// Ordered candidate locations for `id`: relative first, then absolute.
    pub fn candidates(&self, id: &str) -> Vec<String> {
        let relative = format!("{}/{id}.md", self.prefix);
        let absolute = format!("/{relative}");
        vec![relative, absolute]
    }

    async fn fetch_document(&self, id: &str) -> Result<Fetched, LoadError> {
        let candidates = self.candidates(id);
        let cache_key = ContentRequest::new(candidates[0].as_str())
            .with_cache_key(CACHE_MODIFIER)
            .cache_key();

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&cache_key).await {
                if let Ok(doc) = serde_json::from_value::<CachedDocument>(cached) {
                    tracing::debug!(id, location = %doc.location, "initiative served from cache");
                    return Ok(Fetched {
                        location: doc.location,
                        body: doc.text,
                    });
                }
            }
        }

        let fetched = fetch_first(&self.source, &candidates).await?;
        if let Some(cache) = &self.cache {
            let doc = CachedDocument {
                location: fetched.location.clone(),
                text: fetched.body.clone(),
            };
            if let Ok(value) = serde_json::to_value(doc) {
                cache.put(&cache_key, value).await;
            }
        }
        Ok(fetched)
    }

    /// Load and render the initiative named by `id`.
    pub async fn load(&self, id: Option<&str>) -> Result<Initiative, LoadError> {
        let id = validate_id(id)?;
        let fetched = self.fetch_document(id).await?;
        tracing::info!(id, location = %fetched.location, "initiative loaded");

        let doc = frontmatter::split(&fetched.body);
        let meta = InitiativeMeta::from_front_matter(&doc.front_matter);
        let article = html::render_initiative(&meta, &doc.body, &self.site_name);

        Ok(Initiative {
            id: id.to_owned(),
            location: fetched.location,
            front_matter: doc.front_matter,
            meta,
            article,
        })
    }

    /// Page contents for `id`; every failure becomes the not-found panel.
    pub async fn page(&self, id: Option<&str>) -> InitiativePage {
        match self.load(id).await {
            Ok(initiative) => initiative.into(),
            Err(e) => {
                tracing::warn!(id = ?id, error = %e, "initiative unavailable");
                InitiativePage::not_found(NOT_FOUND_MESSAGE, &self.site_name)
            }
        }
    }
}

/// Front matter as JSON, for callers that want the raw mapping.
pub fn front_matter_json(front_matter: &FrontMatter) -> Value {
    serde_json::to_value(front_matter).unwrap_or(Value::Null)
}
