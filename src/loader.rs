//! JSON content loader: fetch, optional template transform, cache.
//!
//! A content container names a URL and optionally a cache-key modifier and a
//! template id. The fetched JSON is either returned as-is or turned into
//! markup by interpolating it into the named template. Either way the result
//! is cached under the composite key for the cache TTL.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::cache::{ContentCache, ContentRequest};
use crate::error::LoadError;
use crate::html::{self, ErrorAction};
use crate::source::ContentSource;

pub const LOAD_FAILED_MESSAGE: &str = "Falha ao carregar conteúdo";

/// Templates addressable by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(id.into(), template.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.templates.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every `*.html` file in `dir`; the file stem is the template id.
    pub fn load_dir(dir: &Path) -> io::Result<Self> {
        let mut registry = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_html = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("html"));
            if !is_html {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            registry.insert(id, std::fs::read_to_string(&path)?);
        }
        tracing::debug!(dir = %dir.display(), templates = registry.len(), "templates loaded");
        Ok(registry)
    }
}

pub struct ContentLoader<S> {
    source: S,
    cache: ContentCache,
    templates: TemplateRegistry,
}

/// Falsy cached values (null, false, 0, "") are treated as misses.
fn is_usable(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

impl<S: ContentSource> ContentLoader<S> {
    pub fn new(source: S, cache: ContentCache, templates: TemplateRegistry) -> Self {
        Self {
            source,
            cache,
            templates,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Return the content for `request`, from cache when a fresh entry
    /// exists, otherwise from the source (and then cached).
    pub async fn fetch_content(&self, request: &ContentRequest) -> Result<Value, LoadError> {
        let key = request.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            if is_usable(&cached) {
                tracing::debug!(url = %request.url, "content served from cache");
                return Ok(cached);
            }
        }

        let text = self.source.get(&request.url).await?;
        let data: Value = serde_json::from_str(&text)?;
        let content = match &request.template {
            Some(id) => Value::String(self.transform(&data, id)?),
            None => data,
        };

        self.cache.put(&key, content.clone()).await;
        tracing::info!(url = %request.url, template = ?request.template, "content fetched");
        Ok(content)
    }

    /// Interpolate `data` into the template named `template_id`.
    pub fn transform(&self, data: &Value, template_id: &str) -> Result<String, LoadError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| LoadError::TemplateNotFound(template_id.to_owned()))?;
        Ok(html::apply_template(template, data))
    }

    /// Markup for a content container: the loaded content, or the error panel
    /// with a reload action.
    pub async fn render(&self, request: &ContentRequest) -> String {
        match self.fetch_content(request).await {
            Ok(Value::String(html)) => html,
            Ok(other) => other.to_string(),
            Err(e) => {
                tracing::error!(url = %request.url, error = %e, "content load failed");
                html::render_error_panel(LOAD_FAILED_MESSAGE, ErrorAction::Reload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::source::tests::ScriptedSource;
    use serde_json::json;

    fn loader(pairs: &[(&str, &str)]) -> ContentLoader<ScriptedSource> {
        let mut templates = TemplateRegistry::new();
        templates.insert("member", "<li>${name} - ${role}</li>");
        ContentLoader::new(
            ScriptedSource::with(pairs),
            ContentCache::in_memory(DEFAULT_TTL),
            templates,
        )
    }

    #[tokio::test]
    async fn json_without_template_is_returned_as_data() {
        let loader = loader(&[("/data.json", r#"{"a": 1}"#)]);
        let content = loader.fetch_content(&ContentRequest::new("/data.json")).await.unwrap();
        assert_eq!(content, json!({"a": 1}));
    }

    #[tokio::test]
    async fn template_transforms_json_to_markup() {
        let loader = loader(&[("/team.json", r#"{"name": "Ana", "role": "Dev"}"#)]);
        let req = ContentRequest::new("/team.json").with_template("member");
        let content = loader.fetch_content(&req).await.unwrap();
        assert_eq!(content, json!("<li>Ana - Dev</li>"));
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let loader = loader(&[("/data.json", r#"{"a": 1}"#)]);
        let req = ContentRequest::new("/data.json");
        loader.fetch_content(&req).await.unwrap();
        loader.fetch_content(&req).await.unwrap();
        assert_eq!(loader.source.attempts(), vec!["/data.json"]);
    }

    #[tokio::test]
    async fn different_modifiers_do_not_share_entries() {
        let loader = loader(&[("/team.json", r#"{"name": "Ana", "role": "Dev"}"#)]);
        let plain = ContentRequest::new("/team.json");
        let templated = ContentRequest::new("/team.json").with_template("member");
        loader.fetch_content(&plain).await.unwrap();
        let content = loader.fetch_content(&templated).await.unwrap();
        assert_eq!(content, json!("<li>Ana - Dev</li>"));
        assert_eq!(loader.source.attempts().len(), 2);
    }

    #[tokio::test]
    async fn stale_cache_entry_triggers_refetch() {
        let loader = loader(&[("/data.json", r#"{"fresh": true}"#)]);
        let req = ContentRequest::new("/data.json");
        let long_ago = chrono::Utc::now() - chrono::Duration::hours(25);
        loader.cache().put_at(&req.cache_key(), json!({"fresh": false}), long_ago).await;

        let content = loader.fetch_content(&req).await.unwrap();
        assert_eq!(content, json!({"fresh": true}));
        assert_eq!(loader.source.attempts(), vec!["/data.json"]);
    }

    #[tokio::test]
    async fn falsy_cache_entries_are_refetched() {
        for falsy in [json!(null), json!(false), json!(0), json!("")] {
            let loader = loader(&[("/data.json", r#"{"a": 1}"#)]);
            let req = ContentRequest::new("/data.json");
            loader.cache().put(&req.cache_key(), falsy).await;

            let content = loader.fetch_content(&req).await.unwrap();
            assert_eq!(content, json!({"a": 1}));
            assert_eq!(loader.source.attempts(), vec!["/data.json"]);
        }
    }

    #[test]
    fn truthy_values_are_usable() {
        assert!(is_usable(&json!(true)));
        assert!(is_usable(&json!(3)));
        assert!(is_usable(&json!("x")));
        assert!(is_usable(&json!([])));
        assert!(is_usable(&json!({})));
    }

    #[tokio::test]
    async fn missing_template_is_an_error_and_not_cached() {
        let loader = loader(&[("/data.json", "{}")]);
        let req = ContentRequest::new("/data.json").with_template("nope");
        let err = loader.fetch_content(&req).await.unwrap_err();
        assert!(matches!(err, LoadError::TemplateNotFound(ref id) if id == "nope"));
        assert!(loader.cache().get(&req.cache_key()).await.is_none());
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let loader = loader(&[("/data.json", "<html>")]);
        let err = loader.fetch_content(&ContentRequest::new("/data.json")).await.unwrap_err();
        assert!(matches!(err, LoadError::Json(_)));
    }

    #[tokio::test]
    async fn render_failure_shows_reload_panel() {
        let loader = loader(&[]);
        let html = loader.render(&ContentRequest::new("/missing.json")).await;
        assert!(html.contains("error-message"));
        assert!(html.contains("location.reload()"));
        assert!(html.contains(LOAD_FAILED_MESSAGE));
    }

    #[test]
    fn registry_loads_html_files_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("card.html"), "<div>${t}</div>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let registry = TemplateRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("card"), Some("<div>${t}</div>"));
    }
}
