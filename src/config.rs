//! Site configuration loaded from an optional TOML file.
//!
//! Every section carries `#[serde(default)]`, so an empty file (or no file at
//! all) yields the stock settings of the live site.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SITE_NAME: &str = "Guanambi Robotics";
pub const DEFAULT_INITIATIVES_PREFIX: &str = "assets/initiatives";
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 24;
pub const DEFAULT_ANALYTICS_ENDPOINT: &str = "/api/analytics";
pub const DEFAULT_POSTS_ENDPOINT: &str = "/api/posts";
pub const DEFAULT_HEADER_COMPONENT: &str = "/assets/components/header.html";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Appended to every document title (`"<title> - <site_name>"`).
    pub site_name: String,
    pub content: ContentConfig,
    pub accessibility: AccessibilityConfig,
    pub analytics: AnalyticsConfig,
    pub posts: PostsConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_name: DEFAULT_SITE_NAME.to_owned(),
            content: ContentConfig::default(),
            accessibility: AccessibilityConfig::default(),
            analytics: AnalyticsConfig::default(),
            posts: PostsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Path prefix (relative, no leading slash) under which initiative
    /// markdown files live.
    pub initiatives_prefix: String,
    /// Directory for the on-disk content cache. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_hours: u64,
    /// Directory of `<id>.html` templates used by the content loader.
    pub templates_dir: Option<PathBuf>,
    /// Site-relative path of the header component fragment.
    pub header_component: String,
    /// Optional whole-request timeout for outbound fetches. Unset means none.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            initiatives_prefix: DEFAULT_INITIATIVES_PREFIX.to_owned(),
            cache_dir: None,
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            templates_dir: None,
            header_component: DEFAULT_HEADER_COMPONENT.to_owned(),
            request_timeout_secs: None,
        }
    }
}

impl ContentConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AccessibilityConfig {
    pub font_default: u16,
    pub font_min: u16,
    pub font_max: u16,
    pub font_step: u16,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            font_default: 100,
            font_min: 90,
            font_max: 150,
            font_step: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub endpoint: String,
    pub sync_interval_secs: u64,
    /// Events kept when the durable store refuses a write.
    pub retain_on_quota: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ANALYTICS_ENDPOINT.to_owned(),
            sync_interval_secs: 300,
            retain_on_quota: 50,
        }
    }
}

impl AnalyticsConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostsConfig {
    pub endpoint: String,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_POSTS_ENDPOINT.to_owned(),
        }
    }
}

impl SiteConfig {
    /// Load configuration from `path`, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), site = %config.site_name, "config loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SiteConfig::from_toml("").unwrap();
        assert_eq!(config.site_name, DEFAULT_SITE_NAME);
        assert_eq!(config.content.cache_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.content.initiatives_prefix, "assets/initiatives");
        assert!(config.content.request_timeout().is_none());
        assert_eq!(config.accessibility.font_min, 90);
        assert_eq!(config.accessibility.font_max, 150);
        assert_eq!(config.analytics.endpoint, "/api/analytics");
        assert_eq!(config.analytics.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.posts.endpoint, "/api/posts");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = SiteConfig::from_toml(
            "site_name = \"Demo\"\n[accessibility]\nfont_min = 80\n[content]\ncache_ttl_hours = 1\n",
        )
        .unwrap();
        assert_eq!(config.site_name, "Demo");
        assert_eq!(config.accessibility.font_min, 80);
        assert_eq!(config.accessibility.font_max, 150);
        assert_eq!(config.content.cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn huge_cache_ttl_saturates() {
        let config =
            SiteConfig::from_toml("[content]\ncache_ttl_hours = 9223372036854775807\n").unwrap();
        assert_eq!(config.content.cache_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn load_without_path_is_default() {
        let config = SiteConfig::load(None).unwrap();
        assert_eq!(config.site_name, DEFAULT_SITE_NAME);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SiteConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reports_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "site_name = [").unwrap();
        let err = SiteConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
