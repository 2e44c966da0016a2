//! Content pipeline and reader-preference state for a static, markdown-backed
//! website.
//!
//! The crate fetches content with an ordered fallback, caches it with a fixed
//! TTL, splits front matter from markdown and renders pages. Page behavior
//! (font size, theme, menu, analytics) is modelled as events in and effects
//! out, with no document attached.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod html;
pub mod initiative;
pub mod loader;
pub mod posts;
pub mod prefs;
pub mod serve;
pub mod source;
pub mod store;
pub mod ui;
