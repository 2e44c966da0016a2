//! Paged blog feed used for infinite scroll.
//!
//! The first page is part of the static HTML; every call to
//! [`PostFeed::load_next`] fetches the following page and yields only posts
//! that have not been seen before.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::ContentSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: Value,
    pub title: String,
    pub date: String,
    pub category: String,
    pub excerpt: String,
    pub image: String,
    pub url: String,
}

impl Post {
    /// Identity used for de-duplication. String and numeric ids are both
    /// accepted; `"7"` and `7` name the same post.
    pub fn key(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

pub struct PostFeed<S> {
    source: S,
    endpoint: String,
    current_page: u32,
    seen: HashSet<String>,
}

impl<S: ContentSource> PostFeed<S> {
    pub fn new(source: S, endpoint: impl Into<String>) -> Self {
        Self {
            source,
            endpoint: endpoint.into(),
            current_page: 1,
            seen: HashSet::new(),
        }
    }

    /// Record posts already present in the page so they are not repeated.
    pub fn mark_seen<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        self.seen.extend(keys.into_iter().map(str::to_owned));
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn page_location(&self, page: u32) -> String {
        format!("{}?page={}", self.endpoint, page)
    }

    /// Fetch one page. Any failure is logged and yields no posts.
    pub async fn fetch_page(&self, page: u32) -> Vec<Post> {
        let location = self.page_location(page);
        let text = match self.source.get(&location).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(page, error = %e, "failed to load posts");
                return Vec::new();
            }
        };
        match serde_json::from_str(&text) {
            Ok(posts) => posts,
            Err(e) => {
                tracing::error!(page, error = %e, "posts response is not a post list");
                Vec::new()
            }
        }
    }

    /// Advance to the next page and return the posts not seen before, in
    /// server order. The page counter advances even when the fetch fails.
    pub async fn load_next(&mut self) -> Vec<Post> {
        self.current_page += 1;
        let page = self.current_page;
        let posts = self.fetch_page(page).await;
        let fetched = posts.len();
        let fresh: Vec<Post> = posts
            .into_iter()
            .filter(|post| self.seen.insert(post.key()))
            .collect();
        tracing::debug!(page, fetched, fresh = fresh.len(), "posts page loaded");
        fresh
    }
}
