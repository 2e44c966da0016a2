//! Interaction analytics: an in-memory event buffer mirrored to the durable
//! store and periodically shipped to the collection endpoint in one batch.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AnalyticsConfig;
use crate::error::SourceError;
use crate::store::{KeyValueStore, Storage};

pub const EVENTS_KEY: &str = "analytics_events";
pub const SESSION_KEY: &str = "analytics_session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// ISO-8601 with millisecond precision, UTC.
    pub timestamp: String,
    pub session_id: String,
}

/// Request body of the collection endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsBatch {
    pub events: Vec<AnalyticsEvent>,
}

/// The page being viewed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub path: String,
    pub title: String,
    pub referrer: String,
}

/// The link or button that was clicked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickTarget {
    /// Lower-case tag name, `a` or `button`.
    pub tag: String,
    pub text: String,
    pub path: String,
    pub id: String,
    pub class: String,
}

/// Session id for this browsing session, created on first use.
pub fn session_id(session: &mut dyn KeyValueStore, now: DateTime<Utc>) -> String {
    if let Some(id) = session.get(SESSION_KEY).filter(|id| !id.is_empty()) {
        return id;
    }
    let id = format!("session_{}", now.timestamp_millis());
    if let Err(e) = session.set(SESSION_KEY, &id) {
        tracing::warn!(error = %e, "could not persist analytics session id");
    }
    id
}

/// Events handed to a sink, with the buffer position they run up to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBatch {
    pub events: Vec<AnalyticsEvent>,
    /// Sequence number one past the last event in `events`.
    pub through: u64,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[derive(Debug)]
pub struct Analytics {
    events: Vec<AnalyticsEvent>,
    /// Sequence number of `events[0]`. Advances whenever events leave the
    /// front of the buffer, whether delivered or truncated.
    first_seq: u64,
    retain_on_quota: usize,
    page_started: DateTime<Utc>,
}

impl Analytics {
    pub fn new(retain_on_quota: usize, page_started: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            first_seq: 0,
            retain_on_quota,
            page_started,
        }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self::new(config.retain_on_quota, Utc::now())
    }

    pub fn events(&self) -> &[AnalyticsEvent] {
        &self.events
    }

    /// Record an event and mirror the buffer to the durable store.
    pub fn log_event(&mut self, storage: &mut Storage, kind: &str, data: Value) -> AnalyticsEvent {
        self.log_event_at(storage, kind, data, Utc::now())
    }

    pub fn log_event_at(
        &mut self,
        storage: &mut Storage,
        kind: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> AnalyticsEvent {
        let event = AnalyticsEvent {
            kind: kind.to_owned(),
            data,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: session_id(storage.session.as_mut(), now),
        };
        tracing::debug!(kind, session = %event.session_id, "analytics event");
        self.events.push(event.clone());
        self.save(storage.local.as_mut());
        event
    }

    pub fn track_page_view(&mut self, storage: &mut Storage, page: &PageContext, now: DateTime<Utc>) {
        self.page_started = now;
        let data = json!({
            "path": page.path,
            "title": page.title,
            "referrer": page.referrer,
        });
        self.log_event_at(storage, "pageview", data, now);
    }

    pub fn track_click(&mut self, storage: &mut Storage, target: &ClickTarget, now: DateTime<Utc>) {
        let data = json!({
            "type": target.tag,
            "text": target.text,
            "path": target.path,
            "id": target.id,
            "class": target.class,
        });
        self.log_event_at(storage, "click", data, now);
    }

    /// Record whole seconds spent since the page view, rounded.
    pub fn track_time_on_page(&mut self, storage: &mut Storage, path: &str, now: DateTime<Utc>) {
        let millis = now
            .signed_duration_since(self.page_started)
            .num_milliseconds()
            .max(0);
        let seconds = (millis + 500) / 1000;
        let data = json!({ "seconds": seconds, "path": path });
        self.log_event_at(storage, "timeOnPage", data, now);
    }

    /// Mirror the buffer to the durable store. When the store refuses the
    /// write, only the most recent events are kept in memory.
    fn save(&mut self, local: &mut dyn KeyValueStore) {
        let text = match serde_json::to_string(&self.events) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "could not encode analytics events");
                return;
            }
        };
        if let Err(e) = local.set(EVENTS_KEY, &text) {
            let excess = self.events.len().saturating_sub(self.retain_on_quota);
            self.drop_front(excess);
            tracing::warn!(error = %e, kept = self.events.len(), "could not save analytics events, truncating");
        }
    }

    fn drop_front(&mut self, count: usize) {
        let count = count.min(self.events.len());
        self.events.drain(..count);
        self.first_seq += count as u64;
    }

    fn end_seq(&self) -> u64 {
        self.first_seq + self.events.len() as u64
    }

    /// Snapshot of the events awaiting delivery.
    pub fn pending(&self) -> PendingBatch {
        PendingBatch {
            events: self.events.clone(),
            through: self.end_seq(),
        }
    }

    /// Drop every buffered event before sequence `through` after a successful
    /// send. Events logged while the send was in flight stay buffered, even
    /// if truncation moved them to the front meanwhile.
    pub fn acknowledge(&mut self, through: u64, local: &mut dyn KeyValueStore) {
        let delivered = through.saturating_sub(self.first_seq);
        self.drop_front(usize::try_from(delivered).unwrap_or(usize::MAX));
        if self.events.is_empty() {
            if let Err(e) = local.remove(EVENTS_KEY) {
                tracing::warn!(error = %e, "could not clear analytics backup");
            }
        } else {
            self.save(local);
        }
    }

    /// Send the whole buffer in one batch. On success the buffer and its
    /// durable backup are cleared; on failure everything is kept for the next
    /// attempt. Returns whether a batch was delivered.
    pub async fn sync(&mut self, sink: &dyn AnalyticsSink, local: &mut dyn KeyValueStore) -> bool {
        if self.events.is_empty() {
            return false;
        }
        match sink.send(&self.events).await {
            Ok(()) => {
                let delivered = self.events.len();
                self.acknowledge(self.end_seq(), local);
                tracing::info!(delivered, "analytics synced");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, pending = self.events.len(), "analytics sync failed");
                false
            }
        }
    }
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SourceError>;
}

/// POSTs `{ "events": [...] }` as JSON to the collection endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl AnalyticsSink for HttpSink {
    async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SourceError> {
        let location = self.endpoint.to_string();
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "events": events }))
            .send()
            .await
            .map_err(|source| SourceError::Http {
                location: location.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                location,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
