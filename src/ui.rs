//! Page-level interaction state.
//!
//! [`UiController`] owns everything a page script would otherwise keep in
//! globals: preferences, the mobile menu and the analytics buffer. Host code
//! feeds it [`UiEvent`]s and applies the [`Effect`]s it returns; the
//! controller itself never touches a document.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::analytics::{Analytics, AnalyticsSink, ClickTarget, PageContext};
use crate::config::SiteConfig;
use crate::prefs::{FontAdjustment, FontLimits, Preferences, Theme};
use crate::store::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    FontIncrease,
    FontDecrease,
    ThemeToggle,
    SystemThemeChanged { prefers_dark: bool },
    MenuToggle,
    NavLinkClicked,
    Click(ClickTarget),
    PageView(PageContext),
    PageUnload { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Speak a message through the polite live region.
    Announce(String),
    /// Set the root font size, in percent.
    ApplyFontSize(u16),
    /// Switch the document theme and relabel the toggle button.
    ApplyTheme {
        theme: Theme,
        toggle_label: &'static str,
    },
    SetMenuExpanded(bool),
}

impl Effect {
    fn theme(theme: Theme) -> Self {
        Effect::ApplyTheme {
            theme,
            toggle_label: theme.toggle_label(),
        }
    }
}

/// Mobile navigation menu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavMenu {
    expanded: bool,
}

impl NavMenu {
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn toggle(&mut self) -> bool {
        self.expanded = !self.expanded;
        self.expanded
    }

    pub fn collapse(&mut self) {
        self.expanded = false;
    }
}

pub struct UiController {
    prefs: Preferences,
    menu: NavMenu,
    analytics: Analytics,
    storage: Storage,
}

impl UiController {
    pub fn new(storage: Storage, config: &SiteConfig, system_prefers_dark: bool) -> Self {
        let limits = FontLimits::from_config(&config.accessibility);
        let prefs = Preferences::load(&*storage.local, limits, system_prefers_dark);
        Self {
            prefs,
            menu: NavMenu::default(),
            analytics: Analytics::from_config(&config.analytics),
            storage,
        }
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn menu(&self) -> &NavMenu {
        &self.menu
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Effects that bring a freshly loaded page in line with the saved
    /// preferences.
    pub fn initial_effects(&self) -> Vec<Effect> {
        vec![
            Effect::ApplyFontSize(self.prefs.font.value()),
            Effect::theme(self.prefs.theme.theme),
            Effect::SetMenuExpanded(self.menu.is_expanded()),
        ]
    }

    pub fn dispatch(&mut self, event: UiEvent) -> Vec<Effect> {
        self.dispatch_at(event, Utc::now())
    }

    pub fn dispatch_at(&mut self, event: UiEvent, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            UiEvent::FontIncrease => {
                let adjustment = self.prefs.font.increase();
                self.font_effects(adjustment)
            }
            UiEvent::FontDecrease => {
                let adjustment = self.prefs.font.decrease();
                self.font_effects(adjustment)
            }
            UiEvent::ThemeToggle => {
                let theme = self.prefs.theme.toggle();
                self.prefs.save_theme(self.storage.local.as_mut());
                vec![
                    Effect::theme(theme),
                    Effect::Announce(theme.activated_message().to_owned()),
                ]
            }
            UiEvent::SystemThemeChanged { prefers_dark } => self
                .prefs
                .theme
                .follow_system(prefers_dark)
                .map(|theme| vec![Effect::theme(theme)])
                .unwrap_or_default(),
            UiEvent::MenuToggle => vec![Effect::SetMenuExpanded(self.menu.toggle())],
            UiEvent::NavLinkClicked => {
                self.menu.collapse();
                vec![Effect::SetMenuExpanded(false)]
            }
            UiEvent::Click(target) => {
                self.analytics.track_click(&mut self.storage, &target, now);
                Vec::new()
            }
            UiEvent::PageView(page) => {
                self.analytics.track_page_view(&mut self.storage, &page, now);
                Vec::new()
            }
            UiEvent::PageUnload { path } => {
                self.analytics.track_time_on_page(&mut self.storage, &path, now);
                Vec::new()
            }
        }
    }

    fn font_effects(&mut self, adjustment: FontAdjustment) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if let Some(size) = adjustment.applied() {
            self.prefs.save_font(self.storage.local.as_mut());
            effects.push(Effect::ApplyFontSize(size));
        }
        effects.push(Effect::Announce(adjustment.announcement()));
        effects
    }

    pub async fn sync_analytics(&mut self, sink: &dyn AnalyticsSink) -> bool {
        self.analytics.sync(sink, self.storage.local.as_mut()).await
    }
}

pub type SharedController = Arc<Mutex<UiController>>;

/// Ship buffered analytics every `every`. The controller lock is released
/// while the batch is in flight, so events keep flowing in meanwhile.
pub fn spawn_periodic_sync(
    controller: SharedController,
    sink: Arc<dyn AnalyticsSink>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; the first sync is one period in.
        interval.tick().await;
        loop {
            interval.tick().await;
            let batch = controller.lock().await.analytics.pending();
            if batch.is_empty() {
                continue;
            }
            match sink.send(&batch.events).await {
                Ok(()) => {
                    let mut guard = controller.lock().await;
                    let ctl = &mut *guard;
                    ctl.analytics.acknowledge(batch.through, ctl.storage.local.as_mut());
                    tracing::info!(delivered = batch.len(), "analytics synced");
                }
                Err(e) => {
                    tracing::error!(error = %e, pending = batch.len(), "analytics sync failed");
                }
            }
        }
    })
}
