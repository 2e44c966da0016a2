//! Reader preferences: font size and color theme.
//!
//! Both live in the durable store under `fontSize` and `theme`. The font size
//! is a percentage of the root font size and is always clamped into the
//! configured limits, including values read back from storage.

use crate::config::AccessibilityConfig;
use crate::store::KeyValueStore;

pub const FONT_SIZE_KEY: &str = "fontSize";
pub const THEME_KEY: &str = "theme";

/// Bounds and step of the font size control, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontLimits {
    pub default: u16,
    pub min: u16,
    pub max: u16,
    pub step: u16,
}

impl Default for FontLimits {
    fn default() -> Self {
        Self {
            default: 100,
            min: 90,
            max: 150,
            step: 10,
        }
    }
}

impl FontLimits {
    /// Limits from configuration. An inverted range collapses to `min`.
    pub fn from_config(config: &AccessibilityConfig) -> Self {
        let min = config.font_min;
        let max = config.font_max.max(min);
        Self {
            default: config.font_default.clamp(min, max),
            min,
            max,
            step: config.font_step.max(1),
        }
    }

    pub fn clamp(&self, value: u16) -> u16 {
        value.clamp(self.min, self.max)
    }
}

/// Outcome of one press of a font size button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontAdjustment {
    Increased(u16),
    Decreased(u16),
    AtMaximum,
    AtMinimum,
}

impl FontAdjustment {
    /// The size to apply, if it changed.
    pub fn applied(&self) -> Option<u16> {
        match *self {
            FontAdjustment::Increased(n) | FontAdjustment::Decreased(n) => Some(n),
            FontAdjustment::AtMaximum | FontAdjustment::AtMinimum => None,
        }
    }

    /// Screen reader announcement.
    pub fn announcement(&self) -> String {
        match self {
            FontAdjustment::Increased(n) => format!("Tamanho da fonte aumentado para {n}%"),
            FontAdjustment::Decreased(n) => format!("Tamanho da fonte diminuído para {n}%"),
            FontAdjustment::AtMaximum => "Tamanho máximo da fonte atingido".to_owned(),
            FontAdjustment::AtMinimum => "Tamanho mínimo da fonte atingido".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSize {
    value: u16,
    limits: FontLimits,
}

impl FontSize {
    pub fn new(value: u16, limits: FontLimits) -> Self {
        Self {
            value: limits.clamp(value),
            limits,
        }
    }

    /// Size from a stored string. Missing, unparsable or zero values give the
    /// default; anything else is clamped.
    pub fn from_stored(stored: Option<&str>, limits: FontLimits) -> Self {
        let value = stored
            .and_then(|s| s.trim().parse::<u16>().ok())
            .filter(|&n| n != 0)
            .unwrap_or(limits.default);
        Self::new(value, limits)
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn limits(&self) -> FontLimits {
        self.limits
    }

    pub fn increase(&mut self) -> FontAdjustment {
        let next = self.limits.clamp(self.value.saturating_add(self.limits.step));
        if next == self.value {
            return FontAdjustment::AtMaximum;
        }
        self.value = next;
        FontAdjustment::Increased(next)
    }

    pub fn decrease(&mut self) -> FontAdjustment {
        let next = self.limits.clamp(self.value.saturating_sub(self.limits.step));
        if next == self.value {
            return FontAdjustment::AtMinimum;
        }
        self.value = next;
        FontAdjustment::Decreased(next)
    }

    /// CSS value for the root element, e.g. `"110%"`.
    pub fn css(&self) -> String {
        format!("{}%", self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn from_system(prefers_dark: bool) -> Self {
        if prefers_dark {
            Theme::Dark
        } else {
            Theme::Light
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Accessible label of the toggle button while this theme is active.
    pub fn toggle_label(&self) -> &'static str {
        match self {
            Theme::Dark => "Alternar para tema claro",
            Theme::Light => "Alternar para tema escuro",
        }
    }

    /// Announcement made when this theme becomes active.
    pub fn activated_message(&self) -> &'static str {
        match self {
            Theme::Dark => "Tema escuro ativado",
            Theme::Light => "Tema claro ativado",
        }
    }
}

/// The active theme and whether the reader chose it explicitly.
///
/// Only an unsaved theme follows system preference changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeState {
    pub theme: Theme,
    pub saved: bool,
}

impl ThemeState {
    /// Any non-empty stored value counts as an explicit choice, even one
    /// that names no known theme; such a value shows the system theme.
    pub fn resolve(stored: Option<&str>, system_prefers_dark: bool) -> Self {
        let stored = stored.filter(|s| !s.trim().is_empty());
        Self {
            theme: stored
                .and_then(Theme::parse)
                .unwrap_or_else(|| Theme::from_system(system_prefers_dark)),
            saved: stored.is_some(),
        }
    }

    /// Flip the theme. The result counts as an explicit choice.
    pub fn toggle(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.saved = true;
        self.theme
    }

    /// React to a system preference change. Returns the theme to apply, or
    /// `None` when a saved choice takes precedence or nothing changed.
    pub fn follow_system(&mut self, prefers_dark: bool) -> Option<Theme> {
        if self.saved {
            return None;
        }
        let theme = Theme::from_system(prefers_dark);
        if theme == self.theme {
            return None;
        }
        self.theme = theme;
        Some(theme)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub font: FontSize,
    pub theme: ThemeState,
}

impl Preferences {
    pub fn load(store: &dyn KeyValueStore, limits: FontLimits, system_prefers_dark: bool) -> Self {
        let font = FontSize::from_stored(store.get(FONT_SIZE_KEY).as_deref(), limits);
        let theme = ThemeState::resolve(store.get(THEME_KEY).as_deref(), system_prefers_dark);
        tracing::debug!(font = font.value(), theme = theme.theme.as_str(), saved = theme.saved, "preferences loaded");
        Self { font, theme }
    }

    /// Persist the font size. Storage failures are logged and ignored.
    pub fn save_font(&self, store: &mut dyn KeyValueStore) {
        let value = self.font.value().to_string();
        if let Err(e) = store.set(FONT_SIZE_KEY, &value) {
            tracing::warn!(error = %e, "could not persist font size");
        }
    }

    /// Persist the theme. Storage failures are logged and ignored.
    pub fn save_theme(&self, store: &mut dyn KeyValueStore) {
        if let Err(e) = store.set(THEME_KEY, self.theme.theme.as_str()) {
            tracing::warn!(error = %e, "could not persist theme");
        }
    }
}
