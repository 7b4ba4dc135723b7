//! User preferences, one persisted key per setting.
//!
//! Each key is loaded independently; a missing or unparseable value falls
//! back to that key's default without affecting the others.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{KeyValueStore, StorageError, load_json, save_json};
use crate::i18n::Language;

/// Persisted key names.
pub mod keys {
    /// Whether bot replies are spoken aloud.
    pub const VOICE_ENABLED: &str = "voice_enabled";
    /// Selected TTS voice identity.
    pub const VOICE_ID: &str = "voice_id";
    /// UI font family.
    pub const FONT: &str = "font";
    /// Whether map grounding is attached to requests.
    pub const MAP_GROUNDING: &str = "map_grounding";
    /// UI language.
    pub const LANGUAGE: &str = "language";
    /// UI theme.
    pub const THEME: &str = "theme";
    /// Last changelog version the user dismissed.
    pub const LAST_SEEN_CHANGELOG: &str = "last_seen_changelog";
}

/// UI colour theme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the system setting.
    #[default]
    System,
    /// Light theme.
    Light,
    /// Dark theme.
    Dark,
}

/// Snapshot of user preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Whether bot replies are spoken aloud.
    pub voice_enabled: bool,
    /// Selected TTS voice identity.
    pub voice_id: String,
    /// UI font family.
    pub font: String,
    /// Whether map grounding is attached to requests.
    pub map_grounding: bool,
    /// UI language.
    pub language: Language,
    /// UI theme.
    pub theme: Theme,
    /// Last changelog version the user dismissed, if any.
    pub last_seen_changelog: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            voice_enabled: false,
            voice_id: "Kore".to_owned(),
            font: "Inter".to_owned(),
            map_grounding: true,
            language: Language::default(),
            theme: Theme::default(),
            last_seen_changelog: None,
        }
    }
}

fn load_or<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, default: T) -> T {
    match load_json::<T>(store, key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!(key, error = %e, "discarding unreadable preference");
            default
        }
    }
}

impl Preferences {
    /// Load every preference, each with its own fallback.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let defaults = Self::default();
        Self {
            voice_enabled: load_or(store, keys::VOICE_ENABLED, defaults.voice_enabled),
            voice_id: load_or(store, keys::VOICE_ID, defaults.voice_id),
            font: load_or(store, keys::FONT, defaults.font),
            map_grounding: load_or(store, keys::MAP_GROUNDING, defaults.map_grounding),
            language: load_or(store, keys::LANGUAGE, defaults.language),
            theme: load_or(store, keys::THEME, defaults.theme),
            last_seen_changelog: load_or(
                store,
                keys::LAST_SEEN_CHANGELOG,
                defaults.last_seen_changelog,
            ),
        }
    }

    /// Persist every preference.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        save_json(store, keys::VOICE_ENABLED, &self.voice_enabled)?;
        save_json(store, keys::VOICE_ID, &self.voice_id)?;
        save_json(store, keys::FONT, &self.font)?;
        save_json(store, keys::MAP_GROUNDING, &self.map_grounding)?;
        save_json(store, keys::LANGUAGE, &self.language)?;
        save_json(store, keys::THEME, &self.theme)?;
        save_json(store, keys::LAST_SEEN_CHANGELOG, &self.last_seen_changelog)
    }

    /// Toggle voice output and persist the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_voice_enabled(
        &mut self,
        store: &dyn KeyValueStore,
        enabled: bool,
    ) -> Result<(), StorageError> {
        self.voice_enabled = enabled;
        save_json(store, keys::VOICE_ENABLED, &enabled)
    }

    /// Select a voice and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_voice_id(
        &mut self,
        store: &dyn KeyValueStore,
        voice_id: impl Into<String>,
    ) -> Result<(), StorageError> {
        self.voice_id = voice_id.into();
        save_json(store, keys::VOICE_ID, &self.voice_id)
    }

    /// Toggle map grounding and persist the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_map_grounding(
        &mut self,
        store: &dyn KeyValueStore,
        enabled: bool,
    ) -> Result<(), StorageError> {
        self.map_grounding = enabled;
        save_json(store, keys::MAP_GROUNDING, &enabled)
    }

    /// Change the UI language and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_language(
        &mut self,
        store: &dyn KeyValueStore,
        language: Language,
    ) -> Result<(), StorageError> {
        self.language = language;
        save_json(store, keys::LANGUAGE, &language)
    }

    /// Change the theme and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_theme(
        &mut self,
        store: &dyn KeyValueStore,
        theme: Theme,
    ) -> Result<(), StorageError> {
        self.theme = theme;
        save_json(store, keys::THEME, &theme)
    }

    /// Record the changelog version the user has seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_changelog_seen(
        &mut self,
        store: &dyn KeyValueStore,
        version: impl Into<String>,
    ) -> Result<(), StorageError> {
        self.last_seen_changelog = Some(version.into());
        save_json(store, keys::LAST_SEEN_CHANGELOG, &self.last_seen_changelog)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::storage::MemoryKvStore;

    #[test]
    fn empty_store_yields_defaults() {
        let store = MemoryKvStore::new();
        assert_eq!(Preferences::load(&store), Preferences::default());
    }

    #[test]
    fn one_corrupt_key_does_not_reset_others() {
        let store = MemoryKvStore::new();
        store.set(keys::VOICE_ENABLED, "true").unwrap();
        store.set(keys::THEME, "\"neon\"").unwrap();
        store.set(keys::LANGUAGE, "\"spanish\"").unwrap();

        let prefs = Preferences::load(&store);
        assert!(prefs.voice_enabled);
        assert_eq!(prefs.theme, Theme::System);
        assert_eq!(prefs.language, Language::Spanish);
    }

    #[test]
    fn setters_persist_immediately() {
        let store = MemoryKvStore::new();
        let mut prefs = Preferences::load(&store);
        prefs.set_voice_enabled(&store, true).unwrap();
        prefs.set_voice_id(&store, "Puck").unwrap();
        prefs.set_theme(&store, Theme::Dark).unwrap();
        prefs.mark_changelog_seen(&store, "1.4.0").unwrap();

        let reloaded = Preferences::load(&store);
        assert!(reloaded.voice_enabled);
        assert_eq!(reloaded.voice_id, "Puck");
        assert_eq!(reloaded.theme, Theme::Dark);
        assert_eq!(reloaded.last_seen_changelog.as_deref(), Some("1.4.0"));
    }

    #[test]
    fn save_writes_every_key() {
        let store = MemoryKvStore::new();
        Preferences::default().save(&store).unwrap();
        assert_eq!(store.len(), 7);
    }
}
