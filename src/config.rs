//! Persisted settings record and its on-disk store.
//!
//! The control surface owns the authoritative copy of user preferences;
//! here that contract is a single JSON record loaded and stored as a unit.
//! A missing or unreadable record means defaults (flat bands, volume 100).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::{EffectSettings, EffectsUpdate, flat_bands};

/// The single persisted settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredSettings {
    /// Whether processing should resume automatically, e.g. after the
    /// captured tab finishes a navigation.
    pub enabled: bool,
    pub volume: f32,
    /// Name of the last selected EQ preset.
    pub preset: String,
    pub bands: BTreeMap<String, f32>,
    pub effects: EffectsUpdate,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: 100.0,
            preset: "flat".to_string(),
            bands: flat_bands(),
            effects: EffectsUpdate::default(),
        }
    }
}

impl StoredSettings {
    /// Expand the record into the full effect state pushed to a fresh
    /// graph. Unset effect sub-records fall back to defaults.
    pub fn to_effect_settings(&self) -> EffectSettings {
        let mut settings = EffectSettings::default();
        settings.merge(&crate::settings::SettingsUpdate {
            volume: Some(self.volume),
            bands: Some(self.bands.clone()),
            effects: Some(self.effects.clone()),
        });
        settings
    }
}

/// Loads and stores the settings record at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, falling back to defaults when the file is absent
    /// or unparseable.
    pub fn load(&self) -> StoredSettings {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("settings file corrupt, using defaults: {e}");
                    StoredSettings::default()
                }
            },
            Err(_) => StoredSettings::default(),
        }
    }

    pub fn save(&self, settings: &StoredSettings) -> Result<()> {
        let contents = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("writing settings to {}", self.path.display()))
    }
}

/// Built-in EQ presets: basic shapes, music genres, listening
/// situations, and device compensation. Gains in band-key order, dB,
/// -12 to +12.
pub const PRESET_TABLE: &[(&str, [f32; 10])] = &[
    // Basic
    ("flat", [0.0; 10]),
    ("bass-boost", [10.0, 8.0, 6.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("bass-boost-extreme", [12.0, 11.0, 9.0, 6.0, 3.0, 0.0, -1.0, -1.0, 0.0, 1.0]),
    ("vocal-booster", [-2.0, -1.0, 0.0, 2.0, 4.0, 6.0, 6.0, 4.0, 2.0, 0.0]),
    ("treble-booster", [0.0, 0.0, 0.0, 0.0, 2.0, 3.0, 5.0, 7.0, 9.0, 10.0]),
    ("loudness", [8.0, 6.0, 3.0, 0.0, -2.0, 0.0, 2.0, 5.0, 7.0, 8.0]),
    // Music genres
    ("pop", [2.0, 3.0, 3.0, 1.0, 0.0, 2.0, 3.0, 4.0, 4.0, 2.0]),
    ("rock", [4.0, 5.0, 3.0, 2.0, -1.0, 2.0, 4.0, 5.0, 6.0, 5.0]),
    ("hip-hop", [8.0, 7.0, 5.0, 3.0, 0.0, 2.0, 3.0, 2.0, 3.0, 2.0]),
    ("edm", [10.0, 8.0, 5.0, 2.0, 0.0, -1.0, 1.0, 3.0, 5.0, 6.0]),
    ("jazz", [2.0, 3.0, 2.0, 1.0, -1.0, 0.0, 2.0, 4.0, 5.0, 4.0]),
    ("classical", [1.0, 2.0, 1.0, 0.0, -1.0, 0.0, 1.0, 3.0, 4.0, 5.0]),
    ("rnb", [5.0, 5.0, 4.0, 2.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0]),
    ("acoustic", [1.0, 2.0, 3.0, 2.0, 1.0, 3.0, 4.0, 4.0, 3.0, 2.0]),
    ("metal", [6.0, 5.0, 3.0, 0.0, -3.0, 2.0, 4.0, 6.0, 7.0, 5.0]),
    ("reggae", [7.0, 6.0, 4.0, 2.0, -2.0, 0.0, -1.0, 2.0, 4.0, 3.0]),
    ("country", [2.0, 3.0, 4.0, 3.0, 1.0, 2.0, 4.0, 5.0, 4.0, 3.0]),
    ("latin", [6.0, 5.0, 3.0, 1.0, -1.0, 2.0, 3.0, 4.0, 5.0, 4.0]),
    ("kpop", [4.0, 5.0, 3.0, 1.0, 0.0, 3.0, 5.0, 5.0, 5.0, 4.0]),
    ("lofi", [4.0, 5.0, 4.0, 2.0, 1.0, 0.0, -1.0, -2.0, -3.0, -2.0]),
    // Situations
    ("dialogue", [-4.0, -3.0, -1.0, 2.0, 4.0, 6.0, 7.0, 5.0, 2.0, 0.0]),
    ("movie", [5.0, 4.0, 2.0, 0.0, 1.0, 3.0, 4.0, 3.0, 4.0, 3.0]),
    ("gaming", [5.0, 6.0, 3.0, 0.0, -2.0, 0.0, 3.0, 5.0, 6.0, 5.0]),
    ("podcast", [-5.0, -3.0, -1.0, 2.0, 4.0, 5.0, 5.0, 4.0, 2.0, 0.0]),
    ("night", [-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 2.0, 1.0, 0.0, -1.0]),
    ("meeting", [-6.0, -4.0, -2.0, 1.0, 3.0, 5.0, 6.0, 5.0, 3.0, 1.0]),
    ("study", [-2.0, -1.0, 0.0, 1.0, 2.0, 2.0, 1.0, 0.0, -1.0, -2.0]),
    // Device compensation
    ("laptop", [8.0, 7.0, 5.0, 3.0, 0.0, 1.0, 2.0, 3.0, 2.0, 1.0]),
    ("headphone", [3.0, 4.0, 3.0, 1.0, 0.0, 1.0, 2.0, 3.0, 3.0, 2.0]),
    ("earbuds", [5.0, 5.0, 4.0, 2.0, 0.0, 1.0, 2.0, 3.0, 2.0, 1.0]),
    ("bluetooth", [6.0, 5.0, 4.0, 2.0, 0.0, 1.0, 2.0, 3.0, 4.0, 3.0]),
];

/// Band map for a named preset.
pub fn preset_bands(name: &str) -> Option<BTreeMap<String, f32>> {
    let (_, gains) = PRESET_TABLE.iter().find(|(key, _)| *key == name)?;
    Some(
        crate::settings::EQ_BAND_KEYS
            .iter()
            .zip(gains)
            .map(|(key, gain)| (key.to_string(), *gain))
            .collect(),
    )
}
