//! User-facing DSP parameters, independent of graph topology.
//!
//! These types mirror the wire payloads of `UPDATE_SETTINGS` and
//! `UPDATE_EFFECTS`. Partial updates are first-class: every field of the
//! update types is optional, and merging an update into the cached
//! [`EffectSettings`] never resets an omitted field.
//!
//! All numeric fields are clamped here, at the boundary, before any stage
//! ever sees them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fixed equalizer band keys, in ascending frequency order.
pub const EQ_BAND_KEYS: [&str; 10] = [
    "32", "64", "125", "250", "500", "1k", "2k", "4k", "8k", "16k",
];

/// Center frequencies in Hz, matching [`EQ_BAND_KEYS`] by index.
pub const EQ_FREQUENCIES: [f64; 10] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Volume range in percent.
pub const VOLUME_RANGE: (f32, f32) = (0.0, 800.0);

/// Per-band gain range in dB.
pub const BAND_GAIN_RANGE: (f32, f32) = (-12.0, 12.0);

pub fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1)
}

pub fn clamp_band_gain(gain_db: f32) -> f32 {
    gain_db.clamp(BAND_GAIN_RANGE.0, BAND_GAIN_RANGE.1)
}

/// Dynamics limiter parameters. `enabled: false` does not change the graph
/// topology; the stage is neutralized in place (threshold 0 dB, ratio 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub enabled: bool,
    /// Threshold in dB.
    pub threshold: f32,
    /// Knee width in dB. Near zero gives brick-wall behavior.
    pub knee: f32,
    /// Compression ratio.
    pub ratio: f32,
    /// Attack time in seconds.
    pub attack: f32,
    /// Release time in seconds.
    pub release: f32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: -6.0,
            knee: 20.0,
            ratio: 12.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

impl LimiterSettings {
    pub fn clamped(mut self) -> Self {
        self.threshold = self.threshold.clamp(-60.0, 0.0);
        self.knee = self.knee.clamp(0.0, 40.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack = self.attack.clamp(0.0001, 1.0);
        self.release = self.release.clamp(0.001, 5.0);
        self
    }
}

/// Named stereo spatialization modes. Unrecognized wire values fall back
/// to `Off`, which resets the sub-graph to neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    Wide,
    Surround,
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "7d")]
    SevenD,
    Off,
}

impl<'de> Deserialize<'de> for SpatialMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "wide" => SpatialMode::Wide,
            "surround" => SpatialMode::Surround,
            "3d" => SpatialMode::ThreeD,
            "7d" => SpatialMode::SevenD,
            _ => SpatialMode::Off,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialSettings {
    pub enabled: bool,
    pub mode: SpatialMode,
    /// Effect width, 0–100.
    pub width: f32,
}

impl Default for SpatialSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: SpatialMode::Wide,
            width: 50.0,
        }
    }
}

impl SpatialSettings {
    pub fn clamped(mut self) -> Self {
        self.width = self.width.clamp(0.0, 100.0);
        self
    }
}

/// Auto-pan sweep speed. Maps to the LFO frequency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanSpeed {
    Slow,
    Medium,
    Fast,
}

impl PanSpeed {
    /// LFO frequency in Hz.
    pub fn frequency_hz(self) -> f64 {
        match self {
            PanSpeed::Slow => 0.25,
            PanSpeed::Medium => 0.5,
            PanSpeed::Fast => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoPanSettings {
    pub enabled: bool,
    pub speed: PanSpeed,
}

impl Default for AutoPanSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            speed: PanSpeed::Medium,
        }
    }
}

/// Partial effects update, as carried by `UPDATE_EFFECTS`. Sub-records are
/// replaced whole when present and untouched when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limiter: Option<LimiterSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_pan: Option<AutoPanSettings>,
}

/// Partial settings update, as carried by `UPDATE_SETTINGS`. A `bands` map
/// may name any subset of the ten band keys; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bands: Option<BTreeMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effects: Option<EffectsUpdate>,
}

/// The full effect state applied to a live graph. The authoritative copy
/// lives in persisted configuration; the processing host keeps a cached
/// copy so optional stages spliced in later pick up last-known values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSettings {
    pub volume: f32,
    pub bands: BTreeMap<String, f32>,
    pub limiter: LimiterSettings,
    pub spatial: SpatialSettings,
    pub auto_pan: AutoPanSettings,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            volume: 100.0,
            bands: flat_bands(),
            limiter: LimiterSettings::default(),
            spatial: SpatialSettings::default(),
            auto_pan: AutoPanSettings::default(),
        }
    }
}

/// All ten bands at 0 dB.
pub fn flat_bands() -> BTreeMap<String, f32> {
    EQ_BAND_KEYS
        .iter()
        .map(|key| (key.to_string(), 0.0))
        .collect()
}

impl EffectSettings {
    /// Merge a partial update, clamping every incoming value. Fields the
    /// update omits keep their previous values.
    pub fn merge(&mut self, update: &SettingsUpdate) {
        if let Some(volume) = update.volume {
            self.volume = clamp_volume(volume);
        }
        if let Some(bands) = &update.bands {
            for (key, gain) in bands {
                if EQ_BAND_KEYS.contains(&key.as_str()) {
                    self.bands.insert(key.clone(), clamp_band_gain(*gain));
                }
            }
        }
        if let Some(effects) = &update.effects {
            self.merge_effects(effects);
        }
    }

    pub fn merge_effects(&mut self, update: &EffectsUpdate) {
        if let Some(limiter) = update.limiter {
            self.limiter = limiter.clamped();
        }
        if let Some(spatial) = update.spatial {
            self.spatial = spatial.clamped();
        }
        if let Some(auto_pan) = update.auto_pan {
            self.auto_pan = auto_pan;
        }
    }

    /// Gain for a band key, 0 dB when unset.
    pub fn band_gain(&self, key: &str) -> f32 {
        self.bands.get(key).copied().unwrap_or(0.0)
    }

    /// Convert everything into a single update, used when pushing the
    /// persisted state to a freshly built graph.
    pub fn as_update(&self) -> SettingsUpdate {
        SettingsUpdate {
            volume: Some(self.volume),
            bands: Some(self.bands.clone()),
            effects: Some(EffectsUpdate {
                limiter: Some(self.limiter),
                spatial: Some(self.spatial),
                auto_pan: Some(self.auto_pan),
            }),
        }
    }
}
