//! The live signal chain: stage ownership, canonical wiring, and
//! parameter application.
//!
//! The chain is never patched incrementally. The desired topology is a
//! pure function of the cached effect settings, and [`ProcessingGraph::
//! rebuild_chain`] reconnects everything from a clean slate: source →
//! gain → ten EQ bands in fixed frequency order → [auto-pan] → [spatial]
//! → limiter → destination, with the analysis tap taken in parallel off
//! the limiter output. The limiter is always present and always last.

use crate::capture::StreamHandle;
use crate::error::CaptureError;
use crate::settings::{EQ_BAND_KEYS, EQ_FREQUENCIES, EffectSettings, EffectsUpdate, SettingsUpdate};

use super::stages::{AnalyserTap, AutoPanStage, EqBand, GainStage, LimiterStage, SpatialStage};

/// Length of the smoothing ramp applied to gain and band changes.
const RAMP_MS: f64 = 50.0;

/// Position of a stage in the main signal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSlot {
    Gain,
    Band(usize),
    AutoPan,
    Spatial,
    Limiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Running,
    Closed,
}

pub struct ProcessingGraph {
    pub stream: StreamHandle,
    sample_rate: f64,
    context: ContextState,
    /// Set once the stream's frame channel closes (e.g. tab navigation);
    /// the host stops polling for frames but keeps the graph alive.
    pub source_ended: bool,

    gain: GainStage,
    bands: Vec<EqBand>,
    autopan: AutoPanStage,
    spatial: SpatialStage,
    limiter: LimiterStage,
    analyser: AnalyserTap,

    /// Currently applied settings, mirrored so optional stages spliced in
    /// later pick up last-known values rather than defaults.
    settings: EffectSettings,
    chain: Vec<StageSlot>,
    topology_version: u64,
}

impl ProcessingGraph {
    /// Build the fixed-topology core chain for a freshly acquired stream.
    /// The optional sub-graphs are constructed here too, ready to be
    /// spliced in without reallocation.
    pub fn build(stream: StreamHandle) -> Result<Self, CaptureError> {
        if !stream.is_live() {
            return Err(CaptureError::GraphConstruction(
                "capture stream ended before the graph was wired".into(),
            ));
        }
        if stream.sample_rate == 0 {
            return Err(CaptureError::GraphConstruction(
                "stream reported a zero sample rate".into(),
            ));
        }
        let sample_rate = stream.sample_rate as f64;
        let settings = EffectSettings::default();

        let bands = EQ_FREQUENCIES
            .iter()
            .map(|&freq| EqBand::new(freq, sample_rate))
            .collect();

        let mut graph = Self {
            stream,
            sample_rate,
            context: ContextState::Running,
            source_ended: false,
            gain: GainStage::new(),
            bands,
            autopan: AutoPanStage::new(sample_rate, settings.auto_pan.speed),
            spatial: SpatialStage::new(sample_rate),
            limiter: LimiterStage::new(sample_rate),
            analyser: AnalyserTap::new(sample_rate),
            settings,
            chain: Vec::new(),
            topology_version: 0,
        };
        graph.rebuild_chain();
        Ok(graph)
    }

    fn ramp_samples(&self) -> u32 {
        (self.sample_rate * RAMP_MS / 1000.0) as u32
    }

    /// Reconnect every stage in canonical order, derived purely from the
    /// cached settings. Cached parameters are reapplied to the optional
    /// stages so toggling an effect on restores its last-known state.
    pub fn rebuild_chain(&mut self) {
        self.chain.clear();
        self.chain.push(StageSlot::Gain);
        for index in 0..self.bands.len() {
            self.chain.push(StageSlot::Band(index));
        }
        if self.settings.auto_pan.enabled {
            self.autopan.set_speed(self.settings.auto_pan.speed);
            self.chain.push(StageSlot::AutoPan);
        }
        if self.settings.spatial.enabled {
            self.spatial.apply(&self.settings.spatial);
            self.spatial.reset();
            self.chain.push(StageSlot::Spatial);
        }
        self.limiter.set_params(&self.settings.limiter);
        self.chain.push(StageSlot::Limiter);
        self.topology_version += 1;
    }

    /// Apply a partial settings update. Volume and band gains ramp over
    /// [`RAMP_MS`]; an in-flight ramp on the same parameter is replaced.
    pub fn apply_settings(&mut self, update: &SettingsUpdate) {
        self.settings.merge(update);
        let ramp = self.ramp_samples();

        if update.volume.is_some() {
            self.gain.set_volume(self.settings.volume, ramp);
        }
        if let Some(bands) = &update.bands {
            for key in bands.keys() {
                if let Some(index) = EQ_BAND_KEYS.iter().position(|k| k == key) {
                    self.bands[index].set_gain_db(self.settings.band_gain(key), ramp);
                }
            }
        }
        if let Some(effects) = &update.effects {
            self.apply_effects(effects);
        }
    }

    /// Apply a partial effects update. Limiter changes land in place; a
    /// change in the spatial or auto-pan enabled flag triggers exactly
    /// one chain rebuild, since those stages must be spliced in or out of
    /// the path rather than muted. Returns whether a rebuild happened.
    pub fn apply_effects(&mut self, update: &EffectsUpdate) -> bool {
        let was_spatial = self.settings.spatial.enabled;
        let was_autopan = self.settings.auto_pan.enabled;
        self.settings.merge_effects(update);

        if update.limiter.is_some() {
            self.limiter.set_params(&self.settings.limiter);
        }

        let needs_rebuild = self.settings.spatial.enabled != was_spatial
            || self.settings.auto_pan.enabled != was_autopan;
        if needs_rebuild {
            self.rebuild_chain();
        } else {
            // In-place updates for mode/width/speed-only changes.
            if update.spatial.is_some() {
                self.spatial.apply(&self.settings.spatial);
            }
            if update.auto_pan.is_some() {
                self.autopan.set_speed(self.settings.auto_pan.speed);
            }
        }
        needs_rebuild
    }

    /// Run one interleaved stereo block through the chain and feed the
    /// analysis tap. The tap observes the limiter output in parallel and
    /// never alters the main path.
    pub fn process_block(&mut self, buf: &mut [f32]) {
        let frames = buf.len() / 2;
        let mut autopan_in_path = false;
        for i in 0..self.chain.len() {
            match self.chain[i] {
                StageSlot::Gain => self.gain.process_block(buf),
                StageSlot::Band(index) => self.bands[index].process_block(buf),
                StageSlot::AutoPan => {
                    autopan_in_path = true;
                    self.autopan.process_block(buf);
                }
                StageSlot::Spatial => self.spatial.process_block(buf),
                StageSlot::Limiter => self.limiter.process_block(buf),
            }
        }
        if !autopan_in_path {
            // The LFO keeps running while the pan stage is unspliced.
            self.autopan.advance_idle(frames);
        }
        self.analyser.push_block(buf);
    }

    /// One-shot read of the analysis tap.
    pub fn analyser_snapshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        if self.context != ContextState::Running {
            return Err(CaptureError::AnalyserUnavailable(
                "processing context is not running".into(),
            ));
        }
        Ok(self.analyser.snapshot())
    }

    /// Disconnect every stage, stop the stream's tracks — the step that
    /// actually releases the captured tab's audio — and close the
    /// context. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.chain.clear();
        self.stream.stop_tracks();
        self.context = ContextState::Closed;
    }

    pub fn chain(&self) -> &[StageSlot] {
        &self.chain
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    /// Linear gain currently targeted by the volume stage.
    pub fn target_gain(&self) -> f32 {
        self.gain.target_gain()
    }

    /// Gain in dB targeted by the band at `key`, if the key is valid.
    pub fn band_target_db(&self, key: &str) -> Option<f32> {
        EQ_BAND_KEYS
            .iter()
            .position(|k| *k == key)
            .map(|index| self.bands[index].target_gain_db())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::sync::mpsc;

    use super::*;
    use crate::settings::{
        AutoPanSettings, LimiterSettings, PanSpeed, SpatialMode, SpatialSettings,
    };

    fn test_graph() -> ProcessingGraph {
        let (_tx, rx) = mpsc::channel(1);
        // The sender is dropped; frame delivery is not under test here.
        let stream = StreamHandle::new(7, 48_000, rx);
        ProcessingGraph::build(stream).unwrap()
    }

    fn assert_canonical(graph: &ProcessingGraph) {
        let chain = graph.chain();
        assert_eq!(chain.first(), Some(&StageSlot::Gain));
        assert_eq!(chain.last(), Some(&StageSlot::Limiter));
        assert_eq!(
            chain.iter().filter(|s| **s == StageSlot::Limiter).count(),
            1
        );
        // The ten bands appear once each, in fixed frequency order.
        let bands: Vec<_> = chain
            .iter()
            .filter_map(|s| match s {
                StageSlot::Band(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(bands, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn fresh_graph_has_core_chain_only() {
        let graph = test_graph();
        assert_canonical(&graph);
        assert_eq!(graph.chain().len(), 12); // gain + 10 bands + limiter
        assert!(!graph.chain().contains(&StageSlot::Spatial));
        assert!(!graph.chain().contains(&StageSlot::AutoPan));
    }

    #[test]
    fn build_fails_on_dead_stream() {
        let (_tx, rx) = mpsc::channel(1);
        let stream = StreamHandle::new(7, 48_000, rx);
        stream.stop_tracks();
        assert!(matches!(
            ProcessingGraph::build(stream),
            Err(CaptureError::GraphConstruction(_))
        ));
    }

    #[test]
    fn enabling_spatial_splices_it_before_the_limiter() {
        let mut graph = test_graph();
        let version = graph.topology_version();
        let rebuilt = graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                mode: SpatialMode::SevenD,
                width: 80.0,
            }),
            ..Default::default()
        });
        assert!(rebuilt);
        assert_eq!(graph.topology_version(), version + 1);
        assert_canonical(&graph);

        let chain = graph.chain();
        let spatial_pos = chain.iter().position(|s| *s == StageSlot::Spatial).unwrap();
        assert_eq!(spatial_pos, chain.len() - 2);

        // The sub-graph parameters match the 7d preset scaled by 0.8.
        let params = super::super::stages::SpatialParams::resolve(&SpatialSettings {
            enabled: true,
            mode: SpatialMode::SevenD,
            width: 80.0,
        });
        assert!((params.left_delay_ms - 0.64).abs() < 1e-9);
        assert!((params.cross_r - 0.36).abs() < 1e-6);
    }

    #[test]
    fn width_change_alone_does_not_rebuild() {
        let mut graph = test_graph();
        graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                mode: SpatialMode::Wide,
                width: 50.0,
            }),
            ..Default::default()
        });
        let version = graph.topology_version();
        let rebuilt = graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                mode: SpatialMode::Wide,
                width: 90.0,
            }),
            ..Default::default()
        });
        assert!(!rebuilt);
        assert_eq!(graph.topology_version(), version);
    }

    #[test]
    fn toggling_effects_keeps_exactly_one_canonical_path() {
        let mut graph = test_graph();
        let toggles = [
            (true, false),
            (true, true),
            (false, true),
            (false, false),
            (true, true),
        ];
        for (spatial, autopan) in toggles {
            graph.apply_effects(&EffectsUpdate {
                spatial: Some(SpatialSettings {
                    enabled: spatial,
                    ..Default::default()
                }),
                auto_pan: Some(AutoPanSettings {
                    enabled: autopan,
                    speed: PanSpeed::Fast,
                }),
                ..Default::default()
            });
            assert_canonical(&graph);
            assert_eq!(graph.chain().contains(&StageSlot::Spatial), spatial);
            assert_eq!(graph.chain().contains(&StageSlot::AutoPan), autopan);
            if spatial && autopan {
                // Auto-pan precedes the spatial sub-graph.
                let ap = graph
                    .chain()
                    .iter()
                    .position(|s| *s == StageSlot::AutoPan)
                    .unwrap();
                let sp = graph
                    .chain()
                    .iter()
                    .position(|s| *s == StageSlot::Spatial)
                    .unwrap();
                assert!(ap < sp);
            }
        }
    }

    #[test]
    fn toggling_both_effects_at_once_rebuilds_once() {
        let mut graph = test_graph();
        let version = graph.topology_version();
        graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                ..Default::default()
            }),
            auto_pan: Some(AutoPanSettings {
                enabled: true,
                speed: PanSpeed::Medium,
            }),
            ..Default::default()
        });
        assert_eq!(graph.topology_version(), version + 1);
    }

    #[test]
    fn volume_and_bands_ramp_toward_clamped_targets() {
        let mut graph = test_graph();
        let mut bands = BTreeMap::new();
        bands.insert("32".to_string(), 10.0);
        bands.insert("1k".to_string(), 99.0);
        graph.apply_settings(&SettingsUpdate {
            volume: Some(150.0),
            bands: Some(bands),
            effects: None,
        });
        assert_eq!(graph.target_gain(), 1.5);
        assert_eq!(graph.band_target_db("32"), Some(10.0));
        assert_eq!(graph.band_target_db("1k"), Some(12.0));
        // Untouched band keeps its previous target.
        assert_eq!(graph.band_target_db("8k"), Some(0.0));
    }

    #[test]
    fn reenabled_effect_restores_last_known_parameters() {
        let mut graph = test_graph();
        graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                mode: SpatialMode::SevenD,
                width: 80.0,
            }),
            ..Default::default()
        });
        // Toggle off, then on without restating mode/width.
        graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: false,
                mode: SpatialMode::SevenD,
                width: 80.0,
            }),
            ..Default::default()
        });
        graph.apply_effects(&EffectsUpdate {
            spatial: Some(SpatialSettings {
                enabled: true,
                mode: SpatialMode::SevenD,
                width: 80.0,
            }),
            ..Default::default()
        });
        assert_eq!(graph.settings().spatial.mode, SpatialMode::SevenD);
        assert_eq!(graph.settings().spatial.width, 80.0);
        assert!(graph.chain().contains(&StageSlot::Spatial));
    }

    #[test]
    fn limiter_update_never_changes_topology() {
        let mut graph = test_graph();
        let version = graph.topology_version();
        let rebuilt = graph.apply_effects(&EffectsUpdate {
            limiter: Some(LimiterSettings {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(!rebuilt);
        assert_eq!(graph.topology_version(), version);
        assert_eq!(graph.chain().last(), Some(&StageSlot::Limiter));
    }

    #[test]
    fn processing_a_block_feeds_the_analyser() {
        let mut graph = test_graph();
        let mut buf: Vec<f32> = (0..4096)
            .map(|i| {
                let t = (i / 2) as f64 / 48_000.0;
                ((std::f64::consts::TAU * 1000.0 * t).sin() * 0.5) as f32
            })
            .collect();
        graph.process_block(&mut buf);
        let mut snapshot = Vec::new();
        for _ in 0..20 {
            snapshot = graph.analyser_snapshot().unwrap();
        }
        assert!(snapshot.iter().any(|&v| v > 0));
    }

    #[test]
    fn released_graph_refuses_analyser_reads() {
        let mut graph = test_graph();
        graph.release();
        assert!(matches!(
            graph.analyser_snapshot(),
            Err(CaptureError::AnalyserUnavailable(_))
        ));
        assert!(graph.chain().is_empty());
        assert!(!graph.stream.is_live());
    }

    #[test]
    fn release_is_idempotent() {
        let mut graph = test_graph();
        graph.release();
        graph.release();
        assert!(!graph.stream.is_live());
    }

    #[test]
    fn idle_lfo_keeps_running_while_unspliced() {
        let mut graph = test_graph();
        let mut buf = vec![0.1_f32; 2000];
        graph.process_block(&mut buf);
        // Splice the pan stage in; the LFO phase should not be at zero.
        graph.apply_effects(&EffectsUpdate {
            auto_pan: Some(AutoPanSettings {
                enabled: true,
                speed: PanSpeed::Fast,
            }),
            ..Default::default()
        });
        let mut buf = vec![0.1_f32; 2];
        graph.process_block(&mut buf);
        assert!(buf[0] != buf[1]);
    }
}
