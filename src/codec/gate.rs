//! Volume gate and speech detection
//!
//! The gate opens when a block's RMS level reaches the attack threshold and
//! closes once the level has stayed under the release threshold for the hold
//! time. Speech detection adds hysteresis over the codec's speech
//! probability, when the codec reports one.

use serde::{Deserialize, Serialize};

use crate::constants::BLOCK_DURATION_MS;

/// Volume gate thresholds in dBFS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeGateConfig {
    pub enabled: bool,
    pub attack_threshold_db: f32,
    pub release_threshold_db: f32,
    pub hold_ms: u32,
}

impl Default for VolumeGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attack_threshold_db: -45.0,
            release_threshold_db: -55.0,
            hold_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechDetectionConfig {
    pub enabled: bool,
    pub start_probability: f32,
    pub stop_probability: f32,
}

impl Default for SpeechDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_probability: 0.6,
            stop_probability: 0.35,
        }
    }
}

/// RMS level in dBFS, floored at -120
pub fn level_db(rms: f32) -> f32 {
    if rms <= 1e-6 {
        -120.0
    } else {
        20.0 * rms.log10()
    }
}

#[derive(Debug, Clone)]
pub struct VolumeGate {
    config: VolumeGateConfig,
    open: bool,
    hold_remaining_ms: u32,
}

impl VolumeGate {
    pub fn new(config: VolumeGateConfig) -> Self {
        Self {
            config,
            open: !config.enabled,
            hold_remaining_ms: 0,
        }
    }

    pub fn set_config(&mut self, config: VolumeGateConfig) {
        self.config = config;
        if !config.enabled {
            self.open = true;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Feed one block's level; returns whether the gate is open after it
    pub fn process(&mut self, level_db: f32) -> bool {
        if !self.config.enabled {
            self.open = true;
            return true;
        }

        if level_db >= self.config.attack_threshold_db {
            self.open = true;
            self.hold_remaining_ms = self.config.hold_ms;
        } else if self.open && level_db < self.config.release_threshold_db {
            if self.hold_remaining_ms > BLOCK_DURATION_MS {
                self.hold_remaining_ms -= BLOCK_DURATION_MS;
            } else {
                self.hold_remaining_ms = 0;
                self.open = false;
            }
        }
        self.open
    }
}

/// Combines the volume gate with speech detection into one activity flag
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    gate: VolumeGate,
    speech: SpeechDetectionConfig,
    speaking: bool,
    active: bool,
}

impl ActivityDetector {
    pub fn new(gate: VolumeGateConfig, speech: SpeechDetectionConfig) -> Self {
        Self {
            gate: VolumeGate::new(gate),
            speech,
            speaking: false,
            active: false,
        }
    }

    pub fn set_gate_config(&mut self, config: VolumeGateConfig) {
        self.gate.set_config(config);
    }

    pub fn set_speech_config(&mut self, config: SpeechDetectionConfig) {
        self.speech = config;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether audio should be transmitted at all
    pub fn gate_open(&self) -> bool {
        self.gate.is_open()
    }

    /// Feed one block. Returns `Some(active)` when the flag changes.
    pub fn update(&mut self, rms: f32, speech_probability: Option<f32>) -> Option<bool> {
        let open = self.gate.process(level_db(rms));

        let speaking = match (self.speech.enabled, speech_probability) {
            (true, Some(p)) => {
                if self.speaking {
                    p >= self.speech.stop_probability
                } else {
                    p >= self.speech.start_probability
                }
            }
            _ => true,
        };
        self.speaking = speaking;

        let active = open && speaking && rms > 0.0;
        if active != self.active {
            self.active = active;
            Some(active)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_db() {
        assert!((level_db(1.0) - 0.0).abs() < 1e-4);
        assert!((level_db(0.1) + 20.0).abs() < 1e-4);
        assert_eq!(level_db(0.0), -120.0);
    }

    #[test]
    fn test_gate_hold_and_release() {
        let mut gate = VolumeGate::new(VolumeGateConfig {
            hold_ms: 40,
            ..Default::default()
        });
        assert!(!gate.is_open());

        assert!(gate.process(-20.0));
        // between thresholds keeps the current state
        assert!(gate.process(-50.0));
        // below release: 40 ms of hold is two blocks
        assert!(gate.process(-70.0));
        assert!(!gate.process(-70.0));
        assert!(!gate.process(-50.0));
    }

    #[test]
    fn test_disabled_gate_always_open() {
        let mut gate = VolumeGate::new(VolumeGateConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(gate.is_open());
        assert!(gate.process(-120.0));
    }

    #[test]
    fn test_activity_changes_reported_once() {
        let mut detector =
            ActivityDetector::new(VolumeGateConfig::default(), SpeechDetectionConfig::default());

        assert_eq!(detector.update(0.5, None), Some(true));
        assert_eq!(detector.update(0.5, None), None);
        assert!(detector.is_active());
    }

    #[test]
    fn test_speech_hysteresis() {
        let mut detector = ActivityDetector::new(
            VolumeGateConfig {
                enabled: false,
                ..Default::default()
            },
            SpeechDetectionConfig {
                enabled: true,
                ..Default::default()
            },
        );

        assert_eq!(detector.update(0.5, Some(0.5)), None);
        assert_eq!(detector.update(0.5, Some(0.7)), Some(true));
        // stays active above the stop probability
        assert_eq!(detector.update(0.5, Some(0.4)), None);
        assert_eq!(detector.update(0.5, Some(0.2)), Some(false));
    }
}
