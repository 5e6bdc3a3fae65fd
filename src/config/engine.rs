// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;
use crate::kits::DEFAULT_GRID_SIZE;
use crate::samples::DEFAULT_LOAD_TIMEOUT;
use crate::scheduler::DEFAULT_PLAY_ALL_STAGGER;
use crate::transport::{DEFAULT_BPM, DEFAULT_BPM_RAMP, DEFAULT_BPM_RANGE};

pub const DEFAULT_PINCH_COOLDOWN: Duration = Duration::from_millis(220);
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_millis(2);

/// The configuration surface of the engine.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Engine {
    /// Lowest and highest allowed tempo.
    bpm_range: Option<[f64; 2]>,

    /// Tempo at startup, clamped into `bpm_range`.
    default_bpm: Option<f64>,

    /// Cooldown the gesture source applies between accepted pinches.
    pinch_cooldown_ms: Option<u64>,

    /// Per-sample load timeout.
    sample_load_timeout_ms: Option<u64>,

    /// Pads per kit.
    grid_size: Option<usize>,

    /// How often the transport driver fires due cues.
    scheduler_tick_ms: Option<u64>,

    /// Spacing between loop starts for "play all".
    play_all_stagger_ms: Option<u64>,

    /// How long tempo changes take to settle.
    bpm_ramp_ms: Option<u64>,
}

impl Engine {
    /// Checks the values that can't simply be clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = self.bpm_range();
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min < max) {
            return Err(ConfigError::Invalid(format!(
                "bpm_range must be positive and increasing, got [{}, {}]",
                min, max
            )));
        }
        if self.grid_size() == 0 {
            return Err(ConfigError::Invalid("grid_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn bpm_range(&self) -> (f64, f64) {
        self.bpm_range
            .map(|[min, max]| (min, max))
            .unwrap_or(DEFAULT_BPM_RANGE)
    }

    /// The starting tempo, clamped into the allowed range.
    pub fn default_bpm(&self) -> f64 {
        let (min, max) = self.bpm_range();
        let bpm = self.default_bpm.filter(|bpm| bpm.is_finite()).unwrap_or(DEFAULT_BPM);
        if min < max {
            bpm.clamp(min, max)
        } else {
            bpm
        }
    }

    pub fn pinch_cooldown(&self) -> Duration {
        self.pinch_cooldown_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PINCH_COOLDOWN)
    }

    pub fn sample_load_timeout(&self) -> Duration {
        self.sample_load_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOAD_TIMEOUT)
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size.unwrap_or(DEFAULT_GRID_SIZE)
    }

    pub fn scheduler_tick(&self) -> Duration {
        self.scheduler_tick_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SCHEDULER_TICK)
            .max(Duration::from_millis(1))
    }

    pub fn play_all_stagger(&self) -> Duration {
        self.play_all_stagger_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PLAY_ALL_STAGGER)
    }

    pub fn bpm_ramp(&self) -> Duration {
        self.bpm_ramp_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BPM_RAMP)
    }
}
