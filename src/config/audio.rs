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

pub const DEFAULT_DEVICE: &str = "default";
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_BUFFER_SIZE: usize = 256;
pub const DEFAULT_MAX_VOICES: usize = 32;
pub const DEFAULT_MASTER_VOLUME_RAMP: Duration = Duration::from_millis(100);

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The output device. "default" for the host default, "mock" for a silent device.
    device: Option<String>,

    /// Output sample rate in Hz. Samples are resampled to this rate when loaded.
    sample_rate: Option<u32>,

    /// Stream buffer size in frames. Also the fixed trigger latency in samples.
    buffer_size: Option<usize>,

    /// Voices allowed at once before triggers are dropped.
    max_voices: Option<usize>,

    /// How long master volume changes take to settle.
    master_volume_ramp_ms: Option<u64>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: &str) -> Audio {
        self.device = Some(device.to_string());
        self
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1)
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES).max(1)
    }

    pub fn master_volume_ramp(&self) -> Duration {
        self.master_volume_ramp_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MASTER_VOLUME_RAMP)
    }
}
