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
//! The audio output boundary.
use std::{error::Error, fmt, sync::Arc};

use crate::config;

pub mod cpal;
pub mod effects;
pub mod mixer;
pub mod mock;
mod thread_priority;

pub use mixer::Voice;

/// Why a voice could not be handed to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("output exhausted with {0} voices playing")]
    Exhausted(usize),

    #[error("output disconnected")]
    Disconnected,
}

pub trait Device: fmt::Display + Send + Sync {
    /// Queues a voice. Returns immediately; the voice starts after the device's fixed latency.
    fn play(&self, voice: Voice) -> Result<(), OutputError>;

    /// Silences every voice, queued or playing.
    fn stop_all(&self);

    /// Ramps the master volume toward the given level in [0, 1].
    fn set_master_volume(&self, volume: f32);

    /// Re-times tempo-synced effects.
    fn set_bpm(&self, bpm: f64);

    fn active_voices(&self) -> usize;

    fn sample_rate(&self) -> u32;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the configured device. Names starting with "mock" give a silent test device.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
