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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::debug;

use super::mixer::Voice;
use super::OutputError;

/// A mock device. Doesn't actually play anything, but remembers what it was asked to play.
#[derive(Clone)]
pub struct Device {
    name: String,
    played: Arc<Mutex<Vec<Voice>>>,
    master_volume: Arc<Mutex<f32>>,
    bpm: Arc<Mutex<f64>>,
    exhausted: Arc<AtomicBool>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            played: Arc::new(Mutex::new(Vec::new())),
            master_volume: Arc::new(Mutex::new(1.0)),
            bpm: Arc::new(Mutex::new(crate::transport::DEFAULT_BPM)),
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every voice played since the last stop.
    #[cfg(test)]
    pub fn played(&self) -> Vec<Voice> {
        self.played.lock().clone()
    }

    #[cfg(test)]
    pub fn master_volume(&self) -> f32 {
        *self.master_volume.lock()
    }

    #[cfg(test)]
    pub fn bpm(&self) -> f64 {
        *self.bpm.lock()
    }

    /// Makes every subsequent play fail as if the output had run out of voices.
    #[cfg(test)]
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::Relaxed);
    }
}

impl super::Device for Device {
    fn play(&self, voice: Voice) -> Result<(), OutputError> {
        let mut played = self.played.lock();
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(OutputError::Exhausted(played.len()));
        }
        debug!(device = self.name, voice = voice.id(), gain = voice.gain(), "Playing voice (mock)");
        played.push(voice);
        Ok(())
    }

    fn stop_all(&self) {
        self.played.lock().clear();
    }

    fn set_master_volume(&self, volume: f32) {
        *self.master_volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn set_bpm(&self, bpm: f64) {
        *self.bpm.lock() = bpm;
    }

    fn active_voices(&self) -> usize {
        self.played.lock().len()
    }

    fn sample_rate(&self) -> u32 {
        44100
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn std::error::Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
