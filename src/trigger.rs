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
//! The trigger engine: turns a pad hit into sound, and into a captured event
//! when a take is in progress.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::audio::effects::db_to_linear;
use crate::audio::{Device, Voice};
use crate::capture::CaptureSession;
use crate::loops::normalize_velocity;
use crate::samples::SampleStore;

/// Output level at velocity 0. Velocity 1 plays at unity.
pub const MIN_VELOCITY_GAIN_DB: f32 = -10.0;

/// Maps velocity linearly onto the dB window, then to a linear gain.
pub fn velocity_to_gain(velocity: f32) -> f32 {
    db_to_linear(MIN_VELOCITY_GAIN_DB * (1.0 - normalize_velocity(velocity)))
}

/// Where a trigger came from. Only live triggers are captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOrigin {
    Live,
    Loop,
}

/// What became of a trigger. Never an error: every failure is absorbed and logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    Played,
    /// The pad's sample isn't loaded.
    NotReady,
    /// The output had no room for another voice.
    Dropped,
    /// No output has been attached yet.
    Uninitialized,
}

pub struct TriggerEngine {
    store: Arc<SampleStore>,
    capture: Arc<Mutex<CaptureSession>>,
    device: RwLock<Option<Arc<dyn Device>>>,
}

impl TriggerEngine {
    pub fn new(store: Arc<SampleStore>, capture: Arc<Mutex<CaptureSession>>) -> TriggerEngine {
        TriggerEngine {
            store,
            capture,
            device: RwLock::new(None),
        }
    }

    /// Attaches the audio output. Until this is called every trigger is a no-op.
    pub fn initialize(&self, device: Arc<dyn Device>) {
        info!(device = %device, "Trigger engine initialized");
        *self.device.write() = Some(device);
    }

    pub fn is_initialized(&self) -> bool {
        self.device.read().is_some()
    }

    pub fn device(&self) -> Option<Arc<dyn Device>> {
        self.device.read().clone()
    }

    /// Plays a pad. Live triggers are stamped into the take in progress before anything
    /// else happens, so a pad that fails to sound is still captured.
    pub fn trigger(
        &self,
        pad: usize,
        kit: &str,
        velocity: f32,
        origin: TriggerOrigin,
    ) -> TriggerOutcome {
        let Some(device) = self.device() else {
            warn!(pad, kit, "Trigger before the engine was initialized");
            return TriggerOutcome::Uninitialized;
        };

        let velocity = normalize_velocity(velocity);
        if origin == TriggerOrigin::Live {
            self.capture.lock().record_event(pad, kit, velocity);
        }

        let Some(sample) = self.store.trigger(pad, kit) else {
            return TriggerOutcome::NotReady;
        };

        let gain = velocity_to_gain(velocity);
        match device.play(Voice::new(sample, gain)) {
            Ok(()) => {
                debug!(pad, kit, velocity, gain, origin = ?origin, "Pad triggered");
                TriggerOutcome::Played
            }
            Err(e) => {
                warn!(pad, kit, err = %e, "Dropped trigger");
                TriggerOutcome::Dropped
            }
        }
    }
}
