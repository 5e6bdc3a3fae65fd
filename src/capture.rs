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

//! Recording of takes.
//!
//! A capture session moves between [`CaptureState::Idle`] and
//! [`CaptureState::Recording`]. The first take ever stopped fixes the master loop
//! length; every later take reports that length as its duration, so layered loops
//! share one period.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::loops::RecordedEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
}

/// A finished take.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceResult {
    events: Vec<RecordedEvent>,
    /// The reported duration. Equal to the master loop length.
    duration_ms: f64,
    /// How long the take actually lasted.
    elapsed_ms: f64,
}

impl SequenceResult {
    pub fn new(events: Vec<RecordedEvent>, duration_ms: f64, elapsed_ms: f64) -> SequenceResult {
        SequenceResult {
            events,
            duration_ms,
            elapsed_ms,
        }
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct CaptureSession {
    clock: Arc<dyn Clock>,
    state: CaptureState,
    started_at: Duration,
    events: Vec<RecordedEvent>,
    master_length_ms: Option<f64>,
}

impl CaptureSession {
    pub fn new(clock: Arc<dyn Clock>) -> CaptureSession {
        CaptureSession {
            clock,
            state: CaptureState::Idle,
            started_at: Duration::ZERO,
            events: Vec::new(),
            master_length_ms: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    /// Starts a take. Does nothing if a take is already in progress.
    pub fn start(&mut self) {
        if self.is_recording() {
            debug!("Capture already in progress");
            return;
        }

        self.events.clear();
        self.started_at = self.clock.now();
        self.state = CaptureState::Recording;
        info!(
            master_length_ms = self.master_length_ms,
            "Capture started"
        );
    }

    /// Appends an event stamped relative to the start of the take. Ignored while idle.
    pub fn record_event(&mut self, pad: usize, kit: &str, velocity: f32) {
        if !self.is_recording() {
            return;
        }

        let timestamp_ms = self.elapsed_ms();
        self.events
            .push(RecordedEvent::new(pad, kit, velocity, timestamp_ms));
        debug!(pad, kit, velocity, timestamp_ms, "Event captured");
    }

    /// Finishes the take. Returns None if no take was in progress.
    pub fn stop(&mut self) -> Option<SequenceResult> {
        if !self.is_recording() {
            return None;
        }

        self.state = CaptureState::Idle;
        let elapsed_ms = self.elapsed_ms();
        let duration_ms = match self.master_length_ms {
            Some(master_length_ms) => master_length_ms,
            None => {
                info!(master_length_ms = elapsed_ms, "Master loop length set");
                self.master_length_ms = Some(elapsed_ms);
                elapsed_ms
            }
        };

        let events = std::mem::take(&mut self.events);
        info!(
            duration_ms,
            elapsed_ms,
            events = events.len(),
            "Capture stopped"
        );
        Some(SequenceResult::new(events, duration_ms, elapsed_ms))
    }

    /// The master loop length, once the first take has been stopped.
    pub fn master_length_ms(&self) -> Option<f64> {
        self.master_length_ms
    }

    /// Replaces the master loop length. Only positive, finite lengths are accepted.
    pub fn override_master_length(&mut self, length_ms: f64) -> bool {
        if !length_ms.is_finite() || length_ms <= 0.0 {
            warn!(length_ms, "Ignoring invalid master loop length");
            return false;
        }
        self.master_length_ms = Some(length_ms);
        info!(master_length_ms = length_ms, "Master loop length overridden");
        true
    }

    /// The events captured so far in the current take.
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn elapsed_ms(&self) -> f64 {
        clock::as_millis_f64(self.clock.now().saturating_sub(self.started_at))
    }
}
