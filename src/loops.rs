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

//! Recorded events, loops and the saved loop library.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::SequenceResult;

/// Clamps a velocity into [0, 1]. Anything that isn't a number plays at full velocity.
pub fn normalize_velocity(velocity: f32) -> f32 {
    if velocity.is_finite() {
        velocity.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// A single trigger captured during a take.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pad: usize,
    kit: String,
    velocity: f32,
    /// Milliseconds since the start of the take.
    timestamp_ms: f64,
}

impl RecordedEvent {
    pub fn new(pad: usize, kit: &str, velocity: f32, timestamp_ms: f64) -> RecordedEvent {
        RecordedEvent {
            pad,
            kit: kit.to_string(),
            velocity: normalize_velocity(velocity),
            timestamp_ms,
        }
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn kit(&self) -> &str {
        &self.kit
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

/// Identifies a loop.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LoopId(String);

impl LoopId {
    /// Generates a new random loop id.
    pub fn generate() -> LoopId {
        LoopId(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(9)
                .map(|c| char::from(c).to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LoopId {
    fn from(id: &str) -> Self {
        LoopId(id.to_string())
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A saved take. Never mutated once created.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Loop {
    id: LoopId,
    events: Vec<RecordedEvent>,
    duration_ms: f64,
    bpm_at_creation: f64,
    /// Milliseconds since the unix epoch.
    created_at: u64,
    display_name: String,
}

impl Loop {
    pub fn new(
        id: LoopId,
        events: Vec<RecordedEvent>,
        duration_ms: f64,
        bpm_at_creation: f64,
        display_name: &str,
    ) -> Loop {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or_default();
        Loop {
            id,
            events,
            duration_ms,
            bpm_at_creation,
            created_at,
            display_name: display_name.to_string(),
        }
    }

    pub fn id(&self) -> &LoopId {
        &self.id
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn bpm_at_creation(&self) -> f64 {
        self.bpm_at_creation
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} events, {:.0}ms @ {:.0} bpm)",
            self.display_name,
            self.id,
            self.events.len(),
            self.duration_ms,
            self.bpm_at_creation
        )
    }
}

/// The set of saved loops, in the order they were saved.
#[derive(Default)]
pub struct LoopLibrary {
    loops: Vec<Arc<Loop>>,
    saved: usize,
}

impl LoopLibrary {
    pub fn new() -> LoopLibrary {
        LoopLibrary::default()
    }

    /// Restores a library from persisted loops.
    pub fn from_loops(loops: Vec<Loop>) -> LoopLibrary {
        let saved = loops.len();
        LoopLibrary {
            loops: loops.into_iter().map(Arc::new).collect(),
            saved,
        }
    }

    /// Saves a finished take as a new loop.
    pub fn save(&mut self, take: &SequenceResult, bpm: f64) -> Arc<Loop> {
        self.saved += 1;
        let saved = Arc::new(Loop::new(
            LoopId::generate(),
            take.events().to_vec(),
            take.duration_ms(),
            bpm,
            &format!("Loop {}", self.saved),
        ));
        info!(
            loop_id = %saved.id(),
            name = saved.display_name(),
            events = saved.events().len(),
            duration_ms = saved.duration_ms(),
            "Loop saved"
        );
        self.loops.push(saved.clone());
        saved
    }

    /// Adds an existing loop. Loops whose id is already present are ignored.
    pub fn insert(&mut self, saved: Arc<Loop>) -> bool {
        if self.get(saved.id()).is_some() {
            warn!(loop_id = %saved.id(), "Loop already saved");
            return false;
        }
        self.saved += 1;
        self.loops.push(saved);
        true
    }

    pub fn get(&self, id: &LoopId) -> Option<&Arc<Loop>> {
        self.loops.iter().find(|saved| saved.id() == id)
    }

    pub fn remove(&mut self, id: &LoopId) -> Option<Arc<Loop>> {
        let index = self.loops.iter().position(|saved| saved.id() == id)?;
        Some(self.loops.remove(index))
    }

    /// Removes the most recently saved loop.
    pub fn pop(&mut self) -> Option<Arc<Loop>> {
        self.loops.pop()
    }

    /// Removes every loop, returning them.
    pub fn clear(&mut self) -> Vec<Arc<Loop>> {
        std::mem::take(&mut self.loops)
    }

    pub fn list(&self) -> &[Arc<Loop>] {
        &self.loops
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(events: Vec<RecordedEvent>, duration_ms: f64) -> SequenceResult {
        SequenceResult::new(events, duration_ms, duration_ms)
    }

    #[test]
    fn test_event_velocity_is_normalized() {
        assert_eq!(0.25, RecordedEvent::new(0, "drums", 0.25, 0.0).velocity());
        assert_eq!(1.0, RecordedEvent::new(0, "drums", 3.0, 0.0).velocity());
        assert_eq!(0.0, RecordedEvent::new(0, "drums", -1.0, 0.0).velocity());
        assert_eq!(1.0, RecordedEvent::new(0, "drums", f32::NAN, 0.0).velocity());
        assert_eq!(1.0, RecordedEvent::new(0, "drums", f32::NEG_INFINITY, 0.0).velocity());
    }

    #[test]
    fn test_loop_id() {
        let id = LoopId::generate();
        assert_eq!(9, id.as_str().len());
        assert_ne!(id, LoopId::generate());
    }

    #[test]
    fn test_velocity_is_clamped() {
        assert_eq!(1.0, RecordedEvent::new(0, "drums", 1.5, 0.0).velocity());
        assert_eq!(0.0, RecordedEvent::new(0, "drums", -0.5, 0.0).velocity());
    }

    #[test]
    fn test_library() {
        let mut library = LoopLibrary::new();
        assert!(library.is_empty());

        let first = library.save(
            &take(vec![RecordedEvent::new(2, "drums", 1.0, 100.0)], 800.0),
            120.0,
        );
        let second = library.save(&take(vec![], 800.0), 90.0);
        assert_eq!("Loop 1", first.display_name());
        assert_eq!("Loop 2", second.display_name());
        assert_eq!(800.0, first.duration_ms());
        assert_eq!(90.0, second.bpm_at_creation());
        assert_eq!(2, library.len());

        assert!(!library.insert(first.clone()));
        assert_eq!(Some(second.clone()), library.pop());
        assert_eq!(Some(&first), library.get(first.id()));
        assert_eq!(Some(first.clone()), library.remove(first.id()));
        assert!(library.is_empty());

        // Names keep counting after removal.
        let third = library.save(&take(vec![], 800.0), 120.0);
        assert_eq!("Loop 3", third.display_name());
        assert_eq!(1, library.clear().len());
        assert!(library.is_empty());
    }

    #[test]
    fn test_serialization() {
        let saved = Loop::new(
            LoopId::from("abc"),
            vec![RecordedEvent::new(5, "piano", 0.5, 400.0)],
            800.0,
            120.0,
            "Loop 1",
        );
        let json = serde_json::to_string(&saved).unwrap();
        assert!(json.contains("\"id\":\"abc\""));
        let restored: Loop = serde_json::from_str(&json).unwrap();
        assert_eq!(saved, restored);
    }
}
