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
//! Outbound notifications for the UI and any other observer.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

use crate::loops::LoopId;
use crate::samples::StoreStats;
use crate::transport::TransportState;
use crate::trigger::TriggerOrigin;

/// Pads triggered within this window are reported as pulsing.
pub const PULSE_WINDOW: std::time::Duration = std::time::Duration::from_millis(250);

const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum CoreEvent {
    PadTriggered {
        pad: usize,
        kit: String,
        origin: TriggerOrigin,
    },
    PadHovered {
        pad: Option<usize>,
        confidence: f32,
    },
    RecordingStarted,
    RecordingStopped {
        events: usize,
        duration_ms: f64,
    },
    LoopSaved {
        id: LoopId,
        name: String,
    },
    LoopRemoved(LoopId),
    LoopStarted(LoopId),
    LoopStopped(LoopId),
    KitChanged {
        kit: String,
        ready: bool,
    },
    KitLoadFailed {
        kit: String,
        reason: String,
    },
    TransportChanged(TransportState),
    BpmChanged(f64),
    MasterVolumeChanged(f32),
    HelpToggled(bool),
}

impl fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreEvent::PadTriggered { pad, kit, .. } => write!(f, "pad {} ({})", pad, kit),
            CoreEvent::PadHovered { pad: Some(pad), .. } => write!(f, "hover {}", pad),
            CoreEvent::PadHovered { pad: None, .. } => write!(f, "hover none"),
            CoreEvent::RecordingStarted => write!(f, "recording"),
            CoreEvent::RecordingStopped {
                events,
                duration_ms,
            } => write!(f, "recorded {} events over {:.0}ms", events, duration_ms),
            CoreEvent::LoopSaved { name, .. } => write!(f, "saved {}", name),
            CoreEvent::LoopRemoved(id) => write!(f, "removed loop {}", id),
            CoreEvent::LoopStarted(id) => write!(f, "playing loop {}", id),
            CoreEvent::LoopStopped(id) => write!(f, "stopped loop {}", id),
            CoreEvent::KitChanged { kit, ready } => write!(
                f,
                "kit {}{}",
                kit,
                if *ready { "" } else { " (degraded)" }
            ),
            CoreEvent::KitLoadFailed { kit, reason } => write!(f, "kit {} failed: {}", kit, reason),
            CoreEvent::TransportChanged(state) => write!(f, "transport {}", state),
            CoreEvent::BpmChanged(bpm) => write!(f, "{:.0} bpm", bpm),
            CoreEvent::MasterVolumeChanged(volume) => write!(f, "volume {:.2}", volume),
            CoreEvent::HelpToggled(open) => write!(f, "help {}", if *open { "open" } else { "closed" }),
        }
    }
}

/// A subscription registry. Every subscriber sees every event emitted after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> EventBus {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Sends an event to every subscriber. Having no subscribers is fine.
    pub fn emit(&self, event: CoreEvent) {
        debug!(event = %event, "Emitting event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the UI needs to render one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub kit: String,
    pub kit_ready: bool,
    pub recording: bool,
    pub event_count: usize,
    pub transport: TransportState,
    pub position_ms: f64,
    pub bpm: f64,
    pub master_volume: f32,
    pub master_length_ms: Option<f64>,
    pub playing_loops: usize,
    pub saved_loops: usize,
    pub hovered_pad: Option<usize>,
    /// Pads triggered within [`PULSE_WINDOW`], in pad order.
    pub pulses: Vec<usize>,
    pub help_open: bool,
    pub samples: StoreStats,
}

impl Snapshot {
    pub fn is_playing(&self) -> bool {
        self.transport == TransportState::Running
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kit={}{} rec={} events={} transport={} bpm={:.0} loops={}/{}",
            self.kit,
            if self.kit_ready { "" } else { "(degraded)" },
            self.recording,
            self.event_count,
            self.transport,
            self.bpm,
            self.playing_loops,
            self.saved_loops,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(2, bus.subscriber_count());

        bus.emit(CoreEvent::RecordingStarted);
        bus.emit(CoreEvent::BpmChanged(90.0));

        for rx in [&mut first, &mut second] {
            assert_eq!(CoreEvent::RecordingStarted, rx.recv().await.unwrap());
            assert_eq!(CoreEvent::BpmChanged(90.0), rx.recv().await.unwrap());
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(CoreEvent::HelpToggled(true));
        assert_eq!(0, bus.subscriber_count());
    }
}
