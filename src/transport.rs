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

//! The shared timeline.
//!
//! Cues are scheduled against transport position rather than wall-clock time, so
//! pausing freezes every cue at once. The transport never runs actions itself:
//! callers drain due cues with [`Transport::pop_due`] and act on them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::Clock;

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_BPM_RANGE: (f64, f64) = (60.0, 200.0);
pub const DEFAULT_BPM_RAMP: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            TransportState::Stopped => "stopped",
            TransportState::Running => "running",
            TransportState::Paused => "paused",
        };
        write!(f, "{}", state)
    }
}

/// Handle to a scheduled cue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CueId(u64);

/// A cue whose time has come.
#[derive(Debug, PartialEq)]
pub struct Due<A> {
    pub id: CueId,
    /// The transport position the cue was scheduled for.
    pub at: Duration,
    pub action: A,
}

struct Cue<A> {
    at: Duration,
    period: Option<Duration>,
    action: A,
}

/// A linear tempo glide.
#[derive(Clone, Copy, Debug)]
struct BpmRamp {
    from: f64,
    to: f64,
    started_at: Duration,
    length: Duration,
}

impl BpmRamp {
    fn steady(bpm: f64) -> BpmRamp {
        BpmRamp {
            from: bpm,
            to: bpm,
            started_at: Duration::ZERO,
            length: Duration::ZERO,
        }
    }

    fn value_at(&self, now: Duration) -> f64 {
        let elapsed = now.saturating_sub(self.started_at);
        if self.length.is_zero() || elapsed >= self.length {
            return self.to;
        }
        let progress = elapsed.as_secs_f64() / self.length.as_secs_f64();
        self.from + (self.to - self.from) * progress
    }
}

pub struct Transport<A> {
    clock: Arc<dyn Clock>,
    state: TransportState,
    /// Clock time at which the transport position was zero.
    anchor: Duration,
    /// Position held while paused.
    paused_at: Duration,
    bpm: BpmRamp,
    bpm_range: (f64, f64),
    bpm_ramp: Duration,
    next_id: u64,
    /// Cues ordered by fire time, ties broken by scheduling order.
    queue: BTreeMap<(Duration, u64), CueId>,
    cues: HashMap<CueId, Cue<A>>,
}

impl<A: Clone> Transport<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Transport<A> {
        Transport::with_tempo(clock, DEFAULT_BPM, DEFAULT_BPM_RANGE, DEFAULT_BPM_RAMP)
    }

    /// Creates a stopped transport with the given tempo settings.
    pub fn with_tempo(
        clock: Arc<dyn Clock>,
        bpm: f64,
        bpm_range: (f64, f64),
        bpm_ramp: Duration,
    ) -> Transport<A> {
        Transport {
            clock,
            state: TransportState::Stopped,
            anchor: Duration::ZERO,
            paused_at: Duration::ZERO,
            bpm: BpmRamp::steady(bpm.clamp(bpm_range.0, bpm_range.1)),
            bpm_range,
            bpm_ramp,
            next_id: 0,
            queue: BTreeMap::new(),
            cues: HashMap::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransportState::Running
    }

    /// The current transport position.
    pub fn position(&self) -> Duration {
        match self.state {
            TransportState::Stopped => Duration::ZERO,
            TransportState::Running => self.clock.now().saturating_sub(self.anchor),
            TransportState::Paused => self.paused_at,
        }
    }

    /// Starts the transport from zero. Resumes if paused, does nothing if running.
    pub fn start(&mut self) {
        match self.state {
            TransportState::Running => {}
            TransportState::Paused => self.resume(),
            TransportState::Stopped => {
                self.anchor = self.clock.now();
                self.state = TransportState::Running;
                info!(bpm = self.bpm(), "Transport started");
            }
        }
    }

    /// Stops the transport, drops every scheduled cue and resets the position.
    pub fn stop(&mut self) {
        let cleared = self.cues.len();
        self.queue.clear();
        self.cues.clear();
        self.paused_at = Duration::ZERO;
        if self.state != TransportState::Stopped || cleared > 0 {
            info!(cleared, "Transport stopped");
        }
        self.state = TransportState::Stopped;
    }

    /// Freezes the position. Scheduled cues are kept.
    pub fn pause(&mut self) {
        if self.state != TransportState::Running {
            return;
        }
        self.paused_at = self.position();
        self.state = TransportState::Paused;
        info!(position = ?self.paused_at, "Transport paused");
    }

    pub fn resume(&mut self) {
        if self.state != TransportState::Paused {
            return;
        }
        self.anchor = self.clock.now().saturating_sub(self.paused_at);
        self.state = TransportState::Running;
        info!(position = ?self.paused_at, "Transport resumed");
    }

    /// The tempo right now, following any ramp in progress.
    pub fn bpm(&self) -> f64 {
        self.bpm.value_at(self.clock.now())
    }

    /// The tempo the transport is ramping towards.
    pub fn target_bpm(&self) -> f64 {
        self.bpm.to
    }

    pub fn bpm_range(&self) -> (f64, f64) {
        self.bpm_range
    }

    /// Ramps the tempo to the given value, clamped to the allowed range. Returns the clamped value.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        let target = if bpm.is_nan() {
            self.bpm.to
        } else {
            bpm.clamp(self.bpm_range.0, self.bpm_range.1)
        };
        let now = self.clock.now();
        self.bpm = BpmRamp {
            from: self.bpm.value_at(now),
            to: target,
            started_at: now,
            length: self.bpm_ramp,
        };
        info!(requested = bpm, bpm = target, "Tempo changed");
        target
    }

    /// Schedules a one-shot cue at the given transport position.
    pub fn schedule_once(&mut self, at: Duration, action: A) -> CueId {
        self.schedule(at, None, action)
    }

    /// Schedules a cue that fires at `start` and then every `period`.
    pub fn schedule_repeat(&mut self, start: Duration, period: Duration, action: A) -> CueId {
        self.schedule(start, Some(period.max(Duration::from_millis(1))), action)
    }

    fn schedule(&mut self, at: Duration, period: Option<Duration>, action: A) -> CueId {
        let id = CueId(self.next_id);
        self.next_id += 1;
        self.queue.insert((at, id.0), id);
        self.cues.insert(id, Cue { at, period, action });
        id
    }

    /// Cancels a cue. Returns false if it had already fired or never existed.
    pub fn cancel(&mut self, id: CueId) -> bool {
        match self.cues.remove(&id) {
            Some(cue) => {
                self.queue.remove(&(cue.at, id.0));
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: CueId) -> bool {
        self.cues.contains_key(&id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.cues.len()
    }

    /// Removes and returns the earliest cue at or before the current position.
    /// Repeating cues are rescheduled one period later under the same id.
    pub fn pop_due(&mut self) -> Option<Due<A>> {
        if !self.is_running() {
            return None;
        }

        let position = self.position();
        let (&(at, seq), &id) = self.queue.first_key_value()?;
        if at > position {
            return None;
        }
        self.queue.remove(&(at, seq));

        let cue = self.cues.get_mut(&id)?;
        let action = cue.action.clone();
        match cue.period {
            Some(period) => {
                cue.at = at + period;
                self.queue.insert((cue.at, seq), id);
            }
            None => {
                self.cues.remove(&id);
            }
        }

        debug!(cue = id.0, at = ?at, position = ?position, "Cue due");
        Some(Due { id, at, action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn transport() -> (ManualClock, Transport<&'static str>) {
        let clock = ManualClock::new();
        clock.set_ms(5000);
        (clock.clone(), Transport::new(Arc::new(clock)))
    }

    fn drain(transport: &mut Transport<&'static str>) -> Vec<(u64, &'static str)> {
        let mut fired = Vec::new();
        while let Some(due) = transport.pop_due() {
            fired.push((due.at.as_millis() as u64, due.action));
        }
        fired
    }

    #[test]
    fn test_position() {
        let (clock, mut transport) = transport();
        assert_eq!(Duration::ZERO, transport.position());

        transport.start();
        clock.advance_ms(250);
        assert_eq!(Duration::from_millis(250), transport.position());

        // Starting again does not reset the position.
        transport.start();
        assert_eq!(Duration::from_millis(250), transport.position());

        transport.pause();
        clock.advance_ms(1000);
        assert_eq!(TransportState::Paused, transport.state());
        assert_eq!(Duration::from_millis(250), transport.position());

        transport.resume();
        clock.advance_ms(50);
        assert_eq!(Duration::from_millis(300), transport.position());

        transport.stop();
        assert_eq!(Duration::ZERO, transport.position());
    }

    #[test]
    fn test_cues_fire_in_order() {
        let (clock, mut transport) = transport();
        transport.start();
        transport.schedule_once(Duration::from_millis(20), "b");
        transport.schedule_once(Duration::from_millis(10), "a");
        transport.schedule_once(Duration::from_millis(20), "c");
        transport.schedule_once(Duration::from_millis(40), "d");

        assert!(drain(&mut transport).is_empty());
        clock.advance_ms(25);
        assert_eq!(vec![(10, "a"), (20, "b"), (20, "c")], drain(&mut transport));
        clock.advance_ms(25);
        assert_eq!(vec![(40, "d")], drain(&mut transport));
        assert_eq!(0, transport.scheduled_count());
    }

    #[test]
    fn test_repeat_and_cancel() {
        let (clock, mut transport) = transport();
        transport.start();
        let id = transport.schedule_repeat(Duration::ZERO, Duration::from_millis(100), "tick");

        assert_eq!(vec![(0, "tick")], drain(&mut transport));
        clock.advance_ms(250);
        assert_eq!(vec![(100, "tick"), (200, "tick")], drain(&mut transport));
        assert!(transport.is_scheduled(id));

        assert!(transport.cancel(id));
        assert!(!transport.cancel(id));
        clock.advance_ms(1000);
        assert!(drain(&mut transport).is_empty());
    }

    #[test]
    fn test_pause_holds_cues() {
        let (clock, mut transport) = transport();
        transport.start();
        transport.schedule_once(Duration::from_millis(100), "held");
        clock.advance_ms(50);
        transport.pause();
        clock.advance_ms(500);
        assert!(drain(&mut transport).is_empty());

        transport.resume();
        clock.advance_ms(49);
        assert!(drain(&mut transport).is_empty());
        clock.advance_ms(1);
        assert_eq!(vec![(100, "held")], drain(&mut transport));
    }

    #[test]
    fn test_stop_clears_cues() {
        let (clock, mut transport) = transport();
        transport.start();
        transport.schedule_once(Duration::from_millis(10), "gone");
        transport.schedule_repeat(Duration::ZERO, Duration::from_millis(10), "gone");
        transport.stop();
        assert_eq!(0, transport.scheduled_count());

        transport.start();
        clock.advance_ms(100);
        assert!(drain(&mut transport).is_empty());
    }

    #[test]
    fn test_stopped_transport_fires_nothing() {
        let (clock, mut transport) = transport();
        transport.schedule_once(Duration::ZERO, "waiting");
        clock.advance_ms(100);
        assert!(drain(&mut transport).is_empty());
        transport.start();
        assert_eq!(vec![(0, "waiting")], drain(&mut transport));
    }

    #[test]
    fn test_bpm_clamp_and_ramp() {
        let (clock, mut transport) = transport();
        assert_eq!(120.0, transport.bpm());

        assert_eq!(200.0, transport.set_bpm(500.0));
        assert_eq!(120.0, transport.bpm());
        clock.advance_ms(1000);
        assert_eq!(160.0, transport.bpm());
        clock.advance_ms(1000);
        assert_eq!(200.0, transport.bpm());
        clock.advance_ms(1000);
        assert_eq!(200.0, transport.bpm());

        assert_eq!(60.0, transport.set_bpm(10.0));
        assert_eq!(60.0, transport.target_bpm());
        assert_eq!(60.0, transport.set_bpm(f64::NAN));
    }
}
