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

//! Loop playback on the shared transport.
//!
//! Every playing loop owns one repeating cue that marks the start of each
//! repetition. When it fires, one-shot cues are laid out for each of the loop's
//! events at `repetition start + (timestamp mod period)`. All of those cue ids are
//! tracked per loop so that stopping a loop also silences events already queued
//! for the current repetition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::loops::{Loop, LoopId, RecordedEvent};
use crate::transport::{CueId, Transport};

/// Added to the last event when a loop carries no duration.
const PERIOD_EPSILON_MS: f64 = 1.0;

pub const DEFAULT_PLAY_ALL_STAGGER: Duration = Duration::from_millis(50);

/// The actions the scheduler places on the transport.
#[derive(Clone, Debug)]
pub enum LoopCue {
    /// A new repetition of the loop begins.
    Repeat { loop_id: LoopId },
    /// One of the loop's events should sound.
    Event { loop_id: LoopId, index: usize },
    /// A loop queued by `play_all` should start.
    Start(Arc<Loop>),
}

/// The live schedule of one playing loop.
pub struct PlayingLoopHandle {
    looped: Arc<Loop>,
    period: Duration,
    repeat: CueId,
    pending: HashSet<CueId>,
}

impl PlayingLoopHandle {
    pub fn looped(&self) -> &Arc<Loop> {
        &self.looped
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Event cues laid out for the current repetition that have not fired yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn cancel(&self, transport: &mut Transport<LoopCue>) {
        transport.cancel(self.repeat);
        for cue in self.pending.iter() {
            transport.cancel(*cue);
        }
    }
}

pub struct LoopScheduler {
    transport: Transport<LoopCue>,
    playing: HashMap<LoopId, PlayingLoopHandle>,
    queued: HashMap<LoopId, CueId>,
    stagger: Duration,
}

impl LoopScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> LoopScheduler {
        LoopScheduler::with_transport(Transport::new(clock), DEFAULT_PLAY_ALL_STAGGER)
    }

    pub fn with_transport(transport: Transport<LoopCue>, stagger: Duration) -> LoopScheduler {
        LoopScheduler {
            transport,
            playing: HashMap::new(),
            queued: HashMap::new(),
            stagger,
        }
    }

    pub fn transport(&self) -> &Transport<LoopCue> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<LoopCue> {
        &mut self.transport
    }

    /// The repetition period of a loop, if it has one.
    pub fn effective_period(looped: &Loop) -> Option<Duration> {
        let duration_ms = looped.duration_ms();
        let period_ms = if duration_ms.is_finite() && duration_ms > 0.0 {
            duration_ms
        } else {
            looped
                .events()
                .iter()
                .map(|event| event.timestamp_ms())
                .reduce(f64::max)?
                .max(0.0)
                + PERIOD_EPSILON_MS
        };
        Some(clock::millis(period_ms))
    }

    /// Starts repeating a loop from the current transport position. Returns false if the
    /// loop is already playing or cannot be played.
    pub fn play(&mut self, looped: Arc<Loop>) -> bool {
        let loop_id = looped.id().clone();
        if self.playing.contains_key(&loop_id) {
            warn!(loop_id = %loop_id, "Loop is already playing");
            return false;
        }
        if let Some(queued) = self.queued.remove(&loop_id) {
            self.transport.cancel(queued);
        }

        let Some(period) = Self::effective_period(&looped) else {
            warn!(loop_id = %loop_id, "Loop has no duration and no events, not playing");
            return false;
        };

        self.transport.start();
        let repeat = self.transport.schedule_repeat(
            self.transport.position(),
            period,
            LoopCue::Repeat {
                loop_id: loop_id.clone(),
            },
        );

        info!(
            loop_id = %loop_id,
            name = looped.display_name(),
            period = ?period,
            events = looped.events().len(),
            "Loop playing"
        );
        self.playing.insert(
            loop_id,
            PlayingLoopHandle {
                looped,
                period,
                repeat,
                pending: HashSet::new(),
            },
        );
        true
    }

    /// Stops a loop, including any of its events already queued. Stopping the last loop
    /// stops the transport.
    pub fn stop(&mut self, loop_id: &LoopId) -> bool {
        let stopped = match self.playing.remove(loop_id) {
            Some(handle) => {
                handle.cancel(&mut self.transport);
                true
            }
            None => match self.queued.remove(loop_id) {
                Some(queued) => self.transport.cancel(queued),
                None => false,
            },
        };

        if !stopped {
            warn!(loop_id = %loop_id, "Loop is not playing");
            return false;
        }

        info!(loop_id = %loop_id, "Loop stopped");
        if self.playing.is_empty() && self.queued.is_empty() {
            self.transport.stop();
        }
        true
    }

    /// Stops every loop and the transport. Safe with nothing playing.
    pub fn stop_all(&mut self) {
        let count = self.playing.len() + self.queued.len();
        self.playing.clear();
        self.queued.clear();
        self.transport.stop();
        if count > 0 {
            info!(count, "All loops stopped");
        }
    }

    /// Stops everything, then starts the given loops. The first starts immediately, the
    /// rest are staggered slightly on the transport.
    pub fn play_all(&mut self, loops: &[Arc<Loop>]) {
        self.stop_all();
        let Some((first, rest)) = loops.split_first() else {
            return;
        };

        self.transport.start();
        self.play(first.clone());
        let origin = self.transport.position();
        for (index, looped) in rest.iter().enumerate() {
            if self.playing.contains_key(looped.id()) || self.queued.contains_key(looped.id()) {
                warn!(loop_id = %looped.id(), "Loop listed twice, skipping");
                continue;
            }
            let at = origin + self.stagger * (index as u32 + 1);
            let cue = self
                .transport
                .schedule_once(at, LoopCue::Start(looped.clone()));
            self.queued.insert(looped.id().clone(), cue);
        }
        info!(count = loops.len(), "Playing all loops");
    }

    /// Fires every due cue and returns, in order, the events that should sound now.
    pub fn pump(&mut self) -> Vec<RecordedEvent> {
        let mut triggered = Vec::new();
        while let Some(due) = self.transport.pop_due() {
            match due.action {
                LoopCue::Repeat { loop_id } => {
                    let Some(handle) = self.playing.get_mut(&loop_id) else {
                        continue;
                    };
                    let period_ms = clock::as_millis_f64(handle.period);
                    for (index, event) in handle.looped.events().iter().enumerate() {
                        let offset_ms = event.timestamp_ms().rem_euclid(period_ms);
                        let at = due.at + clock::millis(offset_ms);
                        let cue = self.transport.schedule_once(
                            at,
                            LoopCue::Event {
                                loop_id: loop_id.clone(),
                                index,
                            },
                        );
                        handle.pending.insert(cue);
                    }
                    debug!(loop_id = %loop_id, at = ?due.at, "Loop repetition");
                }
                LoopCue::Event { loop_id, index } => {
                    let Some(handle) = self.playing.get_mut(&loop_id) else {
                        continue;
                    };
                    handle.pending.remove(&due.id);
                    if let Some(event) = handle.looped.events().get(index) {
                        triggered.push(event.clone());
                    }
                }
                LoopCue::Start(looped) => {
                    self.queued.remove(looped.id());
                    self.play(looped);
                }
            }
        }
        triggered
    }

    pub fn is_playing(&self, loop_id: &LoopId) -> bool {
        self.playing.contains_key(loop_id)
    }

    /// Playing, or waiting on a staggered start.
    pub fn is_active(&self, loop_id: &LoopId) -> bool {
        self.playing.contains_key(loop_id) || self.queued.contains_key(loop_id)
    }

    /// Ids of every active loop, sorted.
    pub fn active(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = self
            .playing
            .keys()
            .chain(self.queued.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn handle(&self, loop_id: &LoopId) -> Option<&PlayingLoopHandle> {
        self.playing.get(loop_id)
    }

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    /// Loops waiting on a staggered start.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }
}
