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

//! The audio core: the one object that owns every component and turns gestures and voice
//! commands into sound, takes and loops.
//!
//! Lock order is `state` then `capture`. The trigger engine only ever takes `capture`, so
//! triggers are fired with `state` released.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::audio::{self, Device};
use crate::capture::{CaptureSession, SequenceResult};
use crate::clock::{self, Clock};
use crate::commands::{Command, Vocabulary};
use crate::config::{self, ConfigError};
use crate::events::{CoreEvent, EventBus, Snapshot, PULSE_WINDOW};
use crate::kits::{Kit, KitCatalog, KitError, DEFAULT_KIT};
use crate::loops::{Loop, LoopId, LoopLibrary, RecordedEvent};
use crate::samples::{SampleLoader, SampleStore, StoreStats};
use crate::scheduler::LoopScheduler;
use crate::state::{PersistedState, StateError, StateStore};
use crate::transport::{Transport, TransportState};
use crate::trigger::{TriggerEngine, TriggerOrigin, TriggerOutcome};

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// No sound can be produced at all.
    #[error("audio output could not be established: {0}")]
    Initialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Kit(#[from] KitError),

    #[error("unknown kit {0}")]
    UnknownKit(String),

    #[error("kit {0} is in use")]
    KitInUse(String),
}

/// Input from the gesture collaborator, already debounced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureEvent {
    Hover { pad: Option<usize>, confidence: f32 },
    Trigger { pad: usize },
}

struct CoreState {
    scheduler: LoopScheduler,
    library: LoopLibrary,
    kit: String,
    kit_ready: bool,
    /// The last finished take that had events, waiting to be saved.
    last_take: Option<SequenceResult>,
    hovered: Option<usize>,
    help_open: bool,
    /// Clock time of each pad's last trigger.
    pulses: Vec<Option<Duration>>,
    master_volume: f32,
}

pub struct AudioCore {
    clock: Arc<dyn Clock>,
    settings: config::Engine,
    catalog: RwLock<KitCatalog>,
    store: Arc<SampleStore>,
    capture: Arc<Mutex<CaptureSession>>,
    trigger: TriggerEngine,
    state: Mutex<CoreState>,
    vocabulary: Vocabulary,
    events: EventBus,
    persistence: Option<StateStore>,
    /// Counts kit switch requests. Only the latest one may change the current kit.
    kit_requests: AtomicU64,
    disposed: AtomicBool,
}

impl AudioCore {
    /// Builds the core from configuration and the persisted state. No output is attached
    /// until [`AudioCore::initialize`] is called.
    pub fn new(
        settings: config::Engine,
        catalog: KitCatalog,
        loader: Arc<dyn SampleLoader>,
        clock: Arc<dyn Clock>,
        initial: PersistedState,
    ) -> AudioCore {
        let store = Arc::new(SampleStore::new(
            loader,
            clock.clone(),
            settings.sample_load_timeout(),
        ));

        let mut capture = CaptureSession::new(clock.clone());
        if let Some(length_ms) = initial.master_loop_length_ms {
            capture.override_master_length(length_ms);
        }
        let capture = Arc::new(Mutex::new(capture));

        let bpm = initial
            .bpm
            .filter(|bpm| bpm.is_finite())
            .unwrap_or_else(|| settings.default_bpm());
        let transport = Transport::with_tempo(
            clock.clone(),
            bpm,
            settings.bpm_range(),
            settings.bpm_ramp(),
        );
        let scheduler = LoopScheduler::with_transport(transport, settings.play_all_stagger());

        let kit = Self::starting_kit(&catalog, &initial.selected_kit);
        let master_volume = if initial.master_volume.is_finite() {
            initial.master_volume.clamp(0.0, 1.0)
        } else {
            1.0
        };

        info!(
            kit,
            bpm,
            master_volume,
            loops = initial.loops.len(),
            master_loop_length_ms = initial.master_loop_length_ms,
            gesture_cooldown = ?settings.pinch_cooldown(),
            "Audio core created"
        );

        AudioCore {
            trigger: TriggerEngine::new(store.clone(), capture.clone()),
            state: Mutex::new(CoreState {
                scheduler,
                library: LoopLibrary::from_loops(initial.loops),
                kit,
                kit_ready: false,
                last_take: None,
                hovered: None,
                help_open: false,
                pulses: vec![None; catalog.grid_size()],
                master_volume,
            }),
            clock,
            settings,
            catalog: RwLock::new(catalog),
            store,
            capture,
            vocabulary: Vocabulary::standard(),
            events: EventBus::new(),
            persistence: None,
            kit_requests: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Writes the persisted state to the given store whenever it changes.
    pub fn with_persistence(mut self, persistence: StateStore) -> AudioCore {
        self.persistence = Some(persistence);
        self
    }

    /// Replaces the voice vocabulary.
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> AudioCore {
        self.vocabulary = vocabulary;
        self
    }

    fn starting_kit(catalog: &KitCatalog, selected: &str) -> String {
        if catalog.contains(selected) {
            return selected.to_string();
        }
        let fallback = if catalog.contains(DEFAULT_KIT) {
            DEFAULT_KIT
        } else {
            catalog.ids().first().copied().unwrap_or(DEFAULT_KIT)
        };
        warn!(selected, fallback, "Selected kit is not in the catalog");
        fallback.to_string()
    }

    /// Opens the configured audio output and attaches it.
    pub fn initialize_output(&self, output: &config::Audio) -> Result<(), CoreError> {
        let device = audio::get_device(output)
            .map_err(|e: Box<dyn Error>| CoreError::Initialization(e.to_string()))?;
        self.initialize(device);
        Ok(())
    }

    /// Attaches an audio output and brings it in line with the current volume and tempo.
    pub fn initialize(&self, device: Arc<dyn Device>) {
        {
            let state = self.state.lock();
            device.set_master_volume(state.master_volume);
            device.set_bpm(state.scheduler.transport().target_bpm());
        }
        self.trigger.initialize(device);
    }

    pub fn is_initialized(&self) -> bool {
        self.trigger.is_initialized()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &config::Engine {
        &self.settings
    }

    pub fn catalog(&self) -> KitCatalog {
        self.catalog.read().clone()
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    /// Plays a pad of the current kit, capturing it if a take is in progress.
    pub fn trigger_pad(&self, pad: usize, velocity: f32) -> TriggerOutcome {
        let (kit, grid_size) = {
            let state = self.state.lock();
            (state.kit.clone(), state.pulses.len())
        };
        if pad >= grid_size {
            warn!(pad, grid_size, "Pad out of range");
            return TriggerOutcome::NotReady;
        }

        let outcome = self.trigger.trigger(pad, &kit, velocity, TriggerOrigin::Live);
        if outcome != TriggerOutcome::Uninitialized {
            self.pulse(pad, kit, TriggerOrigin::Live);
        }
        outcome
    }

    fn pulse(&self, pad: usize, kit: String, origin: TriggerOrigin) {
        let now = self.clock.now();
        if let Some(pulse) = self.state.lock().pulses.get_mut(pad) {
            *pulse = Some(now);
        }
        self.events.emit(CoreEvent::PadTriggered { pad, kit, origin });
    }

    /// Records which pad the hand is over. Only changes are emitted.
    pub fn hover(&self, pad: Option<usize>, confidence: f32) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.hovered != pad;
            state.hovered = pad;
            changed
        };
        if changed {
            self.events.emit(CoreEvent::PadHovered { pad, confidence });
        }
    }

    pub fn handle_gesture(&self, gesture: GestureEvent) {
        match gesture {
            GestureEvent::Hover { pad, confidence } => self.hover(pad, confidence),
            GestureEvent::Trigger { pad } => {
                self.trigger_pad(pad, 1.0);
            }
        }
    }

    pub fn resolve_voice(&self, phrase: &str) -> Option<Command> {
        let command = self.vocabulary.resolve(phrase);
        if command.is_none() {
            debug!(phrase, "Ignoring unrecognized phrase");
        }
        command
    }

    /// Resolves a voice phrase and runs it. Unrecognized phrases are ignored.
    pub async fn handle_voice(&self, phrase: &str) -> Option<Command> {
        let command = self.resolve_voice(phrase)?;
        self.run_command(command.clone()).await;
        Some(command)
    }

    /// Executes a command, logging rather than returning a failure.
    pub async fn run_command(&self, command: Command) {
        if let Err(e) = self.execute(command.clone()).await {
            warn!(command = %command, err = %e, "Voice command failed");
        }
    }

    pub async fn execute(&self, command: Command) -> Result<(), CoreError> {
        debug!(command = %command, "Executing command");
        match command {
            Command::Record => self.start_recording(),
            Command::Stop => {
                self.stop_recording();
            }
            Command::SaveLoop => {
                self.save_loop();
            }
            Command::Clear => {
                self.clear();
            }
            Command::ClearAll => self.clear_all(),
            Command::PlayAll => self.play_all(),
            Command::StopAll => self.stop_all(),
            Command::Silence => self.silence(),
            Command::SelectKit(kit) => {
                self.switch_kit(&kit).await?;
            }
            Command::NextKit => {
                self.next_kit().await?;
            }
            Command::PreviousKit => {
                self.previous_kit().await?;
            }
            Command::OpenHelp => self.set_help(true),
            Command::CloseHelp => self.set_help(false),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
        }
        Ok(())
    }

    pub fn start_recording(&self) {
        let started = {
            let mut capture = self.capture.lock();
            let was_recording = capture.is_recording();
            capture.start();
            !was_recording
        };
        if started {
            self.events.emit(CoreEvent::RecordingStarted);
        }
    }

    /// Finishes the take in progress. A take with events becomes the one `save_loop` saves.
    pub fn stop_recording(&self) -> Option<SequenceResult> {
        let take = self.capture.lock().stop()?;
        self.events.emit(CoreEvent::RecordingStopped {
            events: take.events().len(),
            duration_ms: take.duration_ms(),
        });

        if take.is_empty() {
            debug!("Discarding empty take");
        } else {
            self.state.lock().last_take = Some(take.clone());
        }
        self.persist();
        Some(take)
    }

    pub fn is_recording(&self) -> bool {
        self.capture.lock().is_recording()
    }

    /// Saves the last take as a loop, finishing the take first if one is in progress.
    pub fn save_loop(&self) -> Option<Arc<Loop>> {
        if self.is_recording() {
            self.stop_recording();
        }

        let saved = {
            let mut state = self.state.lock();
            let Some(take) = state.last_take.take() else {
                warn!("No take to save");
                return None;
            };
            let bpm = state.scheduler.transport().target_bpm();
            state.library.save(&take, bpm)
        };

        self.events.emit(CoreEvent::LoopSaved {
            id: saved.id().clone(),
            name: saved.display_name().to_string(),
        });
        self.persist();
        Some(saved)
    }

    /// Runs a scheduler operation and reports any transport state change it caused.
    fn with_scheduler<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let (result, before, after) = {
            let mut state = self.state.lock();
            let before = state.scheduler.transport().state();
            let result = f(&mut state);
            (result, before, state.scheduler.transport().state())
        };
        if before != after {
            self.events.emit(CoreEvent::TransportChanged(after));
        }
        result
    }

    /// Starts a saved loop. Playing an already playing loop is a warned no-op.
    pub fn play_loop(&self, loop_id: &LoopId) -> bool {
        let started = self.with_scheduler(|state| {
            let Some(looped) = state.library.get(loop_id).cloned() else {
                warn!(loop_id = %loop_id, "No such loop");
                return false;
            };
            state.scheduler.play(looped)
        });
        if started {
            self.events.emit(CoreEvent::LoopStarted(loop_id.clone()));
        }
        started
    }

    pub fn stop_loop(&self, loop_id: &LoopId) -> bool {
        let stopped = self.with_scheduler(|state| state.scheduler.stop(loop_id));
        if stopped {
            self.events.emit(CoreEvent::LoopStopped(loop_id.clone()));
        }
        stopped
    }

    /// Restarts every saved loop together. With nothing saved, playback stops.
    pub fn play_all(&self) {
        let started = self.with_scheduler(|state| {
            let loops = state.library.list().to_vec();
            if loops.is_empty() {
                warn!("No saved loops to play");
                state.scheduler.stop_all();
                return Vec::new();
            }
            state.scheduler.play_all(&loops);
            state.scheduler.active()
        });
        for loop_id in started {
            self.events.emit(CoreEvent::LoopStarted(loop_id));
        }
    }

    pub fn stop_all(&self) {
        let stopped = self.with_scheduler(|state| {
            let active = state.scheduler.active();
            state.scheduler.stop_all();
            active
        });
        for loop_id in stopped {
            self.events.emit(CoreEvent::LoopStopped(loop_id));
        }
    }

    /// Stops every loop and cuts every voice already sounding.
    pub fn silence(&self) {
        self.stop_all();
        if let Some(device) = self.trigger.device() {
            device.stop_all();
        }
        info!("Silenced");
    }

    /// Removes the most recently saved loop, stopping it first.
    pub fn clear(&self) -> Option<Arc<Loop>> {
        let (removed, stopped) = self.with_scheduler(|state| {
            let removed = state.library.pop()?;
            let stopped = state.scheduler.is_active(removed.id())
                && state.scheduler.stop(removed.id());
            Some((removed, stopped))
        })?;

        if stopped {
            self.events.emit(CoreEvent::LoopStopped(removed.id().clone()));
        }
        info!(loop_id = %removed.id(), name = removed.display_name(), "Loop removed");
        self.events.emit(CoreEvent::LoopRemoved(removed.id().clone()));
        self.persist();
        Some(removed)
    }

    /// Stops and removes every saved loop.
    pub fn clear_all(&self) {
        self.stop_all();
        let removed = self.state.lock().library.clear();
        info!(count = removed.len(), "All loops removed");
        for looped in removed {
            self.events.emit(CoreEvent::LoopRemoved(looped.id().clone()));
        }
        self.persist();
    }

    pub fn pause(&self) {
        self.with_scheduler(|state| state.scheduler.transport_mut().pause());
    }

    pub fn resume(&self) {
        self.with_scheduler(|state| state.scheduler.transport_mut().resume());
    }

    /// Ramps the tempo. Returns the clamped target.
    pub fn set_bpm(&self, bpm: f64) -> f64 {
        let target = self.state.lock().scheduler.transport_mut().set_bpm(bpm);
        if let Some(device) = self.trigger.device() {
            device.set_bpm(target);
        }
        self.events.emit(CoreEvent::BpmChanged(target));
        self.persist();
        target
    }

    /// The tempo right now, following any ramp in progress.
    pub fn bpm(&self) -> f64 {
        self.state.lock().scheduler.transport().bpm()
    }

    /// Ramps the master volume. Returns the clamped level.
    pub fn set_master_volume(&self, volume: f32) -> f32 {
        let volume = {
            let mut state = self.state.lock();
            if volume.is_finite() {
                state.master_volume = volume.clamp(0.0, 1.0);
            } else {
                warn!(volume, "Ignoring invalid master volume");
            }
            state.master_volume
        };
        if let Some(device) = self.trigger.device() {
            device.set_master_volume(volume);
        }
        info!(volume, "Master volume changed");
        self.events.emit(CoreEvent::MasterVolumeChanged(volume));
        self.persist();
        volume
    }

    pub fn master_volume(&self) -> f32 {
        self.state.lock().master_volume
    }

    pub fn master_loop_length_ms(&self) -> Option<f64> {
        self.capture.lock().master_length_ms()
    }

    pub fn set_master_loop_length(&self, length_ms: f64) -> bool {
        let accepted = self.capture.lock().override_master_length(length_ms);
        if accepted {
            self.persist();
        }
        accepted
    }

    /// The events of the take in progress.
    pub fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.capture.lock().events().to_vec()
    }

    pub fn transport_position(&self) -> Duration {
        self.state.lock().scheduler.transport().position()
    }

    pub fn transport_state(&self) -> TransportState {
        self.state.lock().scheduler.transport().state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport_state() == TransportState::Running
    }

    pub fn is_loop_playing(&self, loop_id: &LoopId) -> bool {
        self.state.lock().scheduler.is_playing(loop_id)
    }

    pub fn loops(&self) -> Vec<Arc<Loop>> {
        self.state.lock().library.list().to_vec()
    }

    pub fn current_kit(&self) -> String {
        self.state.lock().kit.clone()
    }

    fn set_help(&self, open: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.help_open != open;
            state.help_open = open;
            changed
        };
        if changed {
            self.events.emit(CoreEvent::HelpToggled(open));
        }
    }

    /// Loads a kit and makes it current. A kit with failed pads still becomes current;
    /// those pads stay silent. Returns whether every pad is ready.
    ///
    /// Switches may overlap. When they do, the most recent request wins and earlier
    /// ones only warm the sample store.
    pub async fn switch_kit(&self, kit_id: &str) -> Result<bool, CoreError> {
        let kit = self
            .catalog
            .read()
            .get(kit_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownKit(kit_id.to_string()))?;

        let request = self.kit_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = self.load(&kit).await;
        {
            let mut state = self.state.lock();
            if self.kit_requests.load(Ordering::SeqCst) != request {
                debug!(kit = kit_id, "Kit switch superseded");
                return Ok(ready);
            }
            state.kit = kit_id.to_string();
            state.kit_ready = ready;
        }
        info!(kit = kit_id, ready, "Kit activated");
        self.events.emit(CoreEvent::KitChanged {
            kit: kit_id.to_string(),
            ready,
        });
        self.persist();
        Ok(ready)
    }

    async fn load(&self, kit: &Kit) -> bool {
        match self.store.load_kit(kit).await {
            Ok(()) => true,
            Err(e) => {
                warn!(kit = kit.id(), err = %e, "Kit loaded with silent pads");
                self.events.emit(CoreEvent::KitLoadFailed {
                    kit: kit.id().to_string(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    pub async fn next_kit(&self) -> Result<bool, CoreError> {
        let current = self.current_kit();
        let next = self.catalog.read().next_kit(&current).map(str::to_string);
        match next {
            Some(next) => self.switch_kit(&next).await,
            None => Err(CoreError::UnknownKit(current)),
        }
    }

    pub async fn previous_kit(&self) -> Result<bool, CoreError> {
        let current = self.current_kit();
        let previous = self.catalog.read().previous_kit(&current).map(str::to_string);
        match previous {
            Some(previous) => self.switch_kit(&previous).await,
            None => Err(CoreError::UnknownKit(current)),
        }
    }

    /// Resets a kit's failed pads and loads it again.
    pub async fn retry_kit(&self, kit_id: &str) -> Result<bool, CoreError> {
        self.store.retry_failed(kit_id);
        if kit_id == self.current_kit() {
            return self.switch_kit(kit_id).await;
        }
        let kit = self
            .catalog
            .read()
            .get(kit_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownKit(kit_id.to_string()))?;
        Ok(self.load(&kit).await)
    }

    /// Loads every kit in the catalog at once, then activates the selected kit. Load
    /// failures are logged, never fatal.
    pub async fn preload(&self) -> Result<bool, CoreError> {
        let requests = self.kit_requests.load(Ordering::SeqCst);
        let kits = self.catalog.read().kits().to_vec();
        let mut loads = JoinSet::new();
        for kit in kits {
            let store = self.store.clone();
            loads.spawn(async move {
                let result = store.load_kit(&kit).await;
                (kit.id().to_string(), result)
            });
        }
        while let Some(joined) = loads.join_next().await {
            match joined {
                Ok((kit, Err(e))) => warn!(kit, err = %e, "Kit preload incomplete"),
                Ok((kit, Ok(()))) => debug!(kit, "Kit preloaded"),
                Err(e) => warn!(err = %e, "Kit preload task failed"),
            }
        }

        // A kit chosen while preloading stands.
        if self.kit_requests.load(Ordering::SeqCst) != requests {
            return Ok(self.state.lock().kit_ready);
        }
        let selected = self.current_kit();
        self.switch_kit(&selected).await
    }

    pub fn register_kit(&self, kit: Kit) -> Result<(), CoreError> {
        self.catalog.write().register(kit)?;
        Ok(())
    }

    /// Removes a configured kit and its loaded samples. Built-in kits and the current kit
    /// can't be removed.
    pub fn remove_kit(&self, kit_id: &str) -> Result<bool, CoreError> {
        if kit_id == self.current_kit() {
            return Err(CoreError::KitInUse(kit_id.to_string()));
        }
        let removed = self.catalog.write().remove(kit_id)?.is_some();
        if removed {
            self.store.evict(kit_id);
        }
        Ok(removed)
    }

    /// Fires every due loop event. Returns how many fired.
    pub fn pump(&self) -> usize {
        let due = self.with_scheduler(|state| state.scheduler.pump());
        for event in due.iter() {
            let outcome = self.trigger.trigger(
                event.pad(),
                event.kit(),
                event.velocity(),
                TriggerOrigin::Loop,
            );
            if outcome != TriggerOutcome::Uninitialized {
                self.pulse(event.pad(), event.kit().to_string(), TriggerOrigin::Loop);
            }
        }
        due.len()
    }

    /// Spawns the task that keeps the transport moving. It runs until the core is disposed.
    pub fn spawn_transport_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let core = self.clone();
        let tick = self.settings.scheduler_tick();
        let span = span!(Level::INFO, "transport driver");
        tokio::spawn(
            async move {
                info!(tick = ?tick, "Transport driver started");
                let mut interval = tokio::time::interval(tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                while !core.is_disposed() {
                    interval.tick().await;
                    core.pump();
                }
                info!("Transport driver stopped");
            }
            .instrument(span),
        )
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now();
        let (recording, event_count, master_length_ms) = {
            let capture = self.capture.lock();
            (
                capture.is_recording(),
                capture.event_count(),
                capture.master_length_ms(),
            )
        };
        let state = self.state.lock();
        let transport = state.scheduler.transport();
        Snapshot {
            kit: state.kit.clone(),
            kit_ready: state.kit_ready,
            recording,
            event_count,
            transport: transport.state(),
            position_ms: clock::as_millis_f64(transport.position()),
            bpm: transport.bpm(),
            master_volume: state.master_volume,
            master_length_ms,
            playing_loops: state.scheduler.playing_count(),
            saved_loops: state.library.len(),
            hovered_pad: state.hovered,
            pulses: state
                .pulses
                .iter()
                .enumerate()
                .filter(|(_, at)| at.is_some_and(|at| now.saturating_sub(at) < PULSE_WINDOW))
                .map(|(pad, _)| pad)
                .collect(),
            help_open: state.help_open,
            samples: self.store.stats(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// What would be written to the state file right now.
    pub fn persisted_state(&self) -> PersistedState {
        let state = self.state.lock();
        PersistedState {
            master_volume: state.master_volume,
            bpm: Some(state.scheduler.transport().target_bpm()),
            selected_kit: state.kit.clone(),
            loops: state
                .library
                .list()
                .iter()
                .map(|looped| looped.as_ref().clone())
                .collect(),
            master_loop_length_ms: self.capture.lock().master_length_ms(),
        }
    }

    fn persist(&self) {
        let Some(persistence) = self.persistence.as_ref() else {
            return;
        };
        if let Err(e) = persistence.save(&self.persisted_state()) {
            warn!(path = ?persistence.path(), err = %e, "Unable to save state");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Stops everything and drops every loaded sample. The transport driver exits on its
    /// next tick.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }
        self.silence();
        if self.capture.lock().stop().is_some() {
            debug!("Take abandoned on dispose");
        }
        self.store.dispose();
        info!("Audio core disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;
    use crate::clock::ManualClock;
    use crate::samples::mock::MockSampleLoader;
    use crate::samples::LoadState;

    struct Fixture {
        clock: ManualClock,
        device: Arc<mock::Device>,
        core: AudioCore,
    }

    fn fixture_with(loader: MockSampleLoader, initial: PersistedState) -> Fixture {
        let clock = ManualClock::new();
        clock.set_ms(5_000);
        let core = AudioCore::new(
            config::Engine::default(),
            KitCatalog::with_built_ins(),
            Arc::new(loader),
            Arc::new(clock.clone()),
            initial,
        );
        let device = Arc::new(mock::Device::get("mock"));
        core.initialize(device.clone());
        Fixture {
            clock,
            device,
            core,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockSampleLoader::new(), PersistedState::default())
    }

    /// Records a take with the given (pad, at_ms) triggers, stopping at `length_ms`.
    fn record(fixture: &Fixture, pads: &[(usize, u64)], length_ms: u64) {
        fixture.core.start_recording();
        let mut elapsed = 0;
        for (pad, at) in pads {
            fixture.clock.advance_ms(at - elapsed);
            elapsed = *at;
            fixture.core.trigger_pad(*pad, 1.0);
        }
        fixture.clock.advance_ms(length_ms - elapsed);
        fixture.core.stop_recording();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_plays_and_captures() {
        let f = fixture();
        assert!(f.core.switch_kit("drums").await.unwrap());

        f.core.start_recording();
        f.clock.advance_ms(100);
        assert_eq!(TriggerOutcome::Played, f.core.trigger_pad(2, 1.0));
        f.clock.advance_ms(300);
        assert_eq!(TriggerOutcome::Played, f.core.trigger_pad(5, 0.5));
        assert_eq!(2, f.core.recorded_events().len());
        f.clock.advance_ms(400);

        let take = f.core.stop_recording().unwrap();
        assert_eq!(800.0, take.duration_ms());
        assert_eq!(Some(800.0), f.core.master_loop_length_ms());
        assert_eq!(2, f.device.played().len());
        assert!(f.device.played()[1].gain() < f.device.played()[0].gain());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_take_snaps_to_master_length() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(2, 100), (5, 400)], 800);

        f.core.start_recording();
        f.clock.advance_ms(50);
        f.core.trigger_pad(0, 1.0);
        f.clock.advance_ms(600);
        let take = f.core.stop_recording().unwrap();
        assert_eq!(800.0, take.duration_ms());
        assert_eq!(vec![RecordedEvent::new(0, "drums", 1.0, 50.0)], take.events());
    }

    #[test]
    fn test_trigger_before_initialize() {
        let clock = ManualClock::new();
        let core = AudioCore::new(
            config::Engine::default(),
            KitCatalog::with_built_ins(),
            Arc::new(MockSampleLoader::new()),
            Arc::new(clock),
            PersistedState::default(),
        );
        core.start_recording();
        assert_eq!(TriggerOutcome::Uninitialized, core.trigger_pad(0, 1.0));
        assert!(core.recorded_events().is_empty());
        assert!(core.snapshot().pulses.is_empty());
    }

    #[test]
    fn test_out_of_range_pad() {
        let f = fixture();
        f.core.start_recording();
        assert_eq!(TriggerOutcome::NotReady, f.core.trigger_pad(9, 1.0));
        assert!(f.core.recorded_events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_degraded_kit_still_activates() {
        let catalog = KitCatalog::with_built_ins();
        let broken = catalog.locator("drums", 3).unwrap().to_string();
        let f = fixture_with(
            MockSampleLoader::new().fail(&broken),
            PersistedState::default(),
        );
        let mut events = f.core.subscribe();

        assert!(!f.core.switch_kit("drums").await.unwrap());
        assert_eq!("drums", f.core.current_kit());
        assert!(!f.core.snapshot().kit_ready);

        match events.recv().await.unwrap() {
            CoreEvent::KitLoadFailed { kit, reason } => {
                assert_eq!("drums", kit);
                assert!(reason.contains("pad 3"), "{}", reason);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            CoreEvent::KitChanged {
                kit: "drums".to_string(),
                ready: false
            },
            events.recv().await.unwrap()
        );

        assert_eq!(TriggerOutcome::NotReady, f.core.trigger_pad(3, 1.0));
        assert_eq!(TriggerOutcome::Played, f.core.trigger_pad(0, 1.0));
        assert_eq!(LoadState::Failed, f.core.store().pad_states("drums")[3]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_kit_after_heal() {
        let catalog = KitCatalog::with_built_ins();
        let broken = catalog.locator("piano", 0).unwrap().to_string();
        let loader = MockSampleLoader::new().fail(&broken);
        let f = fixture_with(loader.clone(), PersistedState::default());

        assert!(!f.core.switch_kit("piano").await.unwrap());
        assert!(!f.core.switch_kit("piano").await.unwrap());
        loader.heal(&broken);
        assert!(f.core.retry_kit("piano").await.unwrap());
        assert!(f.core.snapshot().kit_ready);
    }

    #[tokio::test]
    async fn test_unknown_kit() {
        let f = fixture();
        assert!(matches!(
            f.core.switch_kit("tuba").await,
            Err(CoreError::UnknownKit(_))
        ));
        assert_eq!("drums", f.core.current_kit());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_kit_cycling() {
        let f = fixture();
        f.core.next_kit().await.unwrap();
        assert_eq!("piano", f.core.current_kit());
        f.core.previous_kit().await.unwrap();
        f.core.previous_kit().await.unwrap();
        assert_eq!("funk", f.core.current_kit());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_saved_loop_plays_back() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(4, 950)], 1000);
        let saved = f.core.save_loop().unwrap();
        assert_eq!("Loop 1", saved.display_name());
        assert!(f.core.save_loop().is_none());

        f.core.stop_all();
        f.device.stop_all();
        assert!(f.core.play_loop(saved.id()));
        assert!(!f.core.play_loop(saved.id()));
        assert!(f.core.is_playing());

        for _ in 0..3 {
            assert_eq!(0, f.core.pump());
            f.clock.advance_ms(949);
            assert_eq!(0, f.core.pump());
            f.clock.advance_ms(1);
            assert_eq!(1, f.core.pump());
            f.clock.advance_ms(50);
        }
        assert_eq!(3, f.device.played().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_loop_playback_is_not_captured() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(1, 10)], 200);
        let saved = f.core.save_loop().unwrap();
        f.core.play_loop(saved.id());

        f.core.start_recording();
        f.clock.advance_ms(100);
        assert_eq!(1, f.core.pump());
        assert!(f.core.recorded_events().is_empty());
        f.core.trigger_pad(7, 1.0);
        assert_eq!(1, f.core.recorded_events().len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_cancels_pending_events() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(0, 500)], 1000);
        let saved = f.core.save_loop().unwrap();
        f.device.stop_all();

        f.core.play_loop(saved.id());
        f.core.pump();
        f.clock.advance_ms(499);
        assert_eq!(0, f.core.pump());
        assert!(f.core.stop_loop(saved.id()));
        assert!(!f.core.stop_loop(saved.id()));
        f.clock.advance_ms(2000);
        assert_eq!(0, f.core.pump());
        assert!(f.device.played().is_empty());
        assert!(!f.core.is_playing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_while_recording_finishes_take() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        f.core.start_recording();
        f.clock.advance_ms(20);
        f.core.trigger_pad(6, 1.0);
        f.clock.advance_ms(300);

        let saved = f.core.save_loop().unwrap();
        assert!(!f.core.is_recording());
        assert_eq!(320.0, saved.duration_ms());
        assert_eq!(1, saved.events().len());
    }

    #[test]
    fn test_empty_take_is_not_saved() {
        let f = fixture();
        f.core.start_recording();
        f.clock.advance_ms(300);
        f.core.stop_recording();
        assert!(f.core.save_loop().is_none());
        assert_eq!(Some(300.0), f.core.master_loop_length_ms());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_play_all_clear_and_clear_all() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();

        f.core.play_all();
        assert!(!f.core.is_playing());

        record(&f, &[(0, 10)], 400);
        let first = f.core.save_loop().unwrap();
        record(&f, &[(1, 10)], 400);
        let second = f.core.save_loop().unwrap();
        assert_eq!("Loop 2", second.display_name());

        f.core.play_all();
        assert!(f.core.is_playing());
        assert!(f.core.is_loop_playing(first.id()));
        f.clock.advance_ms(60);
        f.core.pump();
        assert!(f.core.is_loop_playing(second.id()));

        let removed = f.core.clear().unwrap();
        assert_eq!(second.id(), removed.id());
        assert!(!f.core.is_loop_playing(second.id()));
        assert!(f.core.is_playing());

        f.core.clear_all();
        assert!(f.core.loops().is_empty());
        assert!(!f.core.is_playing());
        assert!(f.core.clear().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_silence_cuts_voices() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(0, 10)], 400);
        f.core.save_loop();
        f.core.play_all();
        f.core.trigger_pad(2, 1.0);
        assert!(!f.device.played().is_empty());

        f.core.silence();
        assert!(f.device.played().is_empty());
        assert_eq!(TransportState::Stopped, f.core.transport_state());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_and_resume() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        record(&f, &[(0, 10)], 400);
        let saved = f.core.save_loop().unwrap();
        f.core.play_loop(saved.id());
        f.clock.advance_ms(100);

        f.core.execute(Command::Pause).await.unwrap();
        assert_eq!(TransportState::Paused, f.core.transport_state());
        f.clock.advance_ms(1000);
        assert_eq!(Duration::from_millis(100), f.core.transport_position());

        f.core.execute(Command::Resume).await.unwrap();
        f.clock.advance_ms(50);
        assert_eq!(Duration::from_millis(150), f.core.transport_position());
    }

    #[test]
    fn test_bpm_and_volume_reach_the_output() {
        let f = fixture();
        assert_eq!(200.0, f.core.set_bpm(500.0));
        assert_eq!(200.0, f.device.bpm());
        assert_eq!(0.0, f.core.set_master_volume(-1.0));
        assert_eq!(0.0, f.device.master_volume());
        assert_eq!(0.0, f.core.set_master_volume(f32::NAN));
        assert_eq!(0.6, f.core.set_master_volume(0.6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_voice_commands() {
        let f = fixture();
        assert_eq!(Some(Command::Record), f.core.handle_voice("record").await);
        assert!(f.core.is_recording());
        assert_eq!(None, f.core.handle_voice("make me a sandwich").await);
        assert!(f.core.is_recording());

        f.core.handle_voice("open help").await;
        assert!(f.core.snapshot().help_open);
        f.core.handle_voice("close help").await;
        assert!(!f.core.snapshot().help_open);

        f.core.handle_voice("kit:piano").await;
        assert_eq!("piano", f.core.current_kit());
        f.core.handle_voice("kit:nothing").await;
        assert_eq!("piano", f.core.current_kit());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gestures_and_pulses() {
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();
        let mut events = f.core.subscribe();

        f.core.handle_gesture(GestureEvent::Hover {
            pad: Some(4),
            confidence: 0.9,
        });
        f.core.handle_gesture(GestureEvent::Hover {
            pad: Some(4),
            confidence: 0.8,
        });
        f.core.handle_gesture(GestureEvent::Trigger { pad: 4 });

        assert_eq!(
            CoreEvent::PadHovered {
                pad: Some(4),
                confidence: 0.9
            },
            events.recv().await.unwrap()
        );
        assert_eq!(
            CoreEvent::PadTriggered {
                pad: 4,
                kit: "drums".to_string(),
                origin: TriggerOrigin::Live
            },
            events.recv().await.unwrap()
        );

        let snapshot = f.core.snapshot();
        assert_eq!(Some(4), snapshot.hovered_pad);
        assert_eq!(vec![4], snapshot.pulses);
        f.clock.advance_ms(300);
        assert!(f.core.snapshot().pulses.is_empty());
    }

    #[test]
    fn test_restores_persisted_state() {
        let looped = Loop::new(
            LoopId::from("kept"),
            vec![RecordedEvent::new(1, "funk", 1.0, 30.0)],
            600.0,
            100.0,
            "Loop 1",
        );
        let f = fixture_with(
            MockSampleLoader::new(),
            PersistedState {
                master_volume: 0.3,
                bpm: Some(100.0),
                selected_kit: "funk".to_string(),
                loops: vec![looped],
                master_loop_length_ms: Some(600.0),
            },
        );

        assert_eq!("funk", f.core.current_kit());
        assert_eq!(100.0, f.core.bpm());
        assert_eq!(0.3, f.device.master_volume());
        assert_eq!(100.0, f.device.bpm());
        assert_eq!(1, f.core.loops().len());

        f.core.start_recording();
        f.clock.advance_ms(50);
        assert_eq!(600.0, f.core.stop_recording().unwrap().duration_ms());
    }

    #[test]
    fn test_unknown_selected_kit_falls_back() {
        let f = fixture_with(
            MockSampleLoader::new(),
            PersistedState {
                selected_kit: "gone".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(DEFAULT_KIT, f.core.current_kit());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_changes_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StateStore::new(&dir.path().join("state.json"));
        let clock = ManualClock::new();
        let core = AudioCore::new(
            config::Engine::default(),
            KitCatalog::with_built_ins(),
            Arc::new(MockSampleLoader::new()),
            Arc::new(clock.clone()),
            PersistedState::default(),
        )
        .with_persistence(persistence.clone());
        core.initialize(Arc::new(mock::Device::get("mock")));
        core.switch_kit("piano").await.unwrap();

        core.start_recording();
        clock.advance_ms(10);
        core.trigger_pad(3, 1.0);
        clock.advance_ms(500);
        core.save_loop();
        core.set_bpm(90.0);

        let saved = persistence.load().unwrap();
        assert_eq!(core.persisted_state(), saved);
        assert_eq!("piano", saved.selected_kit);
        assert_eq!(Some(90.0), saved.bpm);
        assert_eq!(Some(510.0), saved.master_loop_length_ms);
        assert_eq!(1, saved.loops.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_preload_loads_every_kit() {
        let f = fixture();
        assert!(f.core.preload().await.unwrap());
        let stats = f.core.stats();
        assert_eq!(27, stats.ready);
        assert_eq!(0, stats.failed);
    }

    #[test]
    fn test_kit_registration_and_removal() {
        let f = fixture();
        let lofi = Kit::new(
            "lofi",
            "Lo-Fi",
            (0..9)
                .map(|pad| crate::kits::KitSample::new(&format!("lofi/{}.wav", pad), "Pad"))
                .collect(),
        );
        f.core.register_kit(lofi.clone()).unwrap();
        assert!(matches!(
            f.core.register_kit(lofi),
            Err(CoreError::Kit(KitError::Duplicate(_)))
        ));
        assert!(matches!(
            f.core.remove_kit("drums"),
            Err(CoreError::KitInUse(_))
        ));
        assert!(matches!(
            f.core.remove_kit("piano"),
            Err(CoreError::Kit(KitError::BuiltIn(_)))
        ));
        assert!(f.core.remove_kit("lofi").unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_removed_kit_samples_are_forgotten() {
        let kit = |folder: &str| {
            Kit::new(
                "lofi",
                "Lo-Fi",
                (0..9)
                    .map(|pad| {
                        crate::kits::KitSample::new(&format!("{}/{}.wav", folder, pad), "Pad")
                    })
                    .collect(),
            )
        };
        let f = fixture_with(
            MockSampleLoader::new().fail("lofi-b/0.wav"),
            PersistedState::default(),
        );

        f.core.register_kit(kit("lofi-a")).unwrap();
        assert!(f.core.switch_kit("lofi").await.unwrap());
        f.core.switch_kit("drums").await.unwrap();
        assert!(f.core.remove_kit("lofi").unwrap());
        assert!(!f.core.store().is_ready("lofi"));
        assert!(f.core.store().pad_states("lofi").is_empty());

        // Same id, different samples: the new ones are loaded, not the cached ones.
        f.core.register_kit(kit("lofi-b")).unwrap();
        assert!(!f.core.switch_kit("lofi").await.unwrap());
        assert_eq!(LoadState::Failed, f.core.store().pad_states("lofi")[0]);
        assert_eq!("lofi-b/0.wav", f.core.store().handle(0, "lofi").unwrap().locator());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_latest_kit_switch_wins() {
        let slow = KitCatalog::with_built_ins()
            .locator("piano", 0)
            .unwrap()
            .to_string();
        let f = fixture_with(
            MockSampleLoader::new().delay(&slow, Duration::from_millis(300)),
            PersistedState::default(),
        );

        let (piano, funk) = tokio::join!(f.core.switch_kit("piano"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.core.switch_kit("funk").await
        });
        assert!(piano.unwrap());
        assert!(funk.unwrap());
        assert_eq!("funk", f.core.current_kit());
        assert!(f.core.store().is_ready("piano"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unusable_velocity_is_saved_as_full() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StateStore::new(&dir.path().join("state.json"));
        let f = fixture();
        f.core.switch_kit("drums").await.unwrap();

        f.core.start_recording();
        f.clock.advance_ms(100);
        assert_eq!(TriggerOutcome::Played, f.core.trigger_pad(0, f32::NAN));
        f.clock.advance_ms(400);
        let saved = f.core.save_loop().unwrap();
        assert_eq!(1.0, saved.events()[0].velocity());

        persistence.save(&f.core.persisted_state()).unwrap();
        let reloaded = persistence.load().unwrap();
        assert_eq!(1, reloaded.loops.len());
        assert_eq!(1.0, reloaded.loops[0].events()[0].velocity());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_driver_fires_loops() {
        let clock = Arc::new(crate::clock::SystemClock::new());
        let core = Arc::new(AudioCore::new(
            config::Engine::default(),
            KitCatalog::with_built_ins(),
            Arc::new(MockSampleLoader::new()),
            clock,
            PersistedState {
                loops: vec![Loop::new(
                    LoopId::from("fast"),
                    vec![RecordedEvent::new(0, "drums", 1.0, 0.0)],
                    20.0,
                    120.0,
                    "Loop 1",
                )],
                ..Default::default()
            },
        ));
        let device = Arc::new(mock::Device::get("mock"));
        core.initialize(device.clone());
        core.switch_kit("drums").await.unwrap();

        let driver = core.spawn_transport_driver();
        core.play_all();
        crate::testutil::eventually_async(
            || {
                let device = device.clone();
                async move { device.played().len() >= 3 }
            },
            "Loop never repeated",
        )
        .await;

        core.dispose();
        driver.await.unwrap();
        assert!(core.is_disposed());
        assert_eq!(0, core.stats().ready);
    }
}
