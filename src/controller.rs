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
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc::{self, Sender};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, span, Instrument, Level};

use crate::engine::{AudioCore, GestureEvent};

pub mod keyboard;

/// Input from the gesture and voice collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Gesture(GestureEvent),
    /// A phrase already turned into text. Resolved against the core's vocabulary.
    Voice(String),
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<InputEvent>) -> JoinHandle<Result<(), io::Error>>;
}

/// Feeds a driver's input to the audio core.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(core: Arc<AudioCore>, driver: Arc<dyn Driver>) -> Controller {
        let span = span!(Level::INFO, "controller");
        Controller {
            handle: tokio::spawn(Controller::forward_events(core, driver).instrument(span)),
        }
    }

    /// Join will block until the driver closes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    async fn forward_events(core: Arc<AudioCore>, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let join_handle = driver.monitor_events(events_tx);

        info!(kit = core.current_kit(), "Controller started.");

        // Kit loads run beside the input loop so pads never wait on them.
        let mut kit_loads = JoinSet::new();
        while let Some(event) = events_rx.recv().await {
            info!(event = ?event, "Received input.");
            match event {
                InputEvent::Gesture(gesture) => core.handle_gesture(gesture),
                InputEvent::Voice(phrase) => {
                    let Some(command) = core.resolve_voice(&phrase) else {
                        continue;
                    };
                    if command.loads_kit() {
                        let core = core.clone();
                        kit_loads.spawn(
                            async move { core.run_command(command).await }.in_current_span(),
                        );
                    } else {
                        core.run_command(command).await;
                    }
                }
            }
            while let Some(joined) = kit_loads.try_join_next() {
                if let Err(e) = joined {
                    error!(err = %e, "Kit load task failed");
                }
            }
        }

        info!("Controller closing.");
        while let Some(joined) = kit_loads.join_next().await {
            if let Err(e) = joined {
                error!(err = %e, "Kit load task failed");
            }
        }
        match join_handle.await {
            Ok(Err(e)) => error!(err = %e, "Input driver failed"),
            Err(e) => error!(err = %e, "Error waiting for input driver to stop"),
            Ok(Ok(())) => {}
        }
    }
}
