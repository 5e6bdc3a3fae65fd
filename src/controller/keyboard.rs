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

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, Level};

use super::InputEvent;
use crate::engine::GestureEvent;

const QUIT: &str = "quit";
const HOVER: &str = "hover";

/// Plays pads and speaks commands from the terminal. Digits 1-9 trigger pads,
/// `hover <n>` moves the hover, anything else is treated as a spoken phrase.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads one line of input. Returns false once input is exhausted or the user quits.
    fn monitor_io<R, W>(
        events_tx: &Sender<InputEvent>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "Pad (1-9), {} <pad>, a phrase, or {}: ", HOVER, QUIT)?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let input = input.trim().to_lowercase();
        let event = match Self::parse(&input) {
            Parsed::Quit => return Ok(false),
            Parsed::Nothing => return Ok(true),
            Parsed::Event(event) => event,
        };
        events_tx
            .blocking_send(event)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(true)
    }

    fn parse(input: &str) -> Parsed {
        if input.is_empty() {
            return Parsed::Nothing;
        }
        if input == QUIT {
            return Parsed::Quit;
        }
        if let Some(pad) = Self::parse_pad(input) {
            return Parsed::Event(InputEvent::Gesture(GestureEvent::Trigger { pad }));
        }
        if let Some(rest) = input.strip_prefix(HOVER) {
            let rest = rest.trim();
            if rest.is_empty() || rest == "none" {
                return Parsed::Event(InputEvent::Gesture(GestureEvent::Hover {
                    pad: None,
                    confidence: 1.0,
                }));
            }
            if let Some(pad) = Self::parse_pad(rest) {
                return Parsed::Event(InputEvent::Gesture(GestureEvent::Hover {
                    pad: Some(pad),
                    confidence: 1.0,
                }));
            }
        }
        Parsed::Event(InputEvent::Voice(input.to_string()))
    }

    /// Pads are numbered from 1 on the keyboard.
    fn parse_pad(input: &str) -> Option<usize> {
        input.parse::<usize>().ok()?.checked_sub(1)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

enum Parsed {
    Event(InputEvent),
    Nothing,
    Quit,
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<InputEvent>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            info!("Keyboard driver stopped.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader, BufWriter};

    use tokio::sync::mpsc;

    use super::Driver;
    use crate::controller::InputEvent;
    use crate::engine::GestureEvent;

    fn get_event(line: &str) -> Result<(bool, Option<InputEvent>), io::Error> {
        let (sender, mut receiver) = mpsc::channel::<InputEvent>(1);

        let reader = BufReader::new(line.as_bytes());
        let writer = BufWriter::new(Vec::new());
        let more = Driver::monitor_io(&sender, reader, writer)?;

        // Force the sender to close.
        drop(sender);
        Ok((more, receiver.blocking_recv()))
    }

    #[test]
    fn test_keyboard_events() -> Result<(), io::Error> {
        assert_eq!(
            (true, Some(InputEvent::Gesture(GestureEvent::Trigger { pad: 0 }))),
            get_event("1\n")?
        );
        assert_eq!(
            (true, Some(InputEvent::Gesture(GestureEvent::Trigger { pad: 8 }))),
            get_event(" 9 \n")?
        );
        assert_eq!(
            (
                true,
                Some(InputEvent::Gesture(GestureEvent::Hover {
                    pad: Some(3),
                    confidence: 1.0
                }))
            ),
            get_event("hover 4\n")?
        );
        assert_eq!(
            (
                true,
                Some(InputEvent::Gesture(GestureEvent::Hover {
                    pad: None,
                    confidence: 1.0
                }))
            ),
            get_event("hover\n")?
        );
        assert_eq!(
            (true, Some(InputEvent::Voice("save loop".to_string()))),
            get_event("Save Loop\n")?
        );
        assert_eq!(
            (true, Some(InputEvent::Voice("0".to_string()))),
            get_event("0\n")?
        );
        assert_eq!((true, None), get_event("\n")?);
        assert_eq!((false, None), get_event("quit\n")?);
        assert_eq!((false, None), get_event("")?);
        Ok(())
    }
}
