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
//! Voice commands.
//!
//! The voice collaborator hands us a transcript or an already resolved command
//! string. [`Vocabulary`] maps it to a [`Command`] by keyword: the longest keyword
//! found in the input as whole words wins, and ties go to the entry registered first.
//! That keeps "close help" from resolving as "help", and "weekend" from resolving as
//! "end".

use std::fmt;

use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Start a take.
    Record,
    /// Finish the take in progress.
    Stop,
    /// Save the last finished take as a loop.
    SaveLoop,
    /// Remove the most recently saved loop.
    Clear,
    /// Remove every saved loop.
    ClearAll,
    PlayAll,
    StopAll,
    /// Stop all sound, including the transport.
    Silence,
    SelectKit(String),
    NextKit,
    PreviousKit,
    OpenHelp,
    CloseHelp,
    Pause,
    Resume,
}

impl Command {
    /// Whether running the command may wait on a kit load.
    pub fn loads_kit(&self) -> bool {
        matches!(
            self,
            Command::SelectKit(_) | Command::NextKit | Command::PreviousKit
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Record => write!(f, "record"),
            Command::Stop => write!(f, "stop"),
            Command::SaveLoop => write!(f, "save loop"),
            Command::Clear => write!(f, "clear"),
            Command::ClearAll => write!(f, "clear all"),
            Command::PlayAll => write!(f, "play all"),
            Command::StopAll => write!(f, "stop all"),
            Command::Silence => write!(f, "silence"),
            Command::SelectKit(kit) => write!(f, "kit:{}", kit),
            Command::NextKit => write!(f, "next kit"),
            Command::PreviousKit => write!(f, "previous kit"),
            Command::OpenHelp => write!(f, "open help"),
            Command::CloseHelp => write!(f, "close help"),
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
        }
    }
}

/// Canonical names some kits were known by.
const KIT_ALIASES: &[(&str, &str)] = &[("drum", "drums"), ("synth", "funk")];

/// An ordered keyword table.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    entries: Vec<(Command, Vec<String>)>,
}

impl Vocabulary {
    pub fn new() -> Vocabulary {
        Vocabulary::default()
    }

    /// The standard vocabulary, covering the built-in kits.
    pub fn standard() -> Vocabulary {
        let mut vocabulary = Vocabulary::new();
        vocabulary
            .register(
                Command::ClearAll,
                &[
                    "clear all",
                    "clear everything",
                    "delete all",
                    "clear all loops",
                    "delete all loops",
                ],
            )
            .register(Command::StopAll, &["stop all", "stop loops", "stop everything"])
            .register(Command::PlayAll, &["play all", "play loops", "play everything"])
            .register(Command::SaveLoop, &["save", "save loop", "save recording"])
            .register(
                Command::OpenHelp,
                &["help", "open help", "show instructions", "instructions"],
            )
            .register(
                Command::CloseHelp,
                &[
                    "close",
                    "close help",
                    "hide",
                    "hide instructions",
                    "close instructions",
                    "dismiss",
                ],
            )
            .register(Command::NextKit, &["next kit"])
            .register(Command::PreviousKit, &["previous kit", "last kit"])
            .register(Command::Pause, &["pause"])
            .register(Command::Resume, &["resume", "continue"])
            .register(Command::Record, &["record", "start recording", "start"])
            .register(Command::Stop, &["stop", "finish", "end", "stop recording"])
            .register(Command::Clear, &["clear", "reset", "erase", "delete loop"])
            .register(
                Command::SelectKit("drums".into()),
                &["drums", "drum kit", "set kit drum", "drum"],
            )
            .register(
                Command::SelectKit("funk".into()),
                &["funk", "funk kit", "set kit funk", "funky"],
            )
            .register(
                Command::SelectKit("piano".into()),
                &["piano", "keys", "set kit piano"],
            )
            .register(
                Command::Silence,
                &["silence", "stop sounds", "quiet", "mute", "all stop"],
            );
        vocabulary
    }

    /// Appends an entry. Earlier entries win ties.
    pub fn register(&mut self, command: Command, keywords: &[&str]) -> &mut Vocabulary {
        self.entries.push((
            command,
            keywords.iter().map(|k| k.to_lowercase()).collect(),
        ));
        self
    }

    /// Resolves input to a command. "kit:<id>" selects that kit directly.
    pub fn resolve(&self, input: &str) -> Option<Command> {
        let input = input.trim().to_lowercase();
        if input.is_empty() {
            return None;
        }

        if let Some(kit) = input.strip_prefix("kit:") {
            let kit = kit.trim();
            if kit.is_empty() {
                return None;
            }
            let kit = KIT_ALIASES
                .iter()
                .find(|(alias, _)| *alias == kit)
                .map_or(kit, |(_, id)| id);
            return Some(Command::SelectKit(kit.to_string()));
        }

        let mut best: Option<(&Command, usize)> = None;
        for (command, keywords) in &self.entries {
            let longest = keywords
                .iter()
                .filter(|k| contains_words(&input, k))
                .map(String::len)
                .max();
            if let Some(len) = longest {
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((command, len));
                }
            }
        }
        let command = best.map(|(command, _)| command.clone());
        debug!(input, command = command.as_ref().map(|c| c.to_string()), "Resolved voice input");
        command
    }
}

/// True if `keyword` appears in `input` with no letter or digit directly either side.
fn contains_words(input: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    input.match_indices(keyword).any(|(start, _)| {
        let before = input[..start].chars().next_back();
        let after = input[start + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_canonical_strings() {
        let vocabulary = Vocabulary::standard();
        for (input, expected) in [
            ("record", Command::Record),
            ("stop", Command::Stop),
            ("clear", Command::Clear),
            ("clear all", Command::ClearAll),
            ("save loop", Command::SaveLoop),
            ("play all", Command::PlayAll),
            ("stop all", Command::StopAll),
            ("silence", Command::Silence),
            ("open help", Command::OpenHelp),
            ("close help", Command::CloseHelp),
            ("kit:piano", Command::SelectKit("piano".into())),
        ] {
            assert_eq!(Some(expected), vocabulary.resolve(input), "{}", input);
        }
    }

    #[test]
    fn test_multi_word_phrases_win() {
        let vocabulary = Vocabulary::standard();
        assert_eq!(Some(Command::ClearAll), vocabulary.resolve("please clear all loops"));
        assert_eq!(Some(Command::StopAll), vocabulary.resolve("Stop Everything"));
        assert_eq!(Some(Command::SaveLoop), vocabulary.resolve("save recording"));
        assert_eq!(Some(Command::Stop), vocabulary.resolve("stop recording"));
        assert_eq!(Some(Command::Record), vocabulary.resolve("start recording"));
    }

    #[test]
    fn test_kits() {
        let vocabulary = Vocabulary::standard();
        assert_eq!(
            Some(Command::SelectKit("funk".into())),
            vocabulary.resolve("funky")
        );
        assert_eq!(
            Some(Command::SelectKit("funk".into())),
            vocabulary.resolve("kit:synth")
        );
        assert_eq!(
            Some(Command::SelectKit("drums".into())),
            vocabulary.resolve("kit:drum")
        );
        assert_eq!(
            Some(Command::SelectKit("lofi".into())),
            vocabulary.resolve("KIT:lofi")
        );
        assert_eq!(None, vocabulary.resolve("kit:"));
    }

    #[test]
    fn test_unrecognized() {
        let vocabulary = Vocabulary::standard();
        assert_eq!(None, vocabulary.resolve(""));
        assert_eq!(None, vocabulary.resolve("   "));
        assert_eq!(None, vocabulary.resolve("banana"));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let vocabulary = Vocabulary::standard();
        assert_eq!(None, vocabulary.resolve("legend"));
        assert_eq!(None, vocabulary.resolve("see you at the weekend"));
        assert_eq!(None, vocabulary.resolve("restart"));
        assert_eq!(None, vocabulary.resolve("unsaved"));
        assert_eq!(Some(Command::Stop), vocabulary.resolve("the end"));
        assert_eq!(Some(Command::Record), vocabulary.resolve("ok, start!"));
        assert_eq!(Some(Command::Stop), vocabulary.resolve("stop."));
    }

    #[test]
    fn test_loads_kit() {
        assert!(Command::SelectKit("piano".into()).loads_kit());
        assert!(Command::NextKit.loads_kit());
        assert!(Command::PreviousKit.loads_kit());
        assert!(!Command::Record.loads_kit());
        assert!(!Command::Silence.loads_kit());
    }

    #[test]
    fn test_register() {
        let mut vocabulary = Vocabulary::new();
        vocabulary.register(Command::SelectKit("lofi".into()), &["Lo-Fi"]);
        assert_eq!(
            Some(Command::SelectKit("lofi".into())),
            vocabulary.resolve("lo-fi please")
        );
        assert_eq!(None, vocabulary.resolve("record"));
    }

    #[test]
    fn test_display_round_trips() {
        let vocabulary = Vocabulary::standard();
        for command in [
            Command::Record,
            Command::ClearAll,
            Command::PlayAll,
            Command::SelectKit("piano".into()),
            Command::Pause,
        ] {
            assert_eq!(Some(command.clone()), vocabulary.resolve(&command.to_string()));
        }
    }
}
