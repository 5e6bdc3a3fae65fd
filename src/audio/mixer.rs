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
// Voice mixing shared by the cpal and test devices.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::effects::EffectsChain;
use super::OutputError;
use crate::samples::LoadedSample;

/// Global counter for voice IDs.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// A request to play one sample once.
#[derive(Clone, Debug)]
pub struct Voice {
    id: u64,
    sample: LoadedSample,
    gain: f32,
}

impl Voice {
    pub fn new(sample: LoadedSample, gain: f32) -> Voice {
        Voice {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed),
            sample,
            gain,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample(&self) -> &LoadedSample {
        &self.sample
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

/// A voice in the mixer, waiting for its start sample or playing.
pub struct ActiveVoice {
    voice: Voice,
    /// Next frame of the sample to play.
    position: usize,
    /// Mixer sample at which playback begins.
    start_at_sample: u64,
}

impl ActiveVoice {
    pub fn new(voice: Voice, start_at_sample: u64) -> ActiveVoice {
        ActiveVoice {
            voice,
            position: 0,
            start_at_sample,
        }
    }

    /// Adds the next frame of this voice to the stereo accumulator.
    /// Returns false once the sample is exhausted.
    #[inline]
    fn mix_frame(&mut self, left: &mut f32, right: &mut f32) -> bool {
        let sample = &self.voice.sample;
        let channels = sample.channel_count().max(1) as usize;
        let data = sample.data();
        let offset = self.position * channels;
        if offset + channels > data.len() {
            return false;
        }

        let gain = self.voice.gain;
        if channels == 1 {
            *left += data[offset] * gain;
            *right += data[offset] * gain;
        } else {
            *left += data[offset] * gain;
            *right += data[offset + 1] * gain;
        }
        self.position += 1;
        true
    }
}

/// Stereo voice mixer. Cloning shares the same voices and effects.
#[derive(Clone)]
pub struct AudioMixer {
    voices: Arc<Mutex<Vec<ActiveVoice>>>,
    effects: Arc<Mutex<EffectsChain>>,
    sample_rate: u32,
    /// Total frames mixed so far.
    current_sample: Arc<AtomicU64>,
    /// Voices reserved, queued or playing.
    reserved: Arc<AtomicUsize>,
    max_voices: usize,
}

impl AudioMixer {
    pub const CHANNELS: u16 = 2;

    pub fn new(sample_rate: u32, max_voices: usize, effects: EffectsChain) -> AudioMixer {
        AudioMixer {
            voices: Arc::new(Mutex::new(Vec::new())),
            effects: Arc::new(Mutex::new(effects)),
            sample_rate,
            current_sample: Arc::new(AtomicU64::new(0)),
            reserved: Arc::new(AtomicUsize::new(0)),
            max_voices,
        }
    }

    /// Claims a voice slot. Fails once `max_voices` slots are held.
    pub fn reserve(&self) -> Result<(), OutputError> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                (reserved < self.max_voices).then_some(reserved + 1)
            })
            .map(|_| ())
            .map_err(OutputError::Exhausted)
    }

    /// Gives back slots for voices that will never reach the mixer.
    pub fn release(&self, count: usize) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                Some(reserved.saturating_sub(count))
            });
    }

    /// Adds a voice whose slot was already reserved.
    pub fn add_voice(&self, voice: ActiveVoice) {
        self.voices.lock().push(voice);
    }

    /// The next sample the mixer will produce.
    pub fn current_sample(&self) -> u64 {
        self.current_sample.load(Ordering::Acquire)
    }

    pub fn active_voices(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.effects.lock().set_master_volume(volume);
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.effects.lock().set_bpm(bpm);
    }

    /// Drops every voice in the mixer.
    pub fn stop_all(&self) {
        let stopped = {
            let mut voices = self.voices.lock();
            let stopped = voices.len();
            voices.clear();
            stopped
        };
        self.release(stopped);
    }

    /// Mixes `frames` interleaved stereo frames into `output` and runs the effects chain.
    pub fn process_into_output(&self, output: &mut [f32], frames: usize) {
        let frames = frames.min(output.len() / Self::CHANNELS as usize);
        let output = &mut output[..frames * Self::CHANNELS as usize];
        output.fill(0.0);

        let start = self.current_sample();
        let mut finished = 0;
        {
            let mut voices = self.voices.lock();
            for (i, frame) in output.chunks_exact_mut(2).enumerate() {
                let now = start + i as u64;
                let (mut left, mut right) = (0.0, 0.0);
                voices.retain_mut(|voice| {
                    if now < voice.start_at_sample {
                        return true;
                    }
                    if voice.mix_frame(&mut left, &mut right) {
                        true
                    } else {
                        finished += 1;
                        false
                    }
                });
                frame[0] = left;
                frame[1] = right;
            }
        }
        if finished > 0 {
            self.release(finished);
        }

        self.effects.lock().process_interleaved(output);
        self.current_sample
            .store(start + frames as u64, Ordering::Release);
    }
}
