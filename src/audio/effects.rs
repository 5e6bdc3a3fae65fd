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
//! The master effects chain applied to the stereo mix:
//! gain, compressor, reverb, tempo-synced feedback delay and a final limiter.

pub const MASTER_GAIN: f32 = 0.8;
pub const COMPRESSOR_THRESHOLD_DB: f32 = -24.0;
pub const COMPRESSOR_RATIO: f32 = 3.0;
pub const REVERB_DECAY_SECS: f32 = 1.5;
pub const DELAY_FEEDBACK: f32 = 0.2;
pub const LIMITER_CEILING_DB: f32 = -6.0;

const COMPRESSOR_ATTACK_MS: f32 = 3.0;
const COMPRESSOR_RELEASE_MS: f32 = 250.0;
const REVERB_MIX: f32 = 0.2;
const DELAY_MIX: f32 = 0.25;
const LIMITER_RELEASE_MS: f32 = 50.0;
/// Upper bound on the delay time, well past a sixteenth note at any tempo we allow.
const MAX_DELAY_SECS: f32 = 1.0;

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}

/// The length of a sixteenth note at the given tempo.
pub fn sixteenth_note_secs(bpm: f64) -> f32 {
    (60.0 / bpm / 4.0) as f32
}

/// A linear ramp toward a target value.
struct Ramp {
    value: f32,
    target: f32,
    step: f32,
    ramp_samples: f32,
}

impl Ramp {
    fn new(value: f32, ramp_samples: f32) -> Ramp {
        Ramp {
            value,
            target: value,
            step: 0.0,
            ramp_samples: ramp_samples.max(1.0),
        }
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
        self.step = (target - self.value) / self.ramp_samples;
    }

    fn next(&mut self) -> f32 {
        if self.value != self.target {
            self.value += self.step;
            if (self.step > 0.0 && self.value > self.target)
                || (self.step < 0.0 && self.value < self.target)
                || self.step == 0.0
            {
                self.value = self.target;
            }
        }
        self.value
    }
}

/// Feed-forward compressor with a peak envelope follower.
struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    fn new(sample_rate: f32, threshold_db: f32, ratio: f32) -> Compressor {
        Compressor {
            threshold_db,
            ratio,
            attack_coeff: (-1.0 / ((COMPRESSOR_ATTACK_MS / 1000.0) * sample_rate)).exp(),
            release_coeff: (-1.0 / ((COMPRESSOR_RELEASE_MS / 1000.0) * sample_rate)).exp(),
            envelope: 0.0,
        }
    }

    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let detect = left.abs().max(right.abs());
        let coeff = if detect > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * detect;

        let over_db = linear_to_db(self.envelope) - self.threshold_db;
        if over_db <= 0.0 {
            return (left, right);
        }
        let gain = db_to_linear(-over_db * (1.0 - 1.0 / self.ratio));
        (left * gain, right * gain)
    }
}

struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    feedback: f32,
}

impl CombFilter {
    fn new(delay_samples: usize, decay_secs: f32, sample_rate: f32) -> CombFilter {
        let delay_samples = delay_samples.max(1);
        // Feedback that attenuates by 60dB over the decay time.
        let feedback = 10f32.powf(-3.0 * delay_samples as f32 / (decay_secs * sample_rate));
        CombFilter {
            buffer: vec![0.0; delay_samples],
            write_pos: 0,
            feedback,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        self.buffer[self.write_pos] = input + output * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }
}

struct AllpassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    feedback: f32,
}

impl AllpassFilter {
    fn new(delay_samples: usize, feedback: f32) -> AllpassFilter {
        AllpassFilter {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            feedback,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        self.buffer[self.write_pos] = input + delayed * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        delayed - input
    }
}

/// Schroeder reverb: parallel combs into series allpasses.
struct Reverb {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
    mix: f32,
}

impl Reverb {
    fn new(sample_rate: f32, decay_secs: f32, spread_ms: usize) -> Reverb {
        let samples = |ms: usize| sample_rate as usize * ms / 1000;
        Reverb {
            combs: [29, 37, 43, 53]
                .iter()
                .map(|ms| CombFilter::new(samples(ms + spread_ms), decay_secs, sample_rate))
                .collect(),
            allpasses: [5, 2]
                .iter()
                .map(|ms| AllpassFilter::new(samples(*ms), 0.7))
                .collect(),
            mix: REVERB_MIX,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let mut wet = self.combs.iter_mut().map(|comb| comb.process(input)).sum::<f32>()
            / self.combs.len() as f32;
        for allpass in self.allpasses.iter_mut() {
            wet = allpass.process(wet);
        }
        input * (1.0 - self.mix) + wet * self.mix
    }
}

struct FeedbackDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    feedback: f32,
    mix: f32,
}

impl FeedbackDelay {
    fn new(sample_rate: f32, delay_secs: f32, feedback: f32) -> FeedbackDelay {
        let mut delay = FeedbackDelay {
            buffer: vec![0.0; (MAX_DELAY_SECS * sample_rate) as usize + 1],
            write_pos: 0,
            delay_samples: 1,
            feedback: feedback.clamp(0.0, 0.95),
            mix: DELAY_MIX,
        };
        delay.set_delay(delay_secs, sample_rate);
        delay
    }

    fn set_delay(&mut self, delay_secs: f32, sample_rate: f32) {
        self.delay_samples = ((delay_secs * sample_rate) as usize).clamp(1, self.buffer.len() - 1);
    }

    fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        let delayed = self.buffer[read_pos];
        self.buffer[self.write_pos] = input + delayed * self.feedback;
        self.write_pos = (self.write_pos + 1) % len;
        input + delayed * self.mix
    }
}

/// Brickwall peak limiter with instant attack and a smoothed release.
struct Limiter {
    ceiling: f32,
    gain: f32,
    release_coeff: f32,
}

impl Limiter {
    fn new(sample_rate: f32, ceiling_db: f32) -> Limiter {
        Limiter {
            ceiling: db_to_linear(ceiling_db),
            gain: 1.0,
            release_coeff: (-1.0 / ((LIMITER_RELEASE_MS / 1000.0) * sample_rate)).exp(),
        }
    }

    fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs());
        let wanted = if peak > self.ceiling {
            self.ceiling / peak
        } else {
            1.0
        };
        if wanted < self.gain {
            self.gain = wanted;
        } else {
            self.gain = self.release_coeff * self.gain + (1.0 - self.release_coeff) * wanted;
        }
        let clamp = |sample: f32| (sample * self.gain).clamp(-self.ceiling, self.ceiling);
        (clamp(left), clamp(right))
    }
}

/// The full master chain. Processes one stereo frame at a time.
pub struct EffectsChain {
    sample_rate: f32,
    volume: Ramp,
    compressor: Compressor,
    reverb_l: Reverb,
    reverb_r: Reverb,
    delay_l: FeedbackDelay,
    delay_r: FeedbackDelay,
    limiter: Limiter,
}

impl EffectsChain {
    pub fn new(sample_rate: u32, bpm: f64, volume_ramp_secs: f32) -> EffectsChain {
        let sr = sample_rate as f32;
        let delay_secs = sixteenth_note_secs(bpm);
        EffectsChain {
            sample_rate: sr,
            volume: Ramp::new(1.0, volume_ramp_secs * sr),
            compressor: Compressor::new(sr, COMPRESSOR_THRESHOLD_DB, COMPRESSOR_RATIO),
            reverb_l: Reverb::new(sr, REVERB_DECAY_SECS, 0),
            reverb_r: Reverb::new(sr, REVERB_DECAY_SECS, 2),
            delay_l: FeedbackDelay::new(sr, delay_secs, DELAY_FEEDBACK),
            delay_r: FeedbackDelay::new(sr, delay_secs, DELAY_FEEDBACK),
            limiter: Limiter::new(sr, LIMITER_CEILING_DB),
        }
    }

    /// Ramps the master volume to the given level, clamped to [0, 1].
    pub fn set_master_volume(&mut self, volume: f32) {
        self.volume.set_target(volume.clamp(0.0, 1.0));
    }

    pub fn master_volume(&self) -> f32 {
        self.volume.target
    }

    /// Re-times the delay to a sixteenth note at the given tempo.
    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            return;
        }
        let delay_secs = sixteenth_note_secs(bpm);
        self.delay_l.set_delay(delay_secs, self.sample_rate);
        self.delay_r.set_delay(delay_secs, self.sample_rate);
    }

    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let gain = MASTER_GAIN * self.volume.next();
        let (left, right) = self.compressor.process(left * gain, right * gain);
        let (left, right) = (self.reverb_l.process(left), self.reverb_r.process(right));
        let (left, right) = (self.delay_l.process(left), self.delay_r.process(right));
        self.limiter.process(left, right)
    }

    /// Processes interleaved stereo frames in place.
    pub fn process_interleaved(&mut self, frames: &mut [f32]) {
        for frame in frames.chunks_exact_mut(2) {
            let (left, right) = self.process(frame[0], frame[1]);
            frame[0] = left;
            frame[1] = right;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixteenth_note() {
        assert_eq!(0.0625, sixteenth_note_secs(240.0));
        assert_eq!(0.125, sixteenth_note_secs(120.0));
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(-6.0) - 0.501).abs() < 0.001);
        assert!((linear_to_db(1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_limiter_holds_ceiling() {
        let mut chain = EffectsChain::new(44100, 120.0, 0.1);
        let ceiling = db_to_linear(LIMITER_CEILING_DB);
        for _ in 0..44100 {
            let (left, right) = chain.process(4.0, -4.0);
            assert!(left.abs() <= ceiling + 1e-6);
            assert!(right.abs() <= ceiling + 1e-6);
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut chain = EffectsChain::new(44100, 120.0, 0.1);
        let mut frames = vec![0.0; 2048];
        chain.process_interleaved(&mut frames);
        assert!(frames.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn test_master_volume_ramps() {
        let mut chain = EffectsChain::new(1000, 120.0, 0.1);
        chain.set_master_volume(0.0);
        assert_eq!(0.0, chain.master_volume());
        // Halfway through the ramp the volume is still audible.
        for _ in 0..50 {
            chain.volume.next();
        }
        assert!((chain.volume.value - 0.5).abs() < 0.02);
        for _ in 0..60 {
            chain.volume.next();
        }
        assert_eq!(0.0, chain.volume.value);

        chain.set_master_volume(3.0);
        assert_eq!(1.0, chain.master_volume());
    }

    #[test]
    fn test_delay_follows_tempo() {
        let mut chain = EffectsChain::new(1000, 120.0, 0.1);
        assert_eq!(125, chain.delay_l.delay_samples);
        chain.set_bpm(60.0);
        assert_eq!(250, chain.delay_r.delay_samples);
        chain.set_bpm(f64::NAN);
        assert_eq!(250, chain.delay_r.delay_samples);
    }
}
