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

//! Decoding sample files into memory.
//!
//! Samples are decoded entirely into memory ahead of time so triggering never
//! touches the disk.

use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

pub type LoadError = Box<dyn Error + Send + Sync>;

/// A decoded sample. The data is shared between every voice playing it.
#[derive(Clone)]
pub struct LoadedSample {
    /// Interleaved f32 samples.
    data: Arc<Vec<f32>>,
    channel_count: u16,
    sample_rate: u32,
}

impl LoadedSample {
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    pub fn data(&self) -> &Arc<Vec<f32>> {
        &self.data
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl std::fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSample")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Turns a resource locator into a decoded sample. Loading blocks; the store runs it
/// on the blocking pool and races it against a timeout.
pub trait SampleLoader: Send + Sync + 'static {
    fn load(&self, locator: &str) -> Result<LoadedSample, LoadError>;
}

/// Loads samples from disk, resolving relative locators against a base directory and
/// resampling to the output rate.
pub struct FileSampleLoader {
    base_path: PathBuf,
    target_sample_rate: u32,
    cache: Mutex<HashMap<PathBuf, LoadedSample>>,
}

impl FileSampleLoader {
    pub fn new(base_path: &Path, target_sample_rate: u32) -> FileSampleLoader {
        FileSampleLoader {
            base_path: base_path.to_path_buf(),
            target_sample_rate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a locator to a path on disk.
    pub fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.lock().values().map(|s| s.memory_size()).sum()
    }

    /// Decodes a whole file into interleaved f32 samples.
    fn decode(path: &Path) -> Result<LoadedSample, LoadError> {
        let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or("no audio track found")?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or("sample rate not specified")?;
        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut channel_count: u16 = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        let mut samples = Vec::new();
        let mut buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(path = ?path, err = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            if channel_count == 0 {
                channel_count = spec.channels.count() as u16;
            }
            if buffer
                .as_ref()
                .map_or(true, |buffer| {
                    buffer.capacity() < decoded.capacity() * spec.channels.count()
                })
            {
                buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buffer) = buffer.as_mut() {
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
        }

        if channel_count == 0 {
            return Err("channels not specified".into());
        }
        Ok(LoadedSample::new(samples, channel_count, sample_rate))
    }
}

impl SampleLoader for FileSampleLoader {
    fn load(&self, locator: &str) -> Result<LoadedSample, LoadError> {
        let path = self.resolve(locator);
        if let Some(sample) = self.cache.lock().get(&path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        info!(path = ?path, "Loading sample into memory");
        let decoded = Self::decode(&path)?;

        let loaded = if decoded.sample_rate() != self.target_sample_rate {
            debug!(
                source_rate = decoded.sample_rate(),
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            LoadedSample::new(
                transcode(
                    decoded.data(),
                    decoded.channel_count(),
                    decoded.sample_rate(),
                    self.target_sample_rate,
                ),
                decoded.channel_count(),
                self.target_sample_rate,
            )
        } else {
            decoded
        };

        info!(
            path = ?path,
            channels = loaded.channel_count(),
            sample_rate = loaded.sample_rate(),
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            "Sample loaded"
        );
        self.cache.lock().insert(path, loaded.clone());
        Ok(loaded)
    }
}

impl std::fmt::Debug for FileSampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSampleLoader")
            .field("base_path", &self.base_path)
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

/// Resamples interleaved samples with linear interpolation. Good enough for one-shots.
pub fn transcode(samples: &[f32], channel_count: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == 0 || source_rate == target_rate {
        return samples.to_vec();
    }

    let channels = channel_count.max(1) as usize;
    let ratio = target_rate as f64 / source_rate as f64;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}
