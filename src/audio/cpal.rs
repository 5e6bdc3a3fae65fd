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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, span, warn, Level};

use super::effects::EffectsChain;
use super::mixer::{ActiveVoice, AudioMixer, Voice};
use super::thread_priority;
use super::{Device as AudioDevice, OutputError};
use crate::config;

/// How long to wait for the output stream to come up before giving up.
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames mixed per producer iteration.
const BLOCK_FRAMES: usize = 256;

/// Single-producer single-consumer ring of interleaved samples.
struct CircularBuffer {
    buffer: Vec<f32>,
    /// Always a power of two.
    capacity: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        Self {
            buffer: vec![0.0; capacity],
            capacity,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    #[inline]
    fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Copies as much of `samples` as fits. Only the producer thread may call this.
    fn write(&self, samples: &[f32]) -> usize {
        let to_write = self.space().min(samples.len());
        if to_write == 0 {
            return 0;
        }
        let write = self.write_pos.load(Ordering::Acquire);
        let first_chunk = (self.capacity - write).min(to_write);

        // SAFETY: the producer is the only writer, and the region between write_pos and
        // read_pos is never read until write_pos is published below.
        unsafe {
            let base = self.buffer.as_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(samples.as_ptr(), base.add(write), first_chunk);
            if to_write > first_chunk {
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr().add(first_chunk),
                    base,
                    to_write - first_chunk,
                );
            }
        }

        self.write_pos
            .store((write + to_write) & (self.capacity - 1), Ordering::Release);
        to_write
    }

    /// Fills as much of `output` as is available. Only the output callback may call this.
    fn read(&self, output: &mut [f32]) -> usize {
        let to_read = self.available().min(output.len());
        if to_read == 0 {
            return 0;
        }
        let read = self.read_pos.load(Ordering::Acquire);
        let first_chunk = (self.capacity - read).min(to_read);

        // SAFETY: the consumer is the only reader, and the producer never writes into the
        // region between read_pos and write_pos.
        unsafe {
            let base = self.buffer.as_ptr();
            std::ptr::copy_nonoverlapping(base.add(read), output.as_mut_ptr(), first_chunk);
            if to_read > first_chunk {
                std::ptr::copy_nonoverlapping(
                    base,
                    output.as_mut_ptr().add(first_chunk),
                    to_read - first_chunk,
                );
            }
        }

        self.read_pos
            .store((read + to_read) & (self.capacity - 1), Ordering::Release);
        to_read
    }
}

/// A cpal output device that plays pad voices through the master effects chain.
pub struct Device {
    name: String,
    max_channels: u16,
    host_id: cpal::HostId,
    device: cpal::Device,
    /// Present once the device has been opened for output.
    output: Option<OutputManager>,
}

/// Owns the mixer and the threads that feed the cpal stream.
struct OutputManager {
    mixer: AudioMixer,
    voice_tx: crossbeam_channel::Sender<ActiveVoice>,
    voice_rx: crossbeam_channel::Receiver<ActiveVoice>,
    /// Voices start this many samples after the trigger, so every trigger has the same latency.
    fixed_delay_samples: u64,
    running: Arc<AtomicBool>,
    output_thread: Option<thread::JoinHandle<()>>,
    producer_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// f32 callback: reads straight into the cpal buffer.
fn create_f32_callback(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = thread_priority::callback_thread_priority();
    let rt_audio = thread_priority::rt_audio_enabled();
    let mut priority_set = false;
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        thread_priority::configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        let read = ring.read(data);
        data[read..].fill(0.0);
    }
}

/// Integer callback: reads into scratch space and converts.
fn create_int_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let priority = thread_priority::callback_thread_priority();
    let rt_audio = thread_priority::rt_audio_enabled();
    let mut priority_set = false;
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        thread_priority::configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }
        let scratch = &mut scratch[..data.len()];
        let read = ring.read(scratch);
        scratch[read..].fill(0.0);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<CircularBuffer>,
) -> Result<cpal::Stream, Box<dyn Error>> {
    let on_error = |err: cpal::StreamError| error!(err = %err, "cpal output stream error");
    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            device.build_output_stream(config, create_f32_callback(ring), on_error, None)?
        }
        cpal::SampleFormat::I16 => {
            device.build_output_stream(config, create_int_callback::<i16>(ring), on_error, None)?
        }
        cpal::SampleFormat::I32 => {
            device.build_output_stream(config, create_int_callback::<i32>(ring), on_error, None)?
        }
        format => return Err(format!("unsupported output sample format {}", format).into()),
    };
    Ok(stream)
}

impl Drop for OutputManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.mixer.stop_all();
        if let Some(thread) = self.producer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

impl OutputManager {
    /// Opens the stream and starts the producer and output threads. Returns once the stream
    /// is playing, or with the reason it couldn't be started.
    fn start(device: cpal::Device, config: &config::Audio) -> Result<OutputManager, Box<dyn Error>> {
        let sample_rate = config.sample_rate();
        let sample_format = device.default_output_config()?.sample_format();
        let mixer = AudioMixer::new(
            sample_rate,
            config.max_voices(),
            EffectsChain::new(
                sample_rate,
                crate::transport::DEFAULT_BPM,
                config.master_volume_ramp().as_secs_f32(),
            ),
        );
        let (voice_tx, voice_rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));

        // Roughly 50ms of stereo audio between the mixer and the device.
        let channels = AudioMixer::CHANNELS as usize;
        let ring = Arc::new(CircularBuffer::new(
            (sample_rate as usize * channels / 20).max(BLOCK_FRAMES * channels * 2),
        ));

        let producer_thread = {
            let mixer = mixer.clone();
            let voice_rx = voice_rx.clone();
            let ring = ring.clone();
            let running = running.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "mix producer");
                let _enter = span.enter();

                let block_samples = BLOCK_FRAMES * channels;
                let mut scratch = vec![0.0f32; block_samples];
                while running.load(Ordering::Acquire) {
                    for voice in voice_rx.try_iter() {
                        mixer.add_voice(voice);
                    }

                    if ring.space() >= block_samples {
                        mixer.process_into_output(&mut scratch, BLOCK_FRAMES);
                        ring.write(&scratch);
                    } else {
                        thread::sleep(Duration::from_micros(500));
                    }
                }
            })
        };

        let stream_config = cpal::StreamConfig {
            channels: AudioMixer::CHANNELS,
            sample_rate: sample_rate as cpal::SampleRate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size() as u32),
        };
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let output_thread = {
            let running = running.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "cpal output");
                let _enter = span.enter();

                let stream = match build_stream(&device, &stream_config, sample_format, ring) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                info!("cpal output stream started");
                let _ = ready_tx.send(Ok(()));

                // The stream lives as long as this thread.
                while running.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(100));
                }
                debug!("cpal output stream stopped");
            })
        };

        let manager = OutputManager {
            mixer,
            voice_tx,
            voice_rx,
            fixed_delay_samples: config.buffer_size() as u64,
            running,
            output_thread: Some(output_thread),
            producer_thread: Some(producer_thread),
        };

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => Ok(manager),
            Ok(Err(e)) => Err(format!("unable to start output stream: {}", e).into()),
            Err(_) => Err("timed out starting output stream".into()),
        }
    }

    fn play(&self, voice: Voice) -> Result<(), OutputError> {
        self.mixer.reserve()?;
        let start_at_sample = self.mixer.current_sample() + self.fixed_delay_samples;
        if self
            .voice_tx
            .send(ActiveVoice::new(voice, start_at_sample))
            .is_err()
        {
            self.mixer.release(1);
            return Err(OutputError::Disconnected);
        }
        Ok(())
    }

    fn stop_all(&self) {
        let queued = self.voice_rx.try_iter().count();
        self.mixer.release(queued);
        self.mixer.stop_all();
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices with at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                        output: None,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Opens the configured device. "default" picks the default host's default output.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        let mut device = if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            let max_channels = device.default_output_config()?.channels();
            Device {
                name: device.name()?,
                max_channels,
                host_id: host.id(),
                device,
                output: None,
            }
        } else {
            Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name))?
        };

        if device.max_channels < AudioMixer::CHANNELS {
            warn!(device = device.name, channels = device.max_channels, "Device is not stereo");
        }
        device.output = Some(OutputManager::start(device.device.clone(), config)?);
        info!(device = device.name, "Opened output device");
        Ok(device)
    }

    fn output(&self) -> Result<&OutputManager, OutputError> {
        self.output.as_ref().ok_or(OutputError::Disconnected)
    }
}

impl AudioDevice for Device {
    fn play(&self, voice: Voice) -> Result<(), OutputError> {
        self.output()?.play(voice)
    }

    fn stop_all(&self) {
        if let Ok(output) = self.output() {
            output.stop_all();
        }
    }

    fn set_master_volume(&self, volume: f32) {
        if let Ok(output) = self.output() {
            output.mixer.set_master_volume(volume);
        }
    }

    fn set_bpm(&self, bpm: f64) {
        if let Ok(output) = self.output() {
            output.mixer.set_bpm(bpm);
        }
    }

    fn active_voices(&self) -> usize {
        self.output().map_or(0, |output| output.mixer.active_voices())
    }

    fn sample_rate(&self) -> u32 {
        self.output()
            .map_or(0, |output| output.mixer.sample_rate())
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}
