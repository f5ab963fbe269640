//! Pull-model audio output devices
//!
//! The device owns the clock of audio playback: it calls back whenever it
//! needs the next block of bytes, and the callback must fill all of it.

use crate::error::{PlayerError, Result};
use crate::pipeline::types::AudioParams;
use crate::utils::SignalOfStop;
use log::{debug, info};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked on the device thread for every buffer it needs filled
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

pub trait AudioOutput {
    /// Negotiate a format. The returned parameters are what the device will
    /// actually play and may differ from `wanted`.
    fn open(&mut self, wanted: &AudioParams, buffer_frames: u32) -> Result<AudioParams>;

    /// Start pulling from `callback`
    fn start(&mut self, callback: AudioCallback) -> Result<()>;

    /// Stop the device; the callback is dropped once this returns
    fn stop(&mut self);
}

/// Software device that pulls at the real-time cadence of its format and
/// discards the samples. Used when no sound card is wanted.
pub struct NullAudioOutput {
    params: Option<AudioParams>,
    buffer_frames: u32,
    sos: SignalOfStop,
    worker: Option<JoinHandle<()>>,
}

impl NullAudioOutput {
    pub fn new() -> Self {
        Self {
            params: None,
            buffer_frames: 1024,
            sos: SignalOfStop::new(),
            worker: None,
        }
    }
}

impl Default for NullAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for NullAudioOutput {
    fn open(&mut self, wanted: &AudioParams, buffer_frames: u32) -> Result<AudioParams> {
        self.params = Some(*wanted);
        self.buffer_frames = buffer_frames.max(1);
        Ok(*wanted)
    }

    fn start(&mut self, mut callback: AudioCallback) -> Result<()> {
        let params = self
            .params
            .ok_or_else(|| PlayerError::AudioOutput("device not opened".into()))?;
        if params.sample_rate == 0 {
            return Err(PlayerError::AudioOutput("zero sample rate".into()));
        }

        let period =
            Duration::from_secs_f64(self.buffer_frames as f64 / params.sample_rate as f64);
        let mut buffer = vec![0u8; self.buffer_frames as usize * params.frame_bytes()];
        let sos = self.sos.clone();

        info!(
            "NullAudioOutput: started ({} Hz, {} ch, period {:?})",
            params.sample_rate, params.channels, period
        );
        let worker = thread::Builder::new()
            .name("audio-null".into())
            .spawn(move || {
                while !sos.wait_timeout(period) {
                    callback(&mut buffer);
                }
                debug!("NullAudioOutput: stopped");
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.sos.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for NullAudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "audio-device")]
pub use self::device::CpalAudioOutput;

#[cfg(feature = "audio-device")]
mod device {
    use super::{AudioCallback, AudioOutput};
    use crate::error::{PlayerError, Result};
    use crate::pipeline::types::{AudioParams, SampleFormat};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::info;

    /// System audio device through the default cpal host, always fed
    /// interleaved signed 16-bit samples
    pub struct CpalAudioOutput {
        device: Option<cpal::Device>,
        config: Option<cpal::StreamConfig>,
        stream: Option<cpal::Stream>,
    }

    impl CpalAudioOutput {
        pub fn new() -> Self {
            Self {
                device: None,
                config: None,
                stream: None,
            }
        }
    }

    impl Default for CpalAudioOutput {
        fn default() -> Self {
            Self::new()
        }
    }

    fn device_error(e: impl std::fmt::Display) -> PlayerError {
        PlayerError::AudioOutput(e.to_string())
    }

    impl AudioOutput for CpalAudioOutput {
        fn open(&mut self, wanted: &AudioParams, _buffer_frames: u32) -> Result<AudioParams> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioOutput("no output audio device".into()))?;

            let channels = wanted.channels.clamp(1, 2);
            let config = cpal::StreamConfig {
                channels,
                sample_rate: wanted.sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };
            info!(
                "CpalAudioOutput: opening {} Hz, {} ch",
                wanted.sample_rate, channels
            );

            self.device = Some(device);
            self.config = Some(config);
            Ok(AudioParams {
                sample_rate: wanted.sample_rate,
                channels,
                format: SampleFormat::S16,
            })
        }

        fn start(&mut self, mut callback: AudioCallback) -> Result<()> {
            let (Some(device), Some(config)) = (self.device.as_ref(), self.config.as_ref()) else {
                return Err(PlayerError::AudioOutput("device not opened".into()));
            };

            let mut scratch: Vec<u8> = Vec::new();
            let stream = device
                .build_output_stream(
                    config,
                    move |output: &mut [i16], _| {
                        scratch.resize(output.len() * 2, 0);
                        callback(&mut scratch);
                        for (sample, bytes) in output.iter_mut().zip(scratch.chunks_exact(2)) {
                            *sample = i16::from_ne_bytes([bytes[0], bytes[1]]);
                        }
                    },
                    |err| log::error!("Audio output error: {}", err),
                    None,
                )
                .map_err(device_error)?;
            stream.play().map_err(device_error)?;

            self.stream = Some(stream);
            Ok(())
        }

        fn stop(&mut self) {
            // dropping the stream stops the callback
            self.stream = None;
        }
    }
}
