// CaptureEngine - cpal input stream feeding the frame pool
//
// The capture callback is real-time safe: it only pops a pre-allocated
// buffer, downmixes into it, and pushes it onto the lock-free data queue.
// A full pool means the detect worker has stalled; the block is dropped
// rather than blocking the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::audio::buffer_pool::{DetectChannels, FramePool};
use crate::audio::device::DeviceManager;
use crate::audio::frame::AudioFrame;
use crate::audio::FrameSource;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Owns the live cpal input stream
///
/// The stream stays on the thread that opened it (cpal streams are not
/// Send); the paired `CaptureSource` is handed to the detect worker.
pub struct CaptureEngine {
    _stream: cpal::Stream,
    sample_rate: u32,
    device_name: Option<String>,
}

impl CaptureEngine {
    /// Open a capture stream on the named device (or the system default)
    ///
    /// # Returns
    /// The engine (keep it alive for the duration of capture) and the
    /// `FrameSource` end consumed by the detect worker.
    ///
    /// # Errors
    /// `AudioError` when the device is missing, cannot be opened, or only
    /// offers an unsupported sample format.
    pub fn open(
        device_name: Option<&str>,
        config: &AudioConfig,
    ) -> Result<(Self, CaptureSource), AudioError> {
        let device = DeviceManager::find_input_device(device_name)?;
        let resolved_name = device.name().ok();

        let input_config =
            device
                .default_input_config()
                .map_err(|e| AudioError::StreamOpenFailed {
                    reason: format!("default input config: {}", e),
                })?;
        let stream_config: cpal::StreamConfig = input_config.clone().into();
        let channel_count = stream_config.channels as usize;
        let sample_rate = stream_config.sample_rate.0;

        // Buffers must absorb whatever block size the host delivers
        let buffer_size = config.blocksize.max(2048);
        let (mut capture_channels, detect_channels) =
            FramePool::new(config.buffer_pool_size, buffer_size);

        let failed = Arc::new(AtomicBool::new(false));
        let failed_cb = Arc::clone(&failed);
        let err_fn = move |err: cpal::StreamError| {
            log::error!("[Capture] Input stream error: {}", err);
            failed_cb.store(true, Ordering::SeqCst);
        };

        let stream = match input_config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buffer) = capture_channels.pool_consumer.pop() {
                            buffer.clear();
                            if channel_count == 1 {
                                buffer.extend_from_slice(data);
                            } else {
                                // De-interleave: take first channel
                                for frame in data.chunks(channel_count) {
                                    buffer.push(frame[0]);
                                }
                            }
                            let _ = capture_channels.data_producer.push(buffer);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamOpenFailed {
                    reason: format!("{:?}", e),
                })?,
            other => {
                return Err(AudioError::StreamOpenFailed {
                    reason: format!("unsupported input sample format {:?}", other),
                })
            }
        };

        stream.play().map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("stream start: {}", e),
        })?;

        log::info!(
            "[Capture] Input stream open on {:?} at {} Hz",
            resolved_name.as_deref().unwrap_or("<default>"),
            sample_rate
        );

        Ok((
            Self {
                _stream: stream,
                sample_rate,
                device_name: resolved_name,
            },
            CaptureSource {
                channels: detect_channels,
                sample_rate,
                samples_consumed: 0,
                failed,
            },
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Resolved name of the opened device, when the host reports one
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

/// Detect-worker end of a live capture stream
pub struct CaptureSource {
    channels: DetectChannels,
    sample_rate: u32,
    samples_consumed: u64,
    failed: Arc<AtomicBool>,
}

impl FrameSource for CaptureSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        loop {
            if self.failed.load(Ordering::SeqCst) {
                return Err(AudioError::Disconnected {
                    details: "input stream reported an error".to_string(),
                });
            }

            match self.channels.data_consumer.pop() {
                Ok(mut buffer) => {
                    let timestamp = Duration::from_secs_f64(
                        self.samples_consumed as f64 / self.sample_rate as f64,
                    );
                    let samples = buffer.as_slice().to_vec();
                    buffer.clear();
                    let _ = self.channels.pool_producer.push(buffer);

                    self.samples_consumed += samples.len() as u64;
                    return Ok(Some(AudioFrame::new(samples, self.sample_rate, timestamp)));
                }
                Err(rtrb::PopError::Empty) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
