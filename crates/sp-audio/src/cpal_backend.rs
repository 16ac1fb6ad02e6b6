//! CPAL-based audio output backend.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use sp_engine::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::{AudioError, AudioOutput};

/// Ring buffer length in seconds of audio.
const BUFFER_SECONDS: f32 = 0.1;

/// CPAL-based audio output.
///
/// The stream callback drains a lock-free ring buffer; [`AudioOutput::write`]
/// blocks while the buffer is full, which paces the producer to the device.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    producer: HeapProd<Frame>,
    running: Arc<AtomicBool>,
}

impl CpalOutput {
    /// Create an output on the default device. The stream is not built yet.
    pub fn new() -> Result<(Self, HeapCons<Frame>), AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let mut config: StreamConfig = config.into();
        // The callback interleaves stereo pairs.
        config.channels = 2;

        let capacity = ((config.sample_rate.0 as f32 * BUFFER_SECONDS) as usize).max(256);
        let (producer, consumer) = HeapRb::<Frame>::new(capacity).split();
        tracing::debug!(sample_rate = config.sample_rate.0, capacity, "audio device opened");

        let output = Self {
            device,
            config,
            stream: None,
            producer,
            running: Arc::new(AtomicBool::new(false)),
        };
        Ok((output, consumer))
    }

    /// Open the default device and build its stream.
    pub fn open() -> Result<Self, AudioError> {
        let (mut output, consumer) = Self::new()?;
        output.build_stream(consumer)?;
        Ok(output)
    }

    /// Build and start the audio stream.
    pub fn build_stream(&mut self, mut consumer: HeapCons<Frame>) -> Result<(), AudioError> {
        let running = self.running.clone();
        let channels = self.config.channels as usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    for chunk in data.chunks_mut(channels) {
                        let (left, right) = match consumer.try_pop() {
                            Some(frame) => (frame.left as f32 / 32768.0, frame.right as f32 / 32768.0),
                            None => (0.0, 0.0),
                        };
                        for (i, sample) in chunk.iter_mut().enumerate() {
                            *sample = match i {
                                0 => left,
                                1 => right,
                                _ => 0.0,
                            };
                        }
                    }
                },
                |err| tracing::warn!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Write a single frame, spinning until the ring buffer has room.
    fn write_spin(&mut self, frame: Frame) {
        while self.producer.try_push(frame).is_err() {
            std::thread::yield_now();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn write(&mut self, frames: &[Frame]) -> Result<(), AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::Playback("stream not built".into()));
        }
        if !self.running.load(Ordering::Relaxed) {
            return Ok(());
        }
        for &frame in frames {
            self.write_spin(frame);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}
