//! Audio output for synthesized speech
//!
//! One output stream is opened per playback job, configured from the job's
//! first chunk, and always closed when the job ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, SizedSample, StreamConfig};
use parking_lot::{Condvar, Mutex};

use crate::voice::model::{AudioChunk, ChunkFormat};
use crate::{Error, Result};

/// Seconds of audio buffered between `write` and the device callback
const RING_SECONDS: u32 = 1;

/// How long `write` waits without the device consuming anything
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra time `close` allows for buffered audio to play out
const DRAIN_MARGIN: Duration = Duration::from_millis(500);

/// Opens output streams for playback jobs
pub trait AudioSink: Send {
    /// Open a stream matching the format of `first_chunk`
    ///
    /// # Errors
    ///
    /// Returns error if no device supports the format
    fn open_for(&mut self, first_chunk: &AudioChunk) -> Result<Box<dyn OutputStream>>;
}

/// A single open output stream
pub trait OutputStream {
    /// Write one chunk, blocking until the device buffer accepts it
    ///
    /// # Errors
    ///
    /// Returns error if the chunk format differs or the device fails
    fn write(&mut self, chunk: &AudioChunk) -> Result<()>;

    /// Flush and release the stream
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be stopped cleanly
    fn close(self: Box<Self>) -> Result<()>;
}

/// Closes its stream when dropped, whatever path the job took
pub struct StreamGuard {
    stream: Option<Box<dyn OutputStream>>,
}

impl StreamGuard {
    #[must_use]
    pub fn new(stream: Box<dyn OutputStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Write one chunk to the guarded stream
    ///
    /// # Errors
    ///
    /// Returns error if the stream rejects the chunk
    pub fn write(&mut self, chunk: &AudioChunk) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.write(chunk),
            None => Err(Error::DeviceWrite("stream already closed".to_string())),
        }
    }

    /// Close now instead of at end of scope
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                tracing::warn!(error = %e, "output stream close failed");
            }
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Plays through a cpal output device
pub struct DeviceSink {
    device_name: Option<String>,
}

impl DeviceSink {
    /// Use the named output device, or the host default when `None`
    #[must_use]
    pub const fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == *name))
                .ok_or_else(|| Error::Audio(format!("output device not found: {name}"))),
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string())),
        }
    }
}

impl Default for DeviceSink {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioSink for DeviceSink {
    fn open_for(&mut self, first_chunk: &AudioChunk) -> Result<Box<dyn OutputStream>> {
        let format = first_chunk.format();
        let device = self.device()?;

        let stream: Box<dyn OutputStream> = match format.sample_width {
            2 => Box::new(DeviceStream::<i16>::open(&device, format)?),
            4 => Box::new(DeviceStream::<i32>::open(&device, format)?),
            w => {
                return Err(Error::Audio(format!("unsupported sample width: {w} bytes")));
            }
        };

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            sample_width = format.sample_width,
            "output stream opened"
        );

        Ok(stream)
    }
}

/// PCM sample types a chunk payload can decode into
trait PcmSample: SizedSample + Send + 'static {
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

impl PcmSample for i16 {
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(2)
            .map(|b| Self::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

impl PcmSample for i32 {
    fn decode(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(4)
            .map(|b| Self::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// Samples waiting for the device callback
struct Ring<T> {
    samples: Mutex<VecDeque<T>>,
    drained: Condvar,
    capacity: usize,
}

struct DeviceStream<T: PcmSample> {
    stream: cpal::Stream,
    ring: Arc<Ring<T>>,
    failed: Arc<AtomicBool>,
    format: ChunkFormat,
}

impl<T: PcmSample> DeviceStream<T> {
    fn open(device: &cpal::Device, format: ChunkFormat) -> Result<Self> {
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let capacity = (format.sample_rate * RING_SECONDS) as usize * usize::from(format.channels);
        let ring = Arc::new(Ring {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            drained: Condvar::new(),
            capacity,
        });
        let failed = Arc::new(AtomicBool::new(false));

        let cb_ring = Arc::clone(&ring);
        let cb_failed = Arc::clone(&failed);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut samples = cb_ring.samples.lock();
                    for out in data.iter_mut() {
                        *out = samples.pop_front().unwrap_or(T::EQUILIBRIUM);
                    }
                    drop(samples);
                    cb_ring.drained.notify_all();
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    cb_failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream,
            ring,
            failed,
            format,
        })
    }

    /// Time needed to play everything still buffered
    fn buffered_duration(&self) -> Duration {
        let pending = self.ring.samples.lock().len() as u64;
        let per_sec = u64::from(self.format.sample_rate) * u64::from(self.format.channels);
        Duration::from_millis(pending * 1000 / per_sec.max(1))
    }
}

impl<T: PcmSample> OutputStream for DeviceStream<T> {
    fn write(&mut self, chunk: &AudioChunk) -> Result<()> {
        if chunk.format() != self.format {
            return Err(Error::DeviceWrite(format!(
                "chunk format {:?} differs from stream format {:?}",
                chunk.format(),
                self.format
            )));
        }

        let mut pending: VecDeque<T> = T::decode(&chunk.payload).into();
        let mut last_progress = Instant::now();

        while !pending.is_empty() {
            if self.failed.load(Ordering::Acquire) {
                return Err(Error::DeviceWrite("output device reported an error".to_string()));
            }

            let mut samples = self.ring.samples.lock();
            let room = self.ring.capacity.saturating_sub(samples.len());
            if room == 0 {
                self.ring
                    .drained
                    .wait_for(&mut samples, Duration::from_millis(50));
                if last_progress.elapsed() > STALL_TIMEOUT {
                    return Err(Error::DeviceWrite("output device stalled".to_string()));
                }
                continue;
            }

            let take = room.min(pending.len());
            samples.extend(pending.drain(..take));
            last_progress = Instant::now();
        }

        tracing::trace!(samples = chunk.sample_count(), "chunk written");
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let deadline = Instant::now() + self.buffered_duration() + DRAIN_MARGIN;

        {
            let mut samples = self.ring.samples.lock();
            while !samples.is_empty()
                && !self.failed.load(Ordering::Acquire)
                && Instant::now() < deadline
            {
                self.ring
                    .drained
                    .wait_for(&mut samples, Duration::from_millis(50));
            }
        }

        let result = self.stream.pause().map_err(|e| Error::Audio(e.to_string()));
        drop(self);
        tracing::debug!("output stream closed");
        result
    }
}
