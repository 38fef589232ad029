//! Echo-cancel audio bridge
//!
//! Sits between the audio device callbacks and the voice pipeline. Device
//! callbacks deliver arbitrary-sized sample runs; the echo processor only
//! accepts exact 10 ms quanta (320 samples at 32 kHz mono), so each
//! direction runs a pending-partial slicer that carries the remainder to the
//! next callback. Timestamps are synthesized monotonically from the number
//! of samples emitted, not taken from the device clock.
//!
//! The capture path runs the processor (echo cancel, noise suppression,
//! gain, VAD) on each quantum; the render path only feeds the far-end
//! reference. Drift between the two peers' sample clocks is the difference
//! of their processed-sample counters, sign-flipped by the reverse-drift
//! toggle for device pairs that drift the other way.

use crate::codec::AudioProcessor;
use crate::config::AudioProcessingConfig;
use crate::pool::{AudioFramePool, PooledFrame};

/// Samples per 10 ms quantum at 32 kHz mono
pub const QUANTUM_SAMPLES: usize = 320;

/// Slices arbitrary arrival sizes into exact quanta, carrying the partial
/// tail between calls
pub struct QuantumSlicer {
    pending: Vec<i16>,
    samples_emitted: u64,
}

impl QuantumSlicer {
    /// New slicer with an empty pending buffer
    pub fn new() -> Self {
        Self { pending: Vec::with_capacity(QUANTUM_SAMPLES), samples_emitted: 0 }
    }

    /// Feed `samples`, invoking `emit` once per completed quantum with the
    /// quantum and its synthesized timestamp (in samples since the stream
    /// started)
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(&[i16], u64)) {
        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= QUANTUM_SAMPLES {
            let quantum = &self.pending[offset..offset + QUANTUM_SAMPLES];
            emit(quantum, self.samples_emitted);
            self.samples_emitted += QUANTUM_SAMPLES as u64;
            offset += QUANTUM_SAMPLES;
        }
        self.pending.drain(..offset);
    }

    /// Samples waiting for the next arrival
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total samples emitted in complete quanta
    pub fn samples_emitted(&self) -> u64 {
        self.samples_emitted
    }
}

impl Default for QuantumSlicer {
    fn default() -> Self {
        Self::new()
    }
}

/// One processed capture quantum ready for the voice encoder
pub struct ProcessedQuantum {
    /// The samples, pooled
    pub samples: PooledFrame<i16>,
    /// Synthesized timestamp in samples since stream start
    pub timestamp: u64,
    /// Whether the processor detected voice
    pub has_voice: bool,
}

/// The echo-cancel bridge for one call
pub struct EchoCancelBridge {
    processor: Box<dyn AudioProcessor>,
    config: AudioProcessingConfig,
    capture: QuantumSlicer,
    render: QuantumSlicer,
    pool: AudioFramePool,
    /// Remote peer's processed-sample counter, learned out of band
    remote_samples_processed: u64,
    /// Remote peer's audio output latency, part of the AEC stream delay
    remote_out_latency_ms: u32,
    /// Local playout latency accounting for re-injection timestamps
    configured_latency_ms: u32,
    max_jitter_latency_ms: u32,
}

impl EchoCancelBridge {
    /// New bridge around an injected processor. The processor's stages are
    /// configured from the toggles once, here.
    pub fn new(mut processor: Box<dyn AudioProcessor>, config: AudioProcessingConfig) -> Self {
        processor.configure(&config);
        Self {
            processor,
            config,
            capture: QuantumSlicer::new(),
            render: QuantumSlicer::new(),
            pool: AudioFramePool::new(QUANTUM_SAMPLES, 4),
            remote_samples_processed: 0,
            remote_out_latency_ms: 0,
            configured_latency_ms: 0,
            max_jitter_latency_ms: 0,
        }
    }

    /// Feed captured near-end samples. Returns the processed quanta in
    /// arrival order; a partial tail stays pending.
    pub fn push_capture(&mut self, samples: &[i16]) -> Vec<ProcessedQuantum> {
        if self.config.drift_compensation {
            let drift = self.drift_samples();
            self.processor.set_stream_drift_samples(drift);
        }
        if self.config.echo_cancel {
            let delay = self.config.capture_min_latency_ms + self.remote_out_latency_ms;
            self.processor.set_stream_delay_ms(delay);
        }

        let mut out = Vec::new();
        let pool = self.pool.clone();
        let processor = &mut self.processor;
        let zero_silence = self.config.voice_detection;
        let gain_control = self.config.gain_control;
        self.capture.push(samples, |quantum, timestamp| {
            let mut frame = pool.checkout();
            frame.copy_from_slice(quantum);
            if gain_control {
                let level = processor.analog_level();
                processor.set_analog_level(level);
            }
            let has_voice = processor.process_capture(&mut frame);
            if zero_silence && !has_voice {
                frame.fill(0);
            }
            out.push(ProcessedQuantum { samples: frame, timestamp, has_voice });
        });
        out
    }

    /// Feed far-end samples about to be played out, for echo estimation.
    /// With echo cancellation off there is nothing to estimate against and
    /// the samples are ignored.
    pub fn push_render(&mut self, samples: &[i16]) {
        if !self.config.echo_cancel {
            return;
        }
        let processor = &mut self.processor;
        self.render.push(samples, |quantum, _timestamp| {
            processor.process_render(quantum);
        });
    }

    /// Local processed-sample counter (capture side)
    pub fn frames_processed(&self) -> u64 {
        self.capture.samples_emitted() / QUANTUM_SAMPLES as u64
    }

    /// Update the remote peer's processed-sample counter
    pub fn set_remote_samples_processed(&mut self, samples: u64) {
        self.remote_samples_processed = samples;
    }

    /// Update the remote peer's audio output latency
    pub fn set_remote_out_latency_ms(&mut self, latency_ms: u32) {
        self.remote_out_latency_ms = latency_ms;
    }

    /// Configure the local playout latency pair used for re-injection
    /// timestamps
    pub fn set_out_latency(&mut self, configured_ms: u32, max_jitter_ms: u32) {
        self.configured_latency_ms = configured_ms;
        self.max_jitter_latency_ms = max_jitter_ms;
    }

    /// Local audio output latency in milliseconds
    pub fn audio_out_latency_ms(&self) -> u32 {
        self.configured_latency_ms.saturating_sub(self.max_jitter_latency_ms)
    }

    /// Timestamp for re-injecting processed output downstream:
    /// `base + (configured - max_jitter)`, clamped so it never precedes
    /// `base`
    pub fn output_timestamp(&self, base_samples: u64) -> u64 {
        let offset_ms = u64::from(self.audio_out_latency_ms());
        base_samples + offset_ms * 32
    }

    /// Current drift estimate in samples
    pub fn drift_samples(&self) -> i32 {
        let local = self.capture.samples_emitted() as i64;
        let remote = self.remote_samples_processed as i64;
        let mut drift = remote - local;
        if self.config.reverse_drift {
            drift = -drift;
        }
        drift.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Analog level recommended by the gain controller
    pub fn analog_level(&self) -> u32 {
        self.processor.analog_level()
    }
}
