//! Audio playout buffer
//!
//! Decoded PCM is pushed in by the track reader and pulled out by the local
//! audio backend in fixed-size requests. Samples are interleaved stereo
//! `i16` at 48 kHz.

use parking_lot::Mutex;
use std::collections::VecDeque;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Samples per channel in one 10 ms frame
pub const SAMPLES_PER_FRAME: usize = 480;

/// Default capacity: one second of interleaved stereo
const DEFAULT_CAPACITY: usize = SAMPLE_RATE as usize * CHANNELS;

/// Ring buffer between the decoder and the audio-pull sink
///
/// When full, the oldest samples are dropped so playout latency stays bounded.
pub struct AudioPlayout {
    samples: Mutex<VecDeque<i16>>,
    capacity: usize,
}

impl AudioPlayout {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Queue decoded interleaved samples
    pub fn push(&self, pcm: &[i16]) {
        let mut samples = self.samples.lock();
        let incoming = if pcm.len() > self.capacity {
            &pcm[pcm.len() - self.capacity..]
        } else {
            pcm
        };
        let overflow = (samples.len() + incoming.len()).saturating_sub(self.capacity);
        samples.drain(..overflow);
        samples.extend(incoming.iter().copied());
    }

    /// Fill `out` from the buffer, padding the remainder with silence
    ///
    /// Returns how many buffered samples were copied.
    pub fn fill(&self, out: &mut [i16]) -> usize {
        let mut samples = self.samples.lock();
        let copied = out.len().min(samples.len());
        for (slot, sample) in out.iter_mut().zip(samples.drain(..copied)) {
            *slot = sample;
        }
        out[copied..].fill(0);
        copied
    }

    /// Interleaved samples needed for one 10 ms request
    pub fn frame_len() -> usize {
        SAMPLES_PER_FRAME * CHANNELS
    }

    pub fn buffered(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl Default for AudioPlayout {
    fn default() -> Self {
        Self::new()
    }
}
