use std::collections::VecDeque;

use log::debug;

use crate::frame::AudioFrame;

/// Bounded FIFO of recently received audio frames.
///
/// The retention invariant: the total number of retained samples never
/// exceeds `retention_samples + len(newest_frame)`. Whole frames are evicted
/// from the front once the newest frame is appended and the bound is
/// exceeded; frames are only ever split during [`SlidingWindow::drain`].
pub struct SlidingWindow {
    frames: VecDeque<AudioFrame>,
    total_samples: usize,
    retention_samples: usize,
}

impl SlidingWindow {
    pub fn new(retention_samples: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            total_samples: 0,
            retention_samples,
        }
    }

    /// Append a frame, evicting whole frames from the front until the
    /// retention invariant holds again. Amortized O(1).
    pub fn append(&mut self, frame: AudioFrame) {
        let newest_len = frame.len();
        self.total_samples += newest_len;
        self.frames.push_back(frame);

        let bound = self.retention_samples + newest_len;
        while self.total_samples > bound {
            match self.frames.pop_front() {
                Some(oldest) => {
                    self.total_samples -= oldest.len();
                    debug!(
                        "evicted frame {} ({} samples), {} retained",
                        oldest.sequence,
                        oldest.len(),
                        self.total_samples
                    );
                }
                None => break,
            }
        }
    }

    /// Pop up to `n` samples from the oldest end, splitting the oldest frame
    /// when its length exceeds the remaining quota. Returns fewer than `n`
    /// samples only when the buffer is exhausted.
    pub fn drain(&mut self, n: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(n.min(self.total_samples));
        while out.len() < n {
            let Some(mut frame) = self.frames.pop_front() else {
                break;
            };
            let need = n - out.len();
            if frame.len() <= need {
                self.total_samples -= frame.len();
                out.append(&mut frame.samples);
            } else {
                out.extend(frame.samples.drain(..need));
                self.total_samples -= need;
                self.frames.push_front(frame);
            }
        }
        out
    }

    /// Build a fixed-length waveform of exactly `n` samples by copying from
    /// the newest frame backward. When the buffer holds fewer than `n`
    /// samples the unfilled prefix stays zero. Does not mutate the buffer.
    pub fn snapshot(&self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; n];
        let mut last_index = n;
        for frame in self.frames.iter().rev() {
            if last_index == 0 {
                break;
            }
            let samples = &frame.samples;
            if samples.len() >= last_index {
                out[..last_index].copy_from_slice(&samples[samples.len() - last_index..]);
                last_index = 0;
            } else {
                out[last_index - samples.len()..last_index].copy_from_slice(samples);
                last_index -= samples.len();
            }
        }
        out
    }

    /// The newest `min(n, sample_count)` samples in order, without zero
    /// filling. This is the view the level meter averages over.
    pub fn recent(&self, n: usize) -> Vec<f32> {
        let take = n.min(self.total_samples);
        let mut parts: Vec<&[f32]> = Vec::new();
        let mut needed = take;
        for frame in self.frames.iter().rev() {
            if needed == 0 {
                break;
            }
            let samples = frame.samples.as_slice();
            if samples.len() >= needed {
                parts.push(&samples[samples.len() - needed..]);
                needed = 0;
            } else {
                parts.push(samples);
                needed -= samples.len();
            }
        }
        let mut out = Vec::with_capacity(take);
        for part in parts.iter().rev() {
            out.extend_from_slice(part);
        }
        out
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.total_samples = 0;
    }

    pub fn sample_count(&self) -> usize {
        self.total_samples
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn retention_samples(&self) -> usize {
        self.retention_samples
    }
}
