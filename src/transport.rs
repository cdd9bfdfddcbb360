use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::frame::{AudioFrame, SampleFormat};

/// Outcome of one frame receive attempt.
#[derive(Debug)]
pub enum RecvOutcome {
    Frame(AudioFrame),
    /// The sending side is gone; no further frames will ever arrive.
    Closed,
    /// No frame arrived within the configured timeout.
    TimedOut,
}

/// Counters for transport-side monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportMetrics {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Producer half of the frame channel.
///
/// Lives on the transport I/O task. Frames are numbered here so the consumer
/// can assert arrival order. `try_send` drops the frame when the channel is
/// full; the sliding window's eviction is the retention contract, so excess
/// audio is lost rather than queued unbounded.
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    format: SampleFormat,
    next_sequence: u64,
    metrics: TransportMetrics,
}

impl FrameSender {
    /// Decode raw PCM bytes and send, waiting if the channel is full.
    pub async fn send_pcm(&mut self, bytes: &[u8]) -> Result<(), mpsc::error::SendError<AudioFrame>> {
        let frame = self.next_frame(self.format.decode(bytes));
        self.tx.send(frame).await?;
        self.metrics.frames_sent += 1;
        Ok(())
    }

    /// Send already-decoded samples, waiting if the channel is full.
    pub async fn send(&mut self, samples: Vec<f32>) -> Result<(), mpsc::error::SendError<AudioFrame>> {
        let frame = self.next_frame(samples);
        self.tx.send(frame).await?;
        self.metrics.frames_sent += 1;
        Ok(())
    }

    /// Send without waiting; a full channel drops the frame and counts it.
    /// Returns false when the frame was dropped or the receiver is gone.
    pub fn try_send(&mut self, samples: Vec<f32>) -> bool {
        let frame = self.next_frame(samples);
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.metrics.frames_sent += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.metrics.frames_dropped += 1;
                warn!(
                    "frame channel full, dropped frame {} ({} samples)",
                    frame.sequence,
                    frame.len()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    fn next_frame(&mut self, samples: Vec<f32>) -> AudioFrame {
        let frame = AudioFrame::new(samples, self.next_sequence);
        self.next_sequence += 1;
        frame
    }
}

/// Consumer half of the frame channel, owned by the pipeline task.
pub struct FrameReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    last_sequence: Option<u64>,
}

impl FrameReceiver {
    /// Wait for the next frame; `None` when the transport has closed.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        let frame = self.rx.recv().await?;
        self.check_order(&frame);
        Some(frame)
    }

    /// Wait for the next frame with an optional upper bound on the wait.
    pub async fn recv_timeout(&mut self, limit: Option<Duration>) -> RecvOutcome {
        match limit {
            None => match self.recv().await {
                Some(frame) => RecvOutcome::Frame(frame),
                None => RecvOutcome::Closed,
            },
            Some(duration) => match timeout(duration, self.rx.recv()).await {
                Err(_) => RecvOutcome::TimedOut,
                Ok(None) => RecvOutcome::Closed,
                Ok(Some(frame)) => {
                    self.check_order(&frame);
                    RecvOutcome::Frame(frame)
                }
            },
        }
    }

    fn check_order(&mut self, frame: &AudioFrame) {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                warn!(
                    "out-of-order frame: sequence {} after {}",
                    frame.sequence, last
                );
            } else if frame.sequence != last + 1 {
                debug!(
                    "sequence gap: {} dropped before frame {}",
                    frame.sequence - last - 1,
                    frame.sequence
                );
            }
        }
        self.last_sequence = Some(frame.sequence);
    }
}

/// Create the bounded single-producer/single-consumer frame channel between
/// the transport I/O task and the pipeline.
pub fn frame_channel(capacity: usize, format: SampleFormat) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FrameSender {
            tx,
            format,
            next_sequence: 0,
            metrics: TransportMetrics::default(),
        },
        FrameReceiver {
            rx,
            last_sequence: None,
        },
    )
}
