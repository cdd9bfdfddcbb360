//! Streaming acoustic-event trigger.
//!
//! Ingests PCM audio frames from an external transport through a bounded
//! in-order channel, maintains a bounded sliding window of recent audio,
//! periodically computes the equivalent continuous sound level (Leq), gates
//! detection by time/quota policy, invokes an external sound classifier on
//! demand, and on a qualifying event captures, encodes and encrypts an audio
//! segment for delivery.

pub mod classify;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod gate;
pub mod level;
pub mod transport;
pub mod trigger;
pub mod window;

#[cfg(test)]
pub mod tests;

pub use classify::{
    format_tags, ClassMap, ClassificationAdapter, ClassificationResult, EnergyClassifier,
    SoundClassifier, Tag,
};
pub use config::{ClassifierConfig, GateConfig, TriggerConfig};
pub use error::{Result, TriggerError};
pub use export::{
    encode_ogg_vorbis, EncryptedAudioSink, EncryptedPayload, FileSink, SecureExporter,
};
pub use frame::{AudioFrame, SampleFormat};
pub use gate::Gate;
pub use level::{HighPassFilter, LevelMeter};
pub use transport::{frame_channel, FrameReceiver, FrameSender, RecvOutcome, TransportMetrics};
pub use trigger::{
    LogOnlyPolicy, ScoreThresholdPolicy, TriggerPolicy, TriggerProcessor, TriggerState,
    TriggerStatistics,
};
pub use window::SlidingWindow;
