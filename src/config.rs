use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriggerError};
use crate::frame::SampleFormat;

/// Time, quota and level policy deciding whether detection runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Absolute activation window start.
    pub date_start: DateTime<Utc>,
    /// Absolute activation window end; detection is permanently disabled once
    /// the current time passes this instant.
    pub date_end: DateTime<Utc>,
    /// Optional daily window start as local wall-clock `"HH:MM"`.
    pub start_hour: Option<String>,
    /// Optional daily window end as local wall-clock `"HH:MM"`.
    pub end_hour: Option<String>,
    /// Trigger quota; `remaining_triggers` is reset to this at day rollover.
    pub trigger_quota: u32,
    /// Seconds of unprocessed audio to accumulate before a level scan.
    pub scan_interval: f64,
    /// Minimum Leq in dB for a scan to proceed to classification.
    pub min_leq: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            date_start: DateTime::UNIX_EPOCH,
            date_end: DateTime::<Utc>::MAX_UTC,
            start_hour: None,
            end_hour: None,
            trigger_quota: 10,
            scan_interval: 0.96, // one classifier patch window
            min_leq: 30.0,
        }
    }
}

/// Preparation parameters for the external classifier capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Native sample rate the classifier expects.
    pub sample_rate: u32,
    /// Fixed-duration waveform segment the classifier expects, in seconds.
    pub patch_window_seconds: f32,
    /// High-pass cutoff applied before classification; disabled when <= 0.
    pub cutoff_hz: f32,
    /// Cap on automatic gain normalization in dB; disabled when <= 0.
    pub max_gain_db: f32,
    /// Number of ranked tags reported per classification.
    pub top_k: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            patch_window_seconds: 0.96,
            cutoff_hz: 100.0,
            max_gain_db: 20.0,
            top_k: 5,
        }
    }
}

/// Immutable configuration for the whole trigger pipeline.
///
/// Loaded and validated once at startup; the core never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Ingest sample rate in Hz.
    pub sample_rate: u32,
    /// PCM encoding of frames on the transport.
    pub sample_format: SampleFormat,
    /// Length of a capture in seconds.
    pub total_length: f64,
    /// Seconds of audio retained before a trigger; also the post-capture
    /// cooldown duration.
    pub cached_length: f64,
    /// Microphone sensitivity in dBFS at 94 dB / 1 kHz.
    pub sensitivity: f64,
    /// Frame channel capacity between the transport task and the pipeline.
    pub channel_capacity: usize,
    /// Timeout on the blocking frame receive in milliseconds; `None` waits
    /// indefinitely.
    pub receive_timeout_ms: Option<u64>,
    pub gate: GateConfig,
    pub classifier: ClassifierConfig,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            sample_format: SampleFormat::FloatLe,
            total_length: 10.0,
            cached_length: 5.0,
            sensitivity: -28.34,
            channel_capacity: 64,
            receive_timeout_ms: Some(10_000),
            gate: GateConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl TriggerConfig {
    /// Validate the configuration surface, returning the first violation as a
    /// typed configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(TriggerError::config("sample_rate", "must be positive"));
        }
        if self.total_length <= 0.0 {
            return Err(TriggerError::config("total_length", "must be positive"));
        }
        if self.cached_length < 0.0 {
            return Err(TriggerError::config("cached_length", "must not be negative"));
        }
        if self.channel_capacity == 0 {
            return Err(TriggerError::config("channel_capacity", "must be positive"));
        }
        if self.gate.scan_interval <= 0.0 {
            return Err(TriggerError::config("gate.scan_interval", "must be positive"));
        }
        if self.gate.date_end <= self.gate.date_start {
            return Err(TriggerError::config(
                "gate.date_end",
                "must be after gate.date_start",
            ));
        }
        if let Some(hour) = &self.gate.start_hour {
            parse_hour("gate.start_hour", hour)?;
        }
        if let Some(hour) = &self.gate.end_hour {
            parse_hour("gate.end_hour", hour)?;
        }
        if self.classifier.sample_rate == 0 {
            return Err(TriggerError::config("classifier.sample_rate", "must be positive"));
        }
        if self.classifier.patch_window_seconds <= 0.0 {
            return Err(TriggerError::config(
                "classifier.patch_window_seconds",
                "must be positive",
            ));
        }
        if self.classifier.cutoff_hz > 0.0
            && self.classifier.cutoff_hz >= self.classifier.sample_rate as f32 / 2.0
        {
            return Err(TriggerError::config(
                "classifier.cutoff_hz",
                "must be below the classifier Nyquist frequency",
            ));
        }
        if self.classifier.top_k == 0 {
            return Err(TriggerError::config("classifier.top_k", "must be positive"));
        }
        Ok(())
    }

    /// Samples a full capture drains from the window: `total_length * rate`.
    pub fn capture_samples(&self) -> usize {
        (self.total_length * self.sample_rate as f64) as usize
    }

    /// Retention bound on the sliding window, in samples.
    pub fn retention_samples(&self) -> usize {
        let seconds = self
            .cached_length
            .max(self.classifier.patch_window_seconds as f64);
        (seconds * self.sample_rate as f64) as usize
    }

    /// Unprocessed-sample count at which a level scan runs.
    pub fn scan_threshold_samples(&self) -> usize {
        (self.gate.scan_interval * self.sample_rate as f64) as usize
    }

    /// Classifier patch window expressed in ingest-rate samples.
    pub fn patch_window_samples(&self) -> usize {
        (self.classifier.patch_window_seconds as f64 * self.sample_rate as f64) as usize
    }
}

/// Parse a `"HH:MM"` wall-clock string into (hour, minute).
pub(crate) fn parse_hour(field: &str, value: &str) -> Result<(u32, u32)> {
    let invalid = || TriggerError::config(field, format!("`{value}` is not a valid HH:MM time"));
    let (h, m) = value.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}
