use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Datelike, Local, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::classify::{format_tags, ClassificationAdapter, Tag};
use crate::config::{GateConfig, TriggerConfig};
use crate::export::{encode_ogg_vorbis, EncryptedAudioSink, SecureExporter};
use crate::frame::AudioFrame;
use crate::gate::Gate;
use crate::level::LevelMeter;
use crate::transport::{FrameReceiver, RecvOutcome};
use crate::window::SlidingWindow;

/// Closed set of pipeline states.
///
/// Detection also stops permanently once the gate's deactivation deadline
/// passes; that absorbing condition is checked every loop iteration
/// independently of the two named states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerState {
    WaitTrigger,
    Record,
}

/// Decides whether a qualifying scan (Leq above threshold, classification
/// available) transitions the pipeline into a capture.
///
/// Exposed as a trait so the decision is an explicit, testable function
/// rather than a hard-coded always-record or never-record.
pub trait TriggerPolicy: Send {
    fn should_record(&self, leq: f64, tags: &[Tag], gate: &GateConfig) -> bool;
}

/// Records whenever the top-ranked tag scores at or above a threshold.
/// The default threshold of zero records on every qualifying scan.
#[derive(Debug, Clone, Default)]
pub struct ScoreThresholdPolicy {
    pub min_top_score: f32,
}

impl TriggerPolicy for ScoreThresholdPolicy {
    fn should_record(&self, _leq: f64, tags: &[Tag], _gate: &GateConfig) -> bool {
        tags.first().map_or(false, |tag| tag.score >= self.min_top_score)
    }
}

/// Never captures; scans are evaluated and tags logged only. Useful for
/// calibration runs before a deployment goes live.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyPolicy;

impl TriggerPolicy for LogOnlyPolicy {
    fn should_record(&self, _leq: f64, _tags: &[Tag], _gate: &GateConfig) -> bool {
        false
    }
}

/// Accumulator for the samples drained from the window during a capture.
struct CaptureSegment {
    samples: Vec<f32>,
    remaining: usize,
}

impl CaptureSegment {
    fn new(total_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(total_samples),
            remaining: total_samples,
        }
    }

    fn extend(&mut self, chunk: Vec<f32>) {
        debug_assert!(chunk.len() <= self.remaining);
        self.remaining -= chunk.len();
        self.samples.extend(chunk);
    }

    fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

enum CaptureOutcome {
    Exported,
    /// Transport closed before the segment filled; partial audio discarded.
    Aborted,
}

/// Counters exposed for monitoring the pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerStatistics {
    pub frames_received: u64,
    pub scans_completed: u64,
    pub classifications_run: u64,
    pub triggers_fired: u64,
    pub captures_exported: u64,
    pub captures_aborted: u64,
    pub last_leq: Option<f64>,
}

/// Orchestrates the wait/capture cycle: window maintenance, periodic Leq
/// scans, gated classification, capture draining and secure export.
///
/// Owns the sliding window, gate and state exclusively; all mutation happens
/// on the single pipeline task.
pub struct TriggerProcessor {
    config: TriggerConfig,
    window: SlidingWindow,
    gate: Gate,
    meter: LevelMeter,
    adapter: ClassificationAdapter,
    policy: Box<dyn TriggerPolicy>,
    exporter: SecureExporter,
    sinks: Vec<Box<dyn EncryptedAudioSink>>,
    state: TriggerState,
    unprocessed_samples: usize,
    last_day_of_year: u32,
    retention_stopped: bool,
    stats: TriggerStatistics,
}

impl TriggerProcessor {
    pub fn new(
        config: TriggerConfig,
        adapter: ClassificationAdapter,
        exporter: SecureExporter,
        policy: Box<dyn TriggerPolicy>,
        sinks: Vec<Box<dyn EncryptedAudioSink>>,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        let gate = Gate::new(config.gate.clone())?;
        let meter = LevelMeter::new(config.sensitivity);
        let window = SlidingWindow::new(config.retention_samples());
        Ok(Self {
            config,
            window,
            gate,
            meter,
            adapter,
            policy,
            exporter,
            sinks,
            state: TriggerState::WaitTrigger,
            unprocessed_samples: 0,
            last_day_of_year: Local::now().ordinal(),
            retention_stopped: false,
            stats: TriggerStatistics::default(),
        })
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn statistics(&self) -> &TriggerStatistics {
        &self.stats
    }

    pub fn remaining_triggers(&self) -> u32 {
        self.gate.remaining_triggers()
    }

    /// Run the pipeline until the transport closes or `shutdown` fires.
    pub async fn run(
        &mut self,
        mut frames: FrameReceiver,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            "trigger processor started: {} Hz {}, retention {} samples, scan every {} samples",
            self.config.sample_rate,
            self.config.sample_format,
            self.window.retention_samples(),
            self.config.scan_threshold_samples()
        );

        loop {
            self.observe_day_rollover(Local::now());

            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping pipeline");
                    return Ok(());
                }
                outcome = frames.recv_timeout(self.receive_timeout()) => match outcome {
                    RecvOutcome::Closed => {
                        info!("transport closed, stopping pipeline");
                        return Ok(());
                    }
                    RecvOutcome::TimedOut => {
                        warn!("no frame received within the receive timeout");
                        continue;
                    }
                    RecvOutcome::Frame(frame) => frame,
                },
            };

            let now = Local::now();
            if self.gate.expired(&now) {
                // Absorbing condition: drop the frame, stop retaining audio,
                // keep draining the transport so the producer is never stuck.
                if !self.retention_stopped {
                    info!("activation window ended, detection permanently disabled");
                    self.window.clear();
                    self.retention_stopped = true;
                }
                continue;
            }

            self.stats.frames_received += 1;
            self.unprocessed_samples += frame.len();
            self.window.append(frame);

            if self.unprocessed_samples < self.config.scan_threshold_samples()
                || !self.gate.is_active(&now)
            {
                continue;
            }
            self.unprocessed_samples = 0;

            if let Some(trigger_time) = self.scan() {
                self.state = TriggerState::Record;
                let capture = CaptureSegment::new(self.config.capture_samples());
                let outcome = self
                    .run_capture(&mut frames, capture, trigger_time, &shutdown)
                    .await?;
                self.state = TriggerState::WaitTrigger;
                if matches!(outcome, CaptureOutcome::Aborted) {
                    info!("transport closed mid-capture, stopping pipeline");
                    return Ok(());
                }
            }
        }
    }

    /// One level scan: Leq over the newest patch window, then classification
    /// and the record decision when the level qualifies. Returns the trigger
    /// timestamp when a capture should start.
    fn scan(&mut self) -> Option<DateTime<Utc>> {
        let recent = self.window.recent(self.config.patch_window_samples());
        let leq = match self.meter.leq(&recent) {
            Some(leq) => leq,
            None => {
                debug!("Leq undefined over {} samples, skipping scan", recent.len());
                return None;
            }
        };
        self.stats.scans_completed += 1;
        self.stats.last_leq = Some(leq);
        info!("Leq: {leq:.2} dB");

        if leq < self.config.gate.min_leq {
            return None;
        }

        let started = Instant::now();
        let result = match self.adapter.classify_window(&self.window) {
            Ok(result) => result,
            Err(e) => {
                warn!("classification failed, skipping cycle: {e}");
                return None;
            }
        };
        self.stats.classifications_run += 1;
        let tags = self.adapter.rank(&result);
        info!(
            "tags: {} in {:.3} seconds",
            format_tags(&tags),
            started.elapsed().as_secs_f64()
        );

        if !self.policy.should_record(leq, &tags, self.gate.config()) {
            return None;
        }
        self.gate.consume_trigger();
        self.stats.triggers_fired += 1;
        let trigger_time = Utc::now();
        info!(
            "capture triggered at {trigger_time}, {} triggers remaining",
            self.gate.remaining_triggers()
        );
        Some(trigger_time)
    }

    /// Drain the window (and subsequent frames) into the capture, then
    /// encode, encrypt and deliver it. Only one capture is ever in flight.
    async fn run_capture(
        &mut self,
        frames: &mut FrameReceiver,
        mut capture: CaptureSegment,
        trigger_time: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<CaptureOutcome> {
        while !capture.is_complete() {
            self.observe_day_rollover(Local::now());

            let chunk = self.window.drain(capture.remaining);
            if !chunk.is_empty() {
                capture.extend(chunk);
                continue;
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(
                        "shutdown during capture, discarding {} samples",
                        capture.samples.len()
                    );
                    self.stats.captures_aborted += 1;
                    return Ok(CaptureOutcome::Aborted);
                }
                outcome = frames.recv_timeout(self.receive_timeout()) => outcome,
            };
            match outcome {
                RecvOutcome::Frame(frame) => {
                    self.stats.frames_received += 1;
                    self.window.append(frame);
                }
                RecvOutcome::Closed => {
                    warn!(
                        "transport closed mid-capture, discarding {} samples",
                        capture.samples.len()
                    );
                    self.stats.captures_aborted += 1;
                    return Ok(CaptureOutcome::Aborted);
                }
                RecvOutcome::TimedOut => {
                    warn!("no frame received during capture within the receive timeout");
                }
            }
        }

        let encoding_start = Instant::now();
        let encoded = encode_ogg_vorbis(&capture.samples, self.config.sample_rate, 1)?;
        let payload = self.exporter.encrypt(&encoded)?;
        info!(
            "capture: {} raw samples, {} bytes ogg, {} bytes encrypted in {:.3} seconds, {} triggers remaining",
            capture.samples.len(),
            encoded.len(),
            payload.len(),
            encoding_start.elapsed().as_secs_f64(),
            self.gate.remaining_triggers()
        );
        for sink in &self.sinks {
            sink.deliver(trigger_time, &payload);
        }
        self.stats.captures_exported += 1;

        // The window is reset after a capture and the cooldown lets it
        // refill, so the next scan never re-triggers on stale audio.
        self.window.clear();
        self.unprocessed_samples = 0;
        let cooldown = Duration::from_secs_f64(self.config.cached_length);
        debug!("cooldown for {:.1} seconds", cooldown.as_secs_f64());
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(cooldown) => {}
        }

        Ok(CaptureOutcome::Exported)
    }

    fn observe_day_rollover(&mut self, now: DateTime<Local>) {
        let day = now.ordinal();
        if day != self.last_day_of_year {
            self.last_day_of_year = day;
            self.gate.on_day_rollover();
        }
    }

    fn receive_timeout(&self) -> Option<Duration> {
        self.config.receive_timeout_ms.map(Duration::from_millis)
    }
}
