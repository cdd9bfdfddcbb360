use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::anyhow;
use log::debug;
use ndarray::Array2;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::ClassifierConfig;
use crate::error::{Result, TriggerError};
use crate::level::HighPassFilter;
use crate::window::SlidingWindow;

/// External sound-classification capability: waveform in, per-time-frame
/// per-class scores out.
///
/// The model itself is out of scope for this crate; deployments implement
/// this trait against their inference runtime and hand it to the
/// [`ClassificationAdapter`]. The returned matrix is `(time_frames, classes)`
/// and must have as many columns as the class map has names.
pub trait SoundClassifier: Send + Sync {
    fn classify(&self, waveform: &[f32]) -> anyhow::Result<Array2<f32>>;
}

/// Class-name table for the classifier, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ClassMap {
    names: Vec<String>,
}

impl ClassMap {
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load a `index,mid,display_name` CSV with a header row. Display names
    /// may be quoted and contain commas.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_csv(&text)
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut names = Vec::new();
        for line in text.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let after_index = line
                .split_once(',')
                .and_then(|(_, rest)| rest.split_once(','))
                .map(|(_, name)| name)
                .ok_or_else(|| {
                    TriggerError::Classifier(format!("malformed class map row: `{line}`"))
                })?;
            let name = after_index.trim().trim_matches('"').to_string();
            names.push(name);
        }
        if names.is_empty() {
            return Err(TriggerError::Classifier(
                "class map contains no classes".to_string(),
            ));
        }
        Ok(Self { names })
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Raw classifier output for one scan cycle.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    /// `(time_frames, classes)` scores.
    pub scores: Array2<f32>,
}

impl ClassificationResult {
    /// Per-class median across time frames.
    pub fn median_scores(&self) -> Vec<f32> {
        let frames = self.scores.nrows();
        if frames == 0 {
            return vec![0.0; self.scores.ncols()];
        }
        self.scores
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f32> = column.iter().copied().collect();
                values.sort_by(|a, b| a.total_cmp(b));
                if frames % 2 == 1 {
                    values[frames / 2]
                } else {
                    (values[frames / 2 - 1] + values[frames / 2]) / 2.0
                }
            })
            .collect()
    }
}

/// A ranked `(class name, score)` pair from one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub score: f32,
}

/// Format ranked tags the way they are logged: `name(score) name(score) ...`.
pub fn format_tags(tags: &[Tag]) -> String {
    let mut out = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{}({:.3})", tag.name, tag.score);
    }
    out
}

/// Prepares a waveform from the sliding window and invokes the external
/// classifier: snapshot, resample to the classifier's native rate, high-pass
/// filter, automatic gain, then `classify`.
pub struct ClassificationAdapter {
    classifier: Box<dyn SoundClassifier>,
    class_map: ClassMap,
    config: ClassifierConfig,
    ingest_rate: u32,
    highpass: Option<HighPassFilter>,
}

impl ClassificationAdapter {
    pub fn new(
        classifier: Box<dyn SoundClassifier>,
        class_map: ClassMap,
        config: ClassifierConfig,
        ingest_rate: u32,
    ) -> Result<Self> {
        let highpass = if config.cutoff_hz > 0.0 {
            Some(HighPassFilter::butterworth(
                config.cutoff_hz,
                config.sample_rate as f32,
            )?)
        } else {
            None
        };
        Ok(Self {
            classifier,
            class_map,
            config,
            ingest_rate,
            highpass,
        })
    }

    /// Patch window length in ingest-rate samples.
    pub fn patch_window_samples(&self) -> usize {
        (self.config.patch_window_seconds as f64 * self.ingest_rate as f64) as usize
    }

    pub fn class_map(&self) -> &ClassMap {
        &self.class_map
    }

    /// Build the classifier input waveform from the window.
    pub fn prepare(&self, window: &SlidingWindow) -> Result<Vec<f32>> {
        let mut waveform = window.snapshot(self.patch_window_samples());
        if self.ingest_rate != self.config.sample_rate {
            waveform = resample(&waveform, self.ingest_rate, self.config.sample_rate)?;
        }
        if let Some(highpass) = &self.highpass {
            waveform = highpass.apply(&waveform);
        }
        if self.config.max_gain_db > 0.0 {
            apply_auto_gain(&mut waveform, self.config.max_gain_db);
        }
        Ok(waveform)
    }

    /// Run the full preparation pipeline and the external classifier.
    pub fn classify_window(&self, window: &SlidingWindow) -> Result<ClassificationResult> {
        let waveform = self.prepare(window)?;
        debug!(
            "classifying {} samples at {} Hz",
            waveform.len(),
            self.config.sample_rate
        );
        let scores = self
            .classifier
            .classify(&waveform)
            .map_err(|e| TriggerError::Classifier(e.to_string()))?;
        if scores.ncols() != self.class_map.len() {
            return Err(TriggerError::Classifier(format!(
                "classifier returned {} classes, class map has {}",
                scores.ncols(),
                self.class_map.len()
            )));
        }
        Ok(ClassificationResult { scores })
    }

    /// Reduce a result to its top-K ranked tags.
    pub fn rank(&self, result: &ClassificationResult) -> Vec<Tag> {
        let medians = result.median_scores();
        let mut order: Vec<usize> = (0..medians.len()).collect();
        order.sort_by(|&a, &b| medians[b].total_cmp(&medians[a]));
        order
            .into_iter()
            .take(self.config.top_k)
            .filter_map(|i| {
                self.class_map.name(i).map(|name| Tag {
                    name: name.to_string(),
                    score: medians[i],
                })
            })
            .collect()
    }
}

/// Minimal built-in capability scoring broadband energy per 100 ms frame
/// into three classes: `Silence`, `Ambient noise` and `Loud event`.
///
/// This exists so the service can be wired end to end without external model
/// weights; real deployments implement [`SoundClassifier`] against an actual
/// inference runtime.
pub struct EnergyClassifier {
    frame_samples: usize,
}

impl EnergyClassifier {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frame_samples: (sample_rate / 10).max(1) as usize,
        }
    }

    pub fn class_map() -> ClassMap {
        ClassMap::from_names(vec![
            "Silence".to_string(),
            "Ambient noise".to_string(),
            "Loud event".to_string(),
        ])
    }
}

impl SoundClassifier for EnergyClassifier {
    fn classify(&self, waveform: &[f32]) -> anyhow::Result<Array2<f32>> {
        if waveform.is_empty() {
            return Err(anyhow!("classifier input waveform is empty"));
        }
        let chunks: Vec<&[f32]> = waveform.chunks(self.frame_samples).collect();
        let mut scores = Array2::zeros((chunks.len(), 3));
        for (i, chunk) in chunks.iter().enumerate() {
            let rms =
                (chunk.iter().map(|&s| s * s).sum::<f32>() / chunk.len() as f32).sqrt();
            let loud = (rms * 4.0).clamp(0.0, 1.0);
            let silence = (1.0 - rms * 100.0).clamp(0.0, 1.0);
            scores[[i, 0]] = silence;
            scores[[i, 1]] = (1.0 - silence - loud).clamp(0.0, 1.0);
            scores[[i, 2]] = loud;
        }
        Ok(scores)
    }
}

/// Peak-normalizing gain capped at `max_gain_db`, applied with the
/// `10^(gain/10)` convention. A silent waveform skips gain entirely rather
/// than dividing by zero.
fn apply_auto_gain(waveform: &mut [f32], max_gain_db: f32) {
    let peak = waveform.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
    if peak <= 0.0 {
        debug!("silent waveform, skipping gain normalization");
        return;
    }
    let gain_db = (10.0 * (1.0 / peak).log10()).min(max_gain_db);
    let scale = 10f32.powf(gain_db / 10.0);
    for sample in waveform.iter_mut() {
        *sample *= scale;
    }
}

/// One-shot sinc resample of a whole waveform between the ingest rate and
/// the classifier's native rate.
fn resample(waveform: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if waveform.is_empty() {
        return Ok(Vec::new());
    }
    let parameters = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::Blackman2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        parameters,
        waveform.len(),
        1,
    )
    .map_err(|e| TriggerError::Resample(e.to_string()))?;
    let mut channels = resampler
        .process(&[waveform], None)
        .map_err(|e| TriggerError::Resample(e.to_string()))?;
    Ok(channels.remove(0))
}
