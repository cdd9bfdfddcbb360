use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::error::{Result, TriggerError};

// Q values of the two second-order sections of a 4th-order Butterworth
// cascade: 1/(2*cos(pi/8)) and 1/(2*cos(3*pi/8)).
const BUTTERWORTH_4TH_ORDER_Q: [f32; 2] = [0.541_196_1, 1.306_563_0];

/// 4th-order Butterworth high-pass, realized as a cascade of second-order
/// sections for numerical stability.
///
/// Each [`HighPassFilter::apply`] call runs the cascade from zero state, so
/// no filter state carries over between scan cycles.
pub struct HighPassFilter {
    sections: Vec<Coefficients<f32>>,
}

impl HighPassFilter {
    pub fn butterworth(cutoff_hz: f32, sample_rate_hz: f32) -> Result<Self> {
        let sections = BUTTERWORTH_4TH_ORDER_Q
            .iter()
            .map(|&q| {
                Coefficients::<f32>::from_params(
                    Type::HighPass,
                    sample_rate_hz.hz(),
                    cutoff_hz.hz(),
                    q,
                )
                .map_err(|e| TriggerError::Filter(format!("{e:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sections })
    }

    pub fn apply(&self, samples: &[f32]) -> Vec<f32> {
        let mut out = samples.to_vec();
        for coefficients in &self.sections {
            let mut section = DirectForm2Transposed::<f32>::new(*coefficients);
            for sample in out.iter_mut() {
                *sample = section.run(*sample);
            }
        }
        out
    }
}

/// Computes the equivalent continuous sound level (Leq) of a waveform
/// relative to a reference pressure derived from microphone sensitivity.
pub struct LevelMeter {
    reference_pressure: f64,
}

impl LevelMeter {
    /// `sensitivity` is the microphone sensitivity in dBFS at 94 dB / 1 kHz.
    pub fn new(sensitivity: f64) -> Self {
        Self {
            reference_pressure: 1.0 / 10f64.powf((94.0 - sensitivity) / 20.0),
        }
    }

    pub fn reference_pressure(&self) -> f64 {
        self.reference_pressure
    }

    /// Leq in dB: `10*log10(mean((s / reference_pressure)^2))`.
    ///
    /// Returns `None` for an empty waveform or one with zero energy, where
    /// the logarithm is undefined; callers skip the scan cycle in that case.
    pub fn leq(&self, samples: &[f32]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples
            .iter()
            .map(|&s| (s as f64 / self.reference_pressure).powi(2))
            .sum();
        if sum <= 0.0 {
            return None;
        }
        Some(10.0 * (sum / samples.len() as f64).log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, amplitude: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate;
                amplitude * phase.sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_leq_guards_empty_and_silent_input() {
        let meter = LevelMeter::new(-28.34);
        assert!(meter.leq(&[]).is_none());
        assert!(meter.leq(&vec![0.0; 48_000]).is_none());
    }

    #[test]
    fn test_leq_matches_closed_form_at_full_scale() {
        // A constant full-scale signal has mean square (1/p_ref)^2, so
        // Leq = 20*log10(1/p_ref) = 94 - sensitivity.
        let sensitivity = -28.34;
        let meter = LevelMeter::new(sensitivity);
        let samples = vec![1.0f32; 48_000];
        let leq = meter.leq(&samples).unwrap();
        let expected = 94.0 - sensitivity;
        assert!(
            ((leq - expected) / expected).abs() < 1e-6,
            "leq {leq} vs expected {expected}"
        );
    }

    #[test]
    fn test_leq_monotonic_in_amplitude() {
        let meter = LevelMeter::new(-28.34);
        let mut previous = f64::NEG_INFINITY;
        for amplitude in [0.001f32, 0.01, 0.1, 0.5, 1.0] {
            let samples = sine(1_000.0, amplitude, 48_000.0, 48_000);
            let leq = meter.leq(&samples).unwrap();
            assert!(leq > previous, "{leq} not above {previous}");
            previous = leq;
        }
    }

    #[test]
    fn test_highpass_attenuates_low_passes_high() {
        let filter = HighPassFilter::butterworth(100.0, 16_000.0).unwrap();

        let low = sine(10.0, 0.5, 16_000.0, 16_000);
        let filtered_low = filter.apply(&low);
        assert!(rms(&filtered_low) < rms(&low) * 0.1);

        let high = sine(2_000.0, 0.5, 16_000.0, 16_000);
        let filtered_high = filter.apply(&high);
        let ratio = rms(&filtered_high) / rms(&high);
        assert!(ratio > 0.9 && ratio < 1.1, "passband ratio {ratio}");
    }

    #[test]
    fn test_highpass_rejects_cutoff_above_nyquist() {
        assert!(HighPassFilter::butterworth(9_000.0, 16_000.0).is_err());
    }

    #[test]
    fn test_filter_is_stateless_between_calls() {
        let filter = HighPassFilter::butterworth(100.0, 16_000.0).unwrap();
        let signal = sine(2_000.0, 0.5, 16_000.0, 4_000);
        assert_eq!(filter.apply(&signal), filter.apply(&signal));
    }
}
