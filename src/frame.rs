use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TriggerError;

/// Supported PCM sample encodings for the ingest transport.
///
/// The byte width of every format is fixed at compile time; an unknown format
/// tag is rejected as a typed configuration error instead of failing at
/// runtime on a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    #[serde(rename = "S16_LE")]
    S16Le,
    #[serde(rename = "S32_LE")]
    S32Le,
    #[serde(rename = "FLOAT_LE")]
    FloatLe,
    #[serde(rename = "S24_3LE")]
    S24_3Le,
    #[serde(rename = "S24_LE")]
    S24Le,
}

impl SampleFormat {
    /// Bytes occupied by a single sample on the wire.
    pub const fn byte_width(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S32Le => 4,
            SampleFormat::FloatLe => 4,
            SampleFormat::S24_3Le => 3,
            SampleFormat::S24Le => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SampleFormat::S16Le => "S16_LE",
            SampleFormat::S32Le => "S32_LE",
            SampleFormat::FloatLe => "FLOAT_LE",
            SampleFormat::S24_3Le => "S24_3LE",
            SampleFormat::S24Le => "S24_LE",
        }
    }

    /// Decode raw little-endian PCM bytes into normalized f32 samples.
    ///
    /// A trailing partial sample (fewer bytes than `byte_width`) is dropped.
    pub fn decode(self, bytes: &[u8]) -> Vec<f32> {
        let width = self.byte_width();
        let complete = bytes.len() - bytes.len() % width;
        let chunks = bytes[..complete].chunks_exact(width);

        match self {
            SampleFormat::S16Le => chunks
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32_768.0)
                .collect(),
            SampleFormat::S32Le => chunks
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
                .collect(),
            SampleFormat::FloatLe => chunks
                .map(|c| bytemuck::pod_read_unaligned::<f32>(c))
                .collect(),
            SampleFormat::S24_3Le => chunks
                .map(|c| {
                    let raw = (c[2] as i8 as i32) << 16 | (c[1] as i32) << 8 | c[0] as i32;
                    raw as f32 / 8_388_608.0
                })
                .collect(),
            SampleFormat::S24Le => chunks
                .map(|c| {
                    // 24-bit sample LSB-aligned in a 32-bit word, padding byte ignored
                    let raw = i32::from_le_bytes([c[0], c[1], c[2], c[3]]) << 8 >> 8;
                    raw as f32 / 8_388_608.0
                })
                .collect(),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S16_LE" => Ok(SampleFormat::S16Le),
            "S32_LE" => Ok(SampleFormat::S32Le),
            "FLOAT_LE" => Ok(SampleFormat::FloatLe),
            "S24_3LE" => Ok(SampleFormat::S24_3Le),
            "S24_LE" => Ok(SampleFormat::S24Le),
            other => Err(TriggerError::config(
                "sample_format",
                format!("unknown sample format `{other}`"),
            )),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single frame of decoded audio as delivered by the transport.
///
/// Frames are immutable once created and carry the arrival sequence number
/// assigned by the sending side of the frame channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
