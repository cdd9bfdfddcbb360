use std::fs;
use std::num::{NonZeroU32, NonZeroU8};
use std::path::{Path, PathBuf};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, Utc};
use log::{error, info};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

use crate::error::{Result, TriggerError};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

const AES_KEY_LEN: usize = 16;
const AES_IV_LEN: usize = 16;

/// Encrypted capture ready for delivery. Opaque bytes:
/// `RSA-OAEP(aes_key || iv) || AES-128-CBC(PKCS#7-padded plaintext)`.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    bytes: Vec<u8>,
}

impl EncryptedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode raw samples into a lossily compressed Ogg Vorbis container.
///
/// Multi-channel input is interleaved sample-major, the usual PCM layout.
pub fn encode_ogg_vorbis(samples: &[f32], sample_rate: u32, channels: u8) -> Result<Vec<u8>> {
    let rate = NonZeroU32::new(sample_rate)
        .ok_or_else(|| TriggerError::Encode("sample rate must be non-zero".to_string()))?;
    let channel_count = NonZeroU8::new(channels)
        .ok_or_else(|| TriggerError::Encode("channel count must be non-zero".to_string()))?;
    if samples.is_empty() {
        return Err(TriggerError::Encode("no samples to encode".to_string()));
    }

    let n_channels = channels as usize;
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(samples.len() / n_channels); n_channels];
    for (i, &sample) in samples.iter().enumerate() {
        planes[i % n_channels].push(sample);
    }

    let mut builder = VorbisEncoderBuilder::new(rate, channel_count, Vec::new())
        .map_err(|e| TriggerError::Encode(e.to_string()))?;
    builder.bitrate_management_strategy(VorbisBitrateManagementStrategy::QualityVbr {
        target_quality: 0.5,
    });
    let mut encoder = builder
        .build()
        .map_err(|e| TriggerError::Encode(e.to_string()))?;

    let blocks: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
    encoder
        .encode_audio_block(&blocks)
        .map_err(|e| TriggerError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| TriggerError::Encode(e.to_string()))
}

/// Hybrid encryptor for captured audio.
///
/// The RSA public key is parsed once at startup; an unreadable or unparsable
/// key is a fatal configuration error, so captures can never silently fail
/// at encryption time.
pub struct SecureExporter {
    public_key: RsaPublicKey,
}

impl SecureExporter {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| TriggerError::KeyLoad(e.to_string()))?;
        Ok(Self { public_key })
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path)
            .map_err(|e| TriggerError::KeyLoad(format!("{}: {e}", path.display())))?;
        Self::from_pem(&pem)
    }

    /// Encrypt a capture: fresh AES-128 key and IV per payload, wrapped
    /// together under RSA-OAEP(SHA-256), followed by the AES-CBC ciphertext
    /// with PKCS#7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let mut aes_key = [0u8; AES_KEY_LEN];
        let mut iv = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut aes_key);
        OsRng.fill_bytes(&mut iv);

        let mut key_and_iv = [0u8; AES_KEY_LEN + AES_IV_LEN];
        key_and_iv[..AES_KEY_LEN].copy_from_slice(&aes_key);
        key_and_iv[AES_KEY_LEN..].copy_from_slice(&iv);

        let mut bytes = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key_and_iv)
            .map_err(|e| TriggerError::Encrypt(e.to_string()))?;

        let ciphertext = Aes128CbcEnc::new(&aes_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        bytes.extend_from_slice(&ciphertext);

        Ok(EncryptedPayload { bytes })
    }
}

/// Destination for encrypted captures. Zero or more sinks are invoked with
/// each payload and the observation timestamp of the trigger.
pub trait EncryptedAudioSink: Send {
    fn deliver(&self, trigger_time: DateTime<Utc>, payload: &EncryptedPayload);
}

/// Sink writing each payload to a timestamped file in a directory.
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }
}

impl EncryptedAudioSink for FileSink {
    fn deliver(&self, trigger_time: DateTime<Utc>, payload: &EncryptedPayload) {
        let name = format!("capture_{}.ogg.enc", trigger_time.format("%Y%m%dT%H%M%S%3fZ"));
        let path = self.directory.join(name);
        match fs::write(&path, payload.as_bytes()) {
            Ok(()) => info!("wrote {} bytes to {}", payload.len(), path.display()),
            Err(e) => error!("failed to write capture to {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockDecryptMut;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;

    type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

    fn test_keypair() -> (RsaPrivateKey, String) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        use rsa::pkcs8::EncodePublicKey;
        let pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();
        (private_key, pem)
    }

    fn decrypt(private_key: &RsaPrivateKey, payload: &EncryptedPayload) -> Vec<u8> {
        let rsa_len = private_key.size();
        let bytes = payload.as_bytes();
        let key_and_iv = private_key
            .decrypt(Oaep::new::<Sha256>(), &bytes[..rsa_len])
            .unwrap();
        assert_eq!(key_and_iv.len(), AES_KEY_LEN + AES_IV_LEN);
        let (aes_key, iv) = key_and_iv.split_at(AES_KEY_LEN);
        let mut key = [0u8; AES_KEY_LEN];
        key.copy_from_slice(aes_key);
        let mut iv_arr = [0u8; AES_IV_LEN];
        iv_arr.copy_from_slice(iv);
        Aes128CbcDec::new(&key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes[rsa_len..])
            .unwrap()
    }

    #[test]
    fn test_encrypt_round_trip_unaligned_and_aligned() {
        let (private_key, pem) = test_keypair();
        let exporter = SecureExporter::from_pem(&pem).unwrap();

        // unaligned to the 16-byte AES block
        let plaintext: Vec<u8> = (0..1_000u32).map(|i| (i % 251) as u8).collect();
        let payload = exporter.encrypt(&plaintext).unwrap();
        assert_eq!(decrypt(&private_key, &payload), plaintext);

        // aligned, where zero padding would be ambiguous but PKCS#7 is not
        let mut aligned = vec![7u8; 4_096];
        aligned[4_095] = 0;
        let payload = exporter.encrypt(&aligned).unwrap();
        assert_eq!(decrypt(&private_key, &payload), aligned);

        // fresh key and IV per payload: same plaintext, different bytes
        let a = exporter.encrypt(&plaintext).unwrap();
        let b = exporter.encrypt(&plaintext).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_bad_key_is_fatal() {
        assert!(matches!(
            SecureExporter::from_pem("not a pem"),
            Err(TriggerError::KeyLoad(_))
        ));
        assert!(matches!(
            SecureExporter::from_pem_file(Path::new("/nonexistent/key.pem")),
            Err(TriggerError::KeyLoad(_))
        ));
    }

    #[test]
    fn test_encode_produces_ogg_container() {
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect();
        let encoded = encode_ogg_vorbis(&samples, 48_000, 1).unwrap();
        assert!(encoded.len() > 4);
        assert_eq!(&encoded[..4], b"OggS");
        // lossy compression actually compresses
        assert!(encoded.len() < samples.len() * 4);
    }

    #[test]
    fn test_encode_rejects_degenerate_input() {
        assert!(encode_ogg_vorbis(&[], 48_000, 1).is_err());
        assert!(encode_ogg_vorbis(&[0.0; 16], 0, 1).is_err());
        assert!(encode_ogg_vorbis(&[0.0; 16], 48_000, 0).is_err());
    }

    #[test]
    fn test_file_sink_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().to_path_buf());
        let payload = EncryptedPayload {
            bytes: vec![1, 2, 3, 4],
        };
        sink.deliver(Utc::now(), &payload);

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with(".ogg.enc"));
    }
}
