use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::arr2;
use tokio_util::sync::CancellationToken;

use super::test_utils::*;
use crate::classify::{ClassMap, ClassificationAdapter};
use crate::config::TriggerConfig;
use crate::export::SecureExporter;
use crate::transport::{frame_channel, FrameReceiver, FrameSender};
use crate::trigger::{ScoreThresholdPolicy, TriggerProcessor, TriggerState};

const FRAME_LEN: usize = 1_600; // 100 ms at 16 kHz

struct Pipeline {
    processor: TriggerProcessor,
    sender: FrameSender,
    receiver: FrameReceiver,
    sink: CollectingSink,
    invocations: Arc<AtomicUsize>,
}

/// Wire a processor around the counting classifier double, a fresh RSA
/// public key and an in-memory sink.
fn build_pipeline(config: TriggerConfig, public_key_pem: &str) -> Pipeline {
    let (classifier, invocations) =
        CountingClassifier::new(arr2(&[[0.05, 0.10, 0.90], [0.02, 0.08, 0.85]]));
    let class_map = ClassMap::from_names(vec![
        "Silence".to_string(),
        "Ambient noise".to_string(),
        "Loud event".to_string(),
    ]);
    let adapter = ClassificationAdapter::new(
        Box::new(classifier),
        class_map,
        config.classifier.clone(),
        config.sample_rate,
    )
    .unwrap();
    let exporter = SecureExporter::from_pem(public_key_pem).unwrap();
    let sink = CollectingSink::new();
    let (sender, receiver) = frame_channel(config.channel_capacity, config.sample_format);
    let processor = TriggerProcessor::new(
        config,
        adapter,
        exporter,
        Box::new(ScoreThresholdPolicy::default()),
        vec![Box::new(sink.clone())],
    )
    .unwrap();
    Pipeline {
        processor,
        sender,
        receiver,
        sink,
        invocations,
    }
}

/// Buffer a whole sample stream into the channel, then drop the sender so
/// the pipeline sees the transport close once it has drained everything.
async fn send_all(mut sender: FrameSender, samples: &[f32]) {
    for frame in chunk_frames(samples, FRAME_LEN) {
        sender.send(frame).await.expect("receiver alive");
    }
}

#[tokio::test]
async fn test_loud_stream_is_captured_encrypted_and_delivered() {
    let (private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(1), &pem);

    // One second of full-blast tone, well above the 30 dB floor.
    let audio = AudioTestGenerator::new(16_000, 1_000).generate_sine_wave(1_000.0, 0.5);
    send_all(pipeline.sender, &audio).await;

    pipeline
        .processor
        .run(pipeline.receiver, CancellationToken::new())
        .await
        .unwrap();

    let deliveries = pipeline.sink.deliveries();
    assert_eq!(deliveries.len(), 1, "exactly one capture delivered");
    assert!(pipeline.invocations.load(Ordering::SeqCst) >= 1);

    let stats = pipeline.processor.statistics();
    assert_eq!(stats.triggers_fired, 1);
    assert_eq!(stats.captures_exported, 1);
    assert_eq!(stats.captures_aborted, 0);
    assert_eq!(pipeline.processor.state(), TriggerState::WaitTrigger);
    assert_eq!(pipeline.processor.remaining_triggers(), 0);

    // The payload must decrypt back to an Ogg container smaller than the
    // raw capture it encodes.
    let plaintext = decrypt_payload(&private_key, &deliveries[0].1);
    assert_eq!(&plaintext[..4], b"OggS");
    let raw_bytes = (0.5 * 16_000.0) as usize * std::mem::size_of::<f32>();
    assert!(plaintext.len() < raw_bytes, "vorbis output should compress");
}

#[tokio::test]
async fn test_silence_never_reaches_the_classifier() {
    let (_private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(10), &pem);

    let audio = AudioTestGenerator::new(16_000, 1_000).generate_silence();
    send_all(pipeline.sender, &audio).await;

    pipeline
        .processor
        .run(pipeline.receiver, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(pipeline.invocations.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.sink.len(), 0);
    // Leq is undefined over all-zero audio, so the scan never completes.
    assert_eq!(pipeline.processor.statistics().scans_completed, 0);
    assert_eq!(pipeline.processor.statistics().triggers_fired, 0);
}

#[tokio::test]
async fn test_quiet_audio_scans_but_skips_classification() {
    let (_private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(10), &pem);

    // Around 19 dB Leq at the default sensitivity, below the 30 dB floor.
    let audio = AudioTestGenerator::new(16_000, 1_000).generate_sine_wave(1_000.0, 1e-5);
    send_all(pipeline.sender, &audio).await;

    pipeline
        .processor
        .run(pipeline.receiver, CancellationToken::new())
        .await
        .unwrap();

    let stats = pipeline.processor.statistics();
    assert!(stats.scans_completed >= 1, "level scans should have run");
    assert_eq!(stats.classifications_run, 0);
    assert_eq!(pipeline.invocations.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.sink.len(), 0);
}

#[tokio::test]
async fn test_transport_closed_mid_capture_discards_partial_audio() {
    let (_private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(1), &pem);

    // 400 ms of loud audio: enough to trigger at the 200 ms scan interval
    // but well short of the 500 ms capture length.
    let audio = AudioTestGenerator::new(16_000, 400).generate_sine_wave(1_000.0, 0.5);
    send_all(pipeline.sender, &audio).await;

    pipeline
        .processor
        .run(pipeline.receiver, CancellationToken::new())
        .await
        .unwrap();

    let stats = pipeline.processor.statistics();
    assert_eq!(stats.triggers_fired, 1);
    assert_eq!(stats.captures_aborted, 1);
    assert_eq!(stats.captures_exported, 0);
    assert_eq!(pipeline.sink.len(), 0, "partial captures are never delivered");
    assert_eq!(pipeline.processor.state(), TriggerState::WaitTrigger);
}

#[tokio::test]
async fn test_quota_exhaustion_stops_further_captures() {
    let (_private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(1), &pem);

    // Three seconds of sustained loud audio would support several captures;
    // a quota of one must limit the pipeline to a single export.
    let audio = AudioTestGenerator::new(16_000, 3_000).generate_sine_wave(1_000.0, 0.5);
    send_all(pipeline.sender, &audio).await;

    pipeline
        .processor
        .run(pipeline.receiver, CancellationToken::new())
        .await
        .unwrap();

    let stats = pipeline.processor.statistics();
    assert_eq!(stats.triggers_fired, 1);
    assert_eq!(stats.captures_exported, 1);
    assert_eq!(pipeline.sink.len(), 1);
    assert_eq!(pipeline.processor.remaining_triggers(), 0);
}

#[tokio::test]
async fn test_shutdown_cancellation_stops_an_idle_pipeline() {
    let (_private_key, pem) = generate_keypair();
    let mut pipeline = build_pipeline(fast_test_config(10), &pem);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    // Keep the sender alive so the stop can only come from cancellation.
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.processor.run(pipeline.receiver, shutdown),
    )
    .await
    .expect("pipeline should stop promptly on cancellation");
    result.unwrap();
    assert_eq!(pipeline.sink.len(), 0);
    drop(pipeline.sender);
}
