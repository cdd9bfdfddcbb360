use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use noise_trigger::{
    frame_channel, ClassMap, ClassificationAdapter, EnergyClassifier, FileSink,
    ScoreThresholdPolicy, SecureExporter, TriggerConfig, TriggerProcessor,
};

/// Acoustic-event trigger service: reads raw PCM frames from stdin, detects
/// qualifying noise events and writes encrypted Ogg Vorbis captures.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON pipeline configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// RSA public key (PEM) used to encrypt captures.
    #[arg(long)]
    public_key: PathBuf,

    /// Directory encrypted captures are written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Class-name CSV (`index,mid,display_name`) for the classifier; the
    /// built-in energy classifier's classes are used when omitted.
    #[arg(long)]
    class_map: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TriggerConfig::default(),
    };
    config.validate()?;
    info!("configuration: {}", serde_json::to_string(&config)?);

    // Fatal startup checks: key and class map must load before any audio.
    let exporter = SecureExporter::from_pem_file(&args.public_key)?;
    let class_map = match &args.class_map {
        Some(path) => ClassMap::from_csv_path(path)?,
        None => EnergyClassifier::class_map(),
    };
    let classifier = Box::new(EnergyClassifier::new(config.classifier.sample_rate));
    let adapter = ClassificationAdapter::new(
        classifier,
        class_map,
        config.classifier.clone(),
        config.sample_rate,
    )?;

    let (mut sender, receiver) = frame_channel(config.channel_capacity, config.sample_format);
    let shutdown = CancellationToken::new();

    // Transport I/O task: 125 ms PCM frames from stdin, in arrival order.
    let frame_bytes = (config.sample_rate as usize / 8) * config.sample_format.byte_width();
    let reader_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; frame_bytes];
        loop {
            let mut filled = 0;
            while filled < buf.len() {
                match stdin.read(&mut buf[filled..]).await {
                    Ok(0) => {
                        if filled > 0 {
                            let _ = sender.send_pcm(&buf[..filled]).await;
                        }
                        info!("stdin closed, transport done");
                        return;
                    }
                    Ok(n) => filled += n,
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        return;
                    }
                }
                if reader_shutdown.is_cancelled() {
                    return;
                }
            }
            if sender.send_pcm(&buf).await.is_err() {
                return;
            }
        }
    });

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            ctrl_c_shutdown.cancel();
        }
    });

    let mut processor = TriggerProcessor::new(
        config,
        adapter,
        exporter,
        Box::new(ScoreThresholdPolicy::default()),
        vec![Box::new(FileSink::new(args.output_dir))],
    )?;
    processor.run(receiver, shutdown).await
}
