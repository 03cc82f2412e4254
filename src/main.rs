//! Hermes encode pipeline demo: solid-color frames through the loopback
//! transform into a flat bitstream file

use std::sync::Arc;

use color_eyre::Result;
use hermes::encode::{FrameRate, LoopbackTransform, StreamFormat};
use hermes::frame::SolidColorSource;
use hermes::pipeline::EncodePipeline;
use hermes::sink::FileSink;
use hermes::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("hermes=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Hermes launching...");

    // Load configuration
    let config = Config::default();
    hermes::CONFIG.store(Arc::new(config.clone()));

    let encode = &config.encode;
    let frame_rate = FrameRate::new(encode.fps, 1);
    let input_format = StreamFormat::raw(
        encode.width,
        encode.height,
        encode.input_format,
        frame_rate,
    );
    let output_format = StreamFormat::encoded(
        encode.width,
        encode.height,
        encode.codec,
        frame_rate,
        encode.bitrate,
    );

    // The transform handle and its readiness channel would normally come
    // from a hardware provider; the loopback preserves the same contract.
    let (transform, events) = LoopbackTransform::new();
    info!(
        input = %input_format,
        output = %output_format,
        frames = config.pipeline.frame_count,
        "starting encode"
    );

    let pipeline = EncodePipeline::new(
        Box::new(transform),
        events,
        input_format,
        output_format,
        Box::new(SolidColorSource::new(encode.fill_level)),
        Box::new(FileSink::create(&config.output.path)?),
        Some(config.pipeline.frame_count),
    )?;

    let report = if config.pipeline.continuous {
        pipeline.run_continuous().await?
    } else {
        tokio::task::spawn_blocking(move || pipeline.run()).await??
    };

    info!(
        frames = report.frames_submitted,
        payloads = report.payloads_written,
        bytes = report.bytes_written,
        state = ?report.final_state,
        "Hermes shutting down"
    );
    Ok(())
}
