pub mod encode;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pump;
pub mod sink;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::encode::format::VideoCodec;
use crate::frame::PixelFormat;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub encode: EncodeConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub input_format: PixelFormat,
    pub codec: VideoCodec,
    pub bitrate: u32,
    /// Byte value the solid-color frame source paints into every plane
    pub fill_level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames to submit before requesting end of stream
    pub frame_count: u64,
    /// Continuous (event-driven) mode vs bounded blocking waits
    pub continuous: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encode: EncodeConfig {
                width: 1280,
                height: 720,
                fps: 30,
                input_format: PixelFormat::Argb32,
                codec: VideoCodec::H264,
                bitrate: 4_000_000,
                fill_level: 200,
            },
            output: OutputConfig {
                path: "vid.h264".into(),
            },
            pipeline: PipelineConfig {
                frame_count: 120,
                continuous: true,
            },
        }
    }
}
