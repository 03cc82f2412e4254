//! Negotiated stream formats

use serde::{Deserialize, Serialize};

use crate::frame::{FrameBuffer, PixelFormat};

/// Presentation clock resolution: 100 ns ticks
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Frame rate as a rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Duration of one frame in clock ticks.
    ///
    /// Both terms must be nonzero; the pipeline rejects a zero term where
    /// configuration enters, before any clock math runs.
    pub fn duration(&self) -> u64 {
        TICKS_PER_SECOND * self.den as u64 / self.num as u64
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Compressed codecs the output side can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::Hevc => write!(f, "H.265"),
        }
    }
}

/// What a stream side carries: raw pixels on input, a codec on output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtype {
    Raw(PixelFormat),
    Encoded(VideoCodec),
}

impl std::fmt::Display for Subtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subtype::Raw(format) => write!(f, "{format}"),
            Subtype::Encoded(codec) => write!(f, "{codec}"),
        }
    }
}

/// The negotiated tuple governing one side of the transform.
///
/// Mutable at exactly two points: initial negotiation before streaming, and a
/// mid-stream renegotiation signaled by the transform (output side only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub subtype: Subtype,
    pub frame_rate: FrameRate,
    /// Average bitrate in bits per second; zero on the raw input side
    pub bitrate: u32,
}

impl StreamFormat {
    pub fn raw(width: u32, height: u32, format: PixelFormat, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            subtype: Subtype::Raw(format),
            frame_rate,
            bitrate: 0,
        }
    }

    pub fn encoded(
        width: u32,
        height: u32,
        codec: VideoCodec,
        frame_rate: FrameRate,
        bitrate: u32,
    ) -> Self {
        Self {
            width,
            height,
            subtype: Subtype::Encoded(codec),
            frame_rate,
            bitrate,
        }
    }

    /// Whether a staged frame buffer matches this side's geometry and layout
    pub fn accepts(&self, buffer: &FrameBuffer) -> bool {
        self.width == buffer.width()
            && self.height == buffer.height()
            && self.subtype == Subtype::Raw(buffer.format())
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} @{}",
            self.width, self.height, self.subtype, self.frame_rate
        )
    }
}
