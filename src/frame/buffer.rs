//! Writable frame buffers and their allocator

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::encode::format::{StreamFormat, Subtype};
use crate::error::{EncodeError, Result};

/// Raw pixel layouts the pipeline can stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit ARGB, 4 bytes per pixel
    Argb32,
    /// Planar luma plus interleaved chroma, 12 bits per pixel
    Nv12,
}

impl PixelFormat {
    /// Staging size in bytes for one frame of the given geometry
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Argb32 => pixels * 4,
            PixelFormat::Nv12 => pixels * 3 / 2,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Argb32 => write!(f, "ARGB32"),
            PixelFormat::Nv12 => write!(f, "NV12"),
        }
    }
}

/// CPU-writable staging surface for one raw video frame.
///
/// Single-owner by construction: the buffer moves Allocator -> Source ->
/// Packager -> Transform Driver and is consumed on submission. Nothing in the
/// pipeline may touch it after the transform has taken it.
#[derive(Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: BytesMut,
}

impl FrameBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mutable view of the staging bytes, for the frame source to paint
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Creates writable frame buffers of the negotiated geometry and format
#[derive(Debug, Clone)]
pub struct FrameAllocator {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_size: usize,
}

impl FrameAllocator {
    /// Build an allocator from the negotiated input format.
    ///
    /// The input side must carry a raw pixel layout; an encoded subtype here
    /// is a configuration bug.
    pub fn new(input: &StreamFormat) -> Result<Self> {
        let format = match input.subtype {
            Subtype::Raw(format) => format,
            Subtype::Encoded(codec) => {
                return Err(EncodeError::Config(format!(
                    "input side negotiated to compressed {codec}, expected a raw pixel layout"
                )))
            }
        };
        Ok(Self {
            width: input.width,
            height: input.height,
            format,
            frame_size: format.frame_size(input.width, input.height),
        })
    }

    /// Allocate a zeroed frame buffer ready for the frame source
    pub fn allocate(&self) -> FrameBuffer {
        FrameBuffer {
            width: self.width,
            height: self.height,
            format: self.format,
            data: BytesMut::zeroed(self.frame_size),
        }
    }
}
