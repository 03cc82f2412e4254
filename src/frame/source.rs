//! Frame content producers

use crate::error::Result;
use crate::frame::FrameBuffer;

/// Fills an allocated frame buffer with pixel content.
///
/// The pipeline only requires that `fill` completes before submission and
/// leaves the buffer in the negotiated geometry and layout.
pub trait FrameSource: Send {
    fn fill(&mut self, buffer: &mut FrameBuffer) -> Result<()>;
}

/// Paints every byte of the staging surface with a single value.
///
/// Works for both supported layouts: a uniform byte value yields a valid (if
/// dull) picture in packed ARGB and in NV12 alike.
pub struct SolidColorSource {
    level: u8,
}

impl SolidColorSource {
    pub fn new(level: u8) -> Self {
        Self { level }
    }
}

impl Default for SolidColorSource {
    fn default() -> Self {
        Self { level: 200 }
    }
}

impl FrameSource for SolidColorSource {
    fn fill(&mut self, buffer: &mut FrameBuffer) -> Result<()> {
        buffer.data_mut().fill(self.level);
        Ok(())
    }
}
