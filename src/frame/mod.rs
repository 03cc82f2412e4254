pub mod buffer;
pub mod sample;
pub mod source;

pub use buffer::{FrameAllocator, FrameBuffer, PixelFormat};
pub use sample::{SamplePackager, TimedSample};
pub use source::{FrameSource, SolidColorSource};
