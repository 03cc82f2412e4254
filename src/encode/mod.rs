pub mod driver;
pub mod format;
pub mod loopback;
pub mod transform;

pub use driver::{Outcome, PipelineState, TransformDriver};
pub use format::{FrameRate, StreamFormat, Subtype, VideoCodec};
pub use loopback::LoopbackTransform;
pub use transform::{
    ControlMessage, EncodedPayload, HardwareTransform, ReadinessEvent, TransformOutput,
};
