//! Contract between the pipeline and the external Transform Provider

use bytes::Bytes;

use crate::encode::format::StreamFormat;
use crate::error::Result;
use crate::frame::TimedSample;

/// Asynchronous readiness signal raised by the transform.
///
/// Ownership of each event transfers into the readiness channel and is
/// dropped after handling, so there is no callback object to reference-count
/// and no listener to re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessEvent {
    /// The transform can accept exactly one more input sample
    NeedsInput,
    /// One or more outputs are queued behind this notification
    HasOutput,
    /// All buffered output has been emitted; the stream is finished
    DrainComplete,
}

/// Lifecycle control messages, in the order a well-behaved run sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Discard in-flight unconsumed samples; valid before or during streaming
    Flush,
    BeginStreaming,
    NotifyStart,
    NotifyEndOfStream,
    Drain,
}

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Flush => "Flush",
            ControlMessage::BeginStreaming => "BeginStreaming",
            ControlMessage::NotifyStart => "NotifyStart",
            ControlMessage::NotifyEndOfStream => "NotifyEndOfStream",
            ControlMessage::Drain => "Drain",
        }
    }
}

/// One unit of compressed output with its originating stream.
///
/// Created by `retrieve_output`, consumed synchronously by the output writer,
/// then released; never buffered across notifications.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub data: Bytes,
    pub stream_id: u32,
}

/// Raw result of pulling one output unit from the hardware
#[derive(Debug)]
pub enum TransformOutput {
    Payload(EncodedPayload),
    /// The output side wants renegotiation before releasing more payloads
    StreamChanged,
    NoOutput,
}

/// Operations an activated hardware transform handle must expose.
///
/// The handle is supplied by an external provider already bound to a device
/// context; the pipeline owns it for the duration of one run and serializes
/// every call through single ownership inside the event pump. Readiness
/// events arrive on a separate channel handed over alongside the handle.
pub trait HardwareTransform: Send {
    /// Human-readable transform name, for logs
    fn name(&self) -> &str {
        "hardware transform"
    }

    fn set_input_format(&mut self, format: &StreamFormat) -> Result<()>;

    fn set_output_format(&mut self, format: &StreamFormat) -> Result<()>;

    /// Output formats offered after a stream change, in preference order
    fn output_format_candidates(&mut self) -> Vec<StreamFormat>;

    fn send_message(&mut self, message: ControlMessage) -> Result<()>;

    /// Consume one input sample. The buffer belongs to the transform
    /// afterwards; the pipeline must not touch it again.
    fn push_sample(&mut self, sample: TimedSample) -> Result<()>;

    fn pull_output(&mut self) -> Result<TransformOutput>;
}
