//! Error taxonomy for the encode pipeline

use thiserror::Error;

use crate::encode::driver::PipelineState;
use crate::encode::format::VideoCodec;

pub type Result<T> = std::result::Result<T, EncodeError>;

/// Everything that can go wrong between `BeginStreaming` and `DrainComplete`.
///
/// `Busy` and `FormatMismatch` reject a single submission; `Protocol` means
/// the pipeline itself misbehaved and is never retried. A mid-stream format
/// change is not represented here at all - it is a normal outcome of
/// `retrieve_output`.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The transform has not asked for input since the last submission.
    #[error("transform is busy: no input requested since last submission")]
    Busy,

    #[error("sample format {got} does not match negotiated input {want}")]
    FormatMismatch { got: String, want: String },

    /// A control message or call arrived outside its valid predecessor state.
    #[error("protocol violation: {action} in state {state:?}")]
    Protocol {
        action: &'static str,
        state: PipelineState,
    },

    /// A single transform call failed without being a protocol violation.
    #[error("transform {op} failed: {detail}")]
    Transform { op: &'static str, detail: String },

    /// The transform signaled a stream change but offered no format for the
    /// codec in use.
    #[error("no offered output format matches codec {0}")]
    Renegotiation(VideoCodec),

    /// Sink I/O failure. Fatal to the run; triggers an orderly drain.
    #[error("output sink write failed: {0}")]
    Sink(#[from] std::io::Error),

    /// The readiness channel closed before drain completion was observed.
    #[error("readiness channel closed before drain completed")]
    ChannelClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}
