//! Transform driver: the encode state machine around the hardware handle

use tracing::{debug, info};

use crate::encode::format::{StreamFormat, Subtype};
use crate::encode::transform::{
    ControlMessage, EncodedPayload, HardwareTransform, TransformOutput,
};
use crate::error::{EncodeError, Result};
use crate::frame::TimedSample;

/// Lifecycle of one encode run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Streaming,
    Draining,
    Stopped,
}

/// Result of one `retrieve_output` call
#[derive(Debug)]
pub enum Outcome {
    Payload(EncodedPayload),
    /// The negotiated output format was re-applied mid-stream. Not an error.
    FormatChanged(StreamFormat),
    NoOutputAvailable,
}

/// Wraps the hardware transform behind submit/retrieve/control operations and
/// owns the pipeline state machine.
///
/// All calls must come from one logical thread; the event pump guarantees
/// this by owning the driver outright.
pub struct TransformDriver {
    transform: Box<dyn HardwareTransform>,
    state: PipelineState,
    streaming_begun: bool,
    drain_requested: bool,
    input_ready: bool,
    input_format: StreamFormat,
    output_format: StreamFormat,
}

impl TransformDriver {
    /// Apply the initially negotiated formats and wrap the handle.
    ///
    /// Output type goes first, then input, matching the order hardware
    /// encoders expect during negotiation.
    pub fn new(
        mut transform: Box<dyn HardwareTransform>,
        input_format: StreamFormat,
        output_format: StreamFormat,
    ) -> Result<Self> {
        transform.set_output_format(&output_format)?;
        transform.set_input_format(&input_format)?;
        info!(
            transform = transform.name(),
            input = %input_format,
            output = %output_format,
            "transform configured"
        );
        Ok(Self {
            transform,
            state: PipelineState::Created,
            streaming_begun: false,
            drain_requested: false,
            input_ready: false,
            input_format,
            output_format,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn drain_requested(&self) -> bool {
        self.drain_requested
    }

    pub fn input_format(&self) -> &StreamFormat {
        &self.input_format
    }

    pub fn output_format(&self) -> &StreamFormat {
        &self.output_format
    }

    /// Record that the transform signaled readiness for one more input.
    /// Called by the pump when a `NeedsInput` notification arrives.
    pub fn note_input_requested(&mut self) {
        self.input_ready = true;
    }

    /// Submit one timed sample. Consumes the sample's buffer: on success it
    /// belongs to the transform and is never touched again.
    pub fn submit_input(&mut self, sample: TimedSample) -> Result<()> {
        if self.state != PipelineState::Streaming {
            return Err(EncodeError::Protocol {
                action: "submit_input",
                state: self.state,
            });
        }
        if !self.input_ready {
            return Err(EncodeError::Busy);
        }
        if !self.input_format.accepts(&sample.buffer) {
            return Err(EncodeError::FormatMismatch {
                got: format!(
                    "{}x{} {}",
                    sample.buffer.width(),
                    sample.buffer.height(),
                    sample.buffer.format()
                ),
                want: self.input_format.to_string(),
            });
        }
        debug!(pts = sample.pts, duration = sample.duration, "submitting sample");
        self.transform.push_sample(sample)?;
        self.input_ready = false;
        Ok(())
    }

    /// Pull one output unit. Callers must keep calling until
    /// `NoOutputAvailable`, since the hardware may queue several outputs
    /// behind a single notification.
    pub fn retrieve_output(&mut self) -> Result<Outcome> {
        match self.state {
            PipelineState::Streaming | PipelineState::Draining => {}
            state => {
                return Err(EncodeError::Protocol {
                    action: "retrieve_output",
                    state,
                })
            }
        }
        match self.transform.pull_output()? {
            TransformOutput::Payload(payload) => Ok(Outcome::Payload(payload)),
            TransformOutput::NoOutput => Ok(Outcome::NoOutputAvailable),
            TransformOutput::StreamChanged => {
                let format = self.renegotiate_output()?;
                Ok(Outcome::FormatChanged(format))
            }
        }
    }

    /// Select the first offered output format whose subtype matches the
    /// codec in use, re-apply it, and record it as the negotiated format.
    fn renegotiate_output(&mut self) -> Result<StreamFormat> {
        let codec = match self.output_format.subtype {
            Subtype::Encoded(codec) => codec,
            Subtype::Raw(_) => {
                return Err(EncodeError::Config(
                    "output side negotiated to a raw layout".into(),
                ))
            }
        };
        let chosen = self
            .transform
            .output_format_candidates()
            .into_iter()
            .find(|candidate| candidate.subtype == Subtype::Encoded(codec))
            .ok_or(EncodeError::Renegotiation(codec))?;
        self.transform.set_output_format(&chosen)?;
        info!(format = %chosen, "output format renegotiated mid-stream");
        self.output_format = chosen.clone();
        Ok(chosen)
    }

    /// Advance the state machine and pass the message to the hardware.
    /// Out-of-order messages fail with a protocol violation and leave the
    /// state untouched.
    pub fn send_control(&mut self, message: ControlMessage) -> Result<()> {
        if !self.permits(message) {
            return Err(EncodeError::Protocol {
                action: message.name(),
                state: self.state,
            });
        }
        self.transform.send_message(message)?;
        match message {
            ControlMessage::Flush => {
                // In-flight samples are discarded; any stale readiness with them.
                self.input_ready = false;
            }
            ControlMessage::BeginStreaming => self.streaming_begun = true,
            ControlMessage::NotifyStart => {
                self.state = PipelineState::Streaming;
                debug!("streaming started");
            }
            ControlMessage::NotifyEndOfStream => self.drain_requested = true,
            ControlMessage::Drain => {
                self.state = PipelineState::Draining;
                debug!("draining");
            }
        }
        Ok(())
    }

    fn permits(&self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Flush => matches!(
                self.state,
                PipelineState::Created | PipelineState::Streaming
            ),
            ControlMessage::BeginStreaming => {
                self.state == PipelineState::Created && !self.streaming_begun
            }
            ControlMessage::NotifyStart => {
                self.state == PipelineState::Created && self.streaming_begun
            }
            ControlMessage::NotifyEndOfStream => {
                self.state == PipelineState::Streaming && !self.drain_requested
            }
            ControlMessage::Drain => {
                self.state == PipelineState::Streaming && self.drain_requested
            }
        }
    }

    /// A drain-complete notification was observed; the run is over.
    pub fn mark_drain_complete(&mut self) -> Result<()> {
        if self.state != PipelineState::Draining {
            return Err(EncodeError::Protocol {
                action: "drain-complete",
                state: self.state,
            });
        }
        self.state = PipelineState::Stopped;
        info!("drain complete, pipeline stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::format::{FrameRate, VideoCodec};
    use crate::frame::{FrameAllocator, PixelFormat, SamplePackager};
    use std::collections::VecDeque;

    /// Scripted transform for driving the state machine in isolation
    struct ScriptTransform {
        outputs: VecDeque<TransformOutput>,
        candidates: Vec<StreamFormat>,
        messages: Vec<ControlMessage>,
        samples_taken: usize,
        formats_applied: usize,
    }

    impl ScriptTransform {
        fn new() -> Self {
            Self {
                outputs: VecDeque::new(),
                candidates: Vec::new(),
                messages: Vec::new(),
                samples_taken: 0,
                formats_applied: 0,
            }
        }
    }

    impl HardwareTransform for ScriptTransform {
        fn set_input_format(&mut self, _format: &StreamFormat) -> Result<()> {
            Ok(())
        }

        fn set_output_format(&mut self, _format: &StreamFormat) -> Result<()> {
            self.formats_applied += 1;
            Ok(())
        }

        fn output_format_candidates(&mut self) -> Vec<StreamFormat> {
            self.candidates.clone()
        }

        fn send_message(&mut self, message: ControlMessage) -> Result<()> {
            self.messages.push(message);
            Ok(())
        }

        fn push_sample(&mut self, _sample: TimedSample) -> Result<()> {
            self.samples_taken += 1;
            Ok(())
        }

        fn pull_output(&mut self) -> Result<TransformOutput> {
            Ok(self.outputs.pop_front().unwrap_or(TransformOutput::NoOutput))
        }
    }

    fn formats() -> (StreamFormat, StreamFormat) {
        let rate = FrameRate::new(30, 1);
        (
            StreamFormat::raw(64, 48, PixelFormat::Argb32, rate),
            StreamFormat::encoded(64, 48, VideoCodec::H264, rate, 4_000_000),
        )
    }

    fn driver_with(script: ScriptTransform) -> TransformDriver {
        let (input, output) = formats();
        TransformDriver::new(Box::new(script), input, output).unwrap()
    }

    fn start_streaming(driver: &mut TransformDriver) {
        driver.send_control(ControlMessage::BeginStreaming).unwrap();
        driver.send_control(ControlMessage::NotifyStart).unwrap();
    }

    #[test]
    fn control_messages_out_of_order_are_protocol_violations() {
        let mut driver = driver_with(ScriptTransform::new());

        // Drain straight out of Created
        let err = driver.send_control(ControlMessage::Drain).unwrap_err();
        assert!(matches!(err, EncodeError::Protocol { .. }));
        assert_eq!(driver.state(), PipelineState::Created);

        // NotifyStart before BeginStreaming
        assert!(driver.send_control(ControlMessage::NotifyStart).is_err());
        assert_eq!(driver.state(), PipelineState::Created);

        start_streaming(&mut driver);
        assert_eq!(driver.state(), PipelineState::Streaming);

        // Drain before NotifyEndOfStream
        assert!(driver.send_control(ControlMessage::Drain).is_err());
        assert_eq!(driver.state(), PipelineState::Streaming);

        driver
            .send_control(ControlMessage::NotifyEndOfStream)
            .unwrap();
        driver.send_control(ControlMessage::Drain).unwrap();
        assert_eq!(driver.state(), PipelineState::Draining);

        // Nothing but teardown is valid once stopped
        driver.mark_drain_complete().unwrap();
        assert!(driver.send_control(ControlMessage::Flush).is_err());
        assert_eq!(driver.state(), PipelineState::Stopped);
    }

    #[test]
    fn flush_is_valid_before_and_during_streaming_only() {
        let mut driver = driver_with(ScriptTransform::new());
        driver.send_control(ControlMessage::Flush).unwrap();
        start_streaming(&mut driver);
        driver.send_control(ControlMessage::Flush).unwrap();
        driver
            .send_control(ControlMessage::NotifyEndOfStream)
            .unwrap();
        driver.send_control(ControlMessage::Drain).unwrap();
        assert!(driver.send_control(ControlMessage::Flush).is_err());
    }

    #[test]
    fn double_submit_without_readiness_is_busy() {
        let mut driver = driver_with(ScriptTransform::new());
        start_streaming(&mut driver);

        let (input, _) = formats();
        let allocator = FrameAllocator::new(&input).unwrap();
        let mut packager = SamplePackager::new(input.frame_rate);

        driver.note_input_requested();
        driver
            .submit_input(packager.package(allocator.allocate()))
            .unwrap();

        let err = driver
            .submit_input(packager.package(allocator.allocate()))
            .unwrap_err();
        assert!(matches!(err, EncodeError::Busy));
        assert_eq!(driver.state(), PipelineState::Streaming);
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let mut driver = driver_with(ScriptTransform::new());
        start_streaming(&mut driver);
        driver.note_input_requested();

        let rate = FrameRate::new(30, 1);
        let wrong = StreamFormat::raw(320, 240, PixelFormat::Argb32, rate);
        let mut packager = SamplePackager::new(rate);
        let sample = packager.package(FrameAllocator::new(&wrong).unwrap().allocate());

        let err = driver.submit_input(sample).unwrap_err();
        assert!(matches!(err, EncodeError::FormatMismatch { .. }));
        // Readiness is still armed: the rejected sample consumed nothing.
        assert_eq!(driver.state(), PipelineState::Streaming);
    }

    #[test]
    fn stream_change_reapplies_first_matching_codec_format() {
        let rate = FrameRate::new(30, 1);
        let refreshed = StreamFormat::encoded(64, 48, VideoCodec::H264, rate, 5_000_000);

        let mut script = ScriptTransform::new();
        script.outputs.push_back(TransformOutput::StreamChanged);
        script.outputs.push_back(TransformOutput::Payload(EncodedPayload {
            data: bytes::Bytes::from_static(b"unit"),
            stream_id: 0,
        }));
        // A raw candidate first: the driver must skip it.
        script.candidates = vec![
            StreamFormat::raw(64, 48, PixelFormat::Nv12, rate),
            refreshed.clone(),
        ];

        let mut driver = driver_with(script);
        start_streaming(&mut driver);

        match driver.retrieve_output().unwrap() {
            Outcome::FormatChanged(format) => assert_eq!(format, refreshed),
            other => panic!("expected FormatChanged, got {other:?}"),
        }
        assert_eq!(driver.output_format(), &refreshed);
        assert_eq!(driver.state(), PipelineState::Streaming);

        // The drain resumes where it left off.
        assert!(matches!(
            driver.retrieve_output().unwrap(),
            Outcome::Payload(_)
        ));
        assert!(matches!(
            driver.retrieve_output().unwrap(),
            Outcome::NoOutputAvailable
        ));
    }

    #[test]
    fn stream_change_without_matching_codec_fails() {
        let rate = FrameRate::new(30, 1);
        let mut script = ScriptTransform::new();
        script.outputs.push_back(TransformOutput::StreamChanged);
        script.candidates = vec![StreamFormat::encoded(
            64,
            48,
            VideoCodec::Hevc,
            rate,
            1_000_000,
        )];

        let mut driver = driver_with(script);
        start_streaming(&mut driver);

        let err = driver.retrieve_output().unwrap_err();
        assert!(matches!(
            err,
            EncodeError::Renegotiation(VideoCodec::H264)
        ));
    }

    #[test]
    fn drain_complete_outside_draining_is_a_violation() {
        let mut driver = driver_with(ScriptTransform::new());
        assert!(driver.mark_drain_complete().is_err());
        start_streaming(&mut driver);
        assert!(driver.mark_drain_complete().is_err());
        assert_eq!(driver.state(), PipelineState::Streaming);
    }
}
