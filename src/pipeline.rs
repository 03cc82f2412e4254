//! Top-level run controller

use std::time::Duration;

use tracing::{error, info};

use crate::encode::driver::{PipelineState, TransformDriver};
use crate::encode::format::StreamFormat;
use crate::encode::transform::{ControlMessage, HardwareTransform, ReadinessEvent};
use crate::error::{EncodeError, Result};
use crate::frame::{FrameAllocator, FrameSource, SamplePackager};
use crate::pump::EventPump;
use crate::sink::{OutputSink, OutputWriter};

/// Summary of one finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub frames_submitted: u64,
    pub payloads_written: u64,
    pub bytes_written: u64,
    pub format_changes: u64,
    pub final_state: PipelineState,
}

/// Wires allocator, source, packager, driver, writer and pump together and
/// owns the run lifecycle, including the orderly stop on failure.
pub struct EncodePipeline {
    pump: EventPump,
    /// Failure-path bound on waiting for drain completion; `None` waits
    /// indefinitely. Any bound here is caller policy, not core contract.
    drain_timeout: Option<Duration>,
}

impl std::fmt::Debug for EncodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodePipeline")
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

impl EncodePipeline {
    /// Assemble a pipeline from an activated transform handle, its readiness
    /// channel, and the initially negotiated formats. Transform selection is
    /// the caller's policy; any handle works.
    pub fn new(
        transform: Box<dyn HardwareTransform>,
        events: flume::Receiver<ReadinessEvent>,
        input_format: StreamFormat,
        output_format: StreamFormat,
        source: Box<dyn FrameSource>,
        sink: Box<dyn OutputSink>,
        frame_limit: Option<u64>,
    ) -> Result<Self> {
        let rate = input_format.frame_rate;
        if rate.num == 0 || rate.den == 0 {
            return Err(EncodeError::Config(format!(
                "frame rate {rate} has a zero term"
            )));
        }
        let allocator = FrameAllocator::new(&input_format)?;
        let packager = SamplePackager::new(rate);
        let driver = TransformDriver::new(transform, input_format, output_format)?;
        let writer = OutputWriter::new(sink);
        Ok(Self {
            pump: EventPump::new(events, driver, allocator, source, packager, writer, frame_limit),
            drain_timeout: None,
        })
    }

    /// Bound the failure-path wait for drain completion. Without a bound the
    /// pipeline keeps dispatching until `DrainComplete` arrives or the
    /// readiness channel closes.
    pub fn drain_timeout(mut self, limit: Duration) -> Self {
        self.drain_timeout = Some(limit);
        self
    }

    fn start(&mut self) -> Result<()> {
        let driver = self.pump.driver_mut();
        driver.send_control(ControlMessage::BeginStreaming)?;
        driver.send_control(ControlMessage::NotifyStart)?;
        Ok(())
    }

    /// Run in bounded-iteration mode, blocking the calling thread between
    /// notifications. On failure the pipeline is stopped in order (end of
    /// stream, drain, wait for completion) before the error is reported.
    pub fn run(mut self) -> Result<RunReport> {
        self.start()?;
        match self.pump.run() {
            Ok(()) => self.finish(),
            Err(err) => {
                error!(error = %err, "encode run failed, stopping in order");
                let limit = self.drain_timeout;
                if self.request_stop() {
                    self.pump.drain_quietly(limit);
                }
                let _ = self.pump.writer_mut().finish();
                Err(err)
            }
        }
    }

    /// Run in continuous mode on the async runtime. Same contract as
    /// [`run`](Self::run).
    pub async fn run_continuous(mut self) -> Result<RunReport> {
        self.start()?;
        match self.pump.run_continuous().await {
            Ok(()) => self.finish(),
            Err(err) => {
                error!(error = %err, "encode run failed, stopping in order");
                let limit = self.drain_timeout;
                if self.request_stop() {
                    self.pump.drain_quietly_async(limit).await;
                }
                let _ = self.pump.writer_mut().finish();
                Err(err)
            }
        }
    }

    /// Send the cooperative stop sequence if the stream is still live.
    /// Returns whether a drain is now pending.
    fn request_stop(&mut self) -> bool {
        let driver = self.pump.driver_mut();
        if driver.state() == PipelineState::Streaming {
            if !driver.drain_requested() {
                let _ = driver.send_control(ControlMessage::NotifyEndOfStream);
            }
            let _ = driver.send_control(ControlMessage::Drain);
        }
        self.pump.driver().state() == PipelineState::Draining
    }

    fn finish(mut self) -> Result<RunReport> {
        self.pump.writer_mut().finish()?;
        let (frames_submitted, _, format_changes) = self.pump.stats();
        let report = RunReport {
            frames_submitted,
            payloads_written: self.pump.writer().payloads_written(),
            bytes_written: self.pump.writer().bytes_written(),
            format_changes,
            final_state: self.pump.driver().state(),
        };
        info!(
            frames = report.frames_submitted,
            payloads = report.payloads_written,
            bytes = report.bytes_written,
            "encode run finished"
        );
        Ok(report)
    }
}
