//! Event pump: the single consumer of the transform's readiness channel

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, info, warn};

use crate::encode::driver::{Outcome, PipelineState, TransformDriver};
use crate::encode::transform::{ControlMessage, ReadinessEvent};
use crate::error::{EncodeError, Result};
use crate::frame::{FrameAllocator, FrameSource, SamplePackager};
use crate::sink::OutputWriter;

/// Whether the pump should keep waiting after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stopped,
}

#[derive(Default)]
struct PumpStats {
    frames_submitted: AtomicU64,
    payloads_retrieved: AtomicU64,
    format_changes: AtomicU64,
}

/// Consumes readiness events in arrival order and dispatches them.
///
/// The pump owns the driver outright, which makes it the single
/// mutual-exclusion domain around the transform: no two threads can reach
/// `submit_input`/`retrieve_output`/`send_control` concurrently. Taking one
/// event off the channel per dispatch replaces the original design's
/// re-armed callback; a new wait begins simply by receiving again.
pub struct EventPump {
    events: flume::Receiver<ReadinessEvent>,
    driver: TransformDriver,
    allocator: FrameAllocator,
    source: Box<dyn FrameSource>,
    packager: SamplePackager,
    writer: OutputWriter,
    /// Frames to submit before requesting end of stream; `None` streams until
    /// the channel closes or the caller drains externally
    frame_limit: Option<u64>,
    stats: CachePadded<PumpStats>,
}

impl EventPump {
    pub fn new(
        events: flume::Receiver<ReadinessEvent>,
        driver: TransformDriver,
        allocator: FrameAllocator,
        source: Box<dyn FrameSource>,
        packager: SamplePackager,
        writer: OutputWriter,
        frame_limit: Option<u64>,
    ) -> Self {
        Self {
            events,
            driver,
            allocator,
            source,
            packager,
            writer,
            frame_limit,
            stats: CachePadded::new(PumpStats::default()),
        }
    }

    pub fn driver(&self) -> &TransformDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut TransformDriver {
        &mut self.driver
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut OutputWriter {
        &mut self.writer
    }

    /// (frames submitted, payloads retrieved, format changes)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.frames_submitted.load(Ordering::Relaxed),
            self.stats.payloads_retrieved.load(Ordering::Relaxed),
            self.stats.format_changes.load(Ordering::Relaxed),
        )
    }

    /// Classify and handle one readiness event
    pub fn dispatch(&mut self, event: ReadinessEvent) -> Result<Flow> {
        let start = Instant::now();
        let flow = match event {
            ReadinessEvent::NeedsInput => {
                self.handle_needs_input()?;
                Flow::Continue
            }
            ReadinessEvent::HasOutput => {
                self.handle_has_output()?;
                Flow::Continue
            }
            ReadinessEvent::DrainComplete => {
                self.driver.mark_drain_complete()?;
                Flow::Stopped
            }
        };
        metrics::histogram!("dispatch_time_us").record(start.elapsed().as_micros() as f64);
        Ok(flow)
    }

    /// Allocate, fill, timestamp and submit exactly one sample. Submitting
    /// more than one per notification is undefined for the hardware, so the
    /// frame budget check happens before any allocation.
    fn handle_needs_input(&mut self) -> Result<()> {
        if self.driver.state() != PipelineState::Streaming || self.driver.drain_requested() {
            // The transform may have raised this before observing end of
            // stream; submitting now would break the one-per-notification
            // contract.
            debug!("ignoring stale input request");
            return Ok(());
        }
        self.driver.note_input_requested();

        let submitted = self.stats.frames_submitted.load(Ordering::Relaxed);
        if let Some(limit) = self.frame_limit {
            if submitted >= limit {
                return self.finish_stream();
            }
        }

        let mut buffer = self.allocator.allocate();
        self.source.fill(&mut buffer)?;
        let sample = self.packager.package(buffer);
        self.driver.submit_input(sample)?;
        self.stats.frames_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Exhaust every output queued behind this notification before waiting
    /// again, writing payloads in strict arrival order and applying any
    /// format change in-loop.
    fn handle_has_output(&mut self) -> Result<()> {
        loop {
            match self.driver.retrieve_output()? {
                Outcome::Payload(payload) => {
                    self.writer.write(&payload)?;
                    self.stats.payloads_retrieved.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::FormatChanged(format) => {
                    info!(format = %format, "continuing drain under renegotiated format");
                    self.stats.format_changes.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::NoOutputAvailable => return Ok(()),
            }
        }
    }

    fn finish_stream(&mut self) -> Result<()> {
        info!(
            frames = self.stats.frames_submitted.load(Ordering::Relaxed),
            "frame budget reached, requesting drain"
        );
        self.driver.send_control(ControlMessage::NotifyEndOfStream)?;
        self.driver.send_control(ControlMessage::Drain)?;
        Ok(())
    }

    /// Bounded-iteration mode: block on the channel between dispatches.
    /// Returns once drain completion is observed.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let event = self.events.recv().map_err(|_| EncodeError::ChannelClosed)?;
            if self.dispatch(event)? == Flow::Stopped {
                return Ok(());
            }
        }
    }

    /// Continuous mode: the calling task is never blocked; event delivery
    /// itself drives forward progress. Invariants are identical to `run`.
    pub async fn run_continuous(&mut self) -> Result<()> {
        loop {
            let event = self
                .events
                .recv_async()
                .await
                .map_err(|_| EncodeError::ChannelClosed)?;
            if self.dispatch(event)? == Flow::Stopped {
                return Ok(());
            }
        }
    }

    /// Failure-path drain: keep dispatching until drain completion so no
    /// buffered output or transform resources are abandoned. Dispatch errors
    /// here are logged, not propagated; the caller already holds the original
    /// error. With no `limit` the wait is unbounded - any timeout on drain
    /// completion is the caller's policy, not part of this contract.
    pub(crate) fn drain_quietly(&mut self, limit: Option<Duration>) {
        while self.driver.state() != PipelineState::Stopped {
            let event = match limit {
                Some(limit) => match self.events.recv_timeout(limit) {
                    Ok(event) => event,
                    Err(flume::RecvTimeoutError::Timeout) => {
                        warn!(?limit, "drain completion not observed within bound, giving up");
                        return;
                    }
                    Err(flume::RecvTimeoutError::Disconnected) => {
                        warn!("readiness channel closed during orderly stop");
                        return;
                    }
                },
                None => match self.events.recv() {
                    Ok(event) => event,
                    Err(_) => {
                        warn!("readiness channel closed during orderly stop");
                        return;
                    }
                },
            };
            if let Err(err) = self.dispatch(event) {
                warn!(error = %err, "dispatch failed during orderly stop");
            }
        }
    }

    /// Async twin of [`drain_quietly`](Self::drain_quietly)
    pub(crate) async fn drain_quietly_async(&mut self, limit: Option<Duration>) {
        while self.driver.state() != PipelineState::Stopped {
            let event = match limit {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.events.recv_async()).await {
                        Ok(Ok(event)) => event,
                        Ok(Err(_)) => {
                            warn!("readiness channel closed during orderly stop");
                            return;
                        }
                        Err(_) => {
                            warn!(?limit, "drain completion not observed within bound, giving up");
                            return;
                        }
                    }
                }
                None => match self.events.recv_async().await {
                    Ok(event) => event,
                    Err(_) => {
                        warn!("readiness channel closed during orderly stop");
                        return;
                    }
                },
            };
            if let Err(err) = self.dispatch(event) {
                warn!(error = %err, "dispatch failed during orderly stop");
            }
        }
    }
}
