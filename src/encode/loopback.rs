//! Software loopback transform
//!
//! A deterministic stand-in for a hardware compressor that preserves the full
//! asynchronous contract: it asks for input once per frame it can accept,
//! queues output behind `HasOutput` notifications, honors end-of-stream and
//! drain, and can script a mid-stream output format change. Used by the demo
//! binary and the test harness; it packs frames into length-delimited records
//! rather than emulating a codec.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::encode::format::{StreamFormat, Subtype};
use crate::encode::transform::{
    ControlMessage, EncodedPayload, HardwareTransform, ReadinessEvent, TransformOutput,
};
use crate::error::{EncodeError, Result};
use crate::frame::{PixelFormat, TimedSample};

/// Record magic: "HMS0"
pub const RECORD_MAGIC: [u8; 4] = *b"HMS0";
/// magic + seq + chunk + pts + frame_len + probe
pub const RECORD_LEN: usize = 4 + 8 + 4 + 8 + 4 + 1;

/// One parsed loopback output record, for inspecting a produced stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackRecord {
    /// Index of the consumed input frame
    pub seq: u64,
    /// Index of this record within the frame's payload batch
    pub chunk: u32,
    /// Presentation time of the consumed frame
    pub pts: u64,
    /// Staging size of the consumed frame in bytes
    pub frame_len: u32,
    /// First staged byte of the frame
    pub probe: u8,
}

impl LoopbackRecord {
    /// Parse a byte stream produced by the loopback into records.
    /// Returns `None` on truncation or a bad magic.
    pub fn parse_stream(mut bytes: &[u8]) -> Option<Vec<LoopbackRecord>> {
        let mut records = Vec::with_capacity(bytes.len() / RECORD_LEN);
        while !bytes.is_empty() {
            if bytes.len() < RECORD_LEN || bytes[..4] != RECORD_MAGIC {
                return None;
            }
            records.push(LoopbackRecord {
                seq: u64::from_le_bytes(bytes[4..12].try_into().ok()?),
                chunk: u32::from_le_bytes(bytes[12..16].try_into().ok()?),
                pts: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
                frame_len: u32::from_le_bytes(bytes[24..28].try_into().ok()?),
                probe: bytes[28],
            });
            bytes = &bytes[RECORD_LEN..];
        }
        Some(records)
    }
}

/// Software implementation of [`HardwareTransform`]
pub struct LoopbackTransform {
    events: flume::Sender<ReadinessEvent>,
    input_format: Option<StreamFormat>,
    output_format: Option<StreamFormat>,
    pending: VecDeque<EncodedPayload>,
    accepting_input: bool,
    draining: bool,
    frames_consumed: u64,
    /// Records queued behind each single `HasOutput` notification
    payload_batch: u32,
    /// Signal one stream change after consuming this many frames
    format_change_after: Option<u64>,
    stream_change_pending: bool,
}

impl LoopbackTransform {
    /// Create the transform plus the readiness channel the pump will consume
    pub fn new() -> (Self, flume::Receiver<ReadinessEvent>) {
        let (tx, rx) = flume::bounded(32);
        (
            Self {
                events: tx,
                input_format: None,
                output_format: None,
                pending: VecDeque::new(),
                accepting_input: false,
                draining: false,
                frames_consumed: 0,
                payload_batch: 1,
                format_change_after: None,
                stream_change_pending: false,
            },
            rx,
        )
    }

    /// Queue this many records behind each `HasOutput` notification
    pub fn payload_batch(mut self, records: u32) -> Self {
        self.payload_batch = records.max(1);
        self
    }

    /// Signal one output stream change after consuming `frames` frames
    pub fn format_change_after(mut self, frames: u64) -> Self {
        self.format_change_after = Some(frames);
        self
    }

    fn raise(&self, event: ReadinessEvent) {
        // A failed send means the pump is gone; nothing left to notify.
        let _ = self.events.send(event);
    }

    fn make_record(&self, seq: u64, chunk: u32, sample: &TimedSample) -> Bytes {
        let mut record = BytesMut::with_capacity(RECORD_LEN);
        record.put_slice(&RECORD_MAGIC);
        record.put_u64_le(seq);
        record.put_u32_le(chunk);
        record.put_u64_le(sample.pts);
        record.put_u32_le(sample.buffer.len() as u32);
        record.put_u8(sample.buffer.data().first().copied().unwrap_or(0));
        record.freeze()
    }
}

impl HardwareTransform for LoopbackTransform {
    fn name(&self) -> &str {
        "software loopback"
    }

    fn set_input_format(&mut self, format: &StreamFormat) -> Result<()> {
        match format.subtype {
            Subtype::Raw(_) => {
                self.input_format = Some(format.clone());
                Ok(())
            }
            Subtype::Encoded(_) => Err(EncodeError::Transform {
                op: "set_input_format",
                detail: format!("loopback input must be raw, got {format}"),
            }),
        }
    }

    fn set_output_format(&mut self, format: &StreamFormat) -> Result<()> {
        match format.subtype {
            Subtype::Encoded(_) => {
                self.output_format = Some(format.clone());
                Ok(())
            }
            Subtype::Raw(_) => Err(EncodeError::Transform {
                op: "set_output_format",
                detail: format!("loopback output must be compressed, got {format}"),
            }),
        }
    }

    fn output_format_candidates(&mut self) -> Vec<StreamFormat> {
        let Some(current) = self.output_format.clone() else {
            return Vec::new();
        };
        // Lead with a raw type the driver must skip, then re-offer the
        // negotiated compressed type, the way hardware re-offers its list.
        let raw = StreamFormat::raw(
            current.width,
            current.height,
            PixelFormat::Nv12,
            current.frame_rate,
        );
        vec![raw, current]
    }

    fn send_message(&mut self, message: ControlMessage) -> Result<()> {
        debug!(message = message.name(), "loopback control");
        match message {
            ControlMessage::Flush => self.pending.clear(),
            ControlMessage::BeginStreaming => {}
            ControlMessage::NotifyStart => {
                self.accepting_input = true;
                self.raise(ReadinessEvent::NeedsInput);
            }
            ControlMessage::NotifyEndOfStream => self.accepting_input = false,
            ControlMessage::Drain => {
                self.draining = true;
                if !self.pending.is_empty() || self.stream_change_pending {
                    self.raise(ReadinessEvent::HasOutput);
                }
                self.raise(ReadinessEvent::DrainComplete);
            }
        }
        Ok(())
    }

    fn push_sample(&mut self, sample: TimedSample) -> Result<()> {
        if !self.accepting_input {
            return Err(EncodeError::Transform {
                op: "push_sample",
                detail: "input pushed after end of stream".into(),
            });
        }
        let seq = self.frames_consumed;
        self.frames_consumed += 1;

        for chunk in 0..self.payload_batch {
            self.pending.push_back(EncodedPayload {
                data: self.make_record(seq, chunk, &sample),
                stream_id: 0,
            });
        }
        // The staging buffer is consumed here; ownership ends with the sample.
        drop(sample);

        if self.format_change_after == Some(self.frames_consumed) {
            self.stream_change_pending = true;
        }

        self.raise(ReadinessEvent::HasOutput);
        if self.accepting_input {
            self.raise(ReadinessEvent::NeedsInput);
        }
        Ok(())
    }

    fn pull_output(&mut self) -> Result<TransformOutput> {
        if self.stream_change_pending {
            self.stream_change_pending = false;
            return Ok(TransformOutput::StreamChanged);
        }
        Ok(match self.pending.pop_front() {
            Some(payload) => TransformOutput::Payload(payload),
            None => TransformOutput::NoOutput,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::format::{FrameRate, VideoCodec};
    use crate::frame::{FrameAllocator, SamplePackager};

    fn configured() -> (LoopbackTransform, flume::Receiver<ReadinessEvent>) {
        let rate = FrameRate::new(30, 1);
        let (mut transform, rx) = LoopbackTransform::new();
        transform
            .set_output_format(&StreamFormat::encoded(
                32,
                32,
                VideoCodec::H264,
                rate,
                1_000_000,
            ))
            .unwrap();
        transform
            .set_input_format(&StreamFormat::raw(32, 32, PixelFormat::Argb32, rate))
            .unwrap();
        (transform, rx)
    }

    fn sample() -> TimedSample {
        let rate = FrameRate::new(30, 1);
        let input = StreamFormat::raw(32, 32, PixelFormat::Argb32, rate);
        SamplePackager::new(rate).package(FrameAllocator::new(&input).unwrap().allocate())
    }

    #[test]
    fn start_then_frame_then_drain_event_sequence() {
        let (mut transform, rx) = configured();

        transform
            .send_message(ControlMessage::BeginStreaming)
            .unwrap();
        transform.send_message(ControlMessage::NotifyStart).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ReadinessEvent::NeedsInput);

        transform.push_sample(sample()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ReadinessEvent::HasOutput);
        assert_eq!(rx.try_recv().unwrap(), ReadinessEvent::NeedsInput);

        transform
            .send_message(ControlMessage::NotifyEndOfStream)
            .unwrap();
        transform.send_message(ControlMessage::Drain).unwrap();
        // One payload still queued, so a final HasOutput precedes completion.
        assert_eq!(rx.try_recv().unwrap(), ReadinessEvent::HasOutput);
        assert_eq!(rx.try_recv().unwrap(), ReadinessEvent::DrainComplete);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_after_end_of_stream_is_rejected() {
        let (mut transform, _rx) = configured();
        transform
            .send_message(ControlMessage::BeginStreaming)
            .unwrap();
        transform.send_message(ControlMessage::NotifyStart).unwrap();
        transform
            .send_message(ControlMessage::NotifyEndOfStream)
            .unwrap();
        assert!(transform.push_sample(sample()).is_err());
    }

    #[test]
    fn flush_discards_queued_output() {
        let (mut transform, _rx) = configured();
        transform
            .send_message(ControlMessage::BeginStreaming)
            .unwrap();
        transform.send_message(ControlMessage::NotifyStart).unwrap();
        transform.push_sample(sample()).unwrap();

        transform.send_message(ControlMessage::Flush).unwrap();
        assert!(matches!(
            transform.pull_output().unwrap(),
            TransformOutput::NoOutput
        ));
    }

    #[test]
    fn records_round_trip_through_the_parser() {
        let (transform, _rx) = configured();
        let s = sample();
        let record = transform.make_record(7, 2, &s);
        let parsed = LoopbackRecord::parse_stream(&record).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].seq, 7);
        assert_eq!(parsed[0].chunk, 2);
        assert_eq!(parsed[0].pts, s.pts);
        assert_eq!(parsed[0].frame_len, s.buffer.len() as u32);

        assert!(LoopbackRecord::parse_stream(&record[..RECORD_LEN - 1]).is_none());
    }
}
