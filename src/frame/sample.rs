//! Timed sample packaging

use crate::encode::format::FrameRate;
use crate::frame::FrameBuffer;

/// A frame buffer stamped with presentation time and duration, ready for
/// submission. Times are in 100 ns ticks.
#[derive(Debug)]
pub struct TimedSample {
    pub buffer: FrameBuffer,
    pub pts: u64,
    pub duration: u64,
}

/// Stamps successive frames with strictly increasing presentation times.
///
/// The tick counter is a field here, scoped to one pipeline run, so repeated
/// or concurrent runs never share clock state.
#[derive(Debug)]
pub struct SamplePackager {
    next_pts: u64,
    duration: u64,
}

impl SamplePackager {
    pub fn new(frame_rate: FrameRate) -> Self {
        Self {
            next_pts: 0,
            duration: frame_rate.duration(),
        }
    }

    /// Wrap a filled buffer into a timed sample and advance the clock by
    /// exactly one frame duration.
    pub fn package(&mut self, buffer: FrameBuffer) -> TimedSample {
        let pts = self.next_pts;
        self.next_pts += self.duration;
        TimedSample {
            buffer,
            pts,
            duration: self.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::format::StreamFormat;
    use crate::frame::{FrameAllocator, PixelFormat};

    #[test]
    fn timestamps_increase_by_exactly_one_duration() {
        let rate = FrameRate::new(60, 1);
        let input = StreamFormat::raw(16, 16, PixelFormat::Argb32, rate);
        let allocator = FrameAllocator::new(&input).unwrap();
        let mut packager = SamplePackager::new(rate);

        let duration = rate.duration();
        let mut seen = Vec::new();
        for _ in 0..120 {
            let sample = packager.package(allocator.allocate());
            assert_eq!(sample.duration, duration);
            seen.push(sample.pts);
        }

        assert_eq!(seen.len(), 120);
        assert_eq!(seen[0], 0);
        for pair in seen.windows(2) {
            assert_eq!(pair[1] - pair[0], duration);
        }
    }

    #[test]
    fn fresh_packager_restarts_the_clock() {
        let rate = FrameRate::new(30, 1);
        let input = StreamFormat::raw(16, 16, PixelFormat::Argb32, rate);
        let allocator = FrameAllocator::new(&input).unwrap();

        let mut first = SamplePackager::new(rate);
        first.package(allocator.allocate());
        first.package(allocator.allocate());

        let mut second = SamplePackager::new(rate);
        assert_eq!(second.package(allocator.allocate()).pts, 0);
    }
}
