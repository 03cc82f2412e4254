//! Output sinks and the ordered payload writer

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::utils::CachePadded;
use tracing::{debug, info};

use crate::encode::EncodedPayload;
use crate::error::Result;

/// Append-only byte destination for the compressed stream.
///
/// The stream is the codec's elementary bitstream; bit-exactness is the
/// codec's concern, the sink just appends.
pub trait OutputSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Flat file sink, truncated on creation
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        info!(path = %path.display(), "output file opened");
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// In-memory sink; cloned handles observe the same accumulated bytes
#[derive(Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().expect("sink poisoned").clone()
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.data.lock().expect("sink poisoned").extend_from_slice(bytes);
        Ok(())
    }
}

#[derive(Default)]
struct WriterStats {
    payloads: AtomicU64,
    bytes: AtomicU64,
}

/// Appends retrieved payloads to the sink in arrival order.
///
/// Writes are synchronous: the payload's backing buffer is reclaimed by the
/// transform right after `write` returns, so the bytes must be written or
/// fully buffered before then. A sink error is fatal to the run and
/// propagates upward; there is no retry target for a sequential stream.
pub struct OutputWriter {
    sink: Box<dyn OutputSink>,
    stats: CachePadded<WriterStats>,
}

impl OutputWriter {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            stats: CachePadded::new(WriterStats::default()),
        }
    }

    pub fn write(&mut self, payload: &EncodedPayload) -> Result<()> {
        self.sink.write(&payload.data)?;
        self.stats.payloads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(payload.data.len() as u64, Ordering::Relaxed);
        metrics::counter!("sink_bytes_written").increment(payload.data.len() as u64);
        debug!(
            bytes = payload.data.len(),
            stream = payload.stream_id,
            "payload appended"
        );
        Ok(())
    }

    /// Flush anything still buffered in the sink
    pub fn finish(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn payloads_written(&self) -> u64 {
        self.stats.payloads.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.stats.bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn payload(data: &'static [u8]) -> EncodedPayload {
        EncodedPayload {
            data: Bytes::from_static(data),
            stream_id: 0,
        }
    }

    #[test]
    fn writer_appends_in_order_and_counts() {
        let sink = MemorySink::new();
        let mut writer = OutputWriter::new(Box::new(sink.clone()));

        writer.write(&payload(b"one")).unwrap();
        writer.write(&payload(b"two")).unwrap();
        writer.finish().unwrap();

        assert_eq!(sink.contents(), b"onetwo");
        assert_eq!(writer.payloads_written(), 2);
        assert_eq!(writer.bytes_written(), 6);
    }

    #[test]
    fn sink_io_error_propagates() {
        struct BrokenSink;
        impl OutputSink for BrokenSink {
            fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
            }
        }

        let mut writer = OutputWriter::new(Box::new(BrokenSink));
        assert!(writer.write(&payload(b"x")).is_err());
    }

    #[test]
    fn file_sink_persists_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h264");
        {
            let mut writer = OutputWriter::new(Box::new(FileSink::create(&path).unwrap()));
            writer.write(&payload(b"bitstream")).unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"bitstream");
    }
}
