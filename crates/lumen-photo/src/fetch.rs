//! Fetch Stage
//!
//! Reads a photo's raw bytes from the transport on a fetch pool thread.
//! When the server declares a content length the body is read straight
//! into a pre-sized buffer; otherwise the stage reads fixed-size chunks
//! into a buffer that doubles whenever it fills, then trims it to the
//! exact byte count.
//!
//! Cancellation is cooperative: the flag is checked before the
//! connection is opened, after it is opened, and after every read. A
//! cancelled fetch stops silently; it never reports failure.

use std::io::Read;
use std::sync::Arc;

use lumen_net::Transport;
use url::Url;

/// Capability set the fetch stage needs from a task.
pub trait FetchTask {
    fn attach_worker(&self);
    fn detach_worker(&self);
    fn is_cancelled(&self) -> bool;
    fn locator(&self) -> Option<Url>;
    fn buffer(&self) -> Option<Arc<Vec<u8>>>;
    fn set_buffer(&self, bytes: Vec<u8>);
    fn report_fetch_state(&self, state: FetchState);
}

/// Stage-local states, translated by the task into pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Started,
    Completed,
    Failed,
}

enum Outcome {
    Done,
    Cancelled,
    Failed,
}

/// Run the fetch stage for one task.
///
/// Skips the network entirely when the task already carries a buffer
/// (the cache pre-fill path). Reports exactly one of `Completed` or
/// `Failed` unless cancelled. The worker handle is always cleared on
/// the way out.
pub(crate) fn run(task: &dyn FetchTask, transport: &dyn Transport, chunk_size: usize) {
    task.attach_worker();

    match fetch(task, transport, chunk_size) {
        Outcome::Done => task.report_fetch_state(FetchState::Completed),
        Outcome::Cancelled => tracing::debug!("fetch cancelled"),
        Outcome::Failed => task.report_fetch_state(FetchState::Failed),
    }

    task.detach_worker();
}

fn fetch(task: &dyn FetchTask, transport: &dyn Transport, chunk_size: usize) -> Outcome {
    if task.is_cancelled() {
        return Outcome::Cancelled;
    }

    if task.buffer().is_some() {
        return Outcome::Done;
    }

    task.report_fetch_state(FetchState::Started);

    let Some(url) = task.locator() else {
        tracing::error!("fetch submitted without a locator");
        return Outcome::Failed;
    };

    let stream = match transport.open(&url) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("fetch of {url} failed: {e}");
            return Outcome::Failed;
        }
    };

    if task.is_cancelled() {
        return Outcome::Cancelled;
    }

    let mut reader = stream.reader;
    let bytes = match stream.content_length {
        Some(len) => match read_declared(task, &mut reader, len as usize) {
            Ok(bytes) => bytes,
            Err(abort) => return abort,
        },
        None => match read_unbounded(task, &mut reader, chunk_size) {
            Ok(bytes) => bytes,
            Err(abort) => return abort,
        },
    };

    if task.is_cancelled() {
        return Outcome::Cancelled;
    }

    tracing::debug!("fetched {} bytes from {url}", bytes.len());
    task.set_buffer(bytes);
    Outcome::Done
}

/// Read exactly `len` bytes into a pre-sized buffer. End-of-stream with
/// declared bytes remaining is a framing failure.
fn read_declared(
    task: &dyn FetchTask,
    reader: &mut dyn Read,
    len: usize,
) -> Result<Vec<u8>, Outcome> {
    let mut buffer = vec![0u8; len];
    let mut offset = 0;

    while offset < len {
        match reader.read(&mut buffer[offset..]) {
            Ok(0) => {
                tracing::warn!("body ended with {} of {len} bytes unread", len - offset);
                return Err(Outcome::Failed);
            }
            Ok(n) => offset += n,
            Err(e) => {
                tracing::warn!("read failed: {e}");
                return Err(Outcome::Failed);
            }
        }
        if task.is_cancelled() {
            return Err(Outcome::Cancelled);
        }
    }

    Ok(buffer)
}

/// Read to end-of-stream in `chunk_size` steps, doubling the buffer
/// whenever it fills, then trimming to the bytes actually read.
fn read_unbounded(
    task: &dyn FetchTask,
    reader: &mut dyn Read,
    chunk_size: usize,
) -> Result<Vec<u8>, Outcome> {
    let chunk_size = chunk_size.max(1);
    let mut buffer = vec![0u8; chunk_size];
    let mut offset = 0;

    loop {
        if offset == buffer.len() {
            buffer.resize(buffer.len() * 2, 0);
        }
        let step = (buffer.len() - offset).min(chunk_size);
        match reader.read(&mut buffer[offset..offset + step]) {
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(e) => {
                tracing::warn!("read failed: {e}");
                return Err(Outcome::Failed);
            }
        }
        if task.is_cancelled() {
            return Err(Outcome::Cancelled);
        }
    }

    buffer.truncate(offset);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_net::{FetchStream, NetError};
    use parking_lot::Mutex;
    use std::io::{self, Cursor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestTask {
        buffer: Mutex<Option<Arc<Vec<u8>>>>,
        cancelled: AtomicBool,
        states: Mutex<Vec<FetchState>>,
    }

    impl TestTask {
        fn new() -> Self {
            Self {
                buffer: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                states: Mutex::new(Vec::new()),
            }
        }
    }

    impl FetchTask for TestTask {
        fn attach_worker(&self) {}
        fn detach_worker(&self) {}

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        fn locator(&self) -> Option<Url> {
            Some(Url::parse("https://example.com/photo.jpg").unwrap())
        }

        fn buffer(&self) -> Option<Arc<Vec<u8>>> {
            self.buffer.lock().clone()
        }

        fn set_buffer(&self, bytes: Vec<u8>) {
            *self.buffer.lock() = Some(Arc::new(bytes));
        }

        fn report_fetch_state(&self, state: FetchState) {
            self.states.lock().push(state);
        }
    }

    struct MemoryTransport {
        body: Vec<u8>,
        declare_length: bool,
        opens: AtomicUsize,
        fail: bool,
    }

    impl MemoryTransport {
        fn new(body: Vec<u8>, declare_length: bool) -> Self {
            Self {
                body,
                declare_length,
                opens: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    impl Transport for MemoryTransport {
        fn open(&self, _url: &Url) -> Result<FetchStream, NetError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NetError::Network("connection refused".into()));
            }
            let length = self.declare_length.then(|| self.body.len() as u64);
            Ok(FetchStream::new(
                length,
                Box::new(Cursor::new(self.body.clone())),
            ))
        }
    }

    /// Declares more bytes than the body actually carries.
    struct TruncatingTransport {
        body: Vec<u8>,
        declared: u64,
    }

    impl Transport for TruncatingTransport {
        fn open(&self, _url: &Url) -> Result<FetchStream, NetError> {
            Ok(FetchStream::new(
                Some(self.declared),
                Box::new(Cursor::new(self.body.clone())),
            ))
        }
    }

    /// Reader that fails partway through.
    struct FlakyReader {
        served: Vec<u8>,
        done: bool,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.done {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = self.served.len().min(buf.len());
            buf[..n].copy_from_slice(&self.served[..n]);
            self.served.drain(..n);
            if self.served.is_empty() {
                self.done = true;
            }
            Ok(n)
        }
    }

    struct FlakyTransport;

    impl Transport for FlakyTransport {
        fn open(&self, _url: &Url) -> Result<FetchStream, NetError> {
            Ok(FetchStream::new(
                None,
                Box::new(FlakyReader {
                    served: vec![7; 100],
                    done: false,
                }),
            ))
        }
    }

    #[test]
    fn test_fetch_declared_length() {
        let task = TestTask::new();
        let transport = MemoryTransport::new(vec![42; 5000], true);

        run(&task, &transport, 2048);

        assert_eq!(
            *task.states.lock(),
            vec![FetchState::Started, FetchState::Completed]
        );
        let buffer = task.buffer().unwrap();
        assert_eq!(buffer.len(), 5000);
        assert!(buffer.iter().all(|&b| b == 42));
    }

    #[test]
    fn test_fetch_unknown_length_grows_buffer() {
        let task = TestTask::new();
        // Body larger than several chunk doublings.
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let transport = MemoryTransport::new(body.clone(), false);

        run(&task, &transport, 2048);

        assert_eq!(
            *task.states.lock(),
            vec![FetchState::Started, FetchState::Completed]
        );
        assert_eq!(task.buffer().unwrap().as_slice(), body.as_slice());
    }

    #[test]
    fn test_fetch_truncated_body_fails() {
        let task = TestTask::new();
        let transport = TruncatingTransport {
            body: vec![1; 10],
            declared: 100,
        };

        run(&task, &transport, 2048);

        assert_eq!(
            *task.states.lock(),
            vec![FetchState::Started, FetchState::Failed]
        );
        assert!(task.buffer().is_none());
    }

    #[test]
    fn test_fetch_transport_error_fails() {
        let task = TestTask::new();
        let mut transport = MemoryTransport::new(Vec::new(), true);
        transport.fail = true;

        run(&task, &transport, 2048);

        assert_eq!(
            *task.states.lock(),
            vec![FetchState::Started, FetchState::Failed]
        );
        assert!(task.buffer().is_none());
    }

    #[test]
    fn test_fetch_read_error_fails() {
        let task = TestTask::new();

        run(&task, &FlakyTransport, 2048);

        assert_eq!(
            *task.states.lock(),
            vec![FetchState::Started, FetchState::Failed]
        );
    }

    #[test]
    fn test_fetch_cancelled_before_start_reports_nothing() {
        let task = TestTask::new();
        task.cancelled.store(true, Ordering::SeqCst);
        let transport = MemoryTransport::new(vec![1, 2, 3], true);

        run(&task, &transport, 2048);

        assert!(task.states.lock().is_empty());
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
        assert!(task.buffer().is_none());
    }

    #[test]
    fn test_fetch_prefilled_buffer_skips_network() {
        let task = TestTask::new();
        task.set_buffer(vec![9, 9, 9]);
        let transport = MemoryTransport::new(vec![1], true);

        run(&task, &transport, 2048);

        assert_eq!(*task.states.lock(), vec![FetchState::Completed]);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }
}
