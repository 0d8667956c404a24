//! Ring-buffer forwarding
//!
//! Reads records from a source one at a time, decodes each before the next
//! read and sends the result downstream in arrival order. On shutdown, read
//! failure, or a closed downstream channel the loop stops and every registered
//! resource is released.

use async_trait::async_trait;
use httptap_core::events::{DecodeError, TraceRecord};
use std::io;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{TracerError, TracerResult};

/// Blocking source of raw kernel records
#[async_trait]
pub trait RecordSource: Send {
    /// Wait for the next record
    async fn next_record(&mut self) -> io::Result<Vec<u8>>;
}

/// A resource released when forwarding ends
pub trait Closer: Send {
    fn name(&self) -> &str;

    fn close(self: Box<Self>) -> TracerResult<()>;
}

/// Resources owned by a running tracer
///
/// Anything still registered when the set is dropped gets closed, so early
/// returns during setup release what was already acquired.
#[derive(Default)]
pub struct CloserSet {
    closers: Vec<Box<dyn Closer>>,
}

impl CloserSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, closer: Box<dyn Closer>) {
        self.closers.push(closer);
    }

    pub fn len(&self) -> usize {
        self.closers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closers.is_empty()
    }

    /// Close everything in registration order
    ///
    /// A failing closer does not stop the rest. Failures are logged and
    /// returned.
    pub fn close_all(&mut self) -> Vec<TracerError> {
        let mut failures = Vec::new();
        for closer in self.closers.drain(..) {
            let name = closer.name().to_string();
            match closer.close() {
                Ok(()) => debug!("released {}", name),
                Err(e) => {
                    warn!("error releasing {}: {}", name, e);
                    failures.push(e);
                }
            }
        }
        failures
    }
}

impl Drop for CloserSet {
    fn drop(&mut self) {
        if !self.closers.is_empty() {
            self.close_all();
        }
    }
}

/// Why forwarding stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    ReadError,
    ChannelClosed,
}

/// Counters reported when forwarding stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub close_failures: usize,
    pub stop: StopReason,
}

/// Forward records from `source` through `decode` into `tx`
///
/// Decode failures are logged and the record is dropped; nothing is retried.
pub async fn forward_ringbuf<S, D>(
    mut source: S,
    decode: D,
    mut closers: CloserSet,
    mut shutdown: broadcast::Receiver<()>,
    tx: mpsc::Sender<TraceRecord>,
) -> ForwardStats
where
    S: RecordSource,
    D: Fn(&[u8]) -> Result<TraceRecord, DecodeError> + Send,
{
    let mut forwarded = 0u64;
    let mut dropped = 0u64;

    let stop = loop {
        let bytes = tokio::select! {
            _ = shutdown.recv() => break StopReason::Shutdown,
            read = source.next_record() => match read {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("error reading from ring buffer: {}", e);
                    break StopReason::ReadError;
                }
            },
        };

        let record = match decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!("dropping undecodable record: {}", e);
                dropped += 1;
                continue;
            }
        };

        tokio::select! {
            _ = shutdown.recv() => break StopReason::Shutdown,
            sent = tx.send(record) => {
                if sent.is_err() {
                    warn!("outbound record channel closed");
                    break StopReason::ChannelClosed;
                }
                forwarded += 1;
            }
        }
    };

    info!(
        forwarded,
        dropped,
        reason = ?stop,
        "ring buffer forwarding stopped"
    );

    drop(source);
    let close_failures = closers.close_all().len();

    ForwardStats {
        forwarded,
        dropped,
        close_failures,
        stop,
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Source replaying queued reads, then blocking forever
    pub struct QueueSource {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl QueueSource {
        pub fn new(records: Vec<Vec<u8>>) -> Self {
            Self {
                reads: records.into_iter().map(Ok).collect(),
            }
        }

        pub fn then_fail(mut self) -> Self {
            self.reads
                .push_back(Err(io::Error::new(io::ErrorKind::Other, "ring buffer gone")));
            self
        }
    }

    #[async_trait]
    impl RecordSource for QueueSource {
        async fn next_record(&mut self) -> io::Result<Vec<u8>> {
            match self.reads.pop_front() {
                Some(read) => read,
                None => std::future::pending().await,
            }
        }
    }

    /// Closer recording that it ran
    pub struct RecordingCloser {
        pub name: &'static str,
        pub fail: bool,
        pub log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Closer for RecordingCloser {
        fn name(&self) -> &str {
            self.name
        }

        fn close(self: Box<Self>) -> TracerResult<()> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(TracerError::Close {
                    name: self.name.to_string(),
                    reason: "simulated".to_string(),
                });
            }
            Ok(())
        }
    }
}
