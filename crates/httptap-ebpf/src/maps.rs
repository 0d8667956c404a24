//! Userspace views of the kernel-side maps

use async_trait::async_trait;
use aya::maps::{HashMap, Map, MapData, MapError, RingBuf};
use std::io;
use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::error::TracerResult;
use crate::forward::RecordSource;
use crate::linux_proc::COMM_LEN;
use crate::resolver::DeadPidTable;

/// Ring buffer read through the tokio reactor
pub struct RingBufSource {
    fd: AsyncFd<RingBuf<MapData>>,
}

impl RingBufSource {
    pub fn new(map: Map) -> TracerResult<Self> {
        let ring_buf = RingBuf::try_from(map)?;
        Ok(Self {
            fd: AsyncFd::new(ring_buf)?,
        })
    }
}

#[async_trait]
impl RecordSource for RingBufSource {
    async fn next_record(&mut self) -> io::Result<Vec<u8>> {
        loop {
            let mut guard = self.fd.readable_mut().await?;
            if let Some(item) = guard.get_inner_mut().next() {
                return Ok(item.to_vec());
            }
            guard.clear_ready();
        }
    }
}

/// Names of exited processes, keyed by pid
pub struct DeadPidMap {
    map: HashMap<MapData, u32, [u8; COMM_LEN]>,
}

impl DeadPidMap {
    pub fn new(map: Map) -> TracerResult<Self> {
        Ok(Self {
            map: HashMap::try_from(map)?,
        })
    }
}

impl DeadPidTable for DeadPidMap {
    fn lookup(&self, pid: u32) -> Option<[u8; COMM_LEN]> {
        match self.map.get(&pid, 0) {
            Ok(comm) => Some(comm),
            Err(MapError::KeyNotFound) => None,
            Err(e) => {
                debug!(pid, error = %e, "dead pid lookup failed");
                None
            }
        }
    }
}
