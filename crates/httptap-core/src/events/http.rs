//! HTTP request events
//!
//! [`RawHttpEvent`] mirrors the record the kernel-side program writes into the
//! ring buffer and must be kept in sync with it:
//!
//! ```text
//! offset  size  field
//!      0    16  conn_info.s_addr   (IPv6 or IPv4-mapped IPv6)
//!     16    16  conn_info.d_addr
//!     32     4  pid                (little-endian)
//!     36   160  buf                (start of the TCP payload)
//! ```

use serde::Serialize;
use thiserror::Error;

/// Size of an address field (IPv6, IPv4 is mapped into it)
pub const ADDR_LEN: usize = 16;

/// Capacity of the payload window copied by the kernel-side program
pub const BUF_LEN: usize = 160;

const S_ADDR_OFFSET: usize = 0;
const D_ADDR_OFFSET: usize = S_ADDR_OFFSET + ADDR_LEN;
const PID_OFFSET: usize = D_ADDR_OFFSET + ADDR_LEN;
const BUF_OFFSET: usize = PID_OFFSET + 4;

/// Errors turning raw ring-buffer bytes into an event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated record: need at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Source and destination addresses of the observed connection
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawConnectionInfo {
    pub s_addr: [u8; ADDR_LEN],
    pub d_addr: [u8; ADDR_LEN],
}

impl RawConnectionInfo {
    pub const fn zeroed() -> Self {
        Self {
            s_addr: [0u8; ADDR_LEN],
            d_addr: [0u8; ADDR_LEN],
        }
    }
}

/// HTTP event as written by the kernel-side program
///
/// `buf` holds whatever prefix of the payload the kernel managed to copy. It
/// may be truncated anywhere and may contain embedded zero bytes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawHttpEvent {
    #[serde(skip)]
    pub conn_info: RawConnectionInfo,
    pub pid: u32,
    #[serde(skip)]
    pub buf: [u8; BUF_LEN],
}

impl RawHttpEvent {
    /// Wire size of a record
    pub const SIZE: usize = BUF_OFFSET + BUF_LEN;

    pub const fn zeroed() -> Self {
        Self {
            conn_info: RawConnectionInfo::zeroed(),
            pid: 0,
            buf: [0u8; BUF_LEN],
        }
    }

    /// Read a record from the front of `bytes`
    ///
    /// Bytes past [`RawHttpEvent::SIZE`] are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::Truncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let mut event = Self::zeroed();
        event
            .conn_info
            .s_addr
            .copy_from_slice(&bytes[S_ADDR_OFFSET..D_ADDR_OFFSET]);
        event
            .conn_info
            .d_addr
            .copy_from_slice(&bytes[D_ADDR_OFFSET..PID_OFFSET]);

        let mut pid = [0u8; 4];
        pid.copy_from_slice(&bytes[PID_OFFSET..BUF_OFFSET]);
        event.pid = u32::from_le_bytes(pid);

        event.buf.copy_from_slice(&bytes[BUF_OFFSET..Self::SIZE]);
        Ok(event)
    }

    /// Encode the record in its wire layout
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[S_ADDR_OFFSET..D_ADDR_OFFSET].copy_from_slice(&self.conn_info.s_addr);
        out[D_ADDR_OFFSET..PID_OFFSET].copy_from_slice(&self.conn_info.d_addr);
        out[PID_OFFSET..BUF_OFFSET].copy_from_slice(&self.pid.to_le_bytes());
        out[BUF_OFFSET..].copy_from_slice(&self.buf);
        out
    }
}

impl std::fmt::Debug for RawHttpEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = self.buf.iter().position(|&b| b == 0).unwrap_or(BUF_LEN);
        let preview = String::from_utf8_lossy(&self.buf[..end.min(64)]);

        f.debug_struct("RawHttpEvent")
            .field("conn_info", &self.conn_info)
            .field("pid", &self.pid)
            .field("buf", &preview)
            .finish()
    }
}

/// Decoded HTTP request event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpEvent {
    #[serde(flatten)]
    pub raw: RawHttpEvent,

    /// Request method, empty when the buffer has no space delimiter
    pub method: String,

    /// Request target, empty when it cannot be delimited
    pub url: String,

    /// Destination address
    pub host: String,

    /// Source address
    pub peer: String,

    /// Process name, only resolved in system-wide mode
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process_name: String,
}
