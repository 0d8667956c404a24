//! Kernel record decoder
//!
//! Turns a ring-buffer record into an [`HttpEvent`]. Only structurally short
//! input is an error; a payload window without the expected delimiters
//! decodes to empty method and URL fields.

use httptap_core::events::{DecodeError, HttpEvent, RawHttpEvent, TraceRecord};
use std::net::Ipv6Addr;
use std::sync::Arc;

use crate::resolver::ProcessResolver;

/// Decoder for raw HTTP events
#[derive(Clone)]
pub struct EventDecoder {
    /// Present in system-wide mode only
    resolver: Option<Arc<ProcessResolver>>,
}

impl EventDecoder {
    /// Decoder for a single pre-selected target, process names are left empty
    pub fn single_target() -> Self {
        Self { resolver: None }
    }

    /// Decoder that attributes every event to a process name
    pub fn system_wide(resolver: Arc<ProcessResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<HttpEvent, DecodeError> {
        let raw = RawHttpEvent::parse(bytes)?;
        let (method, url) = request_line(&raw.buf);

        let process_name = match &self.resolver {
            Some(resolver) => resolver.resolve(raw.pid),
            None => String::new(),
        };

        Ok(HttpEvent {
            method,
            url,
            host: render_addr(&raw.conn_info.d_addr),
            peer: render_addr(&raw.conn_info.s_addr),
            process_name,
            raw,
        })
    }

    pub fn decode_record(&self, bytes: &[u8]) -> Result<TraceRecord, DecodeError> {
        self.decode(bytes).map(TraceRecord::from)
    }
}

/// Split the start of a request line into method and URL
///
/// The method is everything before the first space and the URL everything
/// between the first and second space. A missing first space yields two
/// empty strings, a missing second space an empty URL.
pub fn request_line(buf: &[u8]) -> (String, String) {
    let Some(first) = buf.iter().position(|&b| b == b' ') else {
        return (String::new(), String::new());
    };
    let method = String::from_utf8_lossy(&buf[..first]).into_owned();

    let rest = &buf[first + 1..];
    let url = match rest.iter().position(|&b| b == b' ') {
        Some(second) => String::from_utf8_lossy(&rest[..second]).into_owned(),
        None => String::new(),
    };

    (method, url)
}

/// Render a 16-byte address, IPv4-mapped values as dotted decimal
pub fn render_addr(addr: &[u8; 16]) -> String {
    Ipv6Addr::from(*addr).to_canonical().to_string()
}
