//! Event types produced by httptap tracers
//!
//! Every decoded kernel record becomes exactly one [`TraceRecord`] on the
//! outbound stream.

pub mod http;

pub use http::*;

use serde::Serialize;

/// All record types a tracer can emit
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", content = "data")]
pub enum TraceRecord {
    #[serde(rename = "http.request")]
    Http(HttpEvent),
}

impl TraceRecord {
    /// Process ID the record is attributed to
    pub fn pid(&self) -> u32 {
        match self {
            TraceRecord::Http(event) => event.raw.pid,
        }
    }
}

impl From<HttpEvent> for TraceRecord {
    fn from(event: HttpEvent) -> Self {
        TraceRecord::Http(event)
    }
}
