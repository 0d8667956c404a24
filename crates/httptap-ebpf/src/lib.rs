//! Linux kernel-probe HTTP tracer
//!
//! Loads a precompiled eBPF object, hooks the accept, connect and TCP receive
//! paths, and forwards every HTTP request the kernel side reports as an
//! [`httptap_core::HttpEvent`]. In system-wide mode events are attributed to
//! a process name through a bounded identity cache backed by /proc and a
//! kernel-maintained table of exited processes.

pub mod constants;
pub mod decoder;
pub mod error;
pub mod forward;
pub mod linux_proc;
pub mod loader;
pub mod probes;
pub mod resolver;
pub mod tracer;

#[cfg(target_os = "linux")]
pub mod attach;
#[cfg(target_os = "linux")]
pub mod maps;

pub use decoder::EventDecoder;
pub use error::{TracerError, TracerResult};
pub use forward::{forward_ringbuf, Closer, CloserSet, ForwardStats, RecordSource, StopReason};
pub use resolver::ProcessResolver;
pub use tracer::HttpTracer;
