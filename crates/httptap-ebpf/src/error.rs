//! Tracer error type

use httptap_core::tracer::ProbeRole;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up or tearing down a tracer
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to read eBPF object '{path}': {source}")]
    ObjectRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(target_os = "linux")]
    #[error("Failed to load eBPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("Program '{0}' not found in eBPF object")]
    ProgramNotFound(String),

    #[cfg(target_os = "linux")]
    #[error("Program '{name}' failed: {source}")]
    Program {
        name: String,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("Required probe on '{function}' ({role}) failed to attach: {reason}")]
    RequiredProbe {
        function: &'static str,
        role: ProbeRole,
        reason: String,
    },

    #[error("Map '{0}' not found in eBPF object")]
    MapNotFound(&'static str),

    #[cfg(target_os = "linux")]
    #[error("Map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("Socket filter error: {0}")]
    SocketFilter(String),

    #[error("Failed to release {name}: {reason}")]
    Close { name: String, reason: String },

    #[error("Not supported on this platform")]
    NotSupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TracerResult<T> = Result<T, TracerError>;
