//! httptap core - event types, tracer contract, and configuration
//!
//! This crate provides the foundational types shared by the tracer and the CLI:
//!
//! - **Events**: raw kernel records and the decoded records emitted downstream
//! - **Tracer**: probe declarations, injectable constants, program variants
//! - **Config**: TOML configuration with env overrides

pub mod config;
pub mod events;
pub mod tracer;

// Re-export commonly used types
pub use config::{ConfigError, ConfigLoader, TapConfig};
pub use events::{DecodeError, HttpEvent, RawConnectionInfo, RawHttpEvent, TraceRecord};
pub use tracer::{
    ConstantValue, Constants, ProbeDeclaration, ProbeRole, ProgramVariant, TargetProcess,
    TraceSource, Tracer,
};

/// httptap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
