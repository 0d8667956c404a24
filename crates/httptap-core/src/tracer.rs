//! Tracer contract
//!
//! A tracer describes what an attacher has to do before its events can flow:
//! which kernel functions to hook, which programs serve them, which constants
//! to inject into the loaded object, and which socket filters to bind. The
//! tracer itself performs no attachment.

use std::collections::BTreeMap;
use std::fmt;

/// Where a kernel probe fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeRole {
    /// kprobe, runs on function entry
    Entry,
    /// kretprobe, runs on function return
    Exit,
}

impl fmt::Display for ProbeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeRole::Entry => f.write_str("entry"),
            ProbeRole::Exit => f.write_str("exit"),
        }
    }
}

/// Logical group a probe belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceSource {
    /// accept-family syscalls and socket allocation
    InboundConnections,
    /// receive path of established TCP connections
    EstablishedPayload,
    /// connect-family syscalls
    OutboundConnections,
    /// process exit paths, feeds the dead-process table
    ProcessExit,
}

impl fmt::Display for TraceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceSource::InboundConnections => "inbound",
            TraceSource::EstablishedPayload => "payload",
            TraceSource::OutboundConnections => "outbound",
            TraceSource::ProcessExit => "process-exit",
        };
        f.write_str(name)
    }
}

/// One kernel probe the attacher must (or may) install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeDeclaration {
    /// Kernel function to hook
    pub function: &'static str,

    /// A required probe that fails to attach aborts setup
    pub required: bool,

    /// Entry or exit
    pub role: ProbeRole,

    /// Name of the program inside the loaded object
    pub program: &'static str,

    /// Group the probe belongs to
    pub source: TraceSource,
}

impl ProbeDeclaration {
    /// Whether the hooked function is a syscall entry point
    pub fn is_syscall(&self) -> bool {
        self.function.starts_with("sys_")
    }
}

/// Value of a constant injected into the loaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantValue {
    U32(u32),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::U32(v) => write!(f, "{}", v),
        }
    }
}

/// Constants to inject, keyed by global variable name
pub type Constants = BTreeMap<&'static str, ConstantValue>;

/// Which build of the kernel-side object to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramVariant {
    #[default]
    Standard,
    /// Build with kernel-side debug output
    Debug,
}

impl ProgramVariant {
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            ProgramVariant::Debug
        } else {
            ProgramVariant::Standard
        }
    }

    /// Object file name of this variant
    pub fn object_name(&self) -> &'static str {
        match self {
            ProgramVariant::Standard => "http_sock.bpf.o",
            ProgramVariant::Debug => "http_sock_debug.bpf.o",
        }
    }
}

/// The single process a non-system-wide tracer is pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProcess {
    pub pid: u32,
}

/// Tracer interface consumed by an attacher
pub trait Tracer: Send + Sync {
    /// Tracer name, used in logs
    fn name(&self) -> &str;

    /// Object variant to load
    fn variant(&self) -> ProgramVariant;

    /// Constants to inject for the given target
    fn constants(&self, target: Option<&TargetProcess>) -> Constants;

    /// Kernel probes to attach
    fn kprobes(&self) -> Vec<ProbeDeclaration>;

    /// Socket filter programs to bind to a raw socket
    fn socket_filters(&self) -> Vec<&'static str> {
        Vec::new()
    }
}
