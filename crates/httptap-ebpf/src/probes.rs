//! Probe declaration table
//!
//! Kernel functions the HTTP tracer hooks, grouped by what they observe. The
//! program names match the sections of the kernel-side object.

use httptap_core::tracer::{ProbeDeclaration, ProbeRole, TraceSource};
use std::collections::BTreeSet;

pub const KPROBE_SYS_ACCEPT4: &str = "kprobe_sys_accept4";
pub const KRETPROBE_SYS_ACCEPT4: &str = "kretprobe_sys_accept4";
pub const KRETPROBE_SOCK_ALLOC: &str = "kretprobe_sock_alloc";
pub const KPROBE_TCP_RCV_ESTABLISHED: &str = "kprobe_tcp_rcv_established";
pub const KRETPROBE_SYS_CONNECT: &str = "kretprobe_sys_connect";
pub const KPROBE_TCP_CONNECT: &str = "kprobe_tcp_connect";
pub const KPROBE_SYS_EXIT: &str = "kprobe_sys_exit";

/// Socket filter that pre-selects HTTP traffic
pub const SOCKET_HTTP_FILTER: &str = "socket__http_filter";

/// Ring buffer the kernel-side program writes events to
pub const EVENTS_MAP: &str = "events";

/// pid to comm snapshot, filled by the exit probes
pub const DEAD_PIDS_MAP: &str = "dead_pids";

const fn probe(
    function: &'static str,
    role: ProbeRole,
    program: &'static str,
    source: TraceSource,
) -> ProbeDeclaration {
    ProbeDeclaration {
        function,
        required: true,
        role,
        program,
        source,
    }
}

/// Probes declared in every mode
pub const BASE_PROBES: [ProbeDeclaration; 8] = [
    // Both accept syscalls share one program pair. __sys_accept4 would cover
    // both but is more exposed to internal kernel changes.
    probe(
        "sys_accept",
        ProbeRole::Entry,
        KPROBE_SYS_ACCEPT4,
        TraceSource::InboundConnections,
    ),
    probe(
        "sys_accept",
        ProbeRole::Exit,
        KRETPROBE_SYS_ACCEPT4,
        TraceSource::InboundConnections,
    ),
    probe(
        "sys_accept4",
        ProbeRole::Entry,
        KPROBE_SYS_ACCEPT4,
        TraceSource::InboundConnections,
    ),
    probe(
        "sys_accept4",
        ProbeRole::Exit,
        KRETPROBE_SYS_ACCEPT4,
        TraceSource::InboundConnections,
    ),
    probe(
        "sock_alloc",
        ProbeRole::Exit,
        KRETPROBE_SOCK_ALLOC,
        TraceSource::InboundConnections,
    ),
    probe(
        "tcp_rcv_established",
        ProbeRole::Entry,
        KPROBE_TCP_RCV_ESTABLISHED,
        TraceSource::EstablishedPayload,
    ),
    probe(
        "sys_connect",
        ProbeRole::Exit,
        KRETPROBE_SYS_CONNECT,
        TraceSource::OutboundConnections,
    ),
    probe(
        "tcp_connect",
        ProbeRole::Entry,
        KPROBE_TCP_CONNECT,
        TraceSource::OutboundConnections,
    ),
];

/// Exit tracking, so names of processes that exit before their events are
/// decoded can still be resolved
pub const EXIT_PROBES: [ProbeDeclaration; 2] = [
    probe(
        "sys_exit",
        ProbeRole::Entry,
        KPROBE_SYS_EXIT,
        TraceSource::ProcessExit,
    ),
    probe(
        "sys_exit_group",
        ProbeRole::Entry,
        KPROBE_SYS_EXIT,
        TraceSource::ProcessExit,
    ),
];

/// Probes to attach for the given capture mode
pub fn kprobes(system_wide: bool) -> Vec<ProbeDeclaration> {
    let mut probes = BASE_PROBES.to_vec();
    if system_wide {
        probes.extend_from_slice(&EXIT_PROBES);
    }
    probes
}

/// Distinct programs referenced by a set of declarations
pub fn programs(probes: &[ProbeDeclaration]) -> BTreeSet<&'static str> {
    probes.iter().map(|p| p.program).collect()
}
