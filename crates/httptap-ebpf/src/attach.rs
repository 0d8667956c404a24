//! Loading the kernel-side object and installing a tracer's probes

use aya::programs::links::Link;
use aya::programs::socket_filter::SocketFilterLink;
use aya::programs::{KProbe, ProbeKind, SocketFilter};
use aya::{Ebpf, EbpfLoader};
use httptap_core::tracer::{ConstantValue, ProbeDeclaration, ProbeRole, TargetProcess, Tracer};
use std::collections::BTreeSet;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{TracerError, TracerResult};
use crate::forward::Closer;

/// A loaded object with its probes and socket filters in place
pub struct Attachment {
    pub ebpf: Ebpf,
    pub filters: Vec<FilterSocket>,
}

/// Kernel symbol names to try for a declared function, most specific first
///
/// Syscall handlers carry an architecture prefix on recent kernels.
pub fn symbol_candidates(function: &str, is_syscall: bool, arch: &str) -> Vec<String> {
    let prefix = match arch {
        "x86_64" => Some("__x64_"),
        "aarch64" => Some("__arm64_"),
        _ => None,
    };

    let mut candidates = Vec::with_capacity(2);
    if is_syscall {
        if let Some(prefix) = prefix {
            candidates.push(format!("{}{}", prefix, function));
        }
    }
    candidates.push(function.to_string());
    candidates
}

/// Load the tracer's object from `object_path` and attach everything it
/// declares
///
/// A required probe that cannot be attached fails the whole setup; an
/// optional one is logged and skipped.
pub fn load_and_attach(
    tracer: &dyn Tracer,
    object_path: &Path,
    target: Option<&TargetProcess>,
) -> TracerResult<Attachment> {
    let bytes = std::fs::read(object_path).map_err(|source| TracerError::ObjectRead {
        path: object_path.to_path_buf(),
        source,
    })?;
    info!(
        "Loading eBPF object {} ({} bytes)",
        object_path.display(),
        bytes.len()
    );

    let constants: Vec<(&'static str, u32)> = tracer
        .constants(target)
        .into_iter()
        .map(|(name, value)| match value {
            ConstantValue::U32(v) => (name, v),
        })
        .collect();

    let mut loader = EbpfLoader::new();
    for (name, value) in &constants {
        debug!("setting constant {} = {}", name, value);
        loader.set_global(*name, value, false);
    }
    let mut ebpf = loader.load(&bytes)?;

    let mut loaded = BTreeSet::new();
    let mut attached = 0;
    for probe in tracer.kprobes() {
        match attach_kprobe(&mut ebpf, &probe, &mut loaded) {
            Ok(symbol) => {
                debug!(
                    "attached {} to {} ({}, {})",
                    probe.program, symbol, probe.role, probe.source
                );
                attached += 1;
            }
            Err(reason) if probe.required => {
                return Err(TracerError::RequiredProbe {
                    function: probe.function,
                    role: probe.role,
                    reason,
                });
            }
            Err(reason) => {
                warn!(
                    "skipping optional probe on {} ({}): {}",
                    probe.function, probe.role, reason
                );
            }
        }
    }

    let mut filters = Vec::new();
    for name in tracer.socket_filters() {
        filters.push(attach_socket_filter(&mut ebpf, name)?);
    }

    info!(
        "{}: {} probes and {} socket filters attached",
        tracer.name(),
        attached,
        filters.len()
    );

    Ok(Attachment { ebpf, filters })
}

fn attach_kprobe(
    ebpf: &mut Ebpf,
    probe: &ProbeDeclaration,
    loaded: &mut BTreeSet<&'static str>,
) -> Result<String, String> {
    let program: &mut KProbe = ebpf
        .program_mut(probe.program)
        .ok_or_else(|| format!("program '{}' not found", probe.program))?
        .try_into()
        .map_err(|e| format!("program '{}': {}", probe.program, e))?;

    let kind_matches = matches!(
        (probe.role, program.kind()),
        (ProbeRole::Entry, ProbeKind::KProbe) | (ProbeRole::Exit, ProbeKind::KRetProbe)
    );
    if !kind_matches {
        return Err(format!(
            "program '{}' is a {:?}, not an {} probe",
            probe.program,
            program.kind(),
            probe.role
        ));
    }

    if !loaded.contains(probe.program) {
        program
            .load()
            .map_err(|e| format!("loading '{}': {}", probe.program, e))?;
        loaded.insert(probe.program);
    }

    let mut last_error = String::new();
    for symbol in symbol_candidates(probe.function, probe.is_syscall(), std::env::consts::ARCH) {
        match program.attach(&symbol, 0) {
            Ok(_) => return Ok(symbol),
            Err(e) => {
                debug!("attaching {} to {} failed: {}", probe.program, symbol, e);
                last_error = e.to_string();
            }
        }
    }
    Err(last_error)
}

fn attach_socket_filter(ebpf: &mut Ebpf, name: &'static str) -> TracerResult<FilterSocket> {
    let program: &mut SocketFilter = ebpf
        .program_mut(name)
        .ok_or_else(|| TracerError::ProgramNotFound(name.to_string()))?
        .try_into()
        .map_err(|source| TracerError::Program {
            name: name.to_string(),
            source,
        })?;
    program.load().map_err(|source| TracerError::Program {
        name: name.to_string(),
        source,
    })?;

    let socket = open_raw_socket()
        .map_err(|e| TracerError::SocketFilter(format!("opening raw socket: {}", e)))?;
    let link = program
        .attach(&socket)
        .and_then(|link_id| program.take_link(link_id))
        .map_err(|source| TracerError::Program {
            name: name.to_string(),
            source,
        })?;

    debug!("socket filter {} bound to raw socket", name);
    Ok(FilterSocket { name, link, socket })
}

/// Raw packet socket bound to every interface
fn open_raw_socket() -> io::Result<OwnedFd> {
    let protocol = (libc::ETH_P_ALL as u16).to_be() as libc::c_int;
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            protocol,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Raw socket carrying a socket filter program
///
/// The link is owned here rather than by the object, so the filter is
/// detached (SO_DETACH_BPF) while the socket is still open.
pub struct FilterSocket {
    name: &'static str,
    link: SocketFilterLink,
    socket: OwnedFd,
}

impl Closer for FilterSocket {
    fn name(&self) -> &str {
        self.name
    }

    fn close(self: Box<Self>) -> TracerResult<()> {
        let FilterSocket { name, link, socket } = *self;
        let detached = link.detach().map_err(|e| TracerError::Close {
            name: name.to_string(),
            reason: e.to_string(),
        });
        drop(socket);
        detached
    }
}

/// The loaded object; dropping it detaches its probes and frees its maps
pub struct LoadedObject(pub Ebpf);

impl Closer for LoadedObject {
    fn name(&self) -> &str {
        "eBPF object"
    }

    fn close(self: Box<Self>) -> TracerResult<()> {
        drop(self.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_candidates_on_x86() {
        assert_eq!(
            symbol_candidates("sys_accept4", true, "x86_64"),
            vec!["__x64_sys_accept4", "sys_accept4"]
        );
    }

    #[test]
    fn test_syscall_candidates_on_arm() {
        assert_eq!(
            symbol_candidates("sys_connect", true, "aarch64"),
            vec!["__arm64_sys_connect", "sys_connect"]
        );
    }

    #[test]
    fn test_kernel_function_has_single_candidate() {
        assert_eq!(
            symbol_candidates("tcp_rcv_established", false, "x86_64"),
            vec!["tcp_rcv_established"]
        );
        assert_eq!(
            symbol_candidates("sys_exit", true, "riscv64"),
            vec!["sys_exit"]
        );
    }
}
