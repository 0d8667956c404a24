//! Host checks run before loading the kernel-side object

use std::fmt;
use std::path::Path;
use tracing::warn;

/// Running kernel release, as major.minor.patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Check if the BPF filesystem is mounted
pub fn check_ebpf_available() -> bool {
    if !Path::new("/sys/fs/bpf").exists() {
        warn!("BPF filesystem not mounted at /sys/fs/bpf");
        return false;
    }

    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        warn!("BTF not available, CO-RE relocations may fail");
    }

    true
}

/// Kernel version of the running host
pub fn kernel_version() -> Option<KernelVersion> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok()?;
    parse_kernel_release(&release)
}

/// Parse an osrelease string such as `6.8.0-45-generic`
///
/// A missing patch component is treated as 0.
pub fn parse_kernel_release(release: &str) -> Option<KernelVersion> {
    let mut parts = release.trim().split('.');

    let major = leading_number(parts.next()?)?;
    let minor = leading_number(parts.next()?)?;
    let patch = parts.next().and_then(leading_number).unwrap_or(0);

    Some(KernelVersion {
        major,
        minor,
        patch,
    })
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

/// Check if running as root
#[cfg(target_os = "linux")]
pub fn is_root() -> bool {
    unsafe { libc::getuid() == 0 }
}

#[cfg(not(target_os = "linux"))]
pub fn is_root() -> bool {
    false
}

/// Lift the locked memory limit, needed for map allocation on kernels
/// older than 5.11
#[cfg(target_os = "linux")]
pub fn bump_memlock_rlimit() -> bool {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("failed to remove limit on locked memory (ret={})", ret);
        false
    } else {
        true
    }
}
