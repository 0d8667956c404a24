//! Process information via the /proc filesystem
//!
//! Backs the live half of process identity resolution and the pid namespace
//! lookup used when building injectable constants.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::constants::NamespaceLookup;
use crate::resolver::ProcessTable;

/// Command name length (matches TASK_COMM_LEN in kernel)
pub const COMM_LEN: usize = 16;

/// A /proc tree, `/proc` unless pointed elsewhere
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_path(&self, pid: u32, leaf: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(leaf)
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessTable for ProcFs {
    fn comm(&self, pid: u32) -> Option<String> {
        let path = self.pid_path(pid, "comm");
        // Names set through prctl need not be UTF-8
        match fs::read(&path) {
            Ok(comm) => Some(String::from_utf8_lossy(&comm).trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(pid, "process no longer in {}", self.root.display());
                None
            }
            Err(e) => {
                debug!(pid, error = %e, "failed to read {}", path.display());
                None
            }
        }
    }
}

impl NamespaceLookup for ProcFs {
    fn pid_namespace(&self, pid: u32) -> io::Result<u32> {
        let link = fs::read_link(self.pid_path(pid, "ns/pid"))?;
        let target = link.to_string_lossy();
        parse_ns_link(&target).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected pid namespace link: {}", target),
            )
        })
    }
}

/// Parse a namespace link target of the form `pid:[4026531836]`
pub fn parse_ns_link(link: &str) -> Option<u32> {
    link.strip_prefix("pid:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Turn a fixed-size comm snapshot into a name
///
/// The kernel NUL-pads names shorter than [`COMM_LEN`]; a full-length name
/// has no terminator.
pub fn comm_from_snapshot(snapshot: &[u8]) -> String {
    let end = snapshot
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(snapshot.len());
    String::from_utf8_lossy(&snapshot[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fakes::FakeDeadPids;
    use crate::resolver::ProcessResolver;

    #[test]
    fn test_parse_ns_link() {
        assert_eq!(parse_ns_link("pid:[4026531836]"), Some(4026531836));
        assert_eq!(parse_ns_link("net:[4026531840]"), None);
        assert_eq!(parse_ns_link("pid:[]"), None);
        assert_eq!(parse_ns_link("pid:[12"), None);
    }

    #[test]
    fn test_comm_from_snapshot() {
        let mut snapshot = [0u8; COMM_LEN];
        snapshot[..5].copy_from_slice(b"nginx");
        assert_eq!(comm_from_snapshot(&snapshot), "nginx");

        assert_eq!(comm_from_snapshot(b"exactly16bytes!!"), "exactly16bytes!!");
        assert_eq!(comm_from_snapshot(b"java \n\0\0"), "java");
        assert_eq!(comm_from_snapshot(&[0u8; COMM_LEN]), "");
    }

    #[test]
    fn test_comm_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("42")).unwrap();
        fs::write(dir.path().join("42/comm"), "python3\n").unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.comm(42).as_deref(), Some("python3"));
        assert_eq!(procfs.comm(43), None);
    }

    #[test]
    fn test_comm_keeps_non_utf8_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("42")).unwrap();
        fs::write(dir.path().join("42/comm"), b"w\xffrker\n").unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.comm(42).as_deref(), Some("w\u{fffd}rker"));

        let resolver = ProcessResolver::new(procfs, FakeDeadPids::default());
        assert_eq!(resolver.resolve(42), "w\u{fffd}rker");
        assert_eq!(resolver.cached(42).as_deref(), Some("w\u{fffd}rker"));
    }

    #[test]
    fn test_unreadable_comm_falls_back_to_dead_table() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes the read fail without NotFound
        fs::create_dir_all(dir.path().join("42/comm")).unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.comm(42), None);

        let dead = FakeDeadPids::default();
        dead.record_exit(42, "worker");
        let resolver = ProcessResolver::new(procfs, dead.clone());
        assert_eq!(resolver.resolve(42), "worker");
        assert_eq!(dead.calls(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_namespace_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("42/ns")).unwrap();
        std::os::unix::fs::symlink("pid:[4026532198]", dir.path().join("42/ns/pid")).unwrap();
        fs::create_dir_all(dir.path().join("43/ns")).unwrap();
        std::os::unix::fs::symlink("garbage", dir.path().join("43/ns/pid")).unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(procfs.pid_namespace(42).unwrap(), 4026532198);
        assert_eq!(
            procfs.pid_namespace(43).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert!(procfs.pid_namespace(44).is_err());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_comm_self() {
        let procfs = ProcFs::default();
        let comm = procfs.comm(std::process::id()).unwrap();
        assert!(!comm.is_empty());
    }
}
