//! Runtime constants injected into the kernel-side object
//!
//! In single-target mode the kernel-side program filters on the target's pid
//! and pid namespace. System-wide mode injects nothing and the program
//! observes every process.

use httptap_core::tracer::{ConstantValue, Constants, TargetProcess};
use std::io;
use tracing::warn;

/// Global holding the target pid
pub const CURRENT_PID: &str = "current_pid";

/// Global holding the target's pid namespace id
pub const CURRENT_PID_NS_ID: &str = "current_pid_ns_id";

/// Namespace id emitted when the real one cannot be looked up
pub const UNKNOWN_PID_NS_ID: u32 = 0;

/// Lookup of the pid namespace a process belongs to
pub trait NamespaceLookup {
    fn pid_namespace(&self, pid: u32) -> io::Result<u32>;
}

/// Constants for the given capture mode and target
pub fn constants(
    system_wide: bool,
    target: Option<&TargetProcess>,
    namespaces: &dyn NamespaceLookup,
) -> Constants {
    let mut constants = Constants::new();
    if system_wide {
        return constants;
    }

    let Some(target) = target else {
        warn!("no target process selected, kernel-side pid filtering is disabled");
        return constants;
    };

    constants.insert(CURRENT_PID, ConstantValue::U32(target.pid));

    let ns_id = match namespaces.pid_namespace(target.pid) {
        Ok(ns_id) => ns_id,
        Err(e) => {
            warn!(
                pid = target.pid,
                error = %e,
                "error while looking up namespace pid, namespace pid matching will not work"
            );
            UNKNOWN_PID_NS_ID
        }
    };
    constants.insert(CURRENT_PID_NS_ID, ConstantValue::U32(ns_id));

    constants
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedNamespace(io::Result<u32>);

    impl NamespaceLookup for FixedNamespace {
        fn pid_namespace(&self, _pid: u32) -> io::Result<u32> {
            match &self.0 {
                Ok(ns) => Ok(*ns),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    struct CountingNamespace(Cell<usize>);

    impl NamespaceLookup for CountingNamespace {
        fn pid_namespace(&self, _pid: u32) -> io::Result<u32> {
            self.0.set(self.0.get() + 1);
            Ok(1)
        }
    }

    #[test]
    fn test_single_target_constants() {
        let target = TargetProcess { pid: 1234 };
        let constants = constants(false, Some(&target), &FixedNamespace(Ok(4026531836)));

        assert_eq!(constants.len(), 2);
        assert_eq!(constants[CURRENT_PID], ConstantValue::U32(1234));
        assert_eq!(constants[CURRENT_PID_NS_ID], ConstantValue::U32(4026531836));
    }

    #[test]
    fn test_namespace_failure_still_emits_constant() {
        let target = TargetProcess { pid: 1234 };
        let failing = FixedNamespace(Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        let constants = constants(false, Some(&target), &failing);

        assert_eq!(constants[CURRENT_PID], ConstantValue::U32(1234));
        assert_eq!(
            constants[CURRENT_PID_NS_ID],
            ConstantValue::U32(UNKNOWN_PID_NS_ID)
        );
    }

    #[test]
    fn test_system_wide_has_no_constants() {
        let lookup = CountingNamespace(Cell::new(0));
        let target = TargetProcess { pid: 1 };

        assert!(constants(true, Some(&target), &lookup).is_empty());
        assert!(constants(true, None, &lookup).is_empty());
        assert_eq!(lookup.0.get(), 0);
    }

    #[test]
    fn test_missing_target_has_no_constants() {
        let lookup = CountingNamespace(Cell::new(0));
        assert!(constants(false, None, &lookup).is_empty());
    }
}
