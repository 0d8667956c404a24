//! The HTTP tracer
//!
//! Declares the kernel probes, constants and socket filter that make up the
//! HTTP tracer, and on Linux drives them: load, attach, then forward decoded
//! events until shutdown.

use httptap_core::config::TracerSettings;
use httptap_core::tracer::{Constants, ProbeDeclaration, ProgramVariant, TargetProcess, Tracer};

use crate::constants;
use crate::linux_proc::ProcFs;
use crate::probes::{self, SOCKET_HTTP_FILTER};

/// Kernel-probe HTTP tracer
#[derive(Debug, Clone)]
pub struct HttpTracer {
    settings: TracerSettings,
}

impl HttpTracer {
    pub fn new(settings: TracerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TracerSettings {
        &self.settings
    }
}

impl Tracer for HttpTracer {
    fn name(&self) -> &str {
        "http-tracer"
    }

    fn variant(&self) -> ProgramVariant {
        self.settings.variant()
    }

    fn constants(&self, target: Option<&TargetProcess>) -> Constants {
        constants::constants(self.settings.system_wide, target, &ProcFs::default())
    }

    fn kprobes(&self) -> Vec<ProbeDeclaration> {
        probes::kprobes(self.settings.system_wide)
    }

    fn socket_filters(&self) -> Vec<&'static str> {
        vec![SOCKET_HTTP_FILTER]
    }
}

#[cfg(target_os = "linux")]
mod run {
    use httptap_core::events::TraceRecord;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc};
    use tracing::info;

    use super::HttpTracer;
    use crate::attach::{load_and_attach, Attachment, LoadedObject};
    use crate::decoder::EventDecoder;
    use crate::error::{TracerError, TracerResult};
    use crate::forward::{forward_ringbuf, CloserSet, ForwardStats};
    use crate::linux_proc::ProcFs;
    use crate::loader::{bump_memlock_rlimit, check_ebpf_available, kernel_version};
    use crate::maps::{DeadPidMap, RingBufSource};
    use crate::probes::{DEAD_PIDS_MAP, EVENTS_MAP};
    use crate::resolver::ProcessResolver;

    impl HttpTracer {
        /// Attach and forward decoded records into `tx` until `shutdown`
        /// fires, the ring buffer fails, or `tx` is closed
        pub async fn run(
            &self,
            shutdown: broadcast::Receiver<()>,
            tx: mpsc::Sender<TraceRecord>,
        ) -> TracerResult<ForwardStats> {
            match kernel_version() {
                Some(version) => info!("Kernel version {}", version),
                None => info!("Kernel version unknown"),
            }
            check_ebpf_available();
            bump_memlock_rlimit();

            let target = self.settings.target();
            let Attachment { mut ebpf, filters } =
                load_and_attach(self, &self.settings.object_path(), target.as_ref())?;

            let mut closers = CloserSet::new();
            for filter in filters {
                closers.push(Box::new(filter));
            }

            let events = ebpf
                .take_map(EVENTS_MAP)
                .ok_or(TracerError::MapNotFound(EVENTS_MAP))?;

            let decoder = if self.settings.system_wide {
                let dead = ebpf
                    .take_map(DEAD_PIDS_MAP)
                    .ok_or(TracerError::MapNotFound(DEAD_PIDS_MAP))?;
                let resolver = ProcessResolver::new(ProcFs::default(), DeadPidMap::new(dead)?);
                EventDecoder::system_wide(Arc::new(resolver))
            } else {
                EventDecoder::single_target()
            };

            let source = RingBufSource::new(events)?;
            closers.push(Box::new(LoadedObject(ebpf)));

            info!(
                system_wide = self.settings.system_wide,
                pid = ?target.map(|t| t.pid),
                "HTTP tracer running"
            );

            Ok(forward_ringbuf(
                source,
                move |bytes: &[u8]| decoder.decode_record(bytes),
                closers,
                shutdown,
                tx,
            )
            .await)
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl HttpTracer {
    pub async fn run(
        &self,
        _shutdown: tokio::sync::broadcast::Receiver<()>,
        _tx: tokio::sync::mpsc::Sender<httptap_core::events::TraceRecord>,
    ) -> crate::error::TracerResult<crate::forward::ForwardStats> {
        Err(crate::error::TracerError::NotSupported)
    }
}
