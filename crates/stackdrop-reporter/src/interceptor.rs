//! Fault interceptor
//!
//! Chains onto the process panic hook. For every panic it captures the
//! fault, persists it through the [`ReportStore`] and then hands over to the
//! hook that was active before, so default panic output and any host hook
//! still run.
//!
//! Capture never panics and never prevents the previous hook from running:
//! every failure along the way is logged and swallowed.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use stackdrop_core::codec;
use stackdrop_core::config::Config;
use stackdrop_core::domain::{DeviceFacts, EncodeError, FormatVersion, StackFrame};
use stackdrop_core::ports::IMetadataExtractor;

use crate::backtrace;
use crate::fault::Fault;
use crate::store::{ReportStore, StoreError};

/// Name recorded for threads spawned without one
pub const UNNAMED_THREAD: &str = "<unnamed>";

/// Errors that stop a fault from being persisted
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Cannot count pending reports: {0}")]
    Count(#[source] io::Error),

    #[error("Cannot encode report: {0}")]
    Encode(#[from] EncodeError),

    #[error("Cannot store report: {0}")]
    Store(#[from] StoreError),
}

/// What happened to one intercepted fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Written to the given file
    Stored(PathBuf),
    /// Dropped because `max_pending` reports are already waiting
    CapReached { pending: usize },
    /// Dropped because this interceptor was already capturing on another path
    Busy,
    /// Capture failed; the error has been logged
    Failed,
}

// ============================================================================
// FaultInterceptor
// ============================================================================

/// Captures faults into the report store
pub struct FaultInterceptor {
    store: ReportStore,
    facts: DeviceFacts,
    extractor: Arc<dyn IMetadataExtractor>,
    max_pending: usize,
    capture_backtrace: bool,
    max_frames: usize,
    debug: bool,
    format_version: FormatVersion,
    busy: AtomicBool,
}

impl std::fmt::Debug for FaultInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInterceptor")
            .field("store", &self.store)
            .field("facts", &self.facts)
            .field("max_pending", &self.max_pending)
            .field("capture_backtrace", &self.capture_backtrace)
            .field("max_frames", &self.max_frames)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl FaultInterceptor {
    /// Creates an interceptor writing into `store`.
    ///
    /// `facts` are stamped on every record as given; apply any debug version
    /// prefix before calling this.
    pub fn new(
        store: ReportStore,
        facts: DeviceFacts,
        config: &Config,
        extractor: Arc<dyn IMetadataExtractor>,
    ) -> Self {
        Self {
            store,
            facts,
            extractor,
            max_pending: config.reports.max_pending,
            capture_backtrace: config.capture.backtrace,
            max_frames: config.capture.max_frames,
            debug: config.capture.debug,
            format_version: FormatVersion::CURRENT,
            busy: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    pub fn facts(&self) -> &DeviceFacts {
        &self.facts
    }

    /// Whether a capture is in progress
    pub fn is_capturing(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Captures frames for the current thread, honoring the capture settings.
    pub fn capture_frames(&self) -> Vec<StackFrame> {
        if !self.capture_backtrace {
            return Vec::new();
        }
        backtrace::capture_frames(self.max_frames)
    }

    /// Persists `fault`, then calls `next` whatever happened.
    pub fn intercept(&self, fault: &Fault, next: impl FnOnce()) -> CaptureOutcome {
        let outcome = match BusyGuard::acquire(&self.busy) {
            Some(_guard) => match self.persist(fault) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Failed to capture fault");
                    CaptureOutcome::Failed
                }
            },
            None => {
                warn!(thread = fault.thread_name(), "Fault raised while capturing, not recorded");
                CaptureOutcome::Busy
            }
        };
        next();
        outcome
    }

    /// Writes `fault` to the store unless the pending cap is reached.
    pub fn persist(&self, fault: &Fault) -> Result<CaptureOutcome, CaptureError> {
        let pending = self.store.count_pending().map_err(CaptureError::Count)?;
        if pending >= self.max_pending {
            info!(
                pending,
                max_pending = self.max_pending,
                "Pending report limit reached, fault not recorded"
            );
            return Ok(CaptureOutcome::CapReached { pending });
        }

        let metadata = self.collect_metadata();
        let record = fault.to_record(&self.facts, metadata, self.format_version);
        let text = codec::encode(&record)?;
        let path = self
            .store
            .write(&self.facts.package_version, text.as_bytes())?;

        if self.debug {
            debug!(
                path = %path.display(),
                exception_type = record.exception_type(),
                depth = record.depth(),
                frames = record.frames().len(),
                "Fault recorded"
            );
        } else {
            info!(path = %path.display(), "Fault recorded");
        }
        Ok(CaptureOutcome::Stored(path))
    }

    fn collect_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = self.extractor.extract();
        if self.format_version.escapes_fields() {
            return metadata;
        }
        if !metadata.is_empty() {
            warn!(
                format = %self.format_version,
                "Metadata is not supported by this report format, dropping it"
            );
            metadata.clear();
        }
        metadata
    }
}

/// Holds the busy flag for the duration of one capture
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Process-wide installation
// ============================================================================

static ACTIVE: OnceLock<Arc<FaultInterceptor>> = OnceLock::new();

/// Installs `interceptor` as the process panic hook, chained in front of
/// the current one.
///
/// Only the first call installs anything; later calls leave the existing
/// chain untouched and return `false`.
pub fn install(interceptor: FaultInterceptor) -> bool {
    let mut installed = false;
    ACTIVE.get_or_init(|| {
        let interceptor = Arc::new(interceptor);
        chain_panic_hook(Arc::clone(&interceptor));
        installed = true;
        interceptor
    });

    if installed {
        info!("Fault interceptor installed");
    } else {
        debug!("Fault interceptor already installed, keeping the existing chain");
    }
    installed
}

/// Whether an interceptor has been installed in this process
pub fn is_installed() -> bool {
    ACTIVE.get().is_some()
}

/// The installed interceptor, if any
pub fn active() -> Option<Arc<FaultInterceptor>> {
    ACTIVE.get().cloned()
}

fn chain_panic_hook(interceptor: Arc<FaultInterceptor>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let frames = if interceptor.is_capturing() {
            Vec::new()
        } else {
            interceptor.capture_frames()
        };
        let thread = std::thread::current();
        let fault = Fault::from_panic(
            thread.name().unwrap_or(UNNAMED_THREAD),
            info.payload(),
            info.location(),
            frames,
        );
        interceptor.intercept(&fault, || previous(info));
    }));
}
