//! Host registration
//!
//! One call at process start wires the whole pipeline:
//!
//! 1. pending reports from earlier runs are handed to the sender and the
//!    files they came from are deleted (on a worker thread by default),
//! 2. the fault interceptor is chained onto the panic hook.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stackdrop_reporter::{device, Registration};
//! # use stackdrop_core::{domain::CrashRecord, ports::IReportSender};
//! # struct Collector;
//! # impl IReportSender for Collector {
//! #     fn submit(&self, _: &[CrashRecord], _: &str) -> anyhow::Result<()> { Ok(()) }
//! # }
//!
//! let facts = device::detect("com.example.app", env!("CARGO_PKG_VERSION"));
//! let registered = Registration::new(facts, Arc::new(Collector)).register();
//! if registered.reports_pending() {
//!     println!("Reports from the previous run are being sent");
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use stackdrop_core::config::{Config, ConfigBuilder};
use stackdrop_core::domain::DeviceFacts;
use stackdrop_core::ports::{DefaultMetadataExtractor, IMetadataExtractor, IReportSender};

use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::interceptor::{self, FaultInterceptor};
use crate::store::ReportStore;

/// Collects everything needed to register the pipeline
pub struct Registration {
    facts: DeviceFacts,
    sender: Arc<dyn IReportSender>,
    extractor: Arc<dyn IMetadataExtractor>,
    config: Config,
}

impl Registration {
    pub fn new(facts: DeviceFacts, sender: Arc<dyn IReportSender>) -> Self {
        Self {
            facts,
            sender,
            extractor: Arc::new(DefaultMetadataExtractor),
            config: Config::default(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_metadata_extractor(mut self, extractor: Arc<dyn IMetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Directory the reports of this registration live in
    pub fn reports_dir(&self) -> PathBuf {
        self.config
            .reports
            .dir
            .clone()
            .unwrap_or_else(|| ReportStore::default_dir(&self.facts.package_name))
    }

    /// Starts dispatch of pending reports and installs the interceptor.
    pub fn register(self) -> Registered {
        let store = ReportStore::new(self.reports_dir());
        let facts = if self.config.capture.debug {
            self.facts.with_debug_version()
        } else {
            self.facts
        };

        let pending = store.list_pending();
        let reports_pending = !pending.is_empty();
        info!(
            package = %facts.package_name,
            version = %facts.package_version,
            dir = %store.dir().display(),
            pending = pending.len(),
            "Registering crash reporter"
        );

        let dispatch = if reports_pending {
            let dispatcher = Dispatcher::new(
                store.clone(),
                self.sender,
                facts.package_name.clone(),
                self.config.reports.decode_failure,
            );
            if self.config.reports.dispatch_in_background {
                match dispatcher.spawn(pending) {
                    Ok(handle) => DispatchState::Running(handle),
                    Err(e) => {
                        warn!(error = %e, "Cannot start dispatch thread, reports stay pending");
                        DispatchState::Idle
                    }
                }
            } else {
                DispatchState::Finished(dispatcher.dispatch(pending))
            }
        } else {
            DispatchState::Idle
        };

        let interceptor = FaultInterceptor::new(store, facts, &self.config, self.extractor);
        let interceptor_installed = interceptor::install(interceptor);

        Registered {
            reports_pending,
            interceptor_installed,
            dispatch,
        }
    }
}

enum DispatchState {
    Idle,
    Running(JoinHandle<DispatchSummary>),
    Finished(DispatchSummary),
}

/// Outcome of [`Registration::register`]
pub struct Registered {
    reports_pending: bool,
    interceptor_installed: bool,
    dispatch: DispatchState,
}

impl Registered {
    /// Whether reports from earlier runs were found
    pub fn reports_pending(&self) -> bool {
        self.reports_pending
    }

    /// Whether this call installed the interceptor. `false` when an earlier
    /// registration in this process already did.
    pub fn interceptor_installed(&self) -> bool {
        self.interceptor_installed
    }

    /// Waits for the dispatch to finish and returns what it did.
    ///
    /// `None` when there was nothing to dispatch or the worker died.
    pub fn wait(self) -> Option<DispatchSummary> {
        match self.dispatch {
            DispatchState::Idle => None,
            DispatchState::Finished(summary) => Some(summary),
            DispatchState::Running(handle) => match handle.join() {
                Ok(summary) => Some(summary),
                Err(_) => {
                    warn!("Dispatch thread panicked");
                    None
                }
            },
        }
    }
}

/// Registers with default settings and a cap of `max_pending` stored reports.
///
/// Returns whether reports from earlier runs were found.
pub fn register(facts: DeviceFacts, sender: Arc<dyn IReportSender>, max_pending: usize) -> bool {
    let config = ConfigBuilder::new().reports_max_pending(max_pending).build();
    Registration::new(facts, sender)
        .with_config(config)
        .register()
        .reports_pending()
}
