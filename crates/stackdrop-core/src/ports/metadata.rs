//! Metadata extractor port
//!
//! Lets the host attach app-specific key/value pairs (build id, feature
//! flags, session id) to each captured report. The extractor runs inside
//! the panic hook, so it must be quick and must not panic.

use std::collections::BTreeMap;

use tracing::debug;

/// Supplies app-specific metadata for a report being captured
pub trait IMetadataExtractor: Send + Sync {
    /// Returns the metadata to store with the report
    fn extract(&self) -> BTreeMap<String, String>;
}

/// Extractor that contributes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMetadataExtractor;

impl IMetadataExtractor for DefaultMetadataExtractor {
    fn extract(&self) -> BTreeMap<String, String> {
        debug!("Default metadata extractor returns an empty map");
        BTreeMap::new()
    }
}

impl<F> IMetadataExtractor for F
where
    F: Fn() -> BTreeMap<String, String> + Send + Sync,
{
    fn extract(&self) -> BTreeMap<String, String> {
        self()
    }
}
