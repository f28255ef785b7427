//! Device and package facts
//!
//! The strings embedded into every crash record. They are supplied once at
//! registration and threaded explicitly to the interceptor and dispatcher.

use serde::{Deserialize, Serialize};

/// Prefix added to the package version when capture runs in debug mode
pub const DEBUG_VERSION_PREFIX: &str = "DEBUG-";

/// Package and device information captured at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFacts {
    /// Package (application) name, passed to the sender with each batch
    pub package_name: String,
    /// Package version, embedded in report file names
    pub package_version: String,
    /// Device or machine model
    pub phone_model: String,
    /// Operating system release
    pub os_version: String,
}

impl DeviceFacts {
    /// Creates a new set of facts from the given strings
    pub fn new(
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        phone_model: impl Into<String>,
        os_version: impl Into<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            package_version: package_version.into(),
            phone_model: phone_model.into(),
            os_version: os_version.into(),
        }
    }

    /// Returns a copy whose package version carries the debug prefix
    ///
    /// Applying it twice does not stack the prefix.
    #[must_use]
    pub fn with_debug_version(&self) -> Self {
        let mut facts = self.clone();
        if !facts.package_version.starts_with(DEBUG_VERSION_PREFIX) {
            facts.package_version = format!("{DEBUG_VERSION_PREFIX}{}", self.package_version);
        }
        facts
    }
}
