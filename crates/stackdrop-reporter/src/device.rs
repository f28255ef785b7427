//! Device facts detection
//!
//! Best-effort lookup of the machine model and OS release for hosts that
//! have no better source. Never includes hostname or username.

use stackdrop_core::domain::DeviceFacts;

/// Builds [`DeviceFacts`] for this machine.
///
/// The model comes from DMI (`/sys/class/dmi/id/product_name`) when
/// readable, otherwise from the target architecture. The OS version is the
/// kernel release from `/proc/version`, prefixed with the OS family.
pub fn detect(package_name: &str, package_version: &str) -> DeviceFacts {
    DeviceFacts::new(
        package_name,
        package_version,
        read_model(),
        read_os_version(),
    )
}

fn read_model() -> String {
    std::fs::read_to_string("/sys/class/dmi/id/product_name")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string())
}

fn read_os_version() -> String {
    let kernel = std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from));
    match kernel {
        Some(kernel) => format!("{} {}", std::env::consts::OS, kernel),
        None => std::env::consts::OS.to_string(),
    }
}
