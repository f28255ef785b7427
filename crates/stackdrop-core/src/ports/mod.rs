//! Port definitions
//!
//! Ports are the interfaces the crash pipeline depends on but does not
//! implement. The host application supplies them at registration.
//!
//! ## Ports Overview
//!
//! - [`IReportSender`] - hands a batch of decoded reports to a collector
//! - [`IMetadataExtractor`] - supplies app-specific key/value metadata at capture time

pub mod metadata;
pub mod sender;

pub use metadata::{DefaultMetadataExtractor, IMetadataExtractor};
pub use sender::IReportSender;
