//! Stackdrop Core - Crash record model and durable report format
//!
//! This crate contains everything the crash-report pipeline agrees on:
//! - **Domain values** - `StackFrame`, `CrashRecord`, `DeviceFacts`
//! - **Report codec** - the line-oriented on-disk text format and its versions
//! - **Port definitions** - `IReportSender`, `IMetadataExtractor`
//! - **Configuration** - YAML configuration with validation and a builder
//!
//! # Architecture
//!
//! The domain and codec modules are pure and perform no I/O. Ports define
//! the trait interfaces that the host application (or adapter crates such
//! as `stackdrop-http`) implement. The capture and dispatch machinery lives
//! in `stackdrop-reporter`.

pub mod codec;
pub mod config;
pub mod domain;
pub mod ports;
