//! CLI subcommands

pub mod clear;
pub mod config;
pub mod list;
pub mod send;
pub mod trigger;
pub mod view;
