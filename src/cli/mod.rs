#![forbid(unsafe_code)]

//! Command-line front end helpers.
//!
//! The `lurql` binary is a thin clap layer over these functions: fixtures are
//! read from JSON, planned, optionally executed, and turned into serializable
//! reports.

/// `explain` and `run` commands and their reports.
pub mod commands;

/// JSON model dumps and query files.
pub mod fixture;
