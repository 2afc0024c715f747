//! Motif CLI library - testable command implementations
//!
//! The binary in `main.rs` parses arguments and sets up logging; the work of
//! each subcommand lives in [`commands`] so it can be exercised from tests.

pub mod commands;
pub mod config;
