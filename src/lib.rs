//! Handoff command line
//!
//! Exposes the CLI modules for integration testing

pub mod cli;
