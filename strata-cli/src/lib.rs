//! Strata CLI - command-line runner for schema migrations and seed reconciliation.
//!
//! A project is described by `strata.toml`: connection settings, engine
//! options, and an ordered chain of packages. `strata` with no arguments
//! migrates the first package and, once it commits, starts a fresh process
//! for the next one.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod output;
