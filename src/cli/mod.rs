//! CLI module for reapr - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for single passes,
//! dry-run planning and periodic reaping.

pub mod commands;

pub use commands::Cli;
