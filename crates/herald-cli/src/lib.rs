//! Herald CLI library.
//!
//! This crate provides the `herald` command-line tool: demo scenarios that
//! exercise the dispatcher, plus config and priority-band inspection.

pub mod cli;
pub mod commands;
pub mod scenarios;
