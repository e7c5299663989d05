//! xr-cli: Command-line interface for Xeray
//!
//! Provides the `xeray` CLI for registering proxy nodes, editing their
//! inbound/outbound records and driving node lifecycle operations.

pub mod commands;
pub mod context;
pub mod output;
