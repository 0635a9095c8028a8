//! Application-level utilities for the Clinivault CLI.
//!
//! This module provides:
//! - The per-invocation context (config, store path, master key)
//! - Master key input

mod context;
mod master_key;

pub use context::AppContext;
pub use master_key::read_master_key;
