//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod inject;
pub(crate) mod listen;
pub(crate) mod maintenance;
pub(crate) mod ports;
