//! # ext-tools: wrappers around external command line tools
//!
//! Genome browser setup with the JBrowse 2 CLI and motif scanning with FIMO. Every tool is
//! checked before it is used, and a tool that cannot be started is reported as a
//! [`MissingDependency`].

#![deny(missing_docs)]

/// Running external programs
pub mod process;

/// JBrowse 2 browser directory management
pub mod jbrowse;

/// Motif scanning over genomic intervals
pub mod motif;

#[cfg(all(test, unix))]
mod test_util;

pub use jbrowse::JBrowse;
pub use motif::{FimoScanner, Interval, MotifHit, MotifScanner};
pub use process::{ExternalTool, MissingDependency};
