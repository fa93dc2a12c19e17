//! # tools: command line front end for pseudo-cell generation and methylation rates

#![deny(missing_docs)]

/// CSV input and output of labeled matrices and tables
pub mod io;
