//! Parallel preprocessing of block transactions.
//!
//! See [`preprocess`] for the pipeline and [`preprocess::Processor`] for the
//! entry point.

pub mod preprocess;
