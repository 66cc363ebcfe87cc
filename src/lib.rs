//! restfuzz: coverage and diversity guided stateful fuzzing of REST APIs.
//!
//! The engine lives in `restfuzz-core`; this crate is the command line front
//! end:
//!
//! - [`args`]: command line flags
//! - [`runner`]: configuration layering, engine setup, report and corpus export
//! - [`iteration_log`]: JSONL log of every iteration
//! - [`paths`]: default output locations

pub mod args;
pub mod iteration_log;
pub mod paths;
pub mod runner;
