//! Test harness for silt integration tests.

#![deny(unsafe_code)]

pub mod harness;

pub use harness::{init_tracing, TestFs};
