//! Unit tests for evolvr modules
//!
//! These tests drive the public API against temporary source trees and a
//! scripted code generator. No network I/O.

mod test_config;
mod test_ledger;
mod test_pipeline;
mod test_validator;
