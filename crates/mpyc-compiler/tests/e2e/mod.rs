//! End-to-end tests for the mpyc compiler
//!
//! These tests lower and resolve annotated Python modules, then run the
//! resolved IR on a reference interpreter that follows the object model
//! of the generated C.

mod harness;

pub use harness::*;
