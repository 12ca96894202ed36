//! End-to-end tests driving the binary with a fake cargo.

#![cfg(unix)]

mod build_tests;
mod common;
mod gc_tests;
