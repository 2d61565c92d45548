//! Shared binary plumbing: CLI parsing and logging setup.

pub mod common;
