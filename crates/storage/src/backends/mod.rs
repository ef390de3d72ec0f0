//! Storage location backends.

pub mod filesystem;
