//! Core building blocks for command-post.
//!
//! Holds the pieces every other crate leans on: the TOML configuration, the
//! durable key/value store standing in for the UI's local storage, the
//! persisted session identity, and the task types handed between the panel
//! and the assistant launcher.

pub mod config;
pub mod identity;
pub mod storage;
pub mod types;
