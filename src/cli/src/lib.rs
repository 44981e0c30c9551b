//! rpm-lockfile CLI - lockfile generation and the result-caching wrapper.

pub mod cached;
pub mod commands;
pub mod logging;
