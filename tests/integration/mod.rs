//! Integration tests for full update runs
//!
//! A local HTTP server plays the GitHub release feed so the real client,
//! minisign verification and installers run end to end.

pub mod helpers;
pub mod pipeline;
