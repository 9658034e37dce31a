pub mod archive;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod orchestrator;
pub mod package;
pub mod process;
pub mod signature;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::UpdateError;
