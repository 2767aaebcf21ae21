//! Hangar - resource cache, container and volume lifecycle for CI orchestrators
//!
//! Tracks which builds and resources use which resource caches, collects
//! the ones nothing needs anymore, and checks pipeline resources for new
//! versions under a lock shared through the database.

pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod gc;
pub mod lifecycle;
pub mod radar;
pub mod resource;
pub mod ui;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{HangarError, HangarResult};
