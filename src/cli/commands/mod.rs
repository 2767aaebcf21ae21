//! CLI command implementations

pub mod check;
pub mod config;
pub mod containers;
pub mod gc;
pub mod pipeline;
pub mod reap;
pub mod volumes;

pub use check::execute as check;
pub use config::execute as config;
pub use containers::execute as containers;
pub use gc::execute as gc;
pub use pipeline::execute as pipeline;
pub use reap::execute as reap;
pub use volumes::execute as volumes;

use crate::config::{Config, ConfigManager};
use crate::db::Store;
use crate::error::HangarResult;

/// Open the store the config points at
async fn open_store(config: &Config) -> HangarResult<Store> {
    Store::open(ConfigManager::database_path(config), &config.database).await
}
