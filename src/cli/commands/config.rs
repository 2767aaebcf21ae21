//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{HangarError, HangarResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    config_path: Option<PathBuf>,
) -> HangarResult<()> {
    let manager = config_path.map_or_else(ConfigManager::new, ConfigManager::with_path);

    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(&manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut config = config.clone();
            set_value(&mut config, &key, &value)?;
            manager.save(&config).await?;
            let ctx = UiContext::detect();
            ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> HangarResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> HangarResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );
    Ok(())
}

fn set_value(config: &mut Config, key: &str, value: &str) -> HangarResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(HangarError::User(format!(
                    "Invalid log format: {}. Use text or json",
                    value
                )))
            }
        },

        ["database", "path"] => config.database.path = Some(PathBuf::from(value)),
        ["database", "max_connections"] => config.database.max_connections = parse_u32(value)?,
        ["database", "busy_timeout_secs"] => config.database.busy_timeout_secs = parse_u64(value)?,

        ["radar", "default_check_interval_secs"] => {
            config.radar.default_check_interval_secs = parse_u64(value)?
        }
        ["radar", "lock_lease_secs"] => config.radar.lock_lease_secs = parse_u64(value)?,
        ["radar", "check_session_ttl_secs"] => {
            config.radar.check_session_ttl_secs = parse_u64(value)?
        }
        ["radar", "external_url"] => config.radar.external_url = value.to_string(),

        ["gc", "one_off_build_grace_hours"] => {
            config.gc.one_off_build_grace_hours = parse_u32(value)?
        }

        ["worker", "name"] => config.worker.name = value.to_string(),

        _ => return Err(HangarError::User(format!("Unknown config key: {}", key))),
    }
    Ok(())
}

fn parse_u32(value: &str) -> HangarResult<u32> {
    value
        .parse()
        .map_err(|_| HangarError::User(format!("Invalid number: {}", value)))
}

fn parse_u64(value: &str) -> HangarResult<u64> {
    value
        .parse()
        .map_err(|_| HangarError::User(format!("Invalid number: {}", value)))
}
