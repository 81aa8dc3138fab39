//! `stridechat config`: Configuration management commands.

use std::path::Path;
use stridechat_config::AppConfig;

use super::{CmdResult, load_config};

pub fn show(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn init(config_path: Option<&Path>, force: bool) -> CmdResult {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(AppConfig::config_path);
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("  Wrote {}", path.display());
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(AppConfig::config_path);
    println!("{}", path.display());
}
