//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use hb_core::config::{self, OrchestratorConfig};

use crate::output::{print_info, print_success, print_warning};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_warning(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &OrchestratorConfig::default())
        .with_context(|| format!("Failed to write config to {:?}", path))?;

    print_success(&format!("Wrote default configuration to {:?}", path));
    print_info("Add clusters as [clusters.<name>] tables with login_node and username");
    Ok(())
}

/// Print the effective configuration as TOML
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    let config: OrchestratorConfig = if path.exists() {
        config::load_config(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        print_info(&format!("No config file at {:?}, showing defaults", path));
        OrchestratorConfig::default()
    };

    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Print the config file path
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        let loaded: OrchestratorConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.ipc_port, OrchestratorConfig::default().ipc_port);
    }

    #[test]
    fn test_init_keeps_existing_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ipc_port = 30000\n").unwrap();

        config_init(Some(&path), false).unwrap();
        let loaded: OrchestratorConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.ipc_port, 30000);

        config_init(Some(&path), true).unwrap();
        let loaded: OrchestratorConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.ipc_port, OrchestratorConfig::default().ipc_port);
    }
}
