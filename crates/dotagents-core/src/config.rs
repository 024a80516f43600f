use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mappings::Client;
use crate::roots::CANONICAL_DIR_NAME;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unknown client in config: {0}")]
    UnknownClient(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DotagentsConfig {
    /// Client ids to manage (e.g. "claude", "codex"). Unset means all clients.
    pub clients: Option<Vec<String>>,
    /// Default for `apply --force`: replace conflicting real content.
    pub force: Option<bool>,
    /// Default for migrations: relink conflicting client dirs after copying.
    pub force_links: Option<bool>,
}

impl DotagentsConfig {
    pub fn parsed_clients(&self) -> Result<Option<Vec<Client>>, ConfigError> {
        let Some(values) = self.clients.as_ref() else {
            return Ok(None);
        };
        let mut clients = Vec::new();
        for value in values {
            let client =
                Client::parse(value).ok_or_else(|| ConfigError::UnknownClient(value.clone()))?;
            if !clients.contains(&client) {
                clients.push(client);
            }
        }
        Ok(Some(clients))
    }
}

pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".dotagents.toml")
}

pub fn global_config_path(home: &Path) -> PathBuf {
    home.join(CANONICAL_DIR_NAME).join("config.toml")
}

fn load_config_file(path: &Path) -> Result<Option<DotagentsConfig>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(toml::from_str::<DotagentsConfig>(&text)?))
}

pub fn write_config(path: &Path, config: &DotagentsConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

/// Project and global config files, loaded once. Values resolve per field:
/// project, then global, then the built-in default.
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
    pub project: Option<DotagentsConfig>,
    pub global: Option<DotagentsConfig>,
}

impl LayeredConfig {
    pub fn load(home: Option<&Path>, cwd: Option<&Path>) -> Result<Self, ConfigError> {
        let project = match cwd {
            Some(cwd) => load_config_file(&project_config_path(cwd))?,
            None => None,
        };
        let global = match home {
            Some(home) => load_config_file(&global_config_path(home))?,
            None => None,
        };
        Ok(Self { project, global })
    }

    fn layers(&self) -> [(Option<&DotagentsConfig>, &'static str); 2] {
        [
            (self.project.as_ref(), "project"),
            (self.global.as_ref(), "global"),
        ]
    }

    pub fn clients_with_source(&self) -> Result<(Vec<Client>, &'static str), ConfigError> {
        for (layer, source) in self.layers() {
            if let Some(clients) = layer.map(|c| c.parsed_clients()).transpose()?.flatten() {
                return Ok((clients, source));
            }
        }
        Ok((Client::ALL.to_vec(), "default"))
    }

    pub fn force_with_source(&self) -> (bool, &'static str) {
        for (layer, source) in self.layers() {
            if let Some(value) = layer.and_then(|c| c.force) {
                return (value, source);
            }
        }
        (false, "default")
    }

    pub fn force_links_with_source(&self) -> (bool, &'static str) {
        for (layer, source) in self.layers() {
            if let Some(value) = layer.and_then(|c| c.force_links) {
                return (value, source);
            }
        }
        (true, "default")
    }
}
