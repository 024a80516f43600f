use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsops::absolutize;

pub const CANONICAL_DIR_NAME: &str = ".agents";
pub const BACKUP_DIR_NAME: &str = "backup";

#[derive(Debug, Error)]
pub enum RootError {
    #[error("Unable to resolve home dir; set DOTAGENTS_HOME, HOME or USERPROFILE")]
    MissingHome,
    #[error("Unable to resolve current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Project,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "global" | "user" => Some(Self::Global),
            "project" | "local" => Some(Self::Project),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for root resolution. Unset paths fall back to the environment.
#[derive(Debug, Clone, Default)]
pub struct RootOptions {
    pub scope: Scope,
    pub home: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoots {
    pub scope: Scope,
    pub base: PathBuf,
    pub canonical_root: PathBuf,
}

impl ResolvedRoots {
    pub fn new(scope: Scope, base: &Path) -> Result<Self, RootError> {
        let base = absolutize(base)?;
        let canonical_root = base.join(CANONICAL_DIR_NAME);
        Ok(Self {
            scope,
            base,
            canonical_root,
        })
    }

    pub fn backup_root(&self) -> PathBuf {
        self.canonical_root.join(BACKUP_DIR_NAME)
    }
}

pub fn resolve_roots(options: &RootOptions) -> Result<ResolvedRoots, RootError> {
    let base = match options.scope {
        Scope::Global => match options.home.as_ref() {
            Some(home) => home.clone(),
            None => resolve_user_home_dir().ok_or(RootError::MissingHome)?,
        },
        Scope::Project => match options.cwd.as_ref() {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        },
    };
    ResolvedRoots::new(options.scope, &base)
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    for key in ["DOTAGENTS_HOME", "HOME", "USERPROFILE"] {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }
    None
}
