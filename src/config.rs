//! Optional per-directory configuration read from `.platemeta.yaml`.

use crate::session::JoinScope;
use crate::types::Field;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE: &str = ".platemeta.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference CSV loaded before running a script or join.
    pub reference: Option<PathBuf>,
    pub join_scope: JoinScope,
    /// Fields rendered by `render`, in order.
    pub report_fields: Vec<Field>,
    pub title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference: None,
            join_scope: JoinScope::All,
            report_fields: Field::ALL.to_vec(),
            title: "Plate Metadata".to_string(),
        }
    }
}

impl Config {
    /// Resolve a relative reference path against the directory the config
    /// was loaded from.
    fn anchored(mut self, dir: &Path) -> Self {
        if let Some(reference) = self.reference.take() {
            self.reference = Some(if reference.is_relative() {
                dir.join(reference)
            } else {
                reference
            });
        }
        self
    }
}

/// Read the config file in `dir`. A missing or unparsable file yields the
/// defaults.
pub fn load_config(dir: &Path) -> Config {
    let path = dir.join(CONFIG_FILE);
    let Ok(content) = fs::read_to_string(&path) else {
        return Config::default();
    };
    match serde_yaml::from_str::<Config>(&content) {
        Ok(config) => config.anchored(dir),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring invalid config");
            Config::default()
        }
    }
}
