use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount};

pub const DEFAULT_INITIAL_SUPPLY: Amount = 65_536;
pub const DEFAULT_CREATOR: &str = "creator";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Construction parameters of a dividend token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    /// Receives the initial supply.
    pub creator: AccountId,
    pub initial_supply: Amount,
    /// Smallest accepted deposit; 0 accepts any amount.
    pub minimum_deposit: Amount,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            creator: DEFAULT_CREATOR.to_string(),
            initial_supply: DEFAULT_INITIAL_SUPPLY,
            minimum_deposit: 0,
        }
    }
}

impl TokenConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
