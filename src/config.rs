//! Persisted agent identity
//!
//! The record lives at `~/.fieldagent/config.json`:
//!
//! ```json
//! { "cliente_id": "acme", "server_url": "wss://saas-websocket.onrender.com" }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::helpers::prompt_line;

pub const DEFAULT_SERVER_URL: &str = "wss://saas-websocket.onrender.com";
pub const APP_DIR: &str = ".fieldagent";
pub const CONFIG_FILE: &str = "config.json";
pub const LOG_FILE: &str = "agent.log";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Client ID is not configured")]
    MissingClientId,
    #[error("Invalid Client ID")]
    InvalidClientId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    #[serde(rename = "cliente_id", default)]
    pub client_id: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            server_url: default_server_url(),
        }
    }
}

impl Identity {
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
    }
}

/// JSON file store rooted at the per-user application directory
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.fieldagent`
    pub fn default_location() -> Result<Self> {
        let home = home::home_dir().ok_or_else(|| anyhow!("Home directory not found"))?;
        Ok(Self::new(home.join(APP_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Missing file yields `None`; an unreadable or corrupt file is an error
    pub fn load(&self) -> Result<Option<Identity>> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let identity = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(identity))
    }

    pub fn save(&self, identity: &Identity) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.config_path();
        let json = serde_json::to_string_pretty(identity)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        log::info!("[Config] Configuration saved to {}", path.display());
        Ok(())
    }

    /// Merge startup overrides with the stored record
    ///
    /// An override is persisted before returning. Load and save failures are
    /// logged only, so an override can still repair a corrupt file and a
    /// read-only home does not stop the agent.
    pub fn resolve(&self, client_id: Option<&str>, server_url: Option<&str>) -> Identity {
        let mut identity = match self.load() {
            Ok(Some(identity)) => {
                log::info!("[Config] Configuration loaded: cliente_id = {}", identity.client_id);
                identity
            }
            Ok(None) => Identity::default(),
            Err(e) => {
                log::error!("[Config] Failed to load configuration: {:#}", e);
                Identity::default()
            }
        };

        let mut changed = false;
        if let Some(id) = client_id.map(str::trim).filter(|id| !id.is_empty()) {
            identity.client_id = id.to_string();
            log::info!("[Config] Client ID set from argument: {}", id);
            changed = true;
        }
        if let Some(url) = server_url.map(str::trim).filter(|url| !url.is_empty()) {
            identity.server_url = url.to_string();
            changed = true;
        }

        if changed {
            if let Err(e) = self.save(&identity) {
                log::error!("[Config] Failed to save configuration: {:#}", e);
            }
        }

        identity
    }

    /// Make sure a client id is present before anything tries to connect
    ///
    /// With `input` the user is asked for one and the answer is persisted;
    /// without it (non-interactive) a missing id is an error.
    pub fn require_client_id(
        &self,
        identity: Identity,
        input: Option<&mut dyn BufRead>,
    ) -> Result<Identity, ConfigError> {
        if identity.is_configured() {
            return Ok(identity);
        }

        let input = input.ok_or(ConfigError::MissingClientId)?;
        let client_id =
            prompt_line("Enter Client ID: ", input).ok_or(ConfigError::InvalidClientId)?;

        Ok(self.resolve(Some(&client_id), None))
    }
}
