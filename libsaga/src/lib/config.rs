//! lib/config.rs
//!
//! This module contains the user-facing library settings, read from a yaml file in the
//! configuration folder of the user's home. The settings gate which adaptors the registry
//! accepts at startup; a missing file yields the defaults, so a configuration file is never
//! required.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::CONFIG_FILE_RPATH;
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{error, fmt, fs};
use tracing::debug;


//-------------------------------------------------------------------------------------------- ERROR


#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Reading(String),
    Parsing(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Reading(ref s) => write!(f, "Failed to read the configuration:\n{}", s),
            Error::Parsing(ref s) => write!(f, "Failed to parse the configuration:\n{}", s),
        }
    }
}


//----------------------------------------------------------------------------------------- SETTINGS


/// The library settings as declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Schemas the registry accepts bindings for. `None` accepts every schema.
    #[serde(default)]
    pub enabled_schemas: Option<Vec<String>>,
    /// Adaptors the registry refuses to register, by factory name.
    #[serde(default)]
    pub disabled_adaptors: Vec<String>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            enabled_schemas: None,
            disabled_adaptors: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads the settings from the configuration file in the user home, falling back to the
    /// defaults when no file exists.
    pub fn load() -> Result<Settings, Error> {
        match dirs::home_dir() {
            None => Ok(Settings::default()),
            Some(home) => {
                let path = home.join(PathBuf::from(CONFIG_FILE_RPATH));
                if path.exists() {
                    Settings::from_file(&path)
                } else {
                    debug!("No configuration file found, using the default settings");
                    Ok(Settings::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Settings, Error> {
        let content =
            fs::read_to_string(path).map_err(|e| Error::Reading(format!("{}", e)))?;
        Settings::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Settings, Error> {
        serde_yaml::from_str(content).map_err(|e| Error::Parsing(format!("{}", e)))
    }

    /// Whether bindings for this schema are accepted.
    pub fn schema_enabled(&self, schema: &str) -> bool {
        match &self.enabled_schemas {
            None => true,
            Some(enabled) => enabled.iter().any(|s| s == schema),
        }
    }

    /// Whether this adaptor factory is allowed to register.
    pub fn adaptor_enabled(&self, name: &str) -> bool {
        !self.disabled_adaptors.iter().any(|a| a == name)
    }
}


//-------------------------------------------------------------------------------------------- TESTS
