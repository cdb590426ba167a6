//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

use grove_engine::{create_factory, map_of, Factory, FactoryDef};
use serde_json::json;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Factory definition file shared by every hosted document
    pub factory_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let factory_path = env::var("GROVE_FACTORY").ok().map(PathBuf::from);

        Ok(Self {
            host,
            port,
            database_url,
            factory_path,
        })
    }

    /// Build the root factory for hosted documents.
    ///
    /// Without `GROVE_FACTORY` every document is a map of free-form models.
    pub fn load_factory(&self) -> Result<Factory, ConfigError> {
        match &self.factory_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::FactoryFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                parse_factory(&text)
            }
            None => Ok(default_factory()),
        }
    }
}

pub fn default_factory() -> Factory {
    map_of(&create_factory(json!({})))
}

fn parse_factory(text: &str) -> Result<Factory, ConfigError> {
    let def = FactoryDef::from_json(text).map_err(ConfigError::InvalidFactory)?;
    Ok(def.build())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Cannot read factory definition {path:?}: {source}")]
    FactoryFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid factory definition: {0}")]
    InvalidFactory(grove_engine::Error),
}
