use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Declaration file not found. Looked for:\n\
        - current directory: landform.local.kdl, landform.kdl\n\
        - ./.landform/landform.kdl\n\
        Set LANDFORM_CONFIG_PATH to point at a file directly"
    )]
    DeclarationNotFound,

    #[error("LANDFORM_CONFIG_PATH points at a missing file: {0}")]
    ConfigPathMissing(PathBuf),

    #[error("Invalid settings file {path}: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
