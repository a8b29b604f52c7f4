pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{RetrySettings, Settings};

use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "LANDFORM_CONFIG_PATH";

/// Landform のグローバル設定ディレクトリ
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("landform");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// `dir` のプロジェクトの宣言ファイルを探す
///
/// 検索順:
/// 1. `LANDFORM_CONFIG_PATH`
/// 2. `dir` 直下: landform.local.kdl, landform.kdl
/// 3. `dir/.landform/landform.kdl`
pub fn find_declaration_file(dir: &Path) -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH)
        && !config_path.is_empty()
    {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigPathMissing(path));
    }

    let candidates = [
        dir.join("landform.local.kdl"),
        dir.join("landform.kdl"),
        dir.join(settings::PROJECT_DIR).join("landform.kdl"),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or(ConfigError::DeclarationNotFound)
}
