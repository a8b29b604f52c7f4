//! 実行時設定
//!
//! 優先度の低い順: 組み込みのデフォルト、`~/.config/landform/settings.yaml`、
//! `<project>/.landform/settings.yaml`、環境変数 `LANDFORM_PARALLELISM` と
//! `LANDFORM_LOCK_TIMEOUT`。コマンドラインフラグは呼び出し側で適用する。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const PROJECT_DIR: &str = ".landform";
pub const ENV_PARALLELISM: &str = "LANDFORM_PARALLELISM";
pub const ENV_LOCK_TIMEOUT: &str = "LANDFORM_LOCK_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// 同時に実行するプロバイダー操作の上限
    pub parallelism: usize,

    /// ステートロックの待機秒数
    pub lock_timeout_secs: u64,

    /// プロバイダー呼び出し1回あたりの上限秒数
    pub operation_timeout_secs: u64,

    /// これより古いロックは奪取する
    pub stale_lock_secs: u64,

    pub retry: RetrySettings,

    /// ステートディレクトリ（絶対パス以外はプロジェクトルート基準）
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            lock_timeout_secs: 30,
            operation_timeout_secs: 300,
            stale_lock_secs: 3600,
            retry: RetrySettings::default(),
            state_dir: None,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// 設定ファイル1つ分。省略したキーは下位レイヤーの値を保つ
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsLayer {
    parallelism: Option<usize>,
    lock_timeout_secs: Option<u64>,
    operation_timeout_secs: Option<u64>,
    stale_lock_secs: Option<u64>,
    retry: Option<RetryLayer>,
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryLayer {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
}

impl Settings {
    /// `project_root` のプロジェクトについて全レイヤーを読み込む
    pub fn load(project_root: &Path) -> Result<Self> {
        let global = dirs::config_dir().map(|dir| dir.join("landform").join(SETTINGS_FILE));
        Self::load_from(global.as_deref(), project_root)
    }

    /// グローバル設定のパスを明示する [`Settings::load`]
    pub fn load_from(global: Option<&Path>, project_root: &Path) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(global) = global {
            settings.merge_file(global)?;
        }
        settings.merge_file(&project_root.join(PROJECT_DIR).join(SETTINGS_FILE))?;
        settings.merge_env()?;

        Ok(settings)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        debug!(path = %path.display(), "Loading settings");

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(());
        }
        let layer: SettingsLayer =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        self.merge(layer, path)
    }

    fn merge(&mut self, layer: SettingsLayer, path: &Path) -> Result<()> {
        if let Some(v) = layer.parallelism {
            self.parallelism = v;
        }
        if let Some(v) = layer.lock_timeout_secs {
            self.lock_timeout_secs = v;
        }
        if let Some(v) = layer.operation_timeout_secs {
            self.operation_timeout_secs = v;
        }
        if let Some(v) = layer.stale_lock_secs {
            self.stale_lock_secs = v;
        }
        if let Some(v) = layer.state_dir {
            self.state_dir = Some(v);
        }
        if let Some(retry) = layer.retry {
            if let Some(v) = retry.max_attempts {
                self.retry.max_attempts = v;
            }
            if let Some(v) = retry.initial_delay_ms {
                self.retry.initial_delay_ms = v;
            }
            if let Some(v) = retry.max_delay_ms {
                self.retry.max_delay_ms = v;
            }
            if let Some(v) = retry.backoff_multiplier {
                if !v.is_finite() || v < 1.0 {
                    return Err(ConfigError::InvalidSettings {
                        path: path.to_path_buf(),
                        message: format!(
                            "retry.backoff_multiplier must be a finite number of at least 1.0, got {v}"
                        ),
                    });
                }
                self.retry.backoff_multiplier = v;
            }
        }
        Ok(())
    }

    fn merge_env(&mut self) -> Result<()> {
        if let Some(v) = env_number(ENV_PARALLELISM)? {
            self.parallelism = v as usize;
        }
        if let Some(v) = env_number(ENV_LOCK_TIMEOUT)? {
            self.lock_timeout_secs = v;
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    /// プロジェクトのステートディレクトリ
    pub fn state_dir(&self, project_root: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_root.join(dir),
            None => project_root.join(PROJECT_DIR),
        }
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    name: name.to_string(),
                    value,
                })
        }
        _ => Ok(None),
    }
}
