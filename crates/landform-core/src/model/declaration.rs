use crate::model::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// パース済みの宣言（プロジェクトのあるべき状態の全体）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Declaration {
    /// プロジェクト名
    pub name: String,

    /// プロバイダー名ごとのプロバイダーブロック
    pub providers: BTreeMap<String, ProviderConfig>,

    /// 宣言順のリソース
    pub resources: Vec<ResourceSpec>,

    /// `variables` ブロックで宣言された変数（デフォルト値）
    pub variables: HashMap<String, serde_json::Value>,
}

impl Declaration {
    pub fn enabled_resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter().filter(|r| r.enabled)
    }

    pub fn disabled_resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter().filter(|r| !r.enabled)
    }
}

/// `provider "<name>" { ... }` ブロックの設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// プロバイダー名（local など）
    pub name: String,

    /// プロバイダー固有の設定
    pub config: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}
