//! リソース宣言

use crate::model::{Address, AttrExpr};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// リソースひとつ分のあるべき状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// 一意なアドレス（タイプ + シンボル名）
    pub address: Address,

    /// 宣言で指定したプロバイダー。省略時はリソースタイプから解決
    pub provider: Option<String>,

    /// 属性名 -> 値または参照
    pub attributes: BTreeMap<String, AttrExpr>,

    /// 明示的な `depends-on`
    pub depends_on: BTreeSet<Address>,

    /// 任意のタグ
    pub tags: BTreeMap<String, String>,

    /// 無効化したリソースもグラフに残り、削除対象になる
    pub enabled: bool,
}

impl ResourceSpec {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            provider: None,
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            tags: BTreeMap::new(),
            enabled: true,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.address.resource_type
    }

    pub fn with_attribute(mut self, key: impl Into<String>, expr: AttrExpr) -> Self {
        self.attributes.insert(key.into(), expr);
        self
    }

    pub fn with_literal(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with_attribute(key, AttrExpr::literal(value))
    }

    pub fn with_dependency(mut self, address: Address) -> Self {
        self.depends_on.insert(address);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 属性内の `${...}` 参照から推論した依存
    pub fn referenced_addresses(&self) -> BTreeSet<Address> {
        self.attributes
            .values()
            .flat_map(|expr| expr.referenced_addresses())
            .collect()
    }

    /// 明示・推論の両方の依存
    pub fn dependencies(&self) -> BTreeSet<Address> {
        let mut deps = self.depends_on.clone();
        deps.extend(self.referenced_addresses());
        deps
    }
}
