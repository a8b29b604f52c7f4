//! KDLパーサー
//!
//! Landform の宣言ファイルをパースする。
//! ノードの種類ごとにモジュールを分けている。

mod provider;
mod resource;

use provider::parse_provider;
use resource::parse_resource;

use crate::error::Result;
use crate::model::Declaration;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// KDLファイルをパースして宣言を生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Declaration> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパースして宣言を生成
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Declaration> {
    let doc: KdlDocument = content.parse()?;

    let mut declaration = Declaration {
        name: default_name,
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(project_name) = first_string(node) {
                    declaration.name = project_name.to_string();
                }
            }
            "variables" => {
                declaration.variables.extend(parse_variables(node));
            }
            "provider" => {
                let provider = parse_provider(node)?;
                declaration.providers.insert(provider.name.clone(), provider);
            }
            "resource" => {
                declaration.resources.push(parse_resource(node)?);
            }
            other => {
                warn!(node = %other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(declaration)
}

fn parse_variables(node: &KdlNode) -> HashMap<String, serde_json::Value> {
    let mut variables = HashMap::new();
    if let Some(children) = node.children() {
        for var in children.nodes() {
            if let Some(value) = positional(var).next() {
                variables.insert(var.name().value().to_string(), kdl_value_to_json(value));
            }
        }
    }
    variables
}

/// ノードの位置引数（プロパティ名のないエントリ）
pub(crate) fn positional(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(KdlEntry::value)
}

/// ノードの `key=value` プロパティの値
pub(crate) fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(KdlEntry::value)
}

pub(crate) fn first_string(node: &KdlNode) -> Option<&str> {
    positional(node).next().and_then(|v| v.as_string())
}

/// KDLの値をJSONの値に変換
pub(crate) fn kdl_value_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}
