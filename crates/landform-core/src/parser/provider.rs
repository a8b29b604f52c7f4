//! provider ノードのパース

use super::{first_string, kdl_value_to_json, positional};
use crate::error::{FlowError, Result};
use crate::model::ProviderConfig;
use kdl::KdlNode;

/// `provider` ノードをパース
pub fn parse_provider(node: &KdlNode) -> Result<ProviderConfig> {
    let name = first_string(node)
        .ok_or_else(|| FlowError::InvalidConfig("provider requires a name".to_string()))?
        .to_string();

    let mut provider = ProviderConfig {
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if let Some(value) = positional(child).next() {
                let value = match kdl_value_to_json(value) {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                provider
                    .config
                    .insert(child.name().value().to_string(), value);
            }
        }
    }

    Ok(provider)
}
