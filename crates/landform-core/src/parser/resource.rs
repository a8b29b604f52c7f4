//! resource ノードのパース
//!
//! ```kdl
//! resource "subnet" "public" enabled=#true {
//!     vpc_id "${vpc.main.id}"
//!     cidr_block "10.0.1.0/24"
//!     depends-on "internet_gateway.main"
//!     tags {
//!         Name "public"
//!     }
//! }
//! ```

use super::{kdl_value_to_json, positional, property};
use crate::error::{FlowError, Result};
use crate::model::{Address, AttrExpr, ResourceSpec};
use kdl::{KdlNode, KdlValue};
use std::collections::{BTreeMap, HashSet};

/// `resource` ノードをパース
pub fn parse_resource(node: &KdlNode) -> Result<ResourceSpec> {
    let mut args = positional(node).filter_map(|v| v.as_string());
    let (resource_type, name) = match (args.next(), args.next()) {
        (Some(t), Some(n)) => (t, n),
        _ => {
            return Err(FlowError::InvalidConfig(
                "resource requires a type and a name: resource \"<type>\" \"<name>\"".to_string(),
            ));
        }
    };

    let address: Address = format!("{resource_type}.{name}").parse()?;
    let mut spec = ResourceSpec::new(address);

    if let Some(enabled) = property(node, "enabled") {
        spec.enabled = parse_bool(&spec.address, "enabled", enabled)?;
    }

    let mut repeated: HashSet<String> = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" | "depends_on" => {
                    for target in positional(child) {
                        let target = target.as_string().ok_or_else(|| {
                            FlowError::InvalidConfig(format!(
                                "{}: depends-on expects resource addresses",
                                spec.address
                            ))
                        })?;
                        spec.depends_on.insert(target.parse()?);
                    }
                }
                "provider" => {
                    spec.provider = positional(child)
                        .next()
                        .and_then(|v| v.as_string())
                        .map(|s| s.to_string());
                }
                "enabled" => {
                    if let Some(value) = positional(child).next() {
                        spec.enabled = parse_bool(&spec.address, "enabled", value)?;
                    }
                }
                "tags" => {
                    if let Some(tag_nodes) = child.children() {
                        for tag in tag_nodes.nodes() {
                            if let Some(value) = positional(tag).next() {
                                let value = match kdl_value_to_json(value) {
                                    serde_json::Value::String(s) => s,
                                    other => other.to_string(),
                                };
                                spec.tags.insert(tag.name().value().to_string(), value);
                            }
                        }
                    }
                }
                key => {
                    let expr = parse_attribute(&spec.address, child)?;
                    let is_block = child.children().is_some();
                    let merged = match spec.attributes.remove(key) {
                        None => expr,
                        // 同名ブロックの繰り返し（`ingress { }` など）はリストにまとめる
                        Some(AttrExpr::List(mut items)) if is_block && repeated.contains(key) => {
                            items.push(expr);
                            AttrExpr::List(items)
                        }
                        Some(existing @ AttrExpr::Map(_)) if is_block => {
                            repeated.insert(key.to_string());
                            AttrExpr::List(vec![existing, expr])
                        }
                        Some(_) => {
                            return Err(FlowError::InvalidConfig(format!(
                                "{}: attribute '{}' is declared more than once",
                                spec.address, key
                            )));
                        }
                    };
                    spec.attributes.insert(key.to_string(), merged);
                }
            }
        }
    }

    Ok(spec)
}

/// 属性ノードをパース
///
/// 子ブロックはマップ、複数引数はリスト、
/// 単一引数はスカラーになる。
fn parse_attribute(address: &Address, node: &KdlNode) -> Result<AttrExpr> {
    if let Some(children) = node.children() {
        let mut entries = BTreeMap::new();
        for child in children.nodes() {
            entries.insert(
                child.name().value().to_string(),
                parse_attribute(address, child)?,
            );
        }
        return Ok(AttrExpr::Map(entries));
    }

    let values: Vec<&KdlValue> = positional(node).collect();
    match values.as_slice() {
        [] => Err(FlowError::InvalidConfig(format!(
            "{}: attribute '{}' has no value",
            address,
            node.name().value()
        ))),
        [single] => parse_scalar(single),
        many => Ok(AttrExpr::List(
            many.iter()
                .map(|v| parse_scalar(v))
                .collect::<Result<Vec<_>>>()?,
        )),
    }
}

fn parse_scalar(value: &KdlValue) -> Result<AttrExpr> {
    match value.as_string() {
        Some(s) => AttrExpr::parse_str(s),
        None => Ok(AttrExpr::Literal(kdl_value_to_json(value))),
    }
}

fn parse_bool(address: &Address, key: &str, value: &KdlValue) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        FlowError::InvalidConfig(format!("{address}: '{key}' must be #true or #false"))
    })
}
