//! 属性の評価
//!
//! グラフ構築後の第2パス。`${...}` 参照を参照先リソースの出力で置換する。
//! 作成・置換予定のリソースの出力はまだ確定していないため、
//! それらへの参照は [`UNKNOWN_VALUE`] に評価され、
//! [`Evaluated::unknown`] に記録される。

use crate::error::EvalError;
use crate::model::{Address, AttrExpr, Fragment, Reference, ResourceSpec};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// 依存先の適用後に初めて確定する値のプレースホルダー
pub const UNKNOWN_VALUE: &str = "(known after apply)";

/// 確定した属性値
pub type Attributes = BTreeMap<String, Value>;

/// 依存元から見たリソースの出力
#[derive(Debug, Clone, PartialEq)]
pub enum Outputs {
    Known(Attributes),

    /// 作成中または置換中
    Pending,
}

/// リソース属性の評価結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluated {
    pub values: Attributes,

    /// 適用後に値が確定するトップレベル属性
    pub unknown: BTreeSet<String>,
}

impl Evaluated {
    pub fn is_fully_known(&self) -> bool {
        self.unknown.is_empty()
    }
}

/// `spec` の全属性を評価
///
/// タグは `tags` マップ属性として扱う。
pub fn evaluate(
    spec: &ResourceSpec,
    outputs: &BTreeMap<Address, Outputs>,
) -> Result<Evaluated, EvalError> {
    let mut evaluated = Evaluated::default();

    for (key, expr) in &spec.attributes {
        let mut unknown = false;
        let value = evaluate_expr(&spec.address, expr, outputs, &mut unknown)?;
        if unknown {
            evaluated.unknown.insert(key.clone());
        }
        evaluated.values.insert(key.clone(), value);
    }

    if !spec.tags.is_empty() {
        let tags = spec
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        evaluated.values.insert("tags".to_string(), Value::Object(tags));
    }

    Ok(evaluated)
}

fn evaluate_expr(
    from: &Address,
    expr: &AttrExpr,
    outputs: &BTreeMap<Address, Outputs>,
    unknown: &mut bool,
) -> Result<Value, EvalError> {
    match expr {
        AttrExpr::Literal(value) => Ok(value.clone()),
        AttrExpr::Reference(reference) => match resolve(from, reference, outputs)? {
            Some(value) => Ok(value),
            None => {
                *unknown = true;
                Ok(Value::String(UNKNOWN_VALUE.to_string()))
            }
        },
        AttrExpr::Interpolated(fragments) => {
            let mut text = String::new();
            for fragment in fragments {
                match fragment {
                    Fragment::Text(t) => text.push_str(t),
                    Fragment::Reference(reference) => {
                        match resolve(from, reference, outputs)? {
                            Some(Value::String(s)) => text.push_str(&s),
                            Some(other) => text.push_str(&other.to_string()),
                            None => {
                                *unknown = true;
                                return Ok(Value::String(UNKNOWN_VALUE.to_string()));
                            }
                        }
                    }
                }
            }
            Ok(Value::String(text))
        }
        AttrExpr::List(items) => items
            .iter()
            .map(|item| evaluate_expr(from, item, outputs, unknown))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        AttrExpr::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate_expr(from, value, outputs, unknown)?);
            }
            Ok(Value::Object(map))
        }
    }
}

/// 参照先が未確定なら `Ok(None)`
fn resolve(
    from: &Address,
    reference: &Reference,
    outputs: &BTreeMap<Address, Outputs>,
) -> Result<Option<Value>, EvalError> {
    let attributes = match outputs.get(&reference.address) {
        Some(Outputs::Known(attributes)) => attributes,
        Some(Outputs::Pending) => return Ok(None),
        None => {
            return Err(EvalError::UnresolvedReference {
                from: from.clone(),
                to: reference.address.clone(),
            });
        }
    };

    let missing = || EvalError::MissingAttribute {
        from: from.clone(),
        reference: reference.to_string(),
    };

    let mut segments = reference.attribute.split('.');
    let head = segments.next().unwrap_or_default();
    let mut current = attributes.get(head).ok_or_else(missing)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(missing)?;
    }

    Ok(Some(current.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn known(pairs: &[(&str, Value)]) -> Outputs {
        Outputs::Known(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn subnet() -> ResourceSpec {
        ResourceSpec::new(addr("subnet.public"))
            .with_attribute("vpc_id", AttrExpr::parse_str("${vpc.main.id}").unwrap())
            .with_literal("cidr_block", "10.0.1.0/24")
            .with_tag("Name", "public")
    }

    #[test]
    fn test_known_reference() {
        let mut outputs = BTreeMap::new();
        outputs.insert(addr("vpc.main"), known(&[("id", json!("vpc-1234"))]));

        let evaluated = evaluate(&subnet(), &outputs).unwrap();
        assert!(evaluated.is_fully_known());
        assert_eq!(evaluated.values.get("vpc_id"), Some(&json!("vpc-1234")));
        assert_eq!(evaluated.values.get("tags"), Some(&json!({"Name": "public"})));
    }

    #[test]
    fn test_pending_reference_is_unknown() {
        let mut outputs = BTreeMap::new();
        outputs.insert(addr("vpc.main"), Outputs::Pending);

        let evaluated = evaluate(&subnet(), &outputs).unwrap();
        assert!(evaluated.unknown.contains("vpc_id"));
        assert_eq!(evaluated.unknown.len(), 1);
        assert_eq!(evaluated.values.get("vpc_id"), Some(&json!(UNKNOWN_VALUE)));
        assert_eq!(evaluated.values.get("cidr_block"), Some(&json!("10.0.1.0/24")));
    }

    #[test]
    fn test_missing_output_reference() {
        let err = evaluate(&subnet(), &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            EvalError::UnresolvedReference {
                from: addr("subnet.public"),
                to: addr("vpc.main"),
            }
        );
    }

    #[test]
    fn test_missing_attribute() {
        let mut outputs = BTreeMap::new();
        outputs.insert(addr("vpc.main"), known(&[("arn", json!("arn:vpc"))]));

        let err = evaluate(&subnet(), &outputs).unwrap_err();
        assert!(matches!(err, EvalError::MissingAttribute { reference, .. } if reference == "vpc.main.id"));
    }

    #[test]
    fn test_interpolation_and_nested_path() {
        let spec = ResourceSpec::new(addr("instance.game")).with_attribute(
            "user_data",
            AttrExpr::parse_str("bucket=${s3_bucket.state.bucket} port=${security_group.game.ingress.0.from_port}")
                .unwrap(),
        );

        let mut outputs = BTreeMap::new();
        outputs.insert(addr("s3_bucket.state"), known(&[("bucket", json!("game-state"))]));
        outputs.insert(
            addr("security_group.game"),
            known(&[("ingress", json!([{"from_port": 27015}]))]),
        );

        let evaluated = evaluate(&spec, &outputs).unwrap();
        assert_eq!(
            evaluated.values.get("user_data"),
            Some(&json!("bucket=game-state port=27015"))
        );
    }

    #[test]
    fn test_unknown_inside_list_marks_attribute() {
        let spec = ResourceSpec::new(addr("instance.game")).with_attribute(
            "security_groups",
            AttrExpr::List(vec![
                AttrExpr::parse_str("${security_group.game.id}").unwrap(),
                AttrExpr::literal("sg-static"),
            ]),
        );

        let mut outputs = BTreeMap::new();
        outputs.insert(addr("security_group.game"), Outputs::Pending);

        let evaluated = evaluate(&spec, &outputs).unwrap();
        assert!(evaluated.unknown.contains("security_groups"));
        assert_eq!(
            evaluated.values.get("security_groups"),
            Some(&json!([UNKNOWN_VALUE, "sg-static"]))
        );
    }

    #[test]
    fn test_literal_only_needs_no_outputs() {
        let spec = ResourceSpec::new(addr("vpc.main")).with_literal("cidr_block", "10.0.0.0/16");
        let evaluated = evaluate(&spec, &BTreeMap::new()).unwrap();
        assert_eq!(evaluated.values.len(), 1);
        assert!(evaluated.is_fully_known());
    }
}
