//! 属性式
//!
//! 文字列値には `${type.name.attribute}` 構文で
//! 他リソースへの参照を埋め込める。`$${` はリテラルの `${`。

use crate::error::{FlowError, Result};
use crate::model::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 他リソースの属性への参照
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub address: Address,

    /// リソース配下の属性パス（ドット区切り、例: "id", "tags.Name"）
    pub attribute: String,
}

impl Reference {
    pub fn new(address: Address, attribute: impl Into<String>) -> Self {
        Self {
            address,
            attribute: attribute.into(),
        }
    }

    fn parse(token: &str) -> Result<Self> {
        let invalid = |reason: &str| FlowError::InvalidExpression {
            expression: format!("${{{token}}}"),
            reason: reason.to_string(),
        };

        let mut parts = token.trim().splitn(3, '.');
        let resource_type = parts.next().unwrap_or_default();
        let name = parts
            .next()
            .ok_or_else(|| invalid("expected <type>.<name>.<attribute>"))?;
        let attribute = parts
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| invalid("missing attribute name"))?;

        let address = format!("{resource_type}.{name}")
            .parse()
            .map_err(|_| invalid("invalid resource address"))?;
        Ok(Reference::new(address, attribute))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.attribute)
    }
}

/// 埋め込み文字列の断片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fragment {
    Text(String),
    Reference(Reference),
}

/// 属性ひとつ分の値または参照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttrExpr {
    Literal(serde_json::Value),
    Reference(Reference),
    Interpolated(Vec<Fragment>),
    List(Vec<AttrExpr>),
    Map(BTreeMap<String, AttrExpr>),
}

impl AttrExpr {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        AttrExpr::Literal(value.into())
    }

    /// 文字列値をパースし `${...}` 参照を取り出す
    pub fn parse_str(input: &str) -> Result<Self> {
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut text = String::new();
        let mut rest = input;

        while let Some(pos) = rest.find("${") {
            if rest[..pos].ends_with('$') {
                // `$${` -> リテラルの `${`
                text.push_str(&rest[..pos - 1]);
                text.push_str("${");
                rest = &rest[pos + 2..];
                continue;
            }

            text.push_str(&rest[..pos]);
            let after = &rest[pos + 2..];
            let end = after.find('}').ok_or_else(|| FlowError::InvalidExpression {
                expression: input.to_string(),
                reason: "unterminated `${`".to_string(),
            })?;

            if !text.is_empty() {
                fragments.push(Fragment::Text(std::mem::take(&mut text)));
            }
            fragments.push(Fragment::Reference(Reference::parse(&after[..end])?));
            rest = &after[end + 1..];
        }
        text.push_str(rest);

        if fragments.is_empty() {
            return Ok(AttrExpr::Literal(serde_json::Value::String(text)));
        }
        if !text.is_empty() {
            fragments.push(Fragment::Text(text));
        }

        // 参照ひとつだけの文字列は参照先の値の型を保つ
        if fragments.len() == 1
            && let Some(Fragment::Reference(reference)) = fragments.first()
        {
            return Ok(AttrExpr::Reference(reference.clone()));
        }

        Ok(AttrExpr::Interpolated(fragments))
    }

    /// 式に含まれる全参照
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            AttrExpr::Literal(_) => {}
            AttrExpr::Reference(r) => refs.push(r),
            AttrExpr::Interpolated(fragments) => {
                for fragment in fragments {
                    if let Fragment::Reference(r) = fragment {
                        refs.push(r);
                    }
                }
            }
            AttrExpr::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            AttrExpr::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// 式が参照するリソースのアドレス
    pub fn referenced_addresses(&self) -> BTreeSet<Address> {
        self.references()
            .into_iter()
            .map(|r| r.address.clone())
            .collect()
    }
}
