use crate::model::Address;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("invalid declaration: {0}")]
    InvalidConfig(String),

    #[error("invalid resource address '{0}': expected <type>.<name>")]
    InvalidAddress(String),

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("template error: {file}\nreason: {message}")]
    TemplateError {
        file: PathBuf,
        line: Option<usize>,
        message: String,
    },

    #[error("template render error: {0}")]
    TemplateRenderError(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// リソースグラフ構築時に検出される構造エラー
///
/// いずれも致命的で、プロバイダーを呼び出す前に報告される
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate resource address: {0}")]
    DuplicateAddress(Address),

    #[error("{from} references {to}, which is not declared")]
    UnresolvedReference { from: Address, to: Address },

    #[error("{from} references {to}, which is disabled")]
    DisabledReference { from: Address, to: Address },

    #[error("dependency cycle detected: {}", format_cycle(.0))]
    Cycle(Vec<Address>),
}

impl GraphError {
    /// エラーに関わるアドレス
    pub fn addresses(&self) -> Vec<&Address> {
        match self {
            GraphError::DuplicateAddress(addr) => vec![addr],
            GraphError::UnresolvedReference { from, to }
            | GraphError::DisabledReference { from, to } => vec![from, to],
            GraphError::Cycle(path) => path.iter().collect(),
        }
    }
}

fn format_cycle(path: &[Address]) -> String {
    let mut parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    if let Some(first) = path.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{from} references {to}, which has no known outputs")]
    UnresolvedReference { from: Address, to: Address },

    #[error("{from} references `{reference}`, but that attribute does not exist")]
    MissingAttribute { from: Address, reference: String },
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_the_loop() {
        let err = GraphError::Cycle(vec![
            Address::new("vpc", "a"),
            Address::new("subnet", "b"),
        ]);
        assert_eq!(
            err.to_string(),
            "dependency cycle detected: vpc.a -> subnet.b -> vpc.a"
        );
        assert_eq!(err.addresses().len(), 2);
    }
}
