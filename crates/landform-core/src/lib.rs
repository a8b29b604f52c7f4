//! Landform コア
//!
//! 宣言モデル、KDLパーサー、テンプレート展開、リソースグラフ、
//! 属性評価を提供する。
//!
//! ```text
//! landform.kdl ──► template ──► parser ──► Declaration ──► ResourceGraph
//!                                                             │
//!                                           outputs ──► eval ─┘
//! ```

pub mod error;
pub mod eval;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;

// 再エクスポート
pub use error::{EvalError, FlowError, GraphError, Result};
pub use eval::{Attributes, Evaluated, Outputs, UNKNOWN_VALUE, evaluate};
pub use graph::{ResourceGraph, ResourceNode};
pub use loader::{load_declaration, parse_variable_overrides};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use template::{TemplateProcessor, Variables};
