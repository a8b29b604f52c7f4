//! テンプレート展開
//!
//! 宣言ファイルはパース前に Tera でレンダリングされる。
//! `{{ region }}` 形式のプレースホルダーは `variables` ブロック、
//! `.env` ファイル、環境変数 `LANDFORM_VAR_*`、明示的な上書きから置換される。
//! インラインのデフォルト値には Tera の `default` フィルタを使う。

use crate::error::{FlowError, Result};
use crate::parser::kdl_value_to_json;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// テンプレートに渡す環境変数のプレフィックス（除去して渡す）
pub const ENV_VAR_PREFIX: &str = "LANDFORM_VAR_";

/// 変数コンテキスト
pub type Variables = HashMap<String, serde_json::Value>;

/// テンプレートプロセッサー
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// 環境変数 `LANDFORM_VAR_<name>` を `<name>` として追加
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX)
                && !name.is_empty()
            {
                debug!(key = %name, "Adding environment variable");
                self.context
                    .insert(name.to_string(), &serde_json::Value::String(value));
                count += 1;
            }
        }

        info!(env_var_count = count, "Added environment variables");
    }

    /// `.env` ファイルから `KEY=VALUE` 行を読み込む
    #[tracing::instrument(skip(self))]
    pub fn add_env_file_variables(&mut self, env_file_path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(env_file_path).map_err(|e| FlowError::IoError {
            path: env_file_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut count = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = strip_quotes(value.trim());
                self.context
                    .insert(key, &serde_json::Value::String(value.to_string()));
                count += 1;
            }
        }

        info!(
            env_file = %env_file_path.display(),
            variable_count = count,
            "Loaded variables from .env file"
        );

        Ok(())
    }

    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| FlowError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| {
            if let FlowError::TemplateRenderError(msg) = e {
                FlowError::TemplateError {
                    file: path.to_path_buf(),
                    line: None,
                    message: msg,
                }
            } else {
                e
            }
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// 宣言から `variables { ... }` ブロックを取り出す
///
/// テンプレート展開前に実行するため、ブロックは文字列として探し、
/// 中身だけをKDLとしてパースする。他の箇所の `{{ ... }}`
/// プレースホルダーの影響を受けない。
pub fn extract_variables(kdl_content: &str) -> Result<Variables> {
    use regex::Regex;

    let re = Regex::new(r"(?m)^\s*variables\s*\{")
        .map_err(|e| FlowError::InvalidConfig(format!("regex compile error: {e}")))?;

    let mut all_vars = HashMap::new();

    for mat in re.find_iter(kdl_content) {
        let open = mat.end() - 1;
        let Some(close) = find_matching_brace(kdl_content, open) else {
            return Err(FlowError::InvalidConfig(
                "unterminated variables block".to_string(),
            ));
        };

        let block = &kdl_content[open + 1..close];
        let doc: kdl::KdlDocument = block.parse().map_err(|e| {
            FlowError::InvalidConfig(format!("KDL parse error in variables block: {e}"))
        })?;

        for var_node in doc.nodes() {
            if let Some(entry) = var_node.entries().first() {
                all_vars.insert(
                    var_node.name().value().to_string(),
                    kdl_value_to_json(entry.value()),
                );
            }
        }
    }

    Ok(all_vars)
}

/// `open_pos` の波括弧に対応する閉じ括弧の位置
fn find_matching_brace(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if open_pos >= bytes.len() || bytes[open_pos] != b'{' {
        return None;
    }

    let mut depth = 1;
    let mut pos = open_pos + 1;
    let mut in_string = false;
    let mut escape_next = false;

    while pos < bytes.len() && depth > 0 {
        let c = bytes[pos];

        if escape_next {
            escape_next = false;
            pos += 1;
            continue;
        }

        if c == b'\\' {
            escape_next = true;
            pos += 1;
            continue;
        }

        if c == b'"' {
            in_string = !in_string;
        } else if !in_string {
            if c == b'{' {
                depth += 1;
            } else if c == b'}' {
                depth -= 1;
            }
        }

        pos += 1;
    }

    if depth == 0 { Some(pos - 1) } else { None }
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Tera のエラーチェーンを読みやすい1つのメッセージにまとめる
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }

    let full_error = details.join(" | ");

    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "undefined variable: `{var_name}`\nhint: declare it in the variables block, set {ENV_VAR_PREFIX}{var_name}, or pass --var {var_name}=<value>"
        );
    }

    full_error
}
