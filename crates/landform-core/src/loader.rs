//! 宣言ファイルのローダー
//!
//! 変数収集・テンプレート展開・パースをまとめて行う。

use crate::error::{FlowError, Result};
use crate::model::Declaration;
use crate::parser::parse_kdl_string;
use crate::template::{TemplateProcessor, Variables, extract_variables};
use std::path::Path;
use tracing::{debug, info, instrument};

/// 宣言ファイルを読み込む
///
/// 変数の優先順位（低い順）:
/// 1. ファイル内の `variables` ブロック
/// 2. 同じディレクトリの `.env` ファイル
/// 3. 環境変数 `LANDFORM_VAR_<name>`
/// 4. `overrides`（通常は `--var name=value`）
#[instrument(skip(overrides), fields(path = %path.display()))]
pub fn load_declaration(path: &Path, overrides: &Variables) -> Result<Declaration> {
    let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let project_root = path.parent().unwrap_or_else(|| Path::new("."));

    debug!("Preparing template processor");
    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    processor.add_variables(extract_variables(&content)?);

    let env_file = project_root.join(".env");
    if env_file.is_file() {
        processor.add_env_file_variables(&env_file)?;
    }

    processor.add_env_variables();
    processor.add_variables(overrides.clone());

    debug!("Expanding template");
    let expanded = processor.render_str(&content).map_err(|e| match e {
        FlowError::TemplateRenderError(message) => FlowError::TemplateError {
            file: path.to_path_buf(),
            line: None,
            message,
        },
        other => other,
    })?;

    let name = project_root
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .unwrap_or_else(|| "unnamed".to_string());

    let declaration = parse_kdl_string(&expanded, name)?;
    info!(
        project = %declaration.name,
        resources = declaration.resources.len(),
        providers = declaration.providers.len(),
        "Declaration loaded"
    );

    Ok(declaration)
}

/// `name=value` 形式をテンプレート変数に変換
///
/// JSONとして解釈できる値（数値・真偽値・配列）は型を保持し、
/// それ以外は文字列になる。
pub fn parse_variable_overrides<I, S>(pairs: I) -> Result<Variables>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut variables = Variables::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            FlowError::InvalidConfig(format!("invalid variable '{pair}': expected name=value"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "invalid variable '{pair}': empty name"
            )));
        }
        let value = serde_json::from_str::<serde_json::Value>(value)
            .ok()
            .filter(|v| !v.is_string() && !v.is_object())
            .unwrap_or_else(|| serde_json::Value::String(value.to_string()));
        variables.insert(name.to_string(), value);
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, AttrExpr};
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const DECLARATION: &str = r#"
project "game-infra"

variables {
    region "us-east-1"
    vpc_cidr "10.0.0.0/16"
}

resource "vpc" "main" {
    cidr_block "{{ vpc_cidr }}"
}

resource "subnet" "public" {
    vpc_id "${vpc.main.id}"
    availability_zone "{{ region }}a"
}
"#;

    fn write_declaration(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("landform.kdl");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_uses_variable_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_declaration(&dir, DECLARATION);

        let declaration = load_declaration(&path, &Variables::new()).unwrap();
        assert_eq!(declaration.name, "game-infra");

        let vpc = &declaration.resources[0];
        assert_eq!(
            vpc.attributes.get("cidr_block"),
            Some(&AttrExpr::literal("10.0.0.0/16"))
        );
        assert!(
            declaration.resources[1]
                .dependencies()
                .contains(&Address::new("vpc", "main"))
        );
    }

    #[test]
    #[serial]
    fn test_env_then_override_precedence() {
        let dir = TempDir::new().unwrap();
        let path = write_declaration(&dir, DECLARATION);

        temp_env::with_vars(
            [
                ("LANDFORM_VAR_region", Some("eu-west-1")),
                ("LANDFORM_VAR_vpc_cidr", Some("10.1.0.0/16")),
            ],
            || {
                let mut overrides = Variables::new();
                overrides.insert("vpc_cidr".into(), serde_json::json!("10.9.0.0/16"));

                let declaration = load_declaration(&path, &overrides).unwrap();
                assert_eq!(
                    declaration.resources[0].attributes.get("cidr_block"),
                    Some(&AttrExpr::literal("10.9.0.0/16"))
                );
                assert_eq!(
                    declaration.resources[1].attributes.get("availability_zone"),
                    Some(&AttrExpr::literal("eu-west-1a"))
                );
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "region=ap-northeast-1\n").unwrap();
        let path = write_declaration(&dir, DECLARATION);

        let declaration = load_declaration(&path, &Variables::new()).unwrap();
        assert_eq!(
            declaration.resources[1].attributes.get("availability_zone"),
            Some(&AttrExpr::literal("ap-northeast-1a"))
        );
    }

    #[test]
    #[serial]
    fn test_undefined_variable_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = write_declaration(
            &dir,
            "resource \"vpc\" \"main\" {\n  cidr_block \"{{ nope }}\"\n}\n",
        );

        match load_declaration(&path, &Variables::new()) {
            Err(FlowError::TemplateError { file, message, .. }) => {
                assert_eq!(file, path);
                assert!(message.contains("nope"));
            }
            other => panic!("expected template error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = load_declaration(Path::new("/nonexistent/landform.kdl"), &Variables::new());
        assert!(matches!(result, Err(FlowError::IoError { .. })));
    }

    #[test]
    fn test_parse_variable_overrides() {
        let vars = parse_variable_overrides(["region=us-west-2", "count=3", "debug=true"]).unwrap();
        assert_eq!(vars.get("region"), Some(&serde_json::json!("us-west-2")));
        assert_eq!(vars.get("count"), Some(&serde_json::json!(3)));
        assert_eq!(vars.get("debug"), Some(&serde_json::json!(true)));

        assert!(parse_variable_overrides(["novalue"]).is_err());
        assert!(parse_variable_overrides(["=x"]).is_err());
    }
}
