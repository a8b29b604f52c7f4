#![allow(deprecated)] // TODO: migrate Command::cargo_bin to cargo_bin_cmd!

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_declaration(&self, content: &str) {
        fs::write(self.root.path().join("landform.kdl"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        let dir = self.root.path().join(".landform");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("settings.yaml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// 環境変数をクリアした `landform -C <project>`
    pub fn landform(&self) -> Command {
        let mut cmd = Command::cargo_bin("landform").unwrap();
        cmd.arg("-C")
            .arg(self.path())
            .env_remove("LANDFORM_CONFIG_PATH")
            .env_remove("LANDFORM_PARALLELISM")
            .env_remove("LANDFORM_LOCK_TIMEOUT")
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env("NO_COLOR", "1");
        cmd
    }

    #[allow(dead_code)]
    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join(".landform")
    }

    #[allow(dead_code)]
    pub fn cloud_objects(&self) -> serde_json::Value {
        let path = self.root.path().join(".landform/cloud/objects.json");
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

/// local プロバイダー上の VPC・サブネット・セキュリティグループ
#[allow(dead_code)]
pub const NETWORK: &str = r#"
project "game-infra"

variables {
    vpc_cidr "10.0.0.0/16"
}

provider "local" {
    root ".landform/cloud"
}

resource "vpc" "main" {
    cidr_block "{{ vpc_cidr }}"
    tags {
        Name "main-vpc"
    }
}

resource "subnet" "public" {
    vpc_id "${vpc.main.id}"
    cidr_block "10.0.1.0/24"
}

resource "security_group" "game" {
    name "game"
    vpc_id "${vpc.main.id}"
}
"#;
