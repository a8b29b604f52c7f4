//! コマンド間で共有するプロジェクトコンテキスト

use crate::GlobalArgs;
use anyhow::{Context, bail};
use landform_cloud::{Engine, ExecutorOptions, ProviderRegistry, RetryConfig, StateLock, StateStore};
use landform_cloud_local::{LocalProvider, PROVIDER_NAME};
use landform_config::Settings;
use landform_core::{Declaration, ResourceGraph, Variables};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Project {
    pub root: PathBuf,
    pub settings: Settings,
    overrides: Variables,
}

impl Project {
    pub fn open(global: &GlobalArgs) -> anyhow::Result<Self> {
        let root = match &global.chdir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }

        let mut settings = Settings::load(&root)?;
        if let Some(parallelism) = global.parallelism {
            settings.parallelism = parallelism;
        }
        if let Some(lock_timeout) = global.lock_timeout {
            settings.lock_timeout_secs = lock_timeout;
        }

        let overrides = landform_core::parse_variable_overrides(&global.vars)?;
        debug!(root = %root.display(), ?settings, "Project opened");

        Ok(Self {
            root,
            settings,
            overrides,
        })
    }

    pub fn declaration_path(&self) -> anyhow::Result<PathBuf> {
        Ok(landform_config::find_declaration_file(&self.root)?)
    }

    pub fn load(&self) -> anyhow::Result<Declaration> {
        let path = self.declaration_path()?;
        landform_core::load_declaration(&path, &self.overrides)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn load_graph(&self) -> anyhow::Result<(Declaration, ResourceGraph)> {
        let declaration = self.load()?;
        let graph = ResourceGraph::from_declaration(&declaration)?;
        Ok((declaration, graph))
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.settings.state_dir(&self.root))
            .with_stale_lock_age(self.settings.stale_lock_age())
    }

    pub fn engine(&self, declaration: &Declaration) -> anyhow::Result<Engine> {
        let providers = self.providers(declaration)?;
        Ok(Engine::new(providers, self.store()).with_executor_options(self.executor_options()))
    }

    pub async fn lock(&self, engine: &Engine) -> anyhow::Result<StateLock> {
        Ok(engine.store().acquire_lock(self.settings.lock_timeout()).await?)
    }

    /// 宣言で指定したプロバイダー。指定がなければ local プロバイダー
    fn providers(&self, declaration: &Declaration) -> anyhow::Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();

        for (name, config) in &declaration.providers {
            match name.as_str() {
                PROVIDER_NAME => registry.register(Arc::new(LocalProvider::from_config(config, &self.root))),
                other => bail!("unknown provider '{other}' (available: {PROVIDER_NAME})"),
            }
        }

        if registry.is_empty() {
            registry.register(Arc::new(LocalProvider::new(
                self.root.join(landform_cloud_local::DEFAULT_ROOT),
            )));
        }
        Ok(registry)
    }

    fn executor_options(&self) -> ExecutorOptions {
        let retry = &self.settings.retry;
        ExecutorOptions {
            concurrency: self.settings.parallelism.max(1),
            retry: RetryConfig {
                max_attempts: retry.max_attempts.max(1),
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                backoff_multiplier: retry.backoff_multiplier,
            },
            operation_timeout: self.settings.operation_timeout(),
        }
    }

    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}
