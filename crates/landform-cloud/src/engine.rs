//! Engine
//!
//! Ties the state store, differ, planner and executor together. Every
//! entry point takes the lock handle explicitly; the caller decides how
//! long the lock is held.

use crate::action::ApplySummary;
use crate::differ::{self, Differ};
use crate::error::Result;
use crate::executor::{CancelToken, Executor, ExecutorOptions};
use crate::planner::{self, Plan};
use crate::provider::ProviderRegistry;
use crate::state::{StateLock, StateSnapshot, StateStore};
use landform_core::ResourceGraph;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Read every recorded resource back from its provider first
    pub refresh: bool,

    /// Plan removal of everything in state
    pub destroy: bool,
}

#[derive(Debug)]
pub struct Engine {
    providers: ProviderRegistry,
    store: StateStore,
    options: ExecutorOptions,
}

impl Engine {
    pub fn new(providers: ProviderRegistry, store: StateStore) -> Self {
        Self {
            providers,
            store,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_executor_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Compute the plan for `graph` against current state
    #[instrument(skip_all, fields(resources = graph.len(), refresh = options.refresh, destroy = options.destroy))]
    pub async fn plan(
        &self,
        graph: &ResourceGraph,
        lock: &StateLock,
        options: PlanOptions,
    ) -> Result<Plan> {
        let mut state = self.store.read_all(lock).await?;
        if options.refresh {
            state = differ::refresh(&state, &self.providers).await?;
        }

        let changes = if options.destroy {
            differ::diff_destroy_all(&state)
        } else {
            Differ::new(graph, &self.providers).diff(&state)?
        };

        let plan = planner::plan(changes, graph, state)?;
        info!(summary = %plan.summary(), steps = plan.steps.len(), "Plan ready");
        Ok(plan)
    }

    /// Plan removal of every recorded resource
    pub async fn plan_destroy(&self, lock: &StateLock) -> Result<Plan> {
        self.plan(
            &ResourceGraph::default(),
            lock,
            PlanOptions {
                refresh: false,
                destroy: true,
            },
        )
        .await
    }

    /// Execute `plan` and compact state afterwards
    ///
    /// Records dropped by a refresh are removed from the store before any
    /// step runs. Step failures are reported in the summary.
    #[instrument(skip_all, fields(steps = plan.steps.len()))]
    pub async fn apply(
        &self,
        plan: &Plan,
        graph: &ResourceGraph,
        lock: &StateLock,
        cancel: &CancelToken,
    ) -> Result<ApplySummary> {
        self.forget_vanished(&plan.state, lock).await?;

        let summary = Executor::new(&self.providers, &self.store, lock)
            .with_options(self.options.clone())
            .execute(plan, graph, cancel)
            .await;

        // The journal already holds every change, so a failed compaction loses nothing
        if let Err(e) = self.store.compact(lock).await {
            warn!(error = %e, "State compaction failed");
        }

        Ok(summary)
    }

    async fn forget_vanished(&self, planned: &StateSnapshot, lock: &StateLock) -> Result<()> {
        let stored = self.store.read_all(lock).await?;
        for record in stored.iter() {
            if !planned.contains(&record.address) {
                info!(address = %record.address, "Removing vanished resource from state");
                self.store.delete(lock, &record.address).await?;
            }
        }
        Ok(())
    }
}
