//! Executor
//!
//! Runs plan steps against providers with bounded concurrency. A step
//! starts once all its predecessors are applied; its state record is
//! written before it counts as applied. A failed step never touches state
//! and every step waiting on it is skipped, while independent branches
//! carry on.

use crate::action::{ApplySummary, StepAction, StepReport};
use crate::error::{ProviderError, Result as CloudResult};
use crate::planner::{Plan, PlanStep, StepId};
use crate::provider::{CloudProvider, ProviderRegistry, ProviderResult, RetryConfig};
use crate::state::{StateLock, StateRecord, StateStore};
use futures_util::stream::{FuturesUnordered, StreamExt};
use landform_core::{Address, Attributes, Outputs, ResourceGraph, evaluate};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Cooperative cancellation flag
///
/// Once cancelled, no new step is started; steps already running finish
/// and are recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a plan step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    InProgress,
    Applied,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of provider operations in flight
    pub concurrency: usize,

    pub retry: RetryConfig,

    /// Limit for a single provider call; exceeding it fails the step
    pub operation_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// What a finished step did to state
enum StateChange {
    Written(StateRecord),
    Removed(Address),
}

/// Work prepared for one step
enum Work {
    Create {
        provider: Arc<dyn CloudProvider>,
        inputs: Attributes,
        dependencies: BTreeSet<Address>,
    },
    Update {
        provider: Arc<dyn CloudProvider>,
        inputs: Attributes,
        dependencies: BTreeSet<Address>,
        previous: StateRecord,
    },
    Delete {
        provider: Arc<dyn CloudProvider>,
        id: String,
    },
}

pub struct Executor<'a> {
    providers: &'a ProviderRegistry,
    store: &'a StateStore,
    lock: &'a StateLock,
    options: ExecutorOptions,
}

impl<'a> Executor<'a> {
    pub fn new(providers: &'a ProviderRegistry, store: &'a StateStore, lock: &'a StateLock) -> Self {
        Self {
            providers,
            store,
            lock,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply every step of `plan`
    ///
    /// Partial failure is reported in the summary, not as an error.
    pub async fn execute(
        &self,
        plan: &Plan,
        graph: &ResourceGraph,
        cancel: &CancelToken,
    ) -> ApplySummary {
        let started = Instant::now();
        let count = plan.steps.len();
        let concurrency = self.options.concurrency.max(1);

        let mut status = vec![StepStatus::Pending; count];
        let mut waiting: Vec<usize> = plan.steps.iter().map(|s| s.predecessors.len()).collect();
        let mut ready: BTreeSet<StepId> = (0..count).filter(|&id| waiting[id] == 0).collect();
        let mut records: BTreeMap<Address, StateRecord> = plan.state.records.clone();
        let mut in_flight = FuturesUnordered::new();
        let mut cancelled = false;

        info!(steps = count, concurrency, "Applying plan");

        loop {
            while in_flight.len() < concurrency {
                if cancel.is_cancelled() {
                    cancelled |= !ready.is_empty();
                    break;
                }
                let Some(id) = ready.pop_first() else {
                    break;
                };
                let step = &plan.steps[id];

                match self.prepare(step, graph, &records) {
                    Ok(work) => {
                        debug!(step = %step, "Starting step");
                        status[id] = StepStatus::InProgress;
                        in_flight.push(self.perform(step, work));
                    }
                    Err(reason) => {
                        error!(step = %step, %reason, "Step failed");
                        status[id] = StepStatus::Failed(reason);
                        skip_successors(plan, id, &mut status);
                    }
                }
            }

            let Some((id, outcome)) = in_flight.next().await else {
                break;
            };
            let step = &plan.steps[id];

            match outcome {
                Ok(change) => {
                    match change {
                        StateChange::Written(record) => {
                            records.insert(record.address.clone(), record);
                        }
                        StateChange::Removed(address) => {
                            records.remove(&address);
                        }
                    }
                    info!(step = %step, "Step applied");
                    status[id] = StepStatus::Applied;

                    for next in plan.successors(id) {
                        waiting[next] -= 1;
                        if waiting[next] == 0 && status[next] == StepStatus::Pending {
                            ready.insert(next);
                        }
                    }
                }
                Err(reason) => {
                    error!(step = %step, %reason, "Step failed");
                    status[id] = StepStatus::Failed(reason);
                    skip_successors(plan, id, &mut status);
                }
            }
        }

        let mut summary = ApplySummary {
            cancelled: cancelled || (cancel.is_cancelled() && status.contains(&StepStatus::Pending)),
            ..Default::default()
        };

        for (step, status) in plan.steps.iter().zip(status) {
            let report = |reason: Option<String>| StepReport {
                address: step.address.clone(),
                action: step.action,
                reason,
            };
            match status {
                StepStatus::Applied => summary.applied.push(report(None)),
                StepStatus::Failed(reason) => summary.failed.push(report(Some(reason))),
                StepStatus::Skipped(reason) => summary.skipped.push(report(Some(reason))),
                StepStatus::Pending | StepStatus::InProgress => {
                    summary.skipped.push(report(Some("cancelled".to_string())))
                }
            }
        }

        summary.duration = started.elapsed();
        info!(summary = %summary, duration_ms = summary.duration.as_millis() as u64, "Apply finished");
        summary
    }

    /// Resolve the provider and evaluate inputs against current outputs
    fn prepare(
        &self,
        step: &PlanStep,
        graph: &ResourceGraph,
        records: &BTreeMap<Address, StateRecord>,
    ) -> Result<Work, String> {
        let provider = self
            .providers
            .get(&step.provider)
            .cloned()
            .ok_or_else(|| format!("provider not found: {}", step.provider))?;

        if step.action == StepAction::Delete {
            let record = records
                .get(&step.address)
                .ok_or_else(|| format!("{} has no recorded state to delete", step.address))?;
            return Ok(Work::Delete {
                provider,
                id: record.id.clone(),
            });
        }

        let node = graph
            .get(&step.address)
            .ok_or_else(|| format!("{} is not declared", step.address))?;

        let outputs: BTreeMap<Address, Outputs> = node
            .dependencies
            .iter()
            .filter_map(|dep| {
                records
                    .get(dep)
                    .map(|r| (dep.clone(), Outputs::Known(r.outputs.clone())))
            })
            .collect();
        let evaluated = evaluate(&node.spec, &outputs).map_err(|e| e.to_string())?;
        if !evaluated.is_fully_known() {
            return Err(format!(
                "{}: attributes still unknown: {:?}",
                step.address, evaluated.unknown
            ));
        }

        let dependencies = node.dependencies.clone();
        match step.action {
            StepAction::Update => {
                let previous = records
                    .get(&step.address)
                    .cloned()
                    .ok_or_else(|| format!("{} has no recorded state to update", step.address))?;
                Ok(Work::Update {
                    provider,
                    inputs: evaluated.values,
                    dependencies,
                    previous,
                })
            }
            _ => Ok(Work::Create {
                provider,
                inputs: evaluated.values,
                dependencies,
            }),
        }
    }

    /// Provider call plus state write
    async fn perform(&self, step: &PlanStep, work: Work) -> (StepId, Result<StateChange, String>) {
        let address = &step.address;
        let resource_type = address.resource_type.as_str();

        let outcome: Result<StateChange, String> = async {
            match work {
                Work::Create {
                    provider,
                    inputs,
                    dependencies,
                } => {
                    let created = self
                        .call(step, || provider.create(resource_type, &inputs))
                        .await
                        .map_err(|e| e.to_string())?;

                    let mut outputs = created.outputs;
                    outputs
                        .entry("id".to_string())
                        .or_insert_with(|| serde_json::Value::String(created.id.clone()));

                    let record =
                        StateRecord::new(address.clone(), created.id, provider.name(), inputs, outputs)
                            .with_dependencies(dependencies);
                    self.record(record).await
                }
                Work::Update {
                    provider,
                    inputs,
                    dependencies,
                    previous,
                } => {
                    let mut outputs = self
                        .call(step, || provider.update(resource_type, &previous.id, &inputs))
                        .await
                        .map_err(|e| e.to_string())?;
                    outputs
                        .entry("id".to_string())
                        .or_insert_with(|| serde_json::Value::String(previous.id.clone()));

                    let record = StateRecord::new(
                        address.clone(),
                        previous.id.clone(),
                        provider.name(),
                        inputs,
                        outputs,
                    )
                    .with_dependencies(dependencies)
                    .created_at(previous.created_at);
                    self.record(record).await
                }
                Work::Delete { provider, id } => {
                    match self.call(step, || provider.delete(resource_type, &id)).await {
                        Ok(()) => {}
                        Err(ProviderError::NotFound(_)) => {
                            warn!(%address, %id, "Resource already gone, removing from state");
                        }
                        Err(e) => return Err(e.to_string()),
                    }
                    self.store
                        .delete(self.lock, address)
                        .await
                        .map_err(|e| format!("state write failed: {e}"))?;
                    Ok(StateChange::Removed(address.clone()))
                }
            }
        }
        .await;

        (step.id, outcome)
    }

    async fn record(&self, record: StateRecord) -> Result<StateChange, String> {
        let result: CloudResult<()> = self.store.write(self.lock, record.clone()).await;
        match result {
            Ok(()) => Ok(StateChange::Written(record)),
            Err(e) => {
                error!(address = %record.address, id = %record.id, error = %e, "Resource applied but state write failed");
                Err(format!("state write failed: {e}"))
            }
        }
    }

    /// Provider call with timeout and retries for transient errors
    async fn call<T, F, Fut>(&self, step: &PlanStep, mut operation: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let retry = &self.options.retry;
        let mut attempt: u32 = 0;

        loop {
            let result = match tokio::time::timeout(self.options.operation_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => return Err(ProviderError::Timeout(self.options.operation_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        step = %step,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Mark every pending step after `id` as skipped
fn skip_successors(plan: &Plan, id: StepId, status: &mut [StepStatus]) {
    let failed = &plan.steps[id];
    for next in plan.transitive_successors(id) {
        if status[next] == StepStatus::Pending {
            status[next] = StepStatus::Skipped(format!("{failed} did not complete"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ChangeKind;
    use crate::differ::Differ;
    use crate::planner;
    use crate::provider::{CreatedResource, ResourceSchema};
    use crate::state::StateSnapshot;
    use async_trait::async_trait;
    use landform_core::{AttrExpr, ResourceSpec};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// In-memory provider recording calls and injecting failures
    #[derive(Default)]
    struct MockProvider {
        schemas: BTreeMap<String, ResourceSchema>,
        calls: Mutex<Vec<String>>,
        fail_create: Mutex<BTreeMap<String, Vec<ProviderError>>>,
        fail_delete: Mutex<BTreeMap<String, ProviderError>>,
        next_id: AtomicUsize,
        delay: Duration,
    }

    impl MockProvider {
        fn new() -> Self {
            let schemas = ["vpc", "subnet", "security_group", "route_table", "route_table_association"]
                .into_iter()
                .map(|t| {
                    (
                        t.to_string(),
                        ResourceSchema::new(t).force_new(["vpc_id", "cidr_block"]),
                    )
                })
                .collect();
            Self {
                schemas,
                ..Default::default()
            }
        }

        /// Errors returned by successive creates of resources named `name`
        fn fail_create(self, name: &str, errors: Vec<ProviderError>) -> Self {
            self.fail_create.lock().unwrap().insert(name.to_string(), errors);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CloudProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
            self.schemas.get(resource_type)
        }

        async fn create(
            &self,
            resource_type: &str,
            attributes: &Attributes,
        ) -> ProviderResult<CreatedResource> {
            let name = attributes
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {resource_type}.{name}"));
            tokio::time::sleep(self.delay).await;

            if let Some(errors) = self.fail_create.lock().unwrap().get_mut(&name)
                && !errors.is_empty()
            {
                return Err(errors.remove(0));
            }

            let id = format!(
                "{resource_type}-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            );
            let mut outputs = attributes.clone();
            outputs.insert("arn".into(), json!(format!("arn:mock:{id}")));
            Ok(CreatedResource { id, outputs })
        }

        async fn update(
            &self,
            resource_type: &str,
            id: &str,
            attributes: &Attributes,
        ) -> ProviderResult<Attributes> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {resource_type} {id}"));
            Ok(attributes.clone())
        }

        async fn delete(&self, resource_type: &str, id: &str) -> ProviderResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete {resource_type} {id}"));
            match self.fail_delete.lock().unwrap().get(id) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        async fn read(&self, _: &str, _: &str) -> ProviderResult<Option<Attributes>> {
            Ok(None)
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn named(address: &str) -> ResourceSpec {
        let address = addr(address);
        let name = address.name.clone();
        ResourceSpec::new(address).with_literal("name", name)
    }

    fn reference(target: &str) -> AttrExpr {
        AttrExpr::parse_str(&format!("${{{target}.id}}")).unwrap()
    }

    fn network() -> ResourceGraph {
        ResourceGraph::build(vec![
            named("vpc.main").with_literal("cidr_block", "10.0.0.0/16"),
            named("subnet.public").with_attribute("vpc_id", reference("vpc.main")),
            named("route_table.public").with_attribute("vpc_id", reference("vpc.main")),
            named("route_table_association.public")
                .with_attribute("subnet_id", reference("subnet.public"))
                .with_attribute("route_table_id", reference("route_table.public")),
            named("security_group.game"),
            named("security_group.admin"),
        ])
        .unwrap()
    }

    fn fast_options() -> ExecutorOptions {
        ExecutorOptions {
            concurrency: 4,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            operation_timeout: Duration::from_secs(5),
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: StateStore,
        lock: StateLock,
        registry: ProviderRegistry,
        provider: Arc<MockProvider>,
    }

    async fn fixture(provider: MockProvider) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = StateStore::in_project(dir.path());
        let lock = store.acquire_lock(Duration::from_secs(1)).await.unwrap();
        let provider = Arc::new(provider);
        let registry = ProviderRegistry::new().with_provider(provider.clone());
        Fixture {
            _dir: dir,
            store,
            lock,
            registry,
            provider,
        }
    }

    impl Fixture {
        async fn plan(&self, graph: &ResourceGraph) -> Plan {
            let state = self.store.read_all(&self.lock).await.unwrap();
            let changes = Differ::new(graph, &self.registry).diff(&state).unwrap();
            planner::plan(changes, graph, state).unwrap()
        }

        async fn apply(&self, graph: &ResourceGraph) -> ApplySummary {
            let plan = self.plan(graph).await;
            Executor::new(&self.registry, &self.store, &self.lock)
                .with_options(fast_options())
                .execute(&plan, graph, &CancelToken::new())
                .await
        }

        async fn state(&self) -> StateSnapshot {
            self.store.read_all(&self.lock).await.unwrap()
        }
    }

    fn position(calls: &[String], call: &str) -> usize {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
    }

    #[tokio::test]
    async fn test_apply_creates_in_dependency_order_and_records_state() {
        let fx = fixture(MockProvider::new()).await;
        let graph = network();

        let summary = fx.apply(&graph).await;
        assert!(summary.is_success(), "{summary:?}");
        assert_eq!(summary.applied.len(), 6);

        let calls = fx.provider.calls();
        assert!(position(&calls, "create vpc.main") < position(&calls, "create subnet.public"));
        assert!(
            position(&calls, "create subnet.public")
                < position(&calls, "create route_table_association.public")
        );
        assert!(
            position(&calls, "create route_table.public")
                < position(&calls, "create route_table_association.public")
        );

        let state = fx.state().await;
        assert_eq!(state.len(), 6);
        let vpc = state.get(&addr("vpc.main")).unwrap();
        let subnet = state.get(&addr("subnet.public")).unwrap();
        assert_eq!(subnet.inputs.get("vpc_id"), Some(&json!(vpc.id)));
        assert_eq!(subnet.dependencies, BTreeSet::from([addr("vpc.main")]));
        assert_eq!(vpc.outputs.get("id"), Some(&json!(vpc.id)));
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let fx = fixture(MockProvider::new()).await;
        let graph = network();
        assert!(fx.apply(&graph).await.is_success());
        let calls_after_first = fx.provider.calls().len();

        let plan = fx.plan(&graph).await;
        assert!(!plan.has_changes());
        assert!(plan.changes.iter().all(|c| c.kind == ChangeKind::NoOp));

        let summary = fx.apply(&graph).await;
        assert!(summary.is_success());
        assert!(summary.applied.is_empty());
        assert_eq!(fx.provider.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let provider = MockProvider::new().fail_create(
            "public",
            vec![
                ProviderError::Validation("invalid cidr".into()),
                ProviderError::Validation("invalid cidr".into()),
            ],
        );
        let fx = fixture(provider).await;
        let graph = network();

        let summary = fx.apply(&graph).await;
        assert!(!summary.is_success());

        // subnet.public and route_table.public share the name "public"
        let failed: BTreeSet<String> = summary.failed.iter().map(|r| r.address.to_string()).collect();
        assert_eq!(
            failed,
            BTreeSet::from(["route_table.public".to_string(), "subnet.public".to_string()])
        );
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].address, addr("route_table_association.public"));

        let calls = fx.provider.calls();
        assert!(!calls.contains(&"create route_table_association.public".to_string()));
        assert!(calls.contains(&"create security_group.game".to_string()));
        assert!(calls.contains(&"create security_group.admin".to_string()));

        let state = fx.state().await;
        assert!(state.contains(&addr("vpc.main")));
        assert!(!state.contains(&addr("subnet.public")));
        assert_eq!(state.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = MockProvider::new().fail_create(
            "game",
            vec![
                ProviderError::RateLimited("throttled".into()),
                ProviderError::Network("connection reset".into()),
            ],
        );
        let fx = fixture(provider).await;
        let graph = ResourceGraph::build(vec![named("security_group.game")]).unwrap();

        let summary = fx.apply(&graph).await;
        assert!(summary.is_success(), "{summary:?}");
        assert_eq!(fx.provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = MockProvider::new().fail_create(
            "game",
            vec![
                ProviderError::Network("down".into()),
                ProviderError::Network("down".into()),
                ProviderError::Network("down".into()),
            ],
        );
        let fx = fixture(provider).await;
        let graph = ResourceGraph::build(vec![named("security_group.game")]).unwrap();

        let summary = fx.apply(&graph).await;
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(fx.provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let provider = MockProvider::new().fail_create(
            "game",
            vec![ProviderError::PermissionDenied("iam".into())],
        );
        let fx = fixture(provider).await;
        let graph = ResourceGraph::build(vec![named("security_group.game")]).unwrap();

        let summary = fx.apply(&graph).await;
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].reason.as_deref().unwrap().contains("permission denied"));
        assert_eq!(fx.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_operation_timeout_fails_without_retry() {
        let fx = fixture(MockProvider::new().with_delay(Duration::from_millis(200))).await;
        let graph = ResourceGraph::build(vec![named("security_group.game")]).unwrap();
        let plan = fx.plan(&graph).await;

        let summary = Executor::new(&fx.registry, &fx.store, &fx.lock)
            .with_options(ExecutorOptions {
                operation_timeout: Duration::from_millis(20),
                ..fast_options()
            })
            .execute(&plan, &graph, &CancelToken::new())
            .await;

        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].reason.as_deref().unwrap().contains("timed out"));
        assert_eq!(fx.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted_after_provider_success() {
        let fx = fixture(MockProvider::new()).await;
        let full = ResourceGraph::build(vec![named("security_group.game"), named("security_group.admin")])
            .unwrap();
        assert!(fx.apply(&full).await.is_success());
        let admin_id = fx.state().await.get(&addr("security_group.admin")).unwrap().id.clone();

        let reduced = ResourceGraph::build(vec![named("security_group.game")]).unwrap();
        let plan = fx.plan(&reduced).await;
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, StepAction::Delete);

        let summary = Executor::new(&fx.registry, &fx.store, &fx.lock)
            .with_options(fast_options())
            .execute(&plan, &reduced, &CancelToken::new())
            .await;
        assert!(summary.is_success());
        assert!(fx.provider.calls().contains(&format!("delete security_group {admin_id}")));
        assert!(!fx.state().await.contains(&addr("security_group.admin")));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_record() {
        let fx = fixture(MockProvider::new()).await;
        let full = ResourceGraph::build(vec![named("security_group.admin")]).unwrap();
        assert!(fx.apply(&full).await.is_success());
        let admin_id = fx.state().await.get(&addr("security_group.admin")).unwrap().id.clone();

        fx.provider
            .fail_delete
            .lock()
            .unwrap()
            .insert(admin_id, ProviderError::Validation("DependencyViolation".into()));

        let summary = fx.apply(&ResourceGraph::default()).await;
        assert_eq!(summary.failed.len(), 1);
        assert!(fx.state().await.contains(&addr("security_group.admin")));
    }

    #[tokio::test]
    async fn test_replace_recreates_dependents_with_new_ids() {
        let fx = fixture(MockProvider::new()).await;
        let graph = network();
        assert!(fx.apply(&graph).await.is_success());
        let old_vpc = fx.state().await.get(&addr("vpc.main")).unwrap().id.clone();

        let changed = ResourceGraph::build(vec![
            named("vpc.main").with_literal("cidr_block", "10.1.0.0/16"),
            named("subnet.public").with_attribute("vpc_id", reference("vpc.main")),
            named("route_table.public").with_attribute("vpc_id", reference("vpc.main")),
            named("route_table_association.public")
                .with_attribute("subnet_id", reference("subnet.public"))
                .with_attribute("route_table_id", reference("route_table.public")),
            named("security_group.game"),
            named("security_group.admin"),
        ])
        .unwrap();

        let summary = fx.apply(&changed).await;
        assert!(summary.is_success(), "{summary:?}");

        let calls = fx.provider.calls();
        let delete_vpc = position(&calls, &format!("delete vpc {old_vpc}"));
        let last_subnet_create = calls
            .iter()
            .rposition(|c| c == "create subnet.public")
            .unwrap();
        assert!(delete_vpc < last_subnet_create);

        let state = fx.state().await;
        let vpc = state.get(&addr("vpc.main")).unwrap();
        assert_ne!(vpc.id, old_vpc);
        assert_eq!(
            state.get(&addr("subnet.public")).unwrap().inputs.get("vpc_id"),
            Some(&json!(vpc.id))
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let fx = fixture(MockProvider::new()).await;
        let graph = network();
        let plan = fx.plan(&graph).await;

        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = Executor::new(&fx.registry, &fx.store, &fx.lock)
            .execute(&plan, &graph, &cancel)
            .await;

        assert!(summary.cancelled);
        assert!(!summary.is_success());
        assert!(summary.applied.is_empty());
        assert_eq!(summary.skipped.len(), 6);
        assert!(fx.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_of_one_serializes() {
        let fx = fixture(MockProvider::new()).await;
        let graph = network();
        let plan = fx.plan(&graph).await;

        let summary = Executor::new(&fx.registry, &fx.store, &fx.lock)
            .with_options(ExecutorOptions {
                concurrency: 1,
                ..fast_options()
            })
            .execute(&plan, &graph, &CancelToken::new())
            .await;
        assert!(summary.is_success());

        // With one slot, steps run in plan order
        let expected: Vec<String> = plan
            .steps
            .iter()
            .map(|s| format!("create {}", s.address))
            .collect();
        assert_eq!(fx.provider.calls(), expected);
    }
}
