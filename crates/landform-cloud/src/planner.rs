//! Planner
//!
//! Turns a [`ChangeSet`] into ordered provider operations. A replacement
//! becomes a delete followed by a create of the same address.
//!
//! Ordering rules:
//! - create/update of a resource runs after the create/update of its
//!   nearest changed dependencies
//! - the create half of a replacement runs after its delete half
//! - delete of a resource runs after the delete of every recorded
//!   resource depending on it, and after the update of a recorded
//!   dependent that stays but stops referencing it

use crate::action::{ChangeKind, ChangeSet, PlanSummary, StepAction};
use crate::error::PlanError;
use crate::state::StateSnapshot;
use landform_core::{Address, ResourceGraph};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Index of a step within [`Plan::steps`]
pub type StepId = usize;

/// One provider operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub id: StepId,
    pub address: Address,
    pub action: StepAction,

    /// Provider that performs the operation
    pub provider: String,

    /// Steps that must be applied first
    pub predecessors: BTreeSet<StepId>,

    /// Length of the longest predecessor chain; steps of one wave never
    /// depend on each other
    pub wave: usize,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.address)
    }
}

/// Ordered steps plus the changes and state they were computed from
#[derive(Debug, Clone)]
pub struct Plan {
    pub changes: ChangeSet,

    /// Steps in a valid total order
    pub steps: Vec<PlanStep>,

    /// State the plan was computed against
    pub state: StateSnapshot,

    successors: Vec<BTreeSet<StepId>>,
}

impl Plan {
    pub fn summary(&self) -> PlanSummary {
        self.changes.summary()
    }

    pub fn has_changes(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn step(&self, address: &Address, action: StepAction) -> Option<&PlanStep> {
        self.steps
            .iter()
            .find(|s| &s.address == address && s.action == action)
    }

    /// Steps that list `id` as a direct predecessor
    pub fn successors(&self, id: StepId) -> impl Iterator<Item = StepId> + '_ {
        self.successors.get(id).into_iter().flatten().copied()
    }

    /// Every step that must wait for `id`, directly or not
    pub fn transitive_successors(&self, id: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<StepId> = self.successors(id).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.successors(next));
            }
        }
        seen
    }

    /// Whether `a` must be applied before `b`
    pub fn precedes(&self, a: StepId, b: StepId) -> bool {
        self.transitive_successors(a).contains(&b)
    }

    /// Whether the two steps may run concurrently
    pub fn independent(&self, a: StepId, b: StepId) -> bool {
        a != b && !self.precedes(a, b) && !self.precedes(b, a)
    }

    /// Steps grouped by wave
    pub fn waves(&self) -> Vec<Vec<&PlanStep>> {
        let mut waves: Vec<Vec<&PlanStep>> = Vec::new();
        for step in &self.steps {
            if waves.len() <= step.wave {
                waves.resize_with(step.wave + 1, Vec::new);
            }
            waves[step.wave].push(step);
        }
        waves
    }
}

struct Draft {
    address: Address,
    action: StepAction,
    provider: String,
    after: BTreeSet<usize>,
}

/// Build a plan from changes
///
/// `graph` supplies the dependencies of declared resources and `state`
/// the recorded dependencies of the resources being deleted.
pub fn plan(
    changes: ChangeSet,
    graph: &ResourceGraph,
    state: StateSnapshot,
) -> Result<Plan, PlanError> {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut apply_step: BTreeMap<Address, usize> = BTreeMap::new();
    let mut delete_step: BTreeMap<Address, usize> = BTreeMap::new();

    for change in changes.iter() {
        let recorded_provider = state
            .get(&change.address)
            .map(|r| r.provider.clone())
            .unwrap_or_else(|| change.provider.clone());

        let mut push = |action: StepAction, provider: String| {
            drafts.push(Draft {
                address: change.address.clone(),
                action,
                provider,
                after: BTreeSet::new(),
            });
            drafts.len() - 1
        };

        match change.kind {
            ChangeKind::NoOp => {}
            ChangeKind::Create => {
                let id = push(StepAction::Create, change.provider.clone());
                apply_step.insert(change.address.clone(), id);
            }
            ChangeKind::UpdateInPlace => {
                let id = push(StepAction::Update, change.provider.clone());
                apply_step.insert(change.address.clone(), id);
            }
            ChangeKind::Replace => {
                let delete = push(StepAction::Delete, recorded_provider);
                let create = push(StepAction::Create, change.provider.clone());
                delete_step.insert(change.address.clone(), delete);
                apply_step.insert(change.address.clone(), create);
            }
            ChangeKind::Destroy => {
                let id = push(StepAction::Delete, recorded_provider);
                delete_step.insert(change.address.clone(), id);
            }
        }
    }

    // create/update after the nearest changed dependencies
    for (address, &step) in &apply_step {
        for dependency in nearest(address, |a| graph.dependencies(a).cloned().collect(), &apply_step) {
            drafts[step].after.insert(dependency);
        }
        if let Some(&delete) = delete_step.get(address) {
            drafts[step].after.insert(delete);
        }
    }

    // delete after the recorded dependents
    let mut recorded_dependents: BTreeMap<&Address, BTreeSet<Address>> = BTreeMap::new();
    for record in state.iter() {
        for dependency in &record.dependencies {
            recorded_dependents
                .entry(dependency)
                .or_default()
                .insert(record.address.clone());
        }
    }
    let dependents_of = |a: &Address| -> Vec<Address> {
        recorded_dependents
            .get(a)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    };

    for (address, &step) in &delete_step {
        for dependent in nearest(address, dependents_of, &delete_step) {
            drafts[step].after.insert(dependent);
        }

        // A destroyed resource outlives updates that drop references to it
        if !apply_step.contains_key(address) {
            for dependent in dependents_of(address) {
                if let Some(&update) = apply_step.get(&dependent)
                    && drafts[update].action == StepAction::Update
                {
                    drafts[step].after.insert(update);
                }
            }
        }
    }

    order(drafts, changes, state)
}

/// Steps of the closest neighbours (per `next`) that have a step in `steps`,
/// walking through neighbours without one
fn nearest<F>(start: &Address, next: F, steps: &BTreeMap<Address, usize>) -> BTreeSet<usize>
where
    F: Fn(&Address) -> Vec<Address>,
{
    let mut found = BTreeSet::new();
    let mut seen: BTreeSet<Address> = BTreeSet::new();
    let mut queue: VecDeque<Address> = next(start).into();

    while let Some(candidate) = queue.pop_front() {
        if !seen.insert(candidate.clone()) {
            continue;
        }
        match steps.get(&candidate) {
            Some(&step) => {
                found.insert(step);
            }
            None => queue.extend(next(&candidate)),
        }
    }

    found
}

/// Kahn's algorithm; ready steps are taken in address order
fn order(drafts: Vec<Draft>, changes: ChangeSet, state: StateSnapshot) -> Result<Plan, PlanError> {
    let count = drafts.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    let mut in_degree: Vec<usize> = vec![0; count];
    for (id, draft) in drafts.iter().enumerate() {
        in_degree[id] = draft.after.len();
        for &before in &draft.after {
            successors[before].insert(id);
        }
    }

    let key = |id: usize| (drafts[id].address.clone(), drafts[id].action, id);
    let mut ready: BTreeSet<(Address, StepAction, usize)> = (0..count)
        .filter(|&id| in_degree[id] == 0)
        .map(key)
        .collect();

    let mut sequence: Vec<usize> = Vec::with_capacity(count);
    while let Some((_, _, id)) = ready.pop_first() {
        sequence.push(id);
        for &next in &successors[id] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(key(next));
            }
        }
    }

    if sequence.len() < count {
        let stuck = (0..count)
            .filter(|&id| in_degree[id] > 0)
            .map(|id| format!("{} {}", drafts[id].action, drafts[id].address))
            .collect();
        return Err(PlanError::Cycle(stuck));
    }

    let mut position = vec![0; count];
    for (index, &draft) in sequence.iter().enumerate() {
        position[draft] = index;
    }

    let mut steps: Vec<PlanStep> = Vec::with_capacity(count);
    for &draft in &sequence {
        let predecessors: BTreeSet<StepId> =
            drafts[draft].after.iter().map(|&d| position[d]).collect();
        let wave = predecessors
            .iter()
            .map(|&p| steps[p].wave + 1)
            .max()
            .unwrap_or(0);
        steps.push(PlanStep {
            id: steps.len(),
            address: drafts[draft].address.clone(),
            action: drafts[draft].action,
            provider: drafts[draft].provider.clone(),
            predecessors,
            wave,
        });
    }

    let mut step_successors = vec![BTreeSet::new(); count];
    for step in &steps {
        for &p in &step.predecessors {
            step_successors[p].insert(step.id);
        }
    }

    Ok(Plan {
        changes,
        steps,
        state,
        successors: step_successors,
    })
}
