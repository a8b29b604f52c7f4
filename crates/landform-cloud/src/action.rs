//! Change and step types shared by the differ, planner and executor

use landform_core::{Address, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Classification of one resource by the differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    UpdateInPlace,
    /// Destroy then create
    Replace,
    Destroy,
    NoOp,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::UpdateInPlace => write!(f, "update"),
            ChangeKind::Replace => write!(f, "replace"),
            ChangeKind::Destroy => write!(f, "destroy"),
            ChangeKind::NoOp => write!(f, "no-op"),
        }
    }
}

/// Planned change for a single address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub address: Address,
    pub kind: ChangeKind,

    /// Provider that will perform the change
    pub provider: String,

    /// Inputs recorded in state, if any
    pub before: Option<Attributes>,

    /// Desired inputs as evaluated at plan time
    pub after: Option<Attributes>,

    /// Attributes that differ between `before` and `after`
    pub changed: BTreeSet<String>,

    /// Changed attributes that force replacement
    pub forces_replacement: BTreeSet<String>,

    /// Attributes that are known after apply
    pub unknown: BTreeSet<String>,
}

impl Change {
    pub fn is_noop(&self) -> bool {
        self.kind == ChangeKind::NoOp
    }
}

/// Changes for every address in the graph or the state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: BTreeMap<Address, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, change: Change) {
        self.changes.insert(change.address.clone(), change);
    }

    pub fn get(&self, address: &Address) -> Option<&Change> {
        self.changes.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether any address needs work
    pub fn has_changes(&self) -> bool {
        self.changes.values().any(|c| !c.is_noop())
    }

    pub fn by_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &Change> {
        self.changes.values().filter(move |c| c.kind == kind)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.by_kind(ChangeKind::Create).count(),
            update: self.by_kind(ChangeKind::UpdateInPlace).count(),
            replace: self.by_kind(ChangeKind::Replace).count(),
            destroy: self.by_kind(ChangeKind::Destroy).count(),
            no_change: self.by_kind(ChangeKind::NoOp).count(),
        }
    }
}

/// Summary of planned changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy, {} unchanged",
            self.create, self.update, self.replace, self.destroy, self.no_change
        )
    }
}

/// Provider operation performed by a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::Create => write!(f, "create"),
            StepAction::Update => write!(f, "update"),
            StepAction::Delete => write!(f, "delete"),
        }
    }
}

/// Outcome of one step in an apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub address: Address,
    pub action: StepAction,

    /// Failure or skip reason
    pub reason: Option<String>,
}

/// Result of applying a plan
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    pub applied: Vec<StepReport>,
    pub failed: Vec<StepReport>,
    pub skipped: Vec<StepReport>,

    /// Execution stopped scheduling new steps after a cancellation request
    pub cancelled: bool,

    pub duration: Duration,
}

impl ApplySummary {
    /// Every step applied and nothing was cancelled
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }
}

impl std::fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} applied, {} failed, {} skipped",
            self.applied.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
