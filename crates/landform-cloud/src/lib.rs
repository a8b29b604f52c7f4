//! Landform reconciliation engine
//!
//! Compares a declared resource graph against recorded state and drives
//! providers until the two match.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Landform CLI                    │
//! │          (landform plan / apply / destroy)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                landform-cloud                    │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │  Differ  │─▶│ Planner  │─▶│   Executor   │   │
//! │  └────┬─────┘  └──────────┘  └──────┬───────┘   │
//! │       │                             │           │
//! │  ┌────▼─────────────────────────────▼───────┐   │
//! │  │     State Store (snapshot + journal)     │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Provider Abstraction             │   │
//! │  │  trait CloudProvider { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │ landform-cloud│
//!           │    -local     │
//!           └───────────────┘
//! ```

pub mod action;
pub mod differ;
pub mod engine;
pub mod error;
pub mod executor;
pub mod planner;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{
    ApplySummary, Change, ChangeKind, ChangeSet, PlanSummary, StepAction, StepReport,
};
pub use differ::{Differ, diff_destroy_all, refresh};
pub use engine::{Engine, PlanOptions};
pub use error::{CloudError, PlanError, ProviderError, Result};
pub use executor::{CancelToken, Executor, ExecutorOptions, StepStatus};
pub use planner::{Plan, PlanStep, StepId};
pub use provider::{
    CloudProvider, CreatedResource, ProviderRegistry, ProviderResult, ResourceSchema,
    RetryConfig,
};
pub use state::{LockInfo, StateLock, StateRecord, StateSnapshot, StateStore};
