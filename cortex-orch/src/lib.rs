#![deny(missing_docs)]
//! Workflow orchestration.
//!
//! A [`Workflow`] is a DAG of steps, each dispatched to an agent through
//! the [`cortex_manager::Manager`]. The runner seeds the ready set with
//! in-degree-zero steps and keeps at most `max_parallel_steps` in flight;
//! when several ready steps compete for a slot, the lexicographically
//! smallest `step_id` goes first (stable, testable). Each step gets its
//! own timeout and retry budget; conditions are evaluated against the
//! results accumulated so far, and a false condition skips the step
//! without blocking its successors.
//!
//! Failure policy is fail-fast by default: the first step that exhausts
//! its retries cancels everything in flight and skips everything
//! downstream. `ContinueIndependent` lets unrelated branches finish.
//!
//! The named coordination patterns — leader/follower, peer-to-peer,
//! pipeline, broadcast — are thin wrappers in [`patterns`].

pub mod patterns;
pub mod runner;
pub mod sink;
pub mod workflow;

pub use patterns::{LeaderFollowerOutcome, PatternOutcome, Pipeline};
pub use runner::{Orchestrator, StepResult, StepStatus, WorkflowResult, WorkflowStatus};
pub use sink::{MemorySink, ResultSink, WorkflowRecord};
pub use workflow::{
    FailurePolicy, StepCondition, Workflow, WorkflowConfig, WorkflowStep,
};
