//! Lifecycle actions, operator confirmation, and the controller that applies
//! them to a deployment.

pub mod action;
pub mod confirm;
pub mod controller;

pub use action::LifecycleAction;
pub use confirm::{AssumeYes, NonInteractiveDeny, OperatorConfirmation};
pub use controller::{
    Controller, ExecutionResult, LifecycleError, Outcome, ServiceOutcome, Verdict,
};
