//! Lifecycle actions
//!
//! One action is chosen per invocation, either from a CLI subcommand or the
//! interactive menu, and drives everything the controller does.

use serde::Serialize;
use std::fmt;

/// The fixed set of operations the controller can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Stop, rebuild images without the layer cache, relaunch.
    Rebuild,

    /// Stop and relaunch from cached images; never rebuilds.
    Restart,

    /// Gracefully stop and remove every running managed service.
    Stop,

    /// Stream existing container output; no lifecycle transitions.
    ShowLogs,

    /// Rebuild, additionally pruning dangling images and pulling updated
    /// base images first.
    CleanRebuild,

    /// Do nothing and return immediately.
    Cancel,
}

impl LifecycleAction {
    /// Menu entries in their displayed order; the 1-based position is the
    /// number the operator types.
    pub const MENU: [LifecycleAction; 6] = [
        LifecycleAction::Rebuild,
        LifecycleAction::Restart,
        LifecycleAction::Stop,
        LifecycleAction::ShowLogs,
        LifecycleAction::CleanRebuild,
        LifecycleAction::Cancel,
    ];

    /// Resolves a 1-based menu selection.
    pub fn from_menu_choice(choice: usize) -> Option<LifecycleAction> {
        choice
            .checked_sub(1)
            .and_then(|i| Self::MENU.get(i))
            .copied()
    }

    /// Whether this action changes container runtime state.
    pub fn mutates(&self) -> bool {
        !matches!(self, LifecycleAction::ShowLogs | LifecycleAction::Cancel)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LifecycleAction::Rebuild => "Rebuild and restart",
            LifecycleAction::Restart => "Restart (no rebuild)",
            LifecycleAction::Stop => "Stop all services",
            LifecycleAction::ShowLogs => "Show logs",
            LifecycleAction::CleanRebuild => "Clean rebuild (prune and pull)",
            LifecycleAction::Cancel => "Cancel",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
