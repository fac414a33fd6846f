//! Scaling decision types.

use serde::Serialize;

/// What the engine wants done with a role group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    #[default]
    None,
    Up,
    Down,
}

impl ScaleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::None => "none",
            ScaleAction::Up => "up",
            ScaleAction::Down => "down",
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of fusing a role group's metric scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    /// Meaningful only when `action` is not `None`; otherwise the current count.
    pub target_replicas: u32,
    /// Per-metric explanations joined with `"; "`. Never empty for Up/Down.
    pub reason: String,
    /// In `[0, 1]`; zero for `None`.
    pub confidence: f64,
    /// Fused weighted score the action was derived from.
    pub score: f64,
}

impl ScalingDecision {
    /// A decision to leave the role group as it is.
    pub fn none(current: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::None,
            target_replicas: current,
            reason: reason.into(),
            confidence: 0.0,
            score: 0.5,
        }
    }

    pub fn is_none(&self) -> bool {
        self.action == ScaleAction::None
    }
}
