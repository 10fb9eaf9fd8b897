//! Per-run policy and the caps it initializes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the loop does when a tool reports missing fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldsAction {
    /// Hand the hint back to the planner and keep going.
    #[default]
    Resume,
    /// Pause and ask the operator for a clarification.
    /// Requires `interrupts_allowed`; downgraded to finalize otherwise.
    AwaitClarification,
    /// Ask the planner for a terminal answer.
    Finalize,
}

/// Per-run execution policy. Agent registrations carry a default; callers
/// may override individual fields per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Maximum tool calls the planner may schedule in one turn.
    pub per_turn_max_tool_calls: Option<u32>,
    /// Maximum tool calls across the whole run.
    pub run_max_tool_calls: Option<u32>,
    /// Consecutive failed tool calls before the loop finalizes.
    pub run_max_consecutive_failed_tool_calls: Option<u32>,
    /// Wall-clock budget for the run.
    pub run_time_budget: Option<Duration>,
    /// Timeout applied to each tool activity.
    pub per_tool_timeout: Option<Duration>,
    /// Timeout applied to each plan activity.
    pub plan_timeout: Option<Duration>,
    /// Whether awaits (clarification, confirmation) are permitted.
    pub interrupts_allowed: bool,
    /// When set, only this fully-qualified tool may be called.
    pub restrict_to_tool: Option<String>,
    /// When non-empty, a tool must carry at least one of these tags.
    pub allowed_tags: Vec<String>,
    /// A tool carrying any of these tags is rejected.
    pub denied_tags: Vec<String>,
    /// Reaction to a `missing_fields` retry hint.
    pub on_missing_fields: MissingFieldsAction,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            per_turn_max_tool_calls: None,
            run_max_tool_calls: None,
            run_max_consecutive_failed_tool_calls: None,
            run_time_budget: None,
            per_tool_timeout: Some(Duration::from_secs(120)),
            plan_timeout: Some(Duration::from_secs(120)),
            interrupts_allowed: true,
            restrict_to_tool: None,
            allowed_tags: Vec::new(),
            denied_tags: Vec::new(),
            on_missing_fields: MissingFieldsAction::Resume,
        }
    }
}

/// Per-run overrides merged field-by-field over the agent default policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPolicyOverrides {
    /// Override for [`RunPolicy::per_turn_max_tool_calls`].
    pub per_turn_max_tool_calls: Option<u32>,
    /// Override for [`RunPolicy::run_max_tool_calls`].
    pub run_max_tool_calls: Option<u32>,
    /// Override for [`RunPolicy::run_max_consecutive_failed_tool_calls`].
    pub run_max_consecutive_failed_tool_calls: Option<u32>,
    /// Override for [`RunPolicy::run_time_budget`].
    pub run_time_budget: Option<Duration>,
    /// Override for [`RunPolicy::interrupts_allowed`].
    pub run_interrupts_allowed: Option<bool>,
    /// Override for [`RunPolicy::restrict_to_tool`].
    pub restrict_to_tool: Option<String>,
    /// Override for [`RunPolicy::allowed_tags`].
    pub allowed_tags: Option<Vec<String>>,
    /// Override for [`RunPolicy::denied_tags`].
    pub denied_tags: Option<Vec<String>>,
}

impl RunPolicy {
    /// Merge per-run overrides over this policy.
    #[must_use]
    pub fn merged(&self, overrides: &RunPolicyOverrides) -> Self {
        let mut policy = self.clone();
        if let Some(v) = overrides.per_turn_max_tool_calls {
            policy.per_turn_max_tool_calls = Some(v);
        }
        if let Some(v) = overrides.run_max_tool_calls {
            policy.run_max_tool_calls = Some(v);
        }
        if let Some(v) = overrides.run_max_consecutive_failed_tool_calls {
            policy.run_max_consecutive_failed_tool_calls = Some(v);
        }
        if let Some(v) = overrides.run_time_budget {
            policy.run_time_budget = Some(v);
        }
        if let Some(v) = overrides.run_interrupts_allowed {
            policy.interrupts_allowed = v;
        }
        if let Some(v) = &overrides.restrict_to_tool {
            policy.restrict_to_tool = Some(v.clone());
        }
        if let Some(v) = &overrides.allowed_tags {
            policy.allowed_tags = v.clone();
        }
        if let Some(v) = &overrides.denied_tags {
            policy.denied_tags = v.clone();
        }
        policy
    }

    /// Whether a tool with the given tags passes the allow/deny filter.
    #[must_use]
    pub fn permits_tags(&self, tags: &[String]) -> bool {
        if tags.iter().any(|t| self.denied_tags.contains(t)) {
            return false;
        }
        if self.allowed_tags.is_empty() {
            return true;
        }
        tags.iter().any(|t| self.allowed_tags.contains(t))
    }

    /// Whether the given fully-qualified tool name passes the
    /// restrict-to-tool filter.
    #[must_use]
    pub fn permits_tool(&self, name: &str) -> bool {
        match &self.restrict_to_tool {
            Some(only) => only == name,
            None => true,
        }
    }
}

/// Mutable per-run budgets, initialized from policy and decremented as the
/// run progresses. All counters are non-negative and non-increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsState {
    /// Tool calls remaining for the whole run, when capped.
    pub remaining_tool_calls: Option<u32>,
    /// Current streak of consecutive failed tool calls.
    pub consecutive_failures: u32,
}

impl CapsState {
    /// Initialize caps from a policy.
    #[must_use]
    pub fn from_policy(policy: &RunPolicy) -> Self {
        Self {
            remaining_tool_calls: policy.run_max_tool_calls,
            consecutive_failures: 0,
        }
    }

    /// Consume up to `requested` tool calls, returning how many the run-level
    /// cap actually permits.
    pub fn take_tool_calls(&mut self, requested: u32) -> u32 {
        match self.remaining_tool_calls {
            None => requested,
            Some(remaining) => {
                let granted = requested.min(remaining);
                self.remaining_tool_calls = Some(remaining - granted);
                granted
            }
        }
    }

    /// Record one tool outcome; returns the updated failure streak.
    pub fn record_outcome(&mut self, failed: bool) -> u32 {
        if failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_merge_field_by_field() {
        let base = RunPolicy {
            run_max_tool_calls: Some(10),
            ..Default::default()
        };
        let merged = base.merged(&RunPolicyOverrides {
            run_time_budget: Some(Duration::from_secs(60)),
            run_interrupts_allowed: Some(false),
            ..Default::default()
        });
        assert_eq!(merged.run_max_tool_calls, Some(10));
        assert_eq!(merged.run_time_budget, Some(Duration::from_secs(60)));
        assert!(!merged.interrupts_allowed);
    }

    #[test]
    fn tag_filter_deny_wins() {
        let policy = RunPolicy {
            allowed_tags: vec!["search".into()],
            denied_tags: vec!["write".into()],
            ..Default::default()
        };
        assert!(policy.permits_tags(&["search".into()]));
        assert!(!policy.permits_tags(&["search".into(), "write".into()]));
        assert!(!policy.permits_tags(&["other".into()]));
    }

    #[test]
    fn empty_allowlist_permits_all() {
        let policy = RunPolicy::default();
        assert!(policy.permits_tags(&["anything".into()]));
        assert!(policy.permits_tags(&[]));
    }

    #[test]
    fn caps_are_monotone() {
        let mut caps = CapsState {
            remaining_tool_calls: Some(3),
            consecutive_failures: 0,
        };
        assert_eq!(caps.take_tool_calls(2), 2);
        assert_eq!(caps.remaining_tool_calls, Some(1));
        assert_eq!(caps.take_tool_calls(5), 1);
        assert_eq!(caps.remaining_tool_calls, Some(0));
        assert_eq!(caps.take_tool_calls(1), 0);
    }

    #[test]
    fn failure_streak_resets_on_success() {
        let mut caps = CapsState::from_policy(&RunPolicy::default());
        assert_eq!(caps.record_outcome(true), 1);
        assert_eq!(caps.record_outcome(true), 2);
        assert_eq!(caps.record_outcome(false), 0);
    }
}
