use std::time::Duration;

use enumset::EnumSet;

use crate::cost::CostParam;
use crate::rules::RuleId;

pub const DEFAULT_SEGMENTS: usize = 3;

/// Knobs of one optimizer run.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Number of segments data is spread across, used by the cost model.
    pub segments: usize,
    /// Number of worker threads running optimization jobs.
    pub parallelism: usize,
    pub enabled_rules: EnumSet<RuleId>,
    /// Overrides applied on top of default cost model parameters.
    pub cost_params: Vec<CostParam>,
    pub timeout: Option<Duration>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            segments: DEFAULT_SEGMENTS,
            parallelism: 1,
            enabled_rules: EnumSet::all(),
            cost_params: vec![],
            timeout: None,
        }
    }
}

impl OptimizerConfig {
    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments.max(1);
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_enabled_rules(mut self, rules: EnumSet<RuleId>) -> Self {
        self.enabled_rules = rules;
        self
    }

    pub fn with_disabled_rule(mut self, rule: RuleId) -> Self {
        self.enabled_rules.remove(rule);
        self
    }

    pub fn with_cost_params(mut self, params: Vec<CostParam>) -> Self {
        self.cost_params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_rule_enabled(&self, rule: RuleId) -> bool {
        self.enabled_rules.contains(rule)
    }
}
