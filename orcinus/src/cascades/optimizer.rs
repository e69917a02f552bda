use std::time::Instant;

use log::{debug, info};
use parking_lot::{RwLock, RwLockReadGuard};

use crate::cascades::memo::Memo;
use crate::cascades::scheduler::Scheduler;
use crate::cascades::task::{ExploreGroupTask, ImplementGroupTask, OptimizeGroupTask, TaskImpl};
use crate::error::OptResult;
use crate::optimizer::OptimizerContext;
use crate::plan::Plan;
use crate::properties::PhysicalPropertySet;
use crate::rules::{default_rules, Rule, RuleImpl};

/// Cascades style cost based optimizer.
///
/// Search runs in three stages over one memo: exploration applies exploration rules until no
/// new logical expression appears, implementation adds physical expressions, and optimization
/// costs physical expressions top down for the required properties, adding enforcers where
/// needed. Duplicated groups are merged between stages.
pub struct CascadesOptimizer {
    required_prop: PhysicalPropertySet,
    rules: Vec<RuleImpl>,
    pub(super) memo: RwLock<Memo>,
    context: OptimizerContext,
}

impl CascadesOptimizer {
    /// Creates an optimizer for a logical `plan`, rules disabled in config are ignored.
    pub fn new(
        required_prop: PhysicalPropertySet,
        rules: Vec<RuleImpl>,
        plan: Plan,
        context: OptimizerContext,
    ) -> OptResult<Self> {
        let rules = rules
            .into_iter()
            .filter(|rule| context.config.is_rule_enabled(rule.rule_id()))
            .collect();
        let memo = Memo::try_new(plan, context.clone())?;

        Ok(Self {
            required_prop,
            rules,
            memo: RwLock::new(memo),
            context,
        })
    }

    pub fn with_default_rules(
        required_prop: PhysicalPropertySet,
        plan: Plan,
        context: OptimizerContext,
    ) -> OptResult<Self> {
        Self::new(required_prop, default_rules(), plan, context)
    }

    pub fn context(&self) -> &OptimizerContext {
        &self.context
    }

    pub fn rules(&self) -> &[RuleImpl] {
        &self.rules
    }

    pub fn required_prop(&self) -> &PhysicalPropertySet {
        &self.required_prop
    }

    pub fn memo(&self) -> RwLockReadGuard<'_, Memo> {
        self.memo.read()
    }

    /// Searches for the cheapest plan satisfying required properties.
    ///
    /// Search results are kept in memo, calling this again only extracts the plan.
    pub fn find_best_plan(&self) -> OptResult<Plan> {
        let deadline = self.context.config.timeout.map(|t| Instant::now() + t);

        self.run_stage("exploration", deadline, |root| {
            ExploreGroupTask::new(root).into()
        })?;
        self.run_stage("implementation", deadline, |root| {
            ImplementGroupTask::new(root).into()
        })?;

        let root = self.memo.read().root_group_id();
        Scheduler::new(self, deadline).run(
            OptimizeGroupTask::new(root, self.required_prop.clone()).into(),
        )?;

        let memo = self.memo.read();
        debug!("Memo after optimization: {:?}", *memo);
        memo.best_plan(memo.root_group_id(), &self.required_prop)
    }

    /// Runs a stage from root group, merging duplicated groups until none is found.
    ///
    /// Merging resets search state of merged groups and their ancestors, so each round
    /// searches the new bindings the merge created.
    fn run_stage<F>(&self, name: &str, deadline: Option<Instant>, root_task: F) -> OptResult<()>
    where
        F: Fn(crate::cascades::GroupId) -> TaskImpl,
    {
        loop {
            let root = self.memo.read().root_group_id();
            Scheduler::new(self, deadline).run(root_task(root))?;

            let merged = self.memo.write().merge_duplicate_groups()?;
            info!("Finished {} stage, merged {} groups", name, merged);
            if merged == 0 {
                return Ok(());
            }
        }
    }
}
