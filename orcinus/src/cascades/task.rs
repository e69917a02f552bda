//! Search tasks.
//!
//! A task does one step of work and tells the scheduler what it depends on. A task returning
//! [`TaskControl::Yield`] is executed again once all its dependencies complete, a task
//! returning [`TaskControl::Done`] completes once all its dependencies complete.
use std::collections::HashSet;

use anyhow::anyhow;
use enum_dispatch::enum_dispatch;
use itertools::Itertools;
use log::{debug, trace};

use crate::cascades::binding::Binding;
use crate::cascades::memo::{GroupExprKey, GroupState, Memo};
use crate::cascades::task::TaskControl::{Done, Yield};
use crate::cascades::{CascadesOptimizer, GroupExprId, GroupId, OptimizationResult};
use crate::cost::{Cost, CostContext};
use crate::error::OptResult;
use crate::operator::Operator::{Logical, Physical};
use crate::operator::{
    enforcer_for, DerivePropContext, LogicalOperatorTrait, PhysicalOperator,
    PhysicalOperatorTrait, RequiredPropContext,
};
use crate::optimizer::{OptExpr, OptGroup, Optimizer};
use crate::properties::{
    DeliveredPropertySet, EnforcingType, LogicalProperty, PhysicalPropertySet,
    ALL_PROPERTY_KINDS,
};
use crate::rules::{Rule, RuleId, RuleImpl, RulePromise, RuleResult};
use crate::stat::Statistics;

/// Identity of a task, at most one task exists for a key in one search stage.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub(super) enum JobKey {
    ExploreGroup(GroupId),
    ExploreExpr(GroupExprId),
    ImplementGroup(GroupId),
    ImplementExpr(GroupExprId),
    OptimizeGroup(GroupId, PhysicalPropertySet),
    OptimizeInputs(GroupExprId, PhysicalPropertySet),
    ApplyRule(GroupExprId, RuleId),
}

#[enum_dispatch]
pub(super) enum TaskImpl {
    ExploreGroupTask,
    ExploreExprTask,
    ImplementGroupTask,
    ImplementExprTask,
    OptimizeGroupTask,
    OptimizeInputsTask,
    ApplyRuleTask,
}

pub(super) enum TaskControl {
    Yield {
        this: TaskImpl,
        dependencies: Vec<TaskImpl>,
    },
    Done {
        dependencies: Vec<TaskImpl>,
    },
}

impl TaskControl {
    fn done() -> Self {
        Done {
            dependencies: vec![],
        }
    }

    fn done_with_deps(dependencies: Vec<TaskImpl>) -> Self {
        Done { dependencies }
    }
}

#[enum_dispatch(TaskImpl)]
pub(super) trait Task {
    fn key(&self) -> JobKey;

    fn execute(self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl>;
}

/// Rules of `kind` applicable to a logical expression, most promising first.
fn promising_rules(
    memo: &Memo,
    rules: &[RuleImpl],
    group_expr_id: GroupExprId,
    implementation: bool,
) -> OptResult<Vec<RuleImpl>> {
    let group_expr = memo.group_expr(group_expr_id)?;
    let candidates = match group_expr.operator() {
        Logical(op) => op.candidate_rules(),
        Physical(_) => return Ok(vec![]),
    };

    let mut promising = vec![];
    for rule in rules {
        let rule_id = rule.rule_id();
        if rule_id.is_implementation() != implementation
            || !candidates.contains(rule_id)
            || group_expr.is_rule_applied(rule_id)
        {
            continue;
        }
        let promise = rule.promise(group_expr_id, memo)?;
        if promise > RulePromise::None {
            promising.push((promise, rule.clone()));
        }
    }

    Ok(promising
        .into_iter()
        .sorted_by(|(p1, _), (p2, _)| p2.cmp(p1))
        .map(|(_, rule)| rule)
        .collect())
}

/// Explores a group by exploring all its logical expressions.
pub(super) struct ExploreGroupTask {
    group_id: GroupId,
    spawned: HashSet<GroupExprId>,
}

impl ExploreGroupTask {
    pub(super) fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            spawned: HashSet::new(),
        }
    }
}

impl Task for ExploreGroupTask {
    fn key(&self) -> JobKey {
        JobKey::ExploreGroup(self.group_id)
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        let mut memo = optimizer.memo.write();
        let group = memo.group_mut(self.group_id)?;
        if group.state >= GroupState::Explored {
            return Ok(TaskControl::done());
        }
        group.state = GroupState::Exploring;

        let pending = group
            .exprs()
            .filter(|e| e.is_logical() && !e.is_dead() && !e.explored)
            .map(|e| e.id())
            .filter(|id| !self.spawned.contains(id))
            .collect::<Vec<_>>();

        if pending.is_empty() {
            group.state = GroupState::Explored;
            trace!("Group {} explored", self.group_id);
            return Ok(TaskControl::done());
        }

        self.spawned.extend(pending.iter().copied());
        let dependencies = pending
            .into_iter()
            .map(|id| ExploreExprTask::new(id).into())
            .collect();
        Ok(Yield {
            this: self.into(),
            dependencies,
        })
    }
}

/// Explores inputs of a logical expression, then applies exploration rules to it.
pub(super) struct ExploreExprTask {
    group_expr_id: GroupExprId,
    inputs_explored: bool,
}

impl ExploreExprTask {
    fn new(group_expr_id: GroupExprId) -> Self {
        Self {
            group_expr_id,
            inputs_explored: false,
        }
    }
}

impl Task for ExploreExprTask {
    fn key(&self) -> JobKey {
        JobKey::ExploreExpr(self.group_expr_id)
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        if !self.inputs_explored {
            let memo = optimizer.memo.read();
            let group_expr = memo.group_expr(self.group_expr_id)?;
            if group_expr.explored || group_expr.is_dead() {
                return Ok(TaskControl::done());
            }

            self.inputs_explored = true;
            let dependencies = group_expr
                .inputs()
                .iter()
                .map(|group_id| memo.resolve_group(*group_id))
                .unique()
                .map(|group_id| ExploreGroupTask::new(group_id).into())
                .collect::<Vec<TaskImpl>>();
            if !dependencies.is_empty() {
                return Ok(Yield {
                    this: self.into(),
                    dependencies,
                });
            }
        }

        let rules = {
            let memo = optimizer.memo.read();
            promising_rules(&memo, optimizer.rules(), self.group_expr_id, false)?
        };
        optimizer
            .memo
            .write()
            .group_expr_mut(self.group_expr_id)?
            .explored = true;

        Ok(TaskControl::done_with_deps(
            rules
                .into_iter()
                .map(|rule| ApplyRuleTask::new(self.group_expr_id, rule).into())
                .collect(),
        ))
    }
}

/// Implements a group by implementing all its logical expressions.
pub(super) struct ImplementGroupTask {
    group_id: GroupId,
    spawned: HashSet<GroupExprId>,
}

impl ImplementGroupTask {
    pub(super) fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            spawned: HashSet::new(),
        }
    }
}

impl Task for ImplementGroupTask {
    fn key(&self) -> JobKey {
        JobKey::ImplementGroup(self.group_id)
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        let mut memo = optimizer.memo.write();
        let group = memo.group_mut(self.group_id)?;
        if group.state >= GroupState::Implemented {
            return Ok(TaskControl::done());
        }
        group.state = GroupState::Implementing;

        let pending = group
            .exprs()
            .filter(|e| e.is_logical() && !e.is_dead() && !e.implemented)
            .map(|e| e.id())
            .filter(|id| !self.spawned.contains(id))
            .collect::<Vec<_>>();

        if pending.is_empty() {
            group.state = GroupState::Implemented;
            trace!("Group {} implemented", self.group_id);
            return Ok(TaskControl::done());
        }

        self.spawned.extend(pending.iter().copied());
        let dependencies = pending
            .into_iter()
            .map(|id| ImplementExprTask::new(id).into())
            .collect();
        Ok(Yield {
            this: self.into(),
            dependencies,
        })
    }
}

/// Implements inputs of a logical expression, then applies implementation rules to it.
pub(super) struct ImplementExprTask {
    group_expr_id: GroupExprId,
    inputs_implemented: bool,
}

impl ImplementExprTask {
    fn new(group_expr_id: GroupExprId) -> Self {
        Self {
            group_expr_id,
            inputs_implemented: false,
        }
    }
}

impl Task for ImplementExprTask {
    fn key(&self) -> JobKey {
        JobKey::ImplementExpr(self.group_expr_id)
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        if !self.inputs_implemented {
            let memo = optimizer.memo.read();
            let group_expr = memo.group_expr(self.group_expr_id)?;
            if group_expr.implemented || group_expr.is_dead() {
                return Ok(TaskControl::done());
            }

            self.inputs_implemented = true;
            let dependencies = group_expr
                .inputs()
                .iter()
                .map(|group_id| memo.resolve_group(*group_id))
                .unique()
                .map(|group_id| ImplementGroupTask::new(group_id).into())
                .collect::<Vec<TaskImpl>>();
            if !dependencies.is_empty() {
                return Ok(Yield {
                    this: self.into(),
                    dependencies,
                });
            }
        }

        let rules = {
            let memo = optimizer.memo.read();
            promising_rules(&memo, optimizer.rules(), self.group_expr_id, true)?
        };
        optimizer
            .memo
            .write()
            .group_expr_mut(self.group_expr_id)?
            .implemented = true;

        Ok(TaskControl::done_with_deps(
            rules
                .into_iter()
                .map(|rule| ApplyRuleTask::new(self.group_expr_id, rule).into())
                .collect(),
        ))
    }
}

/// Applies one rule to all bindings of a logical expression, and copies results into the
/// expression's group.
pub(super) struct ApplyRuleTask {
    group_expr_id: GroupExprId,
    rule: RuleImpl,
}

impl ApplyRuleTask {
    fn new(group_expr_id: GroupExprId, rule: RuleImpl) -> Self {
        Self {
            group_expr_id,
            rule,
        }
    }
}

impl Task for ApplyRuleTask {
    fn key(&self) -> JobKey {
        JobKey::ApplyRule(self.group_expr_id, self.rule.rule_id())
    }

    fn execute(self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        let rule_id = self.rule.rule_id();
        let results = {
            let memo = optimizer.memo.read();
            let group_expr = memo.group_expr(self.group_expr_id)?;
            if group_expr.is_dead() || group_expr.is_rule_applied(rule_id) {
                return Ok(TaskControl::done());
            }

            let mut results = RuleResult::new();
            for binding in Binding::new(&memo, self.rule.pattern()).bind(self.group_expr_id) {
                self.rule.apply(binding, &*memo, &mut results)?;
            }
            results
        };

        let mut memo = optimizer.memo.write();
        let group_id = memo.expr_group(self.group_expr_id);
        for result in results.results() {
            let new_expr_id = memo.insert_opt_expression(&result, Some(group_id))?;
            debug!(
                "Rule {:?} on {} produced {}: {:?}",
                self.rule, self.group_expr_id, new_expr_id, result
            );
        }
        memo.group_expr_mut(self.group_expr_id)?
            .applied_rules
            .insert(rule_id);

        Ok(TaskControl::done())
    }
}

/// Finds the cheapest plan of a group satisfying a required property set.
pub(super) struct OptimizeGroupTask {
    group_id: GroupId,
    required: PhysicalPropertySet,
    spawned: HashSet<GroupExprId>,
}

impl OptimizeGroupTask {
    pub(super) fn new(group_id: GroupId, required: PhysicalPropertySet) -> Self {
        Self {
            group_id,
            required,
            spawned: HashSet::new(),
        }
    }
}

impl Task for OptimizeGroupTask {
    fn key(&self) -> JobKey {
        JobKey::OptimizeGroup(self.group_id, self.required.clone())
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        let pending = {
            let memo = optimizer.memo.read();
            let group = memo.group(self.group_id)?;
            if group.is_optimized(&self.required) {
                return Ok(TaskControl::done());
            }
            group
                .physical_expr_ids()
                .into_iter()
                .filter(|id| !self.spawned.contains(id))
                .collect::<Vec<_>>()
        };

        if pending.is_empty() {
            optimizer
                .memo
                .write()
                .group_mut(self.group_id)?
                .mark_optimized(self.required.clone());
            trace!("Group {} optimized for {}", self.group_id, self.required);
            return Ok(TaskControl::done());
        }

        self.spawned.extend(pending.iter().copied());
        let dependencies = pending
            .into_iter()
            .map(|id| OptimizeInputsTask::new(id, self.required.clone()).into())
            .collect();
        Ok(Yield {
            this: self.into(),
            dependencies,
        })
    }
}

/// Optimizes children of a physical expression for each of its requests, and records the
/// expression as winner or adds enforcers when its delivered properties don't satisfy the
/// requirement.
pub(super) struct OptimizeInputsTask {
    group_expr_id: GroupExprId,
    required: PhysicalPropertySet,
    initialized: bool,
    request: usize,
    request_count: usize,
    /// Children in optimization order.
    order: Vec<usize>,
    /// Position in `order` of the child being optimized.
    pos: usize,
    /// Whether the task is waiting for the child at `pos`.
    waiting: bool,
    child_required: Vec<Option<PhysicalPropertySet>>,
    delivered: Vec<Option<DeliveredPropertySet>>,
    costs: Vec<Option<Cost>>,
}

impl OptimizeInputsTask {
    fn new(group_expr_id: GroupExprId, required: PhysicalPropertySet) -> Self {
        Self {
            group_expr_id,
            required,
            initialized: false,
            request: 0,
            request_count: 0,
            order: vec![],
            pos: 0,
            waiting: false,
            child_required: vec![],
            delivered: vec![],
            costs: vec![],
        }
    }

    fn start_request(&mut self, request: usize) {
        let arity = self.order.len();
        self.request = request;
        self.pos = 0;
        self.waiting = false;
        self.child_required = vec![None; arity];
        self.delivered = vec![None; arity];
        self.costs = vec![None; arity];
    }

    fn accumulated_cost(&self) -> Cost {
        self.costs.iter().flatten().copied().sum()
    }

    /// Costs the expression with the children chosen for current request.
    fn optimize_self(&self, optimizer: &CascadesOptimizer) -> OptResult<()> {
        let mut memo = optimizer.memo.write();
        let group_expr = memo.group_expr(self.group_expr_id)?;
        let operator = group_expr
            .operator()
            .as_physical()
            .ok_or_else(|| anyhow!("{} is not a physical expression", self.group_expr_id))?
            .clone();
        let inputs = group_expr.inputs().to_vec();
        let group_id = memo.expr_group(self.group_expr_id);

        let input_delivered = self
            .delivered
            .iter()
            .map(|d| d.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        let delivered = operator.derive_delivered(&DerivePropContext {
            optimizer_context: memo.context(),
            input_delivered: &input_delivered,
        })?;

        let cost = {
            let group = memo.group(group_id)?;
            let input_stats = inputs
                .iter()
                .map(|input| memo.group(*input).map(|g| g.statistics()))
                .collect::<OptResult<Vec<&Statistics>>>()?;
            memo.context()
                .cost_model
                .cost(&CostContext {
                    operator: &operator,
                    stats: group.statistics(),
                    input_stats,
                    input_costs: self.costs.iter().map(|c| c.unwrap_or_default()).collect(),
                    delivered: &delivered,
                    input_delivered: &input_delivered,
                })?
                .validate(&operator)?
        };

        let enforcers = {
            let equivalences = memo.group(group_id)?.logical_prop().equivalences();
            let mut enforcers = vec![];
            for kind in ALL_PROPERTY_KINDS {
                match operator.enforcing_type(kind, &self.required, &delivered, equivalences) {
                    EnforcingType::Unnecessary => {}
                    EnforcingType::Required => {
                        match enforcer_for(kind, &self.required, &delivered) {
                            Some(enforcer) => enforcers.push(enforcer),
                            None => return Ok(()),
                        }
                    }
                    EnforcingType::Prohibited => {
                        trace!(
                            "{} {} can't deliver {:?} of {}",
                            self.group_expr_id,
                            operator,
                            kind,
                            self.required
                        );
                        return Ok(());
                    }
                }
            }
            enforcers
        };

        if enforcers.is_empty() {
            let result = OptimizationResult {
                group_expr_id: memo.resolve_expr(self.group_expr_id),
                cost,
                input_props: self
                    .child_required
                    .iter()
                    .map(|r| r.clone().unwrap_or_default())
                    .collect(),
                delivered,
            };
            if memo
                .group_mut(group_id)?
                .update_winner(self.required.clone(), result)
            {
                debug!(
                    "New winner {} of group {} for {} with cost {}",
                    self.group_expr_id, group_id, self.required, cost
                );
            }
        } else {
            for enforcer in enforcers {
                add_enforcer(&mut memo, group_id, enforcer)?;
            }
        }
        Ok(())
    }
}

fn add_enforcer(memo: &mut Memo, group_id: GroupId, enforcer: PhysicalOperator) -> OptResult<()> {
    let key = GroupExprKey {
        operator: Physical(enforcer),
        inputs: vec![group_id],
    };
    let id = memo.insert_group_expression(key, Some(group_id))?;
    trace!("Enforcer {} added to group {}", id, group_id);
    Ok(())
}

impl Task for OptimizeInputsTask {
    fn key(&self) -> JobKey {
        JobKey::OptimizeInputs(self.group_expr_id, self.required.clone())
    }

    fn execute(mut self, optimizer: &CascadesOptimizer) -> OptResult<TaskControl> {
        loop {
            let memo = optimizer.memo.read();
            let group_expr = memo.group_expr(self.group_expr_id)?;
            if group_expr.is_dead() {
                return Ok(TaskControl::done());
            }
            let operator = group_expr
                .operator()
                .as_physical()
                .ok_or_else(|| anyhow!("{} is not a physical expression", self.group_expr_id))?;
            let inputs = group_expr
                .inputs()
                .iter()
                .map(|g| memo.resolve_group(*g))
                .collect::<Vec<_>>();
            let group_id = memo.expr_group(self.group_expr_id);

            if !self.initialized {
                self.initialized = true;
                self.request_count = operator.request_count();
                self.order = operator.child_order(inputs.len());
                self.start_request(0);
            }
            if self.request >= self.request_count {
                return Ok(TaskControl::done());
            }

            if self.pos == self.order.len() {
                drop(memo);
                self.optimize_self(optimizer)?;
                self.start_request(self.request + 1);
                continue;
            }

            let child = self.order[self.pos];
            let child_group = inputs[child];

            if !self.waiting {
                let input_props = inputs
                    .iter()
                    .map(|g| memo.group(*g).map(|g| g.logical_prop()))
                    .collect::<OptResult<Vec<&LogicalProperty>>>()?;
                let child_required = operator.required_prop(&RequiredPropContext {
                    required: &self.required,
                    request: self.request,
                    child,
                    delivered: &self.delivered,
                    input_props: &input_props,
                })?;

                match child_required {
                    Some(child_required)
                        if !(child_group == group_id && child_required == self.required) =>
                    {
                        self.child_required[child] = Some(child_required.clone());
                        self.waiting = true;
                        return Ok(Yield {
                            this: self.into(),
                            dependencies: vec![
                                OptimizeGroupTask::new(child_group, child_required).into()
                            ],
                        });
                    }
                    _ => {
                        self.start_request(self.request + 1);
                        continue;
                    }
                }
            }

            self.waiting = false;
            let child_winner = self.child_required[child]
                .as_ref()
                .and_then(|r| memo.group(child_group).ok()?.winner(r));
            match child_winner {
                Some(winner) => {
                    self.delivered[child] = Some(winner.delivered.clone());
                    self.costs[child] = Some(winner.cost);
                }
                None => {
                    self.start_request(self.request + 1);
                    continue;
                }
            }

            let accumulated = self.accumulated_cost();
            let pruned = memo
                .group(group_id)?
                .winner(&self.required)
                .map(|best| accumulated > best.cost)
                .unwrap_or(false);
            if pruned {
                trace!(
                    "{} pruned for {} with input cost {}",
                    self.group_expr_id,
                    self.required,
                    accumulated
                );
                self.start_request(self.request + 1);
            } else {
                self.pos += 1;
            }
        }
    }
}
