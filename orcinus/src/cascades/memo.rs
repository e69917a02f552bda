use std::cmp::{max, min, Ordering};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};
use std::mem::take;
use std::ops::Index;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use enumset::EnumSet;
use log::{debug, info, trace};
use prettytable::{row, Table};

use crate::cost::Cost;
use crate::error::{OptResult, OptimizerError};
use crate::operator::Operator::{Logical, Physical};
use crate::operator::{DeriveContext, LogicalOperator, LogicalOperatorTrait, Operator};
use crate::optimizer::{
    OptExpr, OptExprHandle, OptGroup, OptGroupHandle, Optimizer, OptimizerContext,
};
use crate::plan::{Plan, PlanArena, PlanNodeBuilder, PlanNodeId};
use crate::properties::{DeliveredPropertySet, LogicalProperty, PhysicalPropertySet};
use crate::rules::OptExprNode::{ExprHandleNode, GroupHandleNode, OperatorNode};
use crate::rules::{OptExpression, RuleId};
use crate::stat::{StatPromise, Statistics};

/// Dynamic programming table used for storing expression groups.
///
/// Groups are never removed during a search stage. Groups found to be equivalent are only
/// recorded, and merged by [`Memo::merge_duplicate_groups`] between stages, so that ids handed
/// out to running tasks stay valid.
pub struct Memo {
    context: OptimizerContext,
    groups: BTreeMap<GroupId, Group>,
    /// Used to avoid inserting duplicated group expressions.
    group_exprs: HashMap<GroupExprKey, GroupExprId>,
    root_group_id: GroupId,
    next_group_id: GroupId,

    /// Records which group a merged group has been moved into.
    merged_groups: HashMap<GroupId, GroupId>,
    /// Records new ids of expressions moved by merging.
    merged_group_exprs: HashMap<GroupExprId, GroupExprId>,
    /// Found but not merged duplicated groups, as `(src, dest)` with `src > dest`.
    duplicated_groups: Vec<(GroupId, GroupId)>,
}

impl Memo {
    /// Copies a logical plan into memo, one group per distinct sub plan.
    pub fn try_new(plan: Plan, context: OptimizerContext) -> OptResult<Self> {
        let mut memo = Memo {
            context,
            groups: BTreeMap::new(),
            group_exprs: HashMap::new(),
            root_group_id: GroupId(0),
            next_group_id: GroupId(0),
            merged_groups: HashMap::new(),
            merged_group_exprs: HashMap::new(),
            duplicated_groups: vec![],
        };

        let mut node_groups: HashMap<PlanNodeId, GroupId> = HashMap::with_capacity(plan.nodes().len());
        for node_id in plan.post_order() {
            let node = plan
                .node(node_id)
                .ok_or_else(|| anyhow!("Plan node {} not found", node_id))?;
            let inputs = node
                .inputs()
                .iter()
                .map(|input| {
                    node_groups
                        .get(input)
                        .copied()
                        .ok_or_else(|| anyhow!("Input {} of plan node {} not found", input, node_id))
                })
                .collect::<OptResult<Vec<GroupId>>>()?;

            let key = GroupExprKey {
                operator: node.operator().clone(),
                inputs,
            };
            let group_expr_id = memo.insert_group_expression(key, None)?;
            node_groups.insert(node_id, group_expr_id.group_id);
        }

        memo.root_group_id = node_groups
            .get(&plan.root_id())
            .copied()
            .ok_or_else(|| anyhow!("Root of plan not found"))?;
        Ok(memo)
    }

    pub fn root_group_id(&self) -> GroupId {
        self.resolve_group(self.root_group_id)
    }

    /// First live logical expression of root group.
    pub fn root_expr_id(&self) -> GroupExprId {
        let root = &self[self.root_group_id];
        root.logical_expr_ids()
            .into_iter()
            .next()
            .unwrap_or(GroupExprId::new(root.group_id, 0))
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, group_id: GroupId) -> OptResult<&Group> {
        let resolved = self.resolve_group(group_id);
        self.groups
            .get(&resolved)
            .ok_or_else(|| anyhow!("Group {} not found in memo", group_id))
    }

    pub(super) fn group_mut(&mut self, group_id: GroupId) -> OptResult<&mut Group> {
        let resolved = self.resolve_group(group_id);
        self.groups
            .get_mut(&resolved)
            .ok_or_else(|| anyhow!("Group {} not found in memo", group_id))
    }

    pub fn group_expr(&self, group_expr_id: GroupExprId) -> OptResult<&GroupExpr> {
        let resolved = self.resolve_expr(group_expr_id);
        self.groups
            .get(&resolved.group_id)
            .and_then(|group| group.exprs.get(&resolved.expr_id))
            .ok_or_else(|| anyhow!("Group expression {} not found in memo", group_expr_id))
    }

    pub(super) fn group_expr_mut(&mut self, group_expr_id: GroupExprId) -> OptResult<&mut GroupExpr> {
        let resolved = self.resolve_expr(group_expr_id);
        self.groups
            .get_mut(&resolved.group_id)
            .and_then(|group| group.exprs.get_mut(&resolved.expr_id))
            .ok_or_else(|| anyhow!("Group expression {} not found in memo", group_expr_id))
    }

    /// Follows merges to the group `group_id` currently lives in.
    pub fn resolve_group(&self, group_id: GroupId) -> GroupId {
        resolve_in(&self.merged_groups, group_id)
    }

    /// Follows merges to the current id of an expression.
    pub fn resolve_expr(&self, group_expr_id: GroupExprId) -> GroupExprId {
        resolve_in(&self.merged_group_exprs, group_expr_id)
    }

    pub fn has_duplicated_groups(&self) -> bool {
        !self.duplicated_groups.is_empty()
    }

    /// Inserts a rule result into memo and returns its group expression id.
    ///
    /// Parts of the result bound from memo keep their ids. Nodes created by the rule are
    /// inserted recursively, inputs first, into new groups unless an identical expression
    /// already exists. The root goes to `target_group` when given.
    ///
    /// Equivalent groups found during insertion are only marked, never merged here.
    pub fn insert_opt_expression(
        &mut self,
        opt_expr: &OptExpression<Memo>,
        target_group: Option<GroupId>,
    ) -> OptResult<GroupExprId> {
        match opt_expr.node() {
            ExprHandleNode(handle) => {
                let group_expr_id = self.resolve_expr(*handle);
                let inputs = self.insert_inputs(opt_expr)?;
                let existing = self.group_expr(group_expr_id)?;

                if opt_expr.inputs().is_empty() || inputs == existing.key.inputs {
                    if let Some(target) = target_group {
                        self.mark_duplicated_groups(target, group_expr_id.group_id);
                    }
                    Ok(group_expr_id)
                } else {
                    let key = GroupExprKey {
                        operator: existing.key.operator.clone(),
                        inputs,
                    };
                    self.insert_group_expression(key, target_group)
                }
            }
            OperatorNode(operator) => {
                let inputs = self.insert_inputs(opt_expr)?;
                let key = GroupExprKey {
                    operator: operator.clone(),
                    inputs,
                };
                self.insert_group_expression(key, target_group)
            }
            GroupHandleNode(group_id) => {
                bail!("Group handle {} can't be inserted as an expression", group_id)
            }
        }
    }

    fn insert_inputs(&mut self, opt_expr: &OptExpression<Memo>) -> OptResult<Vec<GroupId>> {
        opt_expr
            .inputs()
            .iter()
            .map(|input| match input.node() {
                GroupHandleNode(group_id) => Ok(self.resolve_group(*group_id)),
                _ => self
                    .insert_opt_expression(input, None)
                    .map(|id| id.group_id),
            })
            .collect()
    }

    /// Inserts an expression unless an identical one exists.
    ///
    /// An identical expression living in another group than `target_group` makes the two
    /// groups duplicated.
    pub(super) fn insert_group_expression(
        &mut self,
        key: GroupExprKey,
        target_group: Option<GroupId>,
    ) -> OptResult<GroupExprId> {
        let key = GroupExprKey {
            inputs: key
                .inputs
                .iter()
                .map(|group_id| self.resolve_group(*group_id))
                .collect(),
            operator: key.operator,
        };

        if let Some(existing) = self.group_exprs.get(&key).copied() {
            let existing = self.resolve_expr(existing);
            if let Some(target) = target_group {
                self.mark_duplicated_groups(target, existing.group_id);
            }
            return Ok(existing);
        }

        let group_expr_id = match target_group {
            Some(target) => {
                let target = self.resolve_group(target);
                let new_stats = match &key.operator {
                    Logical(op) if op.stat_promise() > self.group(target)?.stat_promise => {
                        let logical_prop = self.group(target)?.logical_prop.clone();
                        let (_, stats) =
                            self.derive_with(op, &key.inputs, Some(logical_prop.as_ref()))?;
                        Some((stats, op.stat_promise()))
                    }
                    _ => None,
                };

                let group = self.group_mut(target)?;
                if let Some((stats, promise)) = new_stats {
                    group.stats = Arc::new(stats);
                    group.stat_promise = promise;
                }
                group.add_expr(key.clone())
            }
            None => {
                let (logical_prop, stats, stat_promise) = self.derive_properties(&key)?;
                let group_id = self.next_group_id;
                self.next_group_id.0 += 1;

                let mut group = Group::new(group_id, logical_prop, stats, stat_promise);
                let group_expr_id = group.add_expr(key.clone());
                self.groups.insert(group_id, group);
                group_expr_id
            }
        };

        debug!("Inserted {} {}", group_expr_id, key.operator);
        self.group_exprs.insert(key, group_expr_id);
        Ok(group_expr_id)
    }

    /// Logical property and statistics of a new group with `key` as its first expression.
    fn derive_properties(
        &self,
        key: &GroupExprKey,
    ) -> OptResult<(LogicalProperty, Statistics, StatPromise)> {
        match &key.operator {
            Logical(op) => {
                let (logical_prop, stats) = self.derive_with(op, &key.inputs, None)?;
                Ok((logical_prop, stats, op.stat_promise()))
            }
            Physical(op) => bail!("Physical operator {} can't create a group", op),
        }
    }

    /// Derives logical property, unless already known, and statistics of `op` over `inputs`.
    fn derive_with(
        &self,
        op: &LogicalOperator,
        inputs: &[GroupId],
        known: Option<&LogicalProperty>,
    ) -> OptResult<(LogicalProperty, Statistics)> {
        let input_groups = inputs
            .iter()
            .map(|group_id| self.group(*group_id))
            .collect::<OptResult<Vec<&Group>>>()?;
        let input_props = input_groups
            .iter()
            .map(|group| group.logical_prop.as_ref())
            .collect::<Vec<_>>();
        let input_stats = input_groups
            .iter()
            .map(|group| group.stats.as_ref())
            .collect::<Vec<_>>();

        let context = DeriveContext {
            optimizer_context: &self.context,
            input_props: &input_props,
            input_stats: &input_stats,
        };
        let logical_prop = match known {
            Some(prop) => prop.clone(),
            None => op.derive_logical_prop(&context)?,
        };
        let stats = op.derive_statistics(&context, &logical_prop)?;
        Ok((logical_prop, stats))
    }

    /// Records that two groups are equivalent, groups with different output columns are never
    /// merged.
    fn mark_duplicated_groups(&mut self, group1: GroupId, group2: GroupId) {
        let (group1, group2) = (self.resolve_group(group1), self.resolve_group(group2));
        if group1 == group2 {
            return;
        }

        let same_output = match (self.groups.get(&group1), self.groups.get(&group2)) {
            (Some(g1), Some(g2)) => {
                g1.logical_prop.output_columns() == g2.logical_prop.output_columns()
            }
            _ => false,
        };
        if !same_output {
            debug!(
                "Groups {} and {} have different output columns, not merged",
                group1, group2
            );
            return;
        }

        // Larger group id is always merged into smaller one.
        let pair = (max(group1, group2), min(group1, group2));
        if !self.duplicated_groups.contains(&pair) {
            self.duplicated_groups.push(pair);
        }
    }

    /// Merges all duplicated groups, until no more duplicates are found. Returns number of
    /// merged groups.
    ///
    /// Merged groups and all their ancestors are reset to unexplored, so the next search
    /// stage binds rules against the merged expressions.
    pub fn merge_duplicate_groups(&mut self) -> OptResult<usize> {
        let mut merged = 0;
        let mut merged_into = HashSet::new();
        while !self.duplicated_groups.is_empty() {
            for (src, dest) in take(&mut self.duplicated_groups) {
                let (src, dest) = (self.resolve_group(src), self.resolve_group(dest));
                if src == dest {
                    continue;
                }
                self.merge_group(max(src, dest), min(src, dest))?;
                merged_into.insert(min(src, dest));
                merged += 1;
            }

            self.root_group_id = self.resolve_group(self.root_group_id);
            self.rehash();
        }

        let merged_into = merged_into
            .into_iter()
            .map(|group_id| self.resolve_group(group_id))
            .collect();
        self.reset_search_state(merged_into);
        Ok(merged)
    }

    /// Clears search progress of `groups` and every group reaching them through inputs.
    fn reset_search_state(&mut self, mut groups: HashSet<GroupId>) {
        loop {
            let parents = self
                .groups
                .values()
                .filter(|group| !groups.contains(&group.group_id))
                .filter(|group| {
                    group
                        .exprs
                        .values()
                        .any(|e| e.key.inputs.iter().any(|input| groups.contains(input)))
                })
                .map(|group| group.group_id)
                .collect::<Vec<_>>();
            if parents.is_empty() {
                break;
            }
            groups.extend(parents);
        }

        for group_id in groups {
            if let Some(group) = self.groups.get_mut(&group_id) {
                trace!("Reset search state of group {}", group_id);
                group.state = GroupState::Unexplored;
                for group_expr in group.exprs.values_mut() {
                    group_expr.explored = false;
                    group_expr.implemented = false;
                    group_expr.applied_rules = EnumSet::empty();
                }
            }
        }
    }

    fn merge_group(&mut self, src: GroupId, dest: GroupId) -> OptResult<()> {
        let src_group = self
            .groups
            .remove(&src)
            .ok_or_else(|| anyhow!("Group {} not found in memo", src))?;
        let dest_group = self
            .groups
            .get_mut(&dest)
            .ok_or_else(|| anyhow!("Group {} not found in memo", dest))?;

        let mut moved = HashMap::with_capacity(src_group.exprs.len());
        for (_, group_expr) in src_group.exprs {
            let old_id = group_expr.id;
            let new_id = dest_group.move_expr(group_expr);
            moved.insert(old_id, new_id);
        }

        for (required, mut winner) in src_group.winners {
            winner.group_expr_id = moved
                .get(&winner.group_expr_id)
                .copied()
                .unwrap_or(winner.group_expr_id);
            dest_group.update_winner(required, winner);
        }

        dest_group.optimized = dest_group
            .optimized
            .intersection(&src_group.optimized)
            .cloned()
            .collect();
        if src_group.stat_promise > dest_group.stat_promise {
            dest_group.stats = src_group.stats;
            dest_group.stat_promise = src_group.stat_promise;
        }

        self.merged_group_exprs.extend(moved);
        self.merged_groups.insert(src, dest);
        info!("Merged group {} into group {}", src, dest);
        Ok(())
    }

    /// Rewrites inputs of all expressions to merged groups and rebuilds the expression index.
    ///
    /// Identical expressions within a group are marked dead, identical ones in different
    /// groups make their groups duplicated.
    fn rehash(&mut self) {
        let merged_groups = &self.merged_groups;
        let mut index = HashMap::with_capacity(self.group_exprs.len());
        let mut duplicates = vec![];

        for group in self.groups.values_mut() {
            for group_expr in group.exprs.values_mut() {
                group_expr
                    .key
                    .inputs
                    .iter_mut()
                    .for_each(|input| *input = resolve_in(merged_groups, *input));
                if group_expr.is_dead() {
                    continue;
                }

                match index.entry(group_expr.key.clone()) {
                    Entry::Vacant(entry) => {
                        entry.insert(group_expr.id);
                    }
                    Entry::Occupied(entry) => {
                        let existing: GroupExprId = *entry.get();
                        if existing.group_id == group_expr.id.group_id {
                            group_expr.duplicate_of = Some(existing);
                        } else {
                            duplicates.push((existing.group_id, group_expr.id.group_id));
                        }
                    }
                }
            }
        }

        self.group_exprs = index;
        for (group1, group2) in duplicates {
            self.mark_duplicated_groups(group1, group2);
        }
    }

    /// Extracts the best plan of `group_id` satisfying `required` from winners.
    pub fn best_plan(&self, group_id: GroupId, required: &PhysicalPropertySet) -> OptResult<Plan> {
        let mut arena = PlanArena::default();
        let mut built = HashMap::new();
        let mut visiting = HashSet::new();
        let root = self.build_best_plan(
            self.resolve_group(group_id),
            required,
            &mut arena,
            &mut built,
            &mut visiting,
        )?;
        Ok(arena.finish(root))
    }

    fn build_best_plan(
        &self,
        group_id: GroupId,
        required: &PhysicalPropertySet,
        arena: &mut PlanArena,
        built: &mut HashMap<(GroupId, PhysicalPropertySet), PlanNodeId>,
        visiting: &mut HashSet<(GroupId, PhysicalPropertySet)>,
    ) -> OptResult<PlanNodeId> {
        let context_key = (group_id, required.clone());
        if let Some(id) = built.get(&context_key) {
            return Ok(*id);
        }
        if !visiting.insert(context_key.clone()) {
            bail!("Best plan of group {} under {} is cyclic", group_id, required);
        }

        let group = self.group(group_id)?;
        let winner = group
            .winner(required)
            .ok_or_else(|| OptimizerError::NoPlanFound {
                group: group_id.to_string(),
                required: required.to_string(),
            })?;
        let group_expr = self.group_expr(winner.group_expr_id)?;

        let mut inputs = Vec::with_capacity(group_expr.key.inputs.len());
        for (input, input_required) in group_expr.key.inputs.iter().zip(&winner.input_props) {
            inputs.push(self.build_best_plan(
                self.resolve_group(*input),
                input_required,
                arena,
                built,
                visiting,
            )?);
        }

        let id = arena.add(
            PlanNodeBuilder::new(group_expr.key.operator.clone())
                .add_inputs(inputs)
                .with_logical_prop(group.logical_prop.clone())
                .with_statistics(group.stats.clone())
                .with_delivered(winner.delivered.clone())
                .with_cost(winner.cost),
        );
        visiting.remove(&context_key);
        built.insert(context_key, id);
        Ok(id)
    }
}

fn resolve_in<K: Copy + Eq + std::hash::Hash>(merged: &HashMap<K, K>, mut id: K) -> K {
    while let Some(next) = merged.get(&id) {
        id = *next;
    }
    id
}

impl Optimizer for Memo {
    type GroupHandle = GroupId;
    type ExprHandle = GroupExprId;
    type Group = Group;
    type Expr = GroupExpr;

    fn context(&self) -> &OptimizerContext {
        &self.context
    }

    fn group_at(&self, group_handle: GroupId) -> &Group {
        &self[group_handle]
    }

    fn expr_at(&self, expr_handle: GroupExprId) -> &GroupExpr {
        &self[expr_handle]
    }

    fn expr_group(&self, expr_handle: GroupExprId) -> GroupId {
        self.resolve_expr(expr_handle).group_id
    }
}

/// Ids of merged groups resolve to the group they were merged into.
///
/// # Panics
///
/// Panics on ids never handed out by this memo, [`Memo::group`] is the checked variant.
impl Index<GroupId> for Memo {
    type Output = Group;

    fn index(&self, index: GroupId) -> &Group {
        match self.group(index) {
            Ok(group) => group,
            Err(e) => panic!("{}", e),
        }
    }
}

/// Like indexing by [`GroupId`], with [`Memo::group_expr`] as the checked variant.
impl Index<GroupExprId> for Memo {
    type Output = GroupExpr;

    fn index(&self, index: GroupExprId) -> &GroupExpr {
        match self.group_expr(index) {
            Ok(group_expr) => group_expr,
            Err(e) => panic!("{}", e),
        }
    }
}

impl Debug for Memo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "Groups in memo, root {}:", self.root_group_id)?;
        writeln!(f)?;

        for group in self.groups.values() {
            writeln!(f, "{:?}", group)?;
        }

        // Print merged groups
        {
            writeln!(f, "Merged groups:")?;
            let mut table = Table::new();
            table.add_row(row!["Source Group Id", "Target Group Id"]);
            for (src, dest) in &self.merged_groups {
                table.add_row(row![src, dest]);
            }

            writeln!(f, "{}", table)?;
        }

        // Print found duplicated groups
        {
            writeln!(f, "Duplicated groups:")?;
            let mut table = Table::new();
            table.add_row(row!["Source Group Id", "Target Group Id"]);
            for (src, dest) in &self.duplicated_groups {
                table.add_row(row![src, dest]);
            }

            writeln!(f, "{}", table)?;
        }

        writeln!(f)
    }
}

/// A group id is a key of `groups` in `Memo`.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Ord, PartialOrd)]
pub struct GroupId(pub usize);

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OptGroupHandle for GroupId {}

/// A group expression id is its group id and its index in the group.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Ord, PartialOrd)]
pub struct GroupExprId {
    pub group_id: GroupId,
    pub expr_id: usize,
}

impl GroupExprId {
    pub fn new(group_id: GroupId, expr_id: usize) -> Self {
        Self { group_id, expr_id }
    }
}

impl Display for GroupExprId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group_id, self.expr_id)
    }
}

impl OptExprHandle for GroupExprId {}

/// Search progress of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupState {
    Unexplored,
    Exploring,
    Explored,
    Implementing,
    Implemented,
}

/// Winner of a group for one required property set.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub group_expr_id: GroupExprId,
    pub cost: Cost,
    /// Properties required from each input of the winner.
    pub input_props: Vec<PhysicalPropertySet>,
    pub delivered: DeliveredPropertySet,
}

impl OptimizationResult {
    fn is_better_than(&self, other: &OptimizationResult) -> bool {
        match self.cost.partial_cmp(&other.cost) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => self.group_expr_id < other.group_expr_id,
            _ => false,
        }
    }
}

/// A group contains a set of logically equivalent group expressions.
pub struct Group {
    group_id: GroupId,
    /// Shared by all expressions of the group.
    logical_prop: Arc<LogicalProperty>,
    /// Derived from the expression with highest stats promise.
    stats: Arc<Statistics>,
    stat_promise: StatPromise,
    exprs: BTreeMap<usize, GroupExpr>,
    next_expr_id: usize,
    pub(super) state: GroupState,
    /// Lowest cost plans for each [`PhysicalPropertySet`].
    winners: HashMap<PhysicalPropertySet, OptimizationResult>,
    /// Requirements all physical expressions have been optimized for.
    optimized: HashSet<PhysicalPropertySet>,
}

impl Group {
    fn new(
        group_id: GroupId,
        logical_prop: LogicalProperty,
        stats: Statistics,
        stat_promise: StatPromise,
    ) -> Self {
        Self {
            group_id,
            logical_prop: Arc::new(logical_prop),
            stats: Arc::new(stats),
            stat_promise,
            exprs: BTreeMap::new(),
            next_expr_id: 0,
            state: GroupState::Unexplored,
            winners: HashMap::new(),
            optimized: HashSet::new(),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn exprs(&self) -> impl Iterator<Item = &GroupExpr> {
        self.exprs.values()
    }

    pub fn winner(&self, required: &PhysicalPropertySet) -> Option<&OptimizationResult> {
        self.winners.get(required)
    }

    /// Replaces winner of `required` if `result` has lower cost, ties are broken by lower
    /// expression id. Returns whether winner changed.
    pub(super) fn update_winner(
        &mut self,
        required: PhysicalPropertySet,
        result: OptimizationResult,
    ) -> bool {
        match self.winners.entry(required) {
            Entry::Occupied(mut entry) => {
                if result.is_better_than(entry.get()) {
                    entry.insert(result);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(result);
                true
            }
        }
    }

    /// Live logical expressions.
    pub fn logical_expr_ids(&self) -> Vec<GroupExprId> {
        self.exprs
            .values()
            .filter(|e| e.is_logical() && !e.is_dead())
            .map(|e| e.id)
            .collect()
    }

    /// Live physical expressions.
    pub fn physical_expr_ids(&self) -> Vec<GroupExprId> {
        self.exprs
            .values()
            .filter(|e| !e.is_logical() && !e.is_dead())
            .map(|e| e.id)
            .collect()
    }

    pub fn is_optimized(&self, required: &PhysicalPropertySet) -> bool {
        self.optimized.contains(required)
    }

    pub(super) fn mark_optimized(&mut self, required: PhysicalPropertySet) {
        self.optimized.insert(required);
    }

    fn add_expr(&mut self, key: GroupExprKey) -> GroupExprId {
        self.move_expr(GroupExpr::new(GroupExprId::new(self.group_id, 0), key))
    }

    /// Adds an expression under a new id of this group, keeping its search state.
    fn move_expr(&mut self, mut group_expr: GroupExpr) -> GroupExprId {
        let id = GroupExprId::new(self.group_id, self.next_expr_id);
        self.next_expr_id += 1;
        group_expr.id = id;
        self.exprs.insert(id.expr_id, group_expr);
        id
    }
}

impl OptGroup for Group {
    fn logical_prop(&self) -> &LogicalProperty {
        &self.logical_prop
    }

    fn statistics(&self) -> &Statistics {
        &self.stats
    }
}

impl Debug for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Group {} ({:?}, rows: {}):",
            self.group_id,
            self.state,
            self.stats.row_count()
        )?;

        let mut table = Table::new();
        table.add_row(row!["Group Expression Id", "Operator", "Inputs", "Dead"]);
        for group_expr in self.exprs.values() {
            table.add_row(row![
                group_expr.id,
                format!("{}", group_expr.key.operator),
                format!("{:?}", group_expr.key.inputs),
                group_expr.is_dead()
            ]);
        }
        writeln!(f, "{}", table)?;

        if !self.winners.is_empty() {
            let mut table = Table::new();
            table.add_row(row!["Required", "Winner", "Cost"]);
            for (required, winner) in &self.winners {
                table.add_row(row![required, winner.group_expr_id, winner.cost]);
            }
            writeln!(f, "{}", table)?;
        }
        Ok(())
    }
}

/// Identity of a group expression: operator and input groups.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct GroupExprKey {
    pub operator: Operator,
    pub inputs: Vec<GroupId>,
}

pub struct GroupExpr {
    id: GroupExprId,
    pub(super) key: GroupExprKey,
    pub(super) explored: bool,
    pub(super) implemented: bool,
    pub(super) applied_rules: EnumSet<RuleId>,
    /// Set when an identical expression of the same group was found after merging.
    duplicate_of: Option<GroupExprId>,
}

impl GroupExpr {
    fn new(id: GroupExprId, key: GroupExprKey) -> Self {
        Self {
            id,
            key,
            explored: false,
            implemented: false,
            applied_rules: EnumSet::empty(),
            duplicate_of: None,
        }
    }

    pub fn id(&self) -> GroupExprId {
        self.id
    }

    pub fn inputs(&self) -> &[GroupId] {
        &self.key.inputs
    }

    pub fn is_logical(&self) -> bool {
        matches!(self.key.operator, Logical(_))
    }

    pub fn is_dead(&self) -> bool {
        self.duplicate_of.is_some()
    }

    pub fn is_rule_applied(&self, rule_id: RuleId) -> bool {
        self.applied_rules.contains(rule_id)
    }
}

impl OptExpr for GroupExpr {
    type InputHandle = GroupId;

    fn operator(&self) -> &Operator {
        &self.key.operator
    }

    fn inputs_len(&self) -> usize {
        self.key.inputs.len()
    }

    fn input_at(&self, idx: usize) -> GroupId {
        self.key.inputs[idx]
    }
}

#[cfg(test)]
mod tests {
    use datafusion::prelude::{col, lit};

    use crate::cascades::{GroupExprId, GroupId, GroupState, Memo};
    use crate::error::OptimizerError;
    use crate::operator::LogicalOperator::{LogicalGet, LogicalJoin, LogicalLimit, LogicalSelect};
    use crate::operator::Operator::{Logical, Physical};
    use crate::operator::PhysicalOperator::PhysicalTableScan;
    use crate::operator::{Get, Join, JoinKind, Limit, Select};
    use crate::optimizer::{OptGroup, Optimizer};
    use crate::plan::{LogicalPlanBuilder, PhysicalPlanBuilder, Plan};
    use crate::properties::PhysicalPropertySet;
    use crate::rules::{OptExpression, RuleId};
    use crate::test_utils::{context_for_test, memo_for_test};

    fn join_plan() -> Plan {
        let inner = LogicalPlanBuilder::scan("t2").build();
        LogicalPlanBuilder::scan("t1")
            .join(JoinKind::Inner, col("t1.a").eq(col("t2.a")), inner)
            .build()
    }

    fn commutated() -> OptExpression<Memo> {
        OptExpression::with_operator(
            Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                col("t1.a").eq(col("t2.a")),
            ))),
            vec![
                OptExpression::with_group_handle(GroupId(1)),
                OptExpression::with_group_handle(GroupId(0)),
            ],
        )
    }

    #[test]
    fn test_memo_from_plan() {
        let memo = memo_for_test(join_plan());
        assert_eq!(3, memo.group_count());
        assert_eq!(GroupId(2), memo.root_group_id());
        assert_eq!(GroupExprId::new(GroupId(2), 0), memo.root_expr_id());
        assert_eq!(
            vec![GroupId(0), GroupId(1)],
            memo.group_expr(memo.root_expr_id()).unwrap().inputs()
        );
        assert_eq!(6, memo[GroupId(2)].logical_prop().output_columns().len());
    }

    #[test]
    fn test_shared_sub_plan_is_one_group() {
        let plan = LogicalPlanBuilder::scan("t1")
            .join(
                JoinKind::Inner,
                col("t1.a").eq(col("t1.a")),
                LogicalPlanBuilder::scan("t1").build(),
            )
            .build();
        let memo = memo_for_test(plan);
        assert_eq!(2, memo.group_count());
        assert_eq!(
            vec![GroupId(0), GroupId(0)],
            memo.group_expr(memo.root_expr_id()).unwrap().inputs()
        );
    }

    #[test]
    fn test_physical_plan_rejected() {
        let plan = PhysicalPlanBuilder::scan("t1").build();
        assert!(Memo::try_new(plan, context_for_test()).is_err());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut memo = memo_for_test(join_plan());
        let expr = commutated();

        let first = memo.insert_opt_expression(&expr, Some(GroupId(2))).unwrap();
        let second = memo.insert_opt_expression(&expr, Some(GroupId(2))).unwrap();
        assert_eq!(first, second);
        assert_eq!(GroupExprId::new(GroupId(2), 1), first);
        assert_eq!(3, memo.group_count());
        assert!(!memo.has_duplicated_groups());
    }

    #[test]
    fn test_insert_existing_into_other_group_marks_duplicate() {
        let mut memo = memo_for_test(join_plan());
        // Same join inserted without target lands in a new group.
        let new_id = memo.insert_opt_expression(&commutated(), None).unwrap();
        assert_eq!(GroupId(3), new_id.group_id);
        assert!(!memo.has_duplicated_groups());

        // Now the original join is claimed by the new group.
        let original = OptExpression::with_expr_handle(
            memo.root_expr_id(),
            vec![
                OptExpression::with_group_handle(GroupId(0)),
                OptExpression::with_group_handle(GroupId(1)),
            ],
        );
        memo.insert_opt_expression(&original, Some(GroupId(3)))
            .unwrap();
        assert!(memo.has_duplicated_groups());

        assert_eq!(1, memo.merge_duplicate_groups().unwrap());
        assert_eq!(3, memo.group_count());
        assert_eq!(GroupId(2), memo.root_group_id());
        assert_eq!(GroupId(2), memo.resolve_group(GroupId(3)));
        assert_eq!(GroupId(2), memo.expr_group(new_id));
        assert_eq!(2, memo[GroupId(3)].logical_expr_ids().len());
        assert!(!memo.has_duplicated_groups());
    }

    #[test]
    fn test_merge_closes_over_parents() {
        let mut memo = memo_for_test(LogicalPlanBuilder::scan("t1").limit(10).build());
        let select = |input: GroupId| {
            OptExpression::<Memo>::with_operator(
                Logical(LogicalSelect(Select::new(col("t1.a").gt(lit(1))))),
                vec![OptExpression::with_group_handle(input)],
            )
        };
        let s1 = memo.insert_opt_expression(&select(GroupId(0)), None).unwrap();
        let s2 = memo.insert_opt_expression(&select(GroupId(1)), None).unwrap();
        assert_ne!(s1.group_id, s2.group_id);

        // Declaring the limit equivalent to its input makes both selects duplicated too.
        let limit = OptExpression::with_expr_handle(
            memo.root_expr_id(),
            vec![OptExpression::with_group_handle(GroupId(0))],
        );
        memo.insert_opt_expression(&limit, Some(GroupId(0))).unwrap();
        assert_eq!(2, memo.merge_duplicate_groups().unwrap());
        assert_eq!(memo.expr_group(s1), memo.expr_group(s2));
        assert_eq!(1, memo[s2.group_id].logical_expr_ids().len());
        assert_eq!(GroupId(0), memo.root_group_id());
    }

    #[test]
    fn test_merge_resets_search_state_of_ancestors() {
        let mut memo = memo_for_test(join_plan());
        let unrelated = memo
            .insert_opt_expression(&OptExpression::from(Logical(LogicalGet(Get::new("t3")))), None)
            .unwrap()
            .group_id;
        for group in memo.groups.values_mut() {
            group.state = GroupState::Explored;
            for group_expr in group.exprs.values_mut() {
                group_expr.explored = true;
                group_expr.applied_rules.insert(RuleId::CommutateJoin);
            }
        }

        let limit = memo
            .insert_opt_expression(
                &OptExpression::with_operator(
                    Logical(LogicalLimit(Limit::new(10))),
                    vec![OptExpression::with_group_handle(GroupId(1))],
                ),
                None,
            )
            .unwrap();
        memo.insert_opt_expression(
            &OptExpression::with_expr_handle(
                limit,
                vec![OptExpression::with_group_handle(GroupId(1))],
            ),
            Some(GroupId(1)),
        )
        .unwrap();
        assert_eq!(1, memo.merge_duplicate_groups().unwrap());

        // Merged group and the join above it search again, others keep their progress.
        assert_eq!(GroupState::Unexplored, memo[GroupId(1)].state());
        assert_eq!(GroupState::Unexplored, memo[GroupId(2)].state());
        assert_eq!(GroupState::Explored, memo[GroupId(0)].state());
        assert_eq!(GroupState::Explored, memo[unrelated].state());
        let join = &memo[memo.root_expr_id()];
        assert!(!join.explored);
        assert!(!join.is_rule_applied(RuleId::CommutateJoin));
        assert!(memo[GroupId(0)]
            .exprs()
            .all(|e| e.explored && e.is_rule_applied(RuleId::CommutateJoin)));
    }

    #[test]
    fn test_index_follows_merges() {
        let mut memo = memo_for_test(join_plan());
        let new_id = memo.insert_opt_expression(&commutated(), None).unwrap();
        let original = OptExpression::with_expr_handle(
            memo.root_expr_id(),
            vec![
                OptExpression::with_group_handle(GroupId(0)),
                OptExpression::with_group_handle(GroupId(1)),
            ],
        );
        memo.insert_opt_expression(&original, Some(new_id.group_id))
            .unwrap();
        memo.merge_duplicate_groups().unwrap();

        assert_eq!(GroupId(2), memo[new_id.group_id].group_id());
        assert_eq!(memo.resolve_expr(new_id), memo[new_id].id());
        assert_eq!(GroupId(2), memo[new_id].id().group_id);

        assert!(memo.group(GroupId(42)).is_err());
        assert!(memo.group_expr(GroupExprId::new(GroupId(2), 42)).is_err());
    }

    #[test]
    fn test_insert_physical_into_new_group_fails() {
        let mut memo = memo_for_test(LogicalPlanBuilder::scan("t1").build());
        let scan = OptExpression::<Memo>::from(Physical(PhysicalTableScan(Get::new("t1"))));
        assert!(memo.insert_opt_expression(&scan, None).is_err());
        let id = memo.insert_opt_expression(&scan, Some(GroupId(0))).unwrap();
        assert_eq!(vec![id], memo[GroupId(0)].physical_expr_ids());
    }

    #[test]
    fn test_best_plan_without_winner() {
        let memo = memo_for_test(LogicalPlanBuilder::scan("t1").build());
        let err = memo
            .best_plan(memo.root_group_id(), &PhysicalPropertySet::singleton())
            .unwrap_err();
        assert!(OptimizerError::is_no_plan_found(&err));
    }
}
