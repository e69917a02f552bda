use datafusion::prelude::Expr;
use datafusion_common::Column;

use crate::name::Name;
use crate::operator::LogicalOperator::{
    LogicalApply, LogicalGbAgg, LogicalGet, LogicalJoin, LogicalLimit, LogicalProject,
    LogicalSelect,
};
use crate::operator::Operator::Logical;
use crate::operator::{
    Apply, GbAgg, Get, Join, JoinKind, Limit, LogicalOperator, Project, Select,
};
use crate::plan::{Plan, PlanArena, PlanNodeBuilder, PlanNodeId};

/// Builds a logical plan bottom up, each call puts a new node on top of current root.
pub struct LogicalPlanBuilder {
    arena: PlanArena,
    root: PlanNodeId,
}

impl LogicalPlanBuilder {
    pub fn scan<N: Into<Name>>(table_name: N) -> Self {
        let mut arena = PlanArena::default();
        let root = arena.add(PlanNodeBuilder::new(Logical(LogicalGet(Get::new(table_name)))));
        Self { arena, root }
    }

    pub fn from_plan(plan: Plan) -> Self {
        let mut arena = PlanArena::default();
        let root = arena.append(plan);
        Self { arena, root }
    }

    fn push(mut self, operator: LogicalOperator, other: Option<Plan>) -> Self {
        let mut inputs = vec![self.root];
        if let Some(other) = other {
            inputs.push(self.arena.append(other));
        }
        self.root = self
            .arena
            .add(PlanNodeBuilder::new(Logical(operator)).add_inputs(inputs));
        self
    }

    pub fn select(self, predicate: Expr) -> Self {
        self.push(LogicalSelect(Select::new(predicate)), None)
    }

    pub fn project<I: IntoIterator<Item = Expr>>(self, exprs: I) -> Self {
        self.push(LogicalProject(Project::new(exprs)), None)
    }

    /// Joins current plan, as outer, with `inner`.
    pub fn join(self, kind: JoinKind, predicate: Expr, inner: Plan) -> Self {
        self.push(LogicalJoin(Join::new(kind, predicate)), Some(inner))
    }

    /// Applies `inner` to each row of current plan.
    pub fn apply(self, apply: Apply, inner: Plan) -> Self {
        self.push(LogicalApply(apply), Some(inner))
    }

    pub fn gb_agg(self, group_by: Vec<Column>, aggr_exprs: Vec<Expr>) -> Self {
        self.push(LogicalGbAgg(GbAgg::new(group_by, aggr_exprs)), None)
    }

    pub fn limit(self, limit: usize) -> Self {
        self.push(LogicalLimit(Limit::new(limit)), None)
    }

    pub fn build(self) -> Plan {
        self.arena.finish(self.root)
    }
}
