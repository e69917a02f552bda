use datafusion::prelude::Expr;
use datafusion_common::Column;

use crate::name::Name;
use crate::operator::Operator::Physical;
use crate::operator::PhysicalOperator::*;
use crate::operator::{
    Apply, GbAgg, Get, Join, JoinKind, Limit, Motion, MotionKind, PartitionSelector,
    PhysicalOperator, Project, Select, Sort, Spool,
};
use crate::plan::{Plan, PlanArena, PlanNodeBuilder, PlanNodeId};
use crate::properties::{OrderSpec, PartitionConsumers};

/// Builds physical plans, mostly used to describe expected optimizer output.
pub struct PhysicalPlanBuilder {
    arena: PlanArena,
    root: PlanNodeId,
}

impl PhysicalPlanBuilder {
    pub fn scan<N: Into<Name>>(table_name: N) -> Self {
        let mut arena = PlanArena::default();
        let root = arena.add(PlanNodeBuilder::new(Physical(PhysicalTableScan(Get::new(
            table_name,
        )))));
        Self { arena, root }
    }

    pub fn from_plan(plan: Plan) -> Self {
        let mut arena = PlanArena::default();
        let root = arena.append(plan);
        Self { arena, root }
    }

    fn push(mut self, operator: PhysicalOperator, other: Option<Plan>) -> Self {
        let mut inputs = vec![self.root];
        if let Some(other) = other {
            inputs.push(self.arena.append(other));
        }
        self.root = self
            .arena
            .add(PlanNodeBuilder::new(Physical(operator)).add_inputs(inputs));
        self
    }

    pub fn filter(self, predicate: Expr) -> Self {
        self.push(PhysicalFilter(Select::new(predicate)), None)
    }

    pub fn compute_scalar<I: IntoIterator<Item = Expr>>(self, exprs: I) -> Self {
        self.push(PhysicalComputeScalar(Project::new(exprs)), None)
    }

    pub fn hash_join(self, kind: JoinKind, predicate: Expr, inner: Plan) -> Self {
        self.push(PhysicalHashJoin(Join::new(kind, predicate)), Some(inner))
    }

    pub fn nl_join(self, kind: JoinKind, predicate: Expr, inner: Plan) -> Self {
        self.push(PhysicalNLJoin(Join::new(kind, predicate)), Some(inner))
    }

    pub fn correlated_nl_join(self, apply: Apply, inner: Plan) -> Self {
        self.push(PhysicalCorrelatedNLJoin(apply.into_correlated()), Some(inner))
    }

    pub fn hash_agg(self, group_by: Vec<Column>, aggr_exprs: Vec<Expr>) -> Self {
        self.push(PhysicalHashAgg(GbAgg::new(group_by, aggr_exprs)), None)
    }

    pub fn stream_agg(self, group_by: Vec<Column>, aggr_exprs: Vec<Expr>) -> Self {
        self.push(PhysicalStreamAgg(GbAgg::new(group_by, aggr_exprs)), None)
    }

    pub fn limit(self, limit: usize) -> Self {
        self.push(PhysicalLimit(Limit::new(limit)), None)
    }

    pub fn sort(self, order: OrderSpec) -> Self {
        self.push(PhysicalSort(Sort::new(order)), None)
    }

    pub fn motion(self, kind: MotionKind) -> Self {
        self.push(PhysicalMotion(Motion::new(kind)), None)
    }

    pub fn spool(self) -> Self {
        self.push(PhysicalSpool(Spool::default()), None)
    }

    pub fn partition_selector(self, consumers: PartitionConsumers) -> Self {
        self.push(
            PhysicalPartitionSelector(PartitionSelector::new(consumers)),
            None,
        )
    }

    pub fn build(self) -> Plan {
        self.arena.finish(self.root)
    }
}
