use std::collections::HashSet;
use std::sync::Arc;

use crate::cost::Cost;
use crate::operator::Operator;
use crate::properties::{DeliveredPropertySet, LogicalProperty};
use crate::stat::Statistics;

mod logical;
pub use logical::*;
mod physical;
pub use physical::*;
pub mod explain;

/// Index of a node in the arena of its [`Plan`].
pub type PlanNodeId = usize;

/// One node in a plan.
///
/// This is used in both input and output of an optimizer. Nodes of an output plan carry logical
/// property, statistics, delivered properties and cost taken from the memo.
#[derive(Debug, Clone)]
pub struct PlanNode {
    id: PlanNodeId,
    operator: Operator,
    inputs: Vec<PlanNodeId>,
    logical_prop: Option<Arc<LogicalProperty>>,
    stat: Option<Arc<Statistics>>,
    delivered: Option<DeliveredPropertySet>,
    cost: Option<Cost>,
}

impl PlanNode {
    pub fn id(&self) -> PlanNodeId {
        self.id
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn inputs(&self) -> &[PlanNodeId] {
        &self.inputs
    }

    pub fn logical_prop(&self) -> Option<&LogicalProperty> {
        self.logical_prop.as_deref()
    }

    pub fn stat(&self) -> Option<&Statistics> {
        self.stat.as_deref()
    }

    pub fn delivered(&self) -> Option<&DeliveredPropertySet> {
        self.delivered.as_ref()
    }

    pub fn cost(&self) -> Option<Cost> {
        self.cost
    }
}

/// A query plan.
///
/// A plan is a single root dag stored in an arena, a subtree used by several parents is one
/// node with several incoming edges.
#[derive(Debug, Clone)]
pub struct Plan {
    nodes: Vec<PlanNode>,
    root: PlanNodeId,
}

/// Structural equality, node ids and cached properties are ignored.
impl PartialEq for Plan {
    fn eq(&self, other: &Self) -> bool {
        fn node_eq(left: &Plan, l: PlanNodeId, right: &Plan, r: PlanNodeId) -> bool {
            match (left.node(l), right.node(r)) {
                (Some(l), Some(r)) => {
                    l.operator == r.operator
                        && l.inputs.len() == r.inputs.len()
                        && l
                            .inputs
                            .iter()
                            .zip(r.inputs.iter())
                            .all(|(li, ri)| node_eq(left, *li, right, *ri))
                }
                _ => false,
            }
        }

        node_eq(self, self.root, other, other.root)
    }
}

impl Plan {
    pub fn root(&self) -> &PlanNode {
        &self.nodes[self.root]
    }

    pub fn root_id(&self) -> PlanNodeId {
        self.root
    }

    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn inputs_of<'a>(&'a self, node: &'a PlanNode) -> impl Iterator<Item = &'a PlanNode> {
        node.inputs.iter().filter_map(move |id| self.node(*id))
    }

    /// Ids of nodes reachable from root, inputs before their parents. Shared nodes are visited
    /// once.
    pub fn post_order(&self) -> Vec<PlanNodeId> {
        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.nodes.len());
        // (node, whether its inputs are already pushed)
        let mut stack = vec![(self.root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                result.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            if let Some(node) = self.node(id) {
                for input in node.inputs.iter().rev() {
                    if !visited.contains(input) {
                        stack.push((*input, false));
                    }
                }
            }
        }

        result
    }
}

pub struct PlanNodeBuilder {
    operator: Operator,
    inputs: Vec<PlanNodeId>,
    logical_prop: Option<Arc<LogicalProperty>>,
    stat: Option<Arc<Statistics>>,
    delivered: Option<DeliveredPropertySet>,
    cost: Option<Cost>,
}

impl PlanNodeBuilder {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            inputs: vec![],
            logical_prop: None,
            stat: None,
            delivered: None,
            cost: None,
        }
    }

    pub fn add_inputs<I>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = PlanNodeId>,
    {
        self.inputs.extend(inputs);
        self
    }

    pub fn with_logical_prop(mut self, logical_prop: Arc<LogicalProperty>) -> Self {
        self.logical_prop = Some(logical_prop);
        self
    }

    pub fn with_statistics(mut self, stat: Arc<Statistics>) -> Self {
        self.stat = Some(stat);
        self
    }

    pub fn with_delivered(mut self, delivered: DeliveredPropertySet) -> Self {
        self.delivered = Some(delivered);
        self
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Nodes of a plan under construction.
#[derive(Default)]
pub(crate) struct PlanArena {
    nodes: Vec<PlanNode>,
}

impl PlanArena {
    pub(crate) fn add(&mut self, builder: PlanNodeBuilder) -> PlanNodeId {
        let id = self.nodes.len();
        self.nodes.push(PlanNode {
            id,
            operator: builder.operator,
            inputs: builder.inputs,
            logical_prop: builder.logical_prop,
            stat: builder.stat,
            delivered: builder.delivered,
            cost: builder.cost,
        });
        id
    }

    /// Moves all nodes of `plan` into this arena, returns the new id of its root.
    pub(crate) fn append(&mut self, plan: Plan) -> PlanNodeId {
        let offset = self.nodes.len();
        self.nodes.extend(plan.nodes.into_iter().map(|mut node| {
            node.id += offset;
            node.inputs.iter_mut().for_each(|input| *input += offset);
            node
        }));
        plan.root + offset
    }

    pub(crate) fn finish(self, root: PlanNodeId) -> Plan {
        Plan {
            nodes: self.nodes,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::operator::JoinKind;
    use crate::plan::{LogicalPlanBuilder, PhysicalPlanBuilder};
    use datafusion::prelude::col;

    #[test]
    fn test_post_order_visits_inputs_first() {
        let right = LogicalPlanBuilder::scan("t2").build();
        let plan = LogicalPlanBuilder::scan("t1")
            .join(JoinKind::Inner, col("t1.a").eq(col("t2.a")), right)
            .limit(10)
            .build();

        let names = plan
            .post_order()
            .into_iter()
            .map(|id| plan.node(id).unwrap().operator().name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            vec!["LogicalGet", "LogicalGet", "LogicalJoin", "LogicalLimit"],
            names
        );
        assert_eq!(plan.root_id(), *plan.post_order().last().unwrap());
    }

    #[test]
    fn test_structural_equality() {
        let build = |table: &str| {
            let right = PhysicalPlanBuilder::scan(table).build();
            PhysicalPlanBuilder::scan("t1")
                .hash_join(JoinKind::Inner, col("t1.a").eq(col("t2.a")), right)
                .build()
        };

        assert_eq!(build("t2"), build("t2"));
        assert_ne!(build("t2"), build("t3"));
        assert_ne!(build("t2"), PhysicalPlanBuilder::scan("t1").build());
    }
}
