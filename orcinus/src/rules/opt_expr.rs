use std::fmt::{Debug, Formatter};
use std::ops::Index;

use anyhow::bail;

use crate::error::{OptResult, OptimizerError};
use crate::operator::Operator;
use crate::optimizer::{OptExpr, OptGroup, Optimizer};
use crate::properties::LogicalProperty;
use crate::rules::OptExprNode::{ExprHandleNode, GroupHandleNode, OperatorNode};

pub type OptExprVec<O> = Vec<OptExpression<O>>;

/// Root of an [`OptExpression`]: a new operator created by a rule, or a handle into the
/// optimizer's search space.
pub enum OptExprNode<O: Optimizer> {
    OperatorNode(Operator),
    ExprHandleNode(O::ExprHandle),
    GroupHandleNode(O::GroupHandle),
}

impl<O: Optimizer> Clone for OptExprNode<O> {
    fn clone(&self) -> Self {
        match self {
            OperatorNode(op) => OperatorNode(op.clone()),
            ExprHandleNode(handle) => ExprHandleNode(*handle),
            GroupHandleNode(handle) => GroupHandleNode(*handle),
        }
    }
}

impl<O: Optimizer> PartialEq for OptExprNode<O> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OperatorNode(left), OperatorNode(right)) => left == right,
            (ExprHandleNode(left), ExprHandleNode(right)) => left == right,
            (GroupHandleNode(left), GroupHandleNode(right)) => left == right,
            _ => false,
        }
    }
}

impl<O: Optimizer> Debug for OptExprNode<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorNode(op) => write!(f, "OperatorNode: {}", op),
            ExprHandleNode(handle) => write!(f, "ExprHandleNode: {:?}", handle),
            GroupHandleNode(handle) => write!(f, "GroupHandleNode: {:?}", handle),
        }
    }
}

/// Expression tree exchanged between optimizer and rules.
///
/// Bindings handed to a rule consist of expression handles, with group handles at children
/// bound by leaf patterns. Alternatives produced by a rule put new operators in
/// [`OptExprNode::OperatorNode`] and keep handles for the parts reused from the binding, so only
/// the new parts are inserted into the search space.
pub struct OptExpression<O: Optimizer> {
    node: OptExprNode<O>,
    inputs: OptExprVec<O>,
}

impl<O: Optimizer> Clone for OptExpression<O> {
    fn clone(&self) -> Self {
        Self::new(self.node.clone(), self.inputs.clone())
    }
}

impl<O: Optimizer> PartialEq for OptExpression<O> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.inputs == other.inputs
    }
}

impl<O: Optimizer> OptExpression<O> {
    fn new(node: OptExprNode<O>, inputs: OptExprVec<O>) -> Self {
        Self { node, inputs }
    }

    pub fn with_operator<I>(operator: Operator, inputs: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::new(OperatorNode(operator), inputs.into_iter().collect())
    }

    pub fn with_expr_handle<I>(handle: O::ExprHandle, inputs: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::new(ExprHandleNode(handle), inputs.into_iter().collect())
    }

    /// A group handle stands for any expression of the group, it has no inputs.
    pub fn with_group_handle(handle: O::GroupHandle) -> Self {
        Self::new(GroupHandleNode(handle), vec![])
    }

    /// Replaces root with `operator`, keeping inputs.
    pub fn clone_with_inputs(&self, operator: Operator) -> Self {
        Self::with_operator(operator, self.inputs.iter().cloned())
    }

    pub fn inputs(&self) -> &[Self] {
        &self.inputs
    }

    /// Input at `idx`, a missing one means the rule got a binding of wrong shape.
    pub fn input(&self, idx: usize, rule: &str) -> OptResult<&Self> {
        self.inputs
            .get(idx)
            .ok_or_else(|| OptimizerError::PatternMismatch(rule.to_string()).into())
    }

    pub fn node(&self) -> &OptExprNode<O> {
        &self.node
    }

    pub fn get_operator<'a>(&'a self, optimizer: &'a O) -> OptResult<&'a Operator> {
        match &self.node {
            OperatorNode(op) => Ok(op),
            ExprHandleNode(handle) => Ok(optimizer.expr_at(*handle).operator()),
            GroupHandleNode(handle) => bail!("Group handle {:?} has no single operator", handle),
        }
    }

    /// Group of a node bound from memo.
    pub fn group_handle(&self, optimizer: &O) -> OptResult<O::GroupHandle> {
        match &self.node {
            ExprHandleNode(handle) => Ok(optimizer.expr_group(*handle)),
            GroupHandleNode(handle) => Ok(*handle),
            OperatorNode(op) => bail!("Operator node {} created by rule has no group", op),
        }
    }

    /// Logical property of a node bound from memo.
    pub fn logical_prop<'a>(&self, optimizer: &'a O) -> OptResult<&'a LogicalProperty> {
        Ok(optimizer.group_at(self.group_handle(optimizer)?).logical_prop())
    }

    fn fmt_at_depth(&self, f: &mut Formatter<'_>, depth: usize) -> std::fmt::Result {
        if depth > 0 {
            write!(f, "{:indent$}--", "", indent = 2 * (depth - 1))?;
        }
        writeln!(f, "{:?}", self.node)?;
        self.inputs
            .iter()
            .try_for_each(|input| input.fmt_at_depth(f, depth + 1))
    }
}

impl<O: Optimizer> Debug for OptExpression<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_at_depth(f, 0)
    }
}

impl<O: Optimizer> From<Operator> for OptExpression<O> {
    fn from(op: Operator) -> Self {
        OptExpression::with_operator(op, vec![])
    }
}

impl<O: Optimizer> Index<usize> for OptExpression<O> {
    type Output = OptExpression<O>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.inputs[index]
    }
}

#[cfg(test)]
mod tests {
    use crate::cascades::{GroupExprId, GroupId, Memo};
    use crate::operator::LogicalOperator::{LogicalGet, LogicalLimit};
    use crate::operator::Operator::Logical;
    use crate::operator::{Get, Limit};
    use crate::rules::OptExpression;

    #[test]
    fn test_opt_expr_format() {
        let get = OptExpression::<Memo>::from(Logical(LogicalGet(Get::new("t1"))));
        let group = OptExpression::<Memo>::with_group_handle(GroupId(3));
        let opt_expr = OptExpression::<Memo>::with_operator(
            Logical(LogicalLimit(Limit::new(1))),
            vec![get, group],
        );

        let expected = "\
OperatorNode: LogicalLimit { limit: 1 }
--OperatorNode: LogicalGet { table_name: \"t1\" }
--GroupHandleNode: GroupId(3)
";
        assert_eq!(expected, format!("{:?}", opt_expr));
    }

    #[test]
    fn test_clone_with_inputs_keeps_handles() {
        let input = OptExpression::<Memo>::with_expr_handle(
            GroupExprId::new(GroupId(1), 0),
            vec![OptExpression::with_group_handle(GroupId(0))],
        );
        let output = input.clone_with_inputs(Logical(LogicalLimit(Limit::new(3))));

        assert_eq!(input.inputs(), output.inputs());
        assert_ne!(input, output);
    }
}
