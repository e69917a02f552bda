use std::collections::HashSet;

use itertools::Itertools;

use crate::cascades::memo::Memo;
use crate::cascades::{GroupExprId, GroupId};
use crate::optimizer::OptExpr as _;
use crate::rules::{OptExpression, Pattern, PatternKind};

type OptExpr = OptExpression<Memo>;

/// Enumerates expressions of memo matching a rule pattern.
pub(crate) struct Binding<'a> {
    memo: &'a Memo,
    pattern: &'a Pattern,
}

impl<'a> Binding<'a> {
    pub(crate) fn new(memo: &'a Memo, pattern: &'a Pattern) -> Self {
        Self { memo, pattern }
    }

    /// All bindings rooted at `group_expr_id`, empty if the expression doesn't match.
    pub(crate) fn bind(&self, group_expr_id: GroupExprId) -> Vec<OptExpr> {
        self.bind_expr(self.memo.resolve_expr(group_expr_id), self.pattern)
    }

    fn bind_expr(&self, group_expr_id: GroupExprId, pattern: &Pattern) -> Vec<OptExpr> {
        let group_expr = match self.memo.group_expr(group_expr_id) {
            Ok(group_expr) => group_expr,
            Err(_) => return vec![],
        };
        if group_expr.is_dead() || !pattern.matches_without_children(group_expr.operator()) {
            return vec![];
        }

        let children = match &pattern.children {
            None => {
                return vec![OptExpression::with_expr_handle(
                    group_expr_id,
                    group_expr
                        .inputs()
                        .iter()
                        .map(|group_id| OptExpr::with_group_handle(*group_id)),
                )];
            }
            Some(children) => children,
        };
        if !pattern.accepts_arity(group_expr.inputs_len()) {
            return vec![];
        }

        let input_bindings = group_expr
            .inputs()
            .iter()
            .enumerate()
            .map(|(idx, group_id)| self.bind_input(*group_id, children.get(idx)))
            .collect::<Vec<Vec<OptExpr>>>();
        if input_bindings.iter().any(|b| b.is_empty()) {
            return vec![];
        }
        if input_bindings.is_empty() {
            return vec![OptExpression::with_expr_handle(group_expr_id, vec![])];
        }

        input_bindings
            .into_iter()
            .multi_cartesian_product()
            .map(|inputs| OptExpression::with_expr_handle(group_expr_id, inputs))
            .collect()
    }

    fn bind_input(&self, group_id: GroupId, pattern: Option<&Pattern>) -> Vec<OptExpr> {
        match pattern {
            Some(p) if p.kind == PatternKind::Operator => self
                .memo
                .group(group_id)
                .map(|group| group.logical_expr_ids())
                .unwrap_or_default()
                .into_iter()
                .flat_map(|id| self.bind_expr(id, p))
                .collect(),
            Some(p) if p.kind == PatternKind::Tree => {
                vec![self.bind_tree(group_id, &mut HashSet::new())]
            }
            _ => vec![OptExpr::with_group_handle(group_id)],
        }
    }

    /// Expands the first live logical expression of each group down to leaves. A group
    /// reached again through its own descendants stays a handle.
    fn bind_tree(&self, group_id: GroupId, visiting: &mut HashSet<GroupId>) -> OptExpr {
        let group_id = self.memo.resolve_group(group_id);
        let first = self
            .memo
            .group(group_id)
            .ok()
            .and_then(|group| group.logical_expr_ids().into_iter().next());

        match first {
            Some(group_expr_id) if visiting.insert(group_id) => {
                let inputs = self.memo[group_expr_id]
                    .inputs()
                    .iter()
                    .map(|input| self.bind_tree(*input, visiting))
                    .collect::<Vec<_>>();
                visiting.remove(&group_id);
                OptExpression::with_expr_handle(group_expr_id, inputs)
            }
            _ => OptExpr::with_group_handle(group_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use datafusion::prelude::{col, lit};

    use crate::cascades::binding::Binding;
    use crate::cascades::{GroupExprId, GroupId, Memo};
    use crate::operator::LogicalOperator::{LogicalGet, LogicalJoin, LogicalLimit};
    use crate::operator::Operator::Logical;
    use crate::operator::{Join, JoinKind};
    use crate::plan::LogicalPlanBuilder;
    use crate::rules::{any, pattern, OptExpression, Pattern, PatternBuilder};
    use crate::test_utils::memo_for_test;

    fn join_memo() -> Memo {
        let inner = LogicalPlanBuilder::scan("t2").select(col("t2.b").gt(lit(1))).build();
        memo_for_test(
            LogicalPlanBuilder::scan("t1")
                .join(JoinKind::Inner, col("t1.a").eq(col("t2.a")), inner)
                .limit(5)
                .build(),
        )
    }

    #[test]
    fn test_bind_without_children() {
        let memo = memo_for_test(LogicalPlanBuilder::scan("t1").limit(5).build());
        let pattern = pattern(|op| matches!(op, Logical(LogicalLimit(_)))).finish();
        let bindings = Binding::new(&memo, &pattern).bind(memo.root_expr_id());

        let expected = OptExpression::<Memo>::with_expr_handle(
            GroupExprId::new(GroupId(1), 0),
            vec![OptExpression::with_group_handle(GroupId(0))],
        );
        assert_eq!(vec![expected], bindings);
    }

    #[test]
    fn test_bind_operator_children() {
        let memo = join_memo();
        let pattern = pattern(|op| matches!(op, Logical(LogicalLimit(_))))
            .leaf(|op| matches!(op, Logical(LogicalJoin(_))))
            .finish();
        let bindings = Binding::new(&memo, &pattern).bind(memo.root_expr_id());

        // t1 -> 0, t2 -> 1, select -> 2, join -> 3, limit -> 4
        let expected = OptExpression::<Memo>::with_expr_handle(
            GroupExprId::new(GroupId(4), 0),
            vec![OptExpression::with_expr_handle(
                GroupExprId::new(GroupId(3), 0),
                vec![
                    OptExpression::with_group_handle(GroupId(0)),
                    OptExpression::with_group_handle(GroupId(2)),
                ],
            )],
        );
        assert_eq!(vec![expected], bindings);
    }

    #[test]
    fn test_bind_mismatch() {
        let memo = join_memo();
        let pattern = pattern(|op| matches!(op, Logical(LogicalLimit(_))))
            .leaf(|op| matches!(op, Logical(LogicalGet(_))))
            .finish();
        assert!(Binding::new(&memo, &pattern).bind(memo.root_expr_id()).is_empty());
    }

    #[test]
    fn test_bind_tree() {
        let memo = join_memo();
        let pattern = pattern(|op| matches!(op, Logical(LogicalJoin(_))))
            .any_leaf()
            .tree()
            .finish();
        let bindings = Binding::new(&memo, &pattern).bind(GroupExprId::new(GroupId(3), 0));

        let expected = OptExpression::<Memo>::with_expr_handle(
            GroupExprId::new(GroupId(3), 0),
            vec![
                OptExpression::with_group_handle(GroupId(0)),
                OptExpression::with_expr_handle(
                    GroupExprId::new(GroupId(2), 0),
                    vec![OptExpression::with_expr_handle(
                        GroupExprId::new(GroupId(1), 0),
                        vec![],
                    )],
                ),
            ],
        );
        assert_eq!(vec![expected], bindings);
    }

    #[test]
    fn test_bind_every_alternative() {
        let mut memo = join_memo();
        let commutated = OptExpression::<Memo>::with_operator(
            Logical(LogicalJoin(Join::new(
                JoinKind::Inner,
                col("t1.a").eq(col("t2.a")),
            ))),
            vec![
                OptExpression::with_group_handle(GroupId(2)),
                OptExpression::with_group_handle(GroupId(0)),
            ],
        );
        memo.insert_opt_expression(&commutated, Some(GroupId(3)))
            .unwrap();

        let pattern = Pattern::new(
            |op| matches!(op, Logical(LogicalLimit(_))),
            vec![pattern(|op| matches!(op, Logical(LogicalJoin(_)))).finish()],
        );
        assert_eq!(2, Binding::new(&memo, &pattern).bind(memo.root_expr_id()).len());

        let multi = crate::rules::pattern(any).multi_leaf().finish();
        let bindings = Binding::new(&memo, &multi).bind(GroupExprId::new(GroupId(3), 1));
        assert_eq!(1, bindings.len());
        assert_eq!(2, bindings[0].inputs().len());
    }
}
