//! Pulls correlated predicates out of the inner child of an apply.
//!
//! Decorrelation walks a fully expanded inner expression top down. Conjuncts referencing
//! columns of the apply's outer side are removed from the tree and returned, so that they can
//! become the predicate of a join. Operators through which a predicate can't be moved make the
//! whole decorrelation fail, which is reported as `None` rather than an error.
use datafusion_common::Column;
use datafusion::prelude::lit;
use datafusion::optimizer::utils::{conjunction, split_conjunction};
use datafusion_expr::{BinaryExpr, Operator as BinaryOperator};
use log::trace;

use crate::error::OptResult;
use crate::operator::LogicalOperator::{LogicalGbAgg, LogicalJoin, LogicalProject, LogicalSelect};
use crate::operator::Operator::Logical;
use crate::operator::{GbAgg, Join, JoinKind, Project, Select};
use crate::optimizer::Optimizer;
use crate::properties::{ColRefSet, LogicalProperty};
use crate::rules::OptExpression;
use crate::Expr;

/// Result of decorrelating an expression.
pub(crate) struct Decorrelated<O: Optimizer> {
    /// Expression without correlated predicates.
    pub expr: OptExpression<O>,
    pub correlations: Vec<Expr>,
    /// Columns `expr` outputs in addition to the original ones, e.g. grouping columns added to
    /// an aggregation.
    pub added_columns: Vec<Column>,
}

impl<O: Optimizer> Decorrelated<O> {
    fn unchanged(expr: &OptExpression<O>) -> Self {
        Self {
            expr: expr.clone(),
            correlations: vec![],
            added_columns: vec![],
        }
    }
}

/// How a conjunct relates to the apply's outer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConjunctKind {
    /// Stays where it is.
    Residual,
    /// Must be pulled up.
    Correlation,
    /// References both the apply's outer side and columns produced outside the apply.
    Mixed,
}

pub(crate) struct Decorrelator<'a, O: Optimizer> {
    optimizer: &'a O,
    /// Output of the apply's outer child. When `None` every outer reference is treated as a
    /// correlation, otherwise references to other columns are known values and stay in place.
    outer_columns: Option<&'a ColRefSet>,
}

impl<'a, O: Optimizer> Decorrelator<'a, O> {
    pub(crate) fn new(optimizer: &'a O, outer_columns: Option<&'a ColRefSet>) -> Self {
        Self {
            optimizer,
            outer_columns,
        }
    }

    fn is_correlated(&self, prop: &LogicalProperty) -> bool {
        match self.outer_columns {
            None => prop.has_outer_refs(),
            Some(outer) => !prop.outer_refs().is_disjoint(outer),
        }
    }

    fn classify(&self, conjunct: &Expr, produced: &ColRefSet) -> OptResult<ConjunctKind> {
        let refs = ColRefSet::from_expr(conjunct)?.difference(produced);
        if refs.is_empty() {
            return Ok(ConjunctKind::Residual);
        }

        Ok(match self.outer_columns {
            None => ConjunctKind::Correlation,
            Some(outer) if refs.is_subset(outer) => ConjunctKind::Correlation,
            Some(outer) if refs.is_disjoint(outer) => ConjunctKind::Residual,
            Some(_) => ConjunctKind::Mixed,
        })
    }

    /// Decorrelates `expr`. With `equality_only` every correlation must be an equality between
    /// two columns.
    pub(crate) fn decorrelate(
        &self,
        expr: &OptExpression<O>,
        equality_only: bool,
    ) -> OptResult<Option<Decorrelated<O>>> {
        let prop = expr.logical_prop(self.optimizer)?;
        if !self.is_correlated(prop) {
            return Ok(Some(Decorrelated::unchanged(expr)));
        }
        if expr.inputs().is_empty() {
            trace!("Can't decorrelate leaf {:?}", expr.node());
            return Ok(None);
        }

        match expr.get_operator(self.optimizer)? {
            Logical(LogicalSelect(select)) => self.decorrelate_select(expr, select, equality_only),
            Logical(LogicalGbAgg(agg)) => self.decorrelate_gb_agg(expr, agg),
            Logical(LogicalJoin(join)) => self.decorrelate_join(expr, join, equality_only),
            Logical(LogicalProject(project)) => {
                self.decorrelate_project(expr, prop, project, equality_only)
            }
            op => {
                trace!("Can't pull correlations through {}", op);
                Ok(None)
            }
        }
    }

    fn decorrelate_select(
        &self,
        expr: &OptExpression<O>,
        select: &Select,
        equality_only: bool,
    ) -> OptResult<Option<Decorrelated<O>>> {
        let child = &expr[0];
        let mut result = match self.decorrelate(child, equality_only)? {
            Some(result) => result,
            None => return Ok(None),
        };

        let produced = child.logical_prop(self.optimizer)?.output_columns();
        let mut residual = vec![];
        for conjunct in split_conjunction(select.predicate()) {
            match self.classify(conjunct, produced)? {
                ConjunctKind::Residual => residual.push(conjunct.clone()),
                ConjunctKind::Correlation if !equality_only || is_column_equality(conjunct) => {
                    result.correlations.push(conjunct.clone())
                }
                _ => return Ok(None),
            }
        }

        if let Some(predicate) = conjunction(residual) {
            result.expr = OptExpression::with_operator(
                Logical(LogicalSelect(Select::new(predicate))),
                vec![result.expr],
            );
        }
        Ok(Some(result))
    }

    fn decorrelate_gb_agg(
        &self,
        expr: &OptExpression<O>,
        agg: &GbAgg,
    ) -> OptResult<Option<Decorrelated<O>>> {
        let child = &expr[0];
        let child_prop = child.logical_prop(self.optimizer)?;
        let agg_refs = ColRefSet::from_exprs(agg.aggr_exprs())?;
        if self.classify_columns(&agg_refs, child_prop.output_columns()) != ConjunctKind::Residual
        {
            return Ok(None);
        }

        let mut result = match self.decorrelate(child, true)? {
            Some(result) => result,
            None => return Ok(None),
        };

        let mut available = child_prop.output_columns().clone();
        available.extend(&result.added_columns.iter().cloned().collect::<ColRefSet>());

        let mut group_by = agg.group_by().to_vec();
        let mut added = vec![];
        for correlation in &result.correlations {
            for column in ColRefSet::from_expr(correlation)?.sorted() {
                if available.contains(&column) && !group_by.contains(&column) {
                    group_by.push(column.clone());
                    added.push(column);
                }
            }
        }

        result.expr = OptExpression::with_operator(
            Logical(LogicalGbAgg(GbAgg::new(group_by, agg.aggr_exprs().to_vec()))),
            vec![result.expr],
        );
        result.added_columns = added;
        Ok(Some(result))
    }

    fn decorrelate_join(
        &self,
        expr: &OptExpression<O>,
        join: &Join,
        equality_only: bool,
    ) -> OptResult<Option<Decorrelated<O>>> {
        let (outer, inner) = (&expr[0], &expr[1]);
        let outer_result = match self.decorrelate(outer, equality_only)? {
            Some(result) => result,
            None => return Ok(None),
        };
        let inner_result = match self.decorrelate(inner, equality_only)? {
            Some(result) => result,
            None => return Ok(None),
        };

        let inner_prop = inner.logical_prop(self.optimizer)?;
        match join.kind() {
            JoinKind::Inner => {}
            // Rows of the inner side can't be filtered after the join.
            JoinKind::LeftSemi => {
                for correlation in &inner_result.correlations {
                    let columns = ColRefSet::from_expr(correlation)?;
                    if !columns.is_disjoint(inner_prop.output_columns()) {
                        return Ok(None);
                    }
                }
            }
            _ => {
                if !inner_result.correlations.is_empty() {
                    return Ok(None);
                }
            }
        }

        let mut produced = expr[0].logical_prop(self.optimizer)?.output_columns().clone();
        produced.extend(inner_prop.output_columns());
        let mut residual = vec![];
        let mut correlations = outer_result.correlations;
        correlations.extend(inner_result.correlations);
        for conjunct in split_conjunction(join.predicate()) {
            match self.classify(conjunct, &produced)? {
                ConjunctKind::Residual => residual.push(conjunct.clone()),
                ConjunctKind::Correlation
                    if join.kind() == JoinKind::Inner
                        && (!equality_only || is_column_equality(conjunct)) =>
                {
                    correlations.push(conjunct.clone())
                }
                _ => return Ok(None),
            }
        }

        let mut added_columns = outer_result.added_columns;
        if join.kind().outputs_inner() {
            added_columns.extend(inner_result.added_columns);
        }
        let predicate = conjunction(residual).unwrap_or_else(|| lit(true));
        Ok(Some(Decorrelated {
            expr: OptExpression::with_operator(
                Logical(LogicalJoin(Join::new(join.kind(), predicate))),
                vec![outer_result.expr, inner_result.expr],
            ),
            correlations,
            added_columns,
        }))
    }

    fn decorrelate_project(
        &self,
        expr: &OptExpression<O>,
        prop: &LogicalProperty,
        project: &Project,
        equality_only: bool,
    ) -> OptResult<Option<Decorrelated<O>>> {
        let child = &expr[0];
        let child_prop = child.logical_prop(self.optimizer)?;
        let used = ColRefSet::from_exprs(project.exprs())?;
        if self.classify_columns(&used, child_prop.output_columns()) != ConjunctKind::Residual {
            return Ok(None);
        }

        let mut result = match self.decorrelate(child, equality_only)? {
            Some(result) => result,
            None => return Ok(None),
        };

        let mut available = child_prop.output_columns().clone();
        available.extend(&result.added_columns.iter().cloned().collect::<ColRefSet>());
        let mut exprs = project.exprs().to_vec();
        let mut added = vec![];
        for correlation in &result.correlations {
            for column in ColRefSet::from_expr(correlation)?.sorted() {
                if available.contains(&column)
                    && !prop.output_columns().contains(&column)
                    && !added.contains(&column)
                {
                    exprs.push(Expr::Column(column.clone()));
                    added.push(column);
                }
            }
        }

        result.expr = OptExpression::with_operator(
            Logical(LogicalProject(Project::new(exprs))),
            vec![result.expr],
        );
        result.added_columns = added;
        Ok(Some(result))
    }

    fn classify_columns(&self, columns: &ColRefSet, produced: &ColRefSet) -> ConjunctKind {
        let refs = columns.difference(produced);
        match self.outer_columns {
            _ if refs.is_empty() => ConjunctKind::Residual,
            Some(outer) if refs.is_disjoint(outer) => ConjunctKind::Residual,
            _ => ConjunctKind::Correlation,
        }
    }
}

fn is_column_equality(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryExpr(BinaryExpr {
            left,
            op: BinaryOperator::Eq,
            right,
        }) => matches!(
            (left.as_ref(), right.as_ref()),
            (Expr::Column(_), Expr::Column(_))
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use datafusion::prelude::{col, count, lit};
    use datafusion_common::Column;

    use crate::operator::LogicalOperator::{LogicalGbAgg, LogicalSelect};
    use crate::operator::Operator::Logical;
    use crate::operator::{Apply, ApplyKind, GbAgg, JoinKind, Select, SubqueryOrigin};
    use crate::plan::LogicalPlanBuilder;
    use crate::rules::apply::decorrelator::Decorrelator;
    use crate::rules::{pattern, PatternBuilder};
    use crate::test_utils::{bind_root, memo_for_test};

    fn apply_plan(inner: crate::plan::Plan) -> crate::plan::Plan {
        LogicalPlanBuilder::scan("t1")
            .apply(
                Apply::new(ApplyKind::Inner, SubqueryOrigin::Scalar, vec![], lit(true)),
                inner,
            )
            .build()
    }

    #[test]
    fn test_pull_up_select_correlations() {
        let memo = memo_for_test(apply_plan(
            LogicalPlanBuilder::scan("t2")
                .select(col("t2.b").eq(col("t1.a")).and(col("t2.c").gt(lit(1))))
                .build(),
        ));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());
        let inner = &bindings[0][1];

        let result = Decorrelator::new(&memo, None)
            .decorrelate(inner, false)
            .unwrap()
            .unwrap();
        assert_eq!(vec![col("t2.b").eq(col("t1.a"))], result.correlations);
        assert_eq!(
            &Logical(LogicalSelect(Select::new(col("t2.c").gt(lit(1))))),
            result.expr.get_operator(&memo).unwrap()
        );
        assert!(result.added_columns.is_empty());
    }

    #[test]
    fn test_gb_agg_groups_by_correlated_columns() {
        let memo = memo_for_test(apply_plan(
            LogicalPlanBuilder::scan("t2")
                .select(col("t2.b").eq(col("t1.a")))
                .gb_agg(vec![], vec![count(lit(1))])
                .build(),
        ));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());

        let result = Decorrelator::new(&memo, None)
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .unwrap();
        let t2_b = Column::from_qualified_name("t2.b");
        assert_eq!(vec![t2_b.clone()], result.added_columns);
        assert_eq!(
            &Logical(LogicalGbAgg(GbAgg::new(vec![t2_b], vec![count(lit(1))]))),
            result.expr.get_operator(&memo).unwrap()
        );
    }

    #[test]
    fn test_gb_agg_rejects_non_equality_correlation() {
        let memo = memo_for_test(apply_plan(
            LogicalPlanBuilder::scan("t2")
                .select(col("t2.b").gt(col("t1.a")))
                .gb_agg(vec![], vec![count(lit(1))])
                .build(),
        ));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());

        assert!(Decorrelator::new(&memo, None)
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_limit_blocks_decorrelation() {
        let memo = memo_for_test(apply_plan(
            LogicalPlanBuilder::scan("t2")
                .select(col("t2.b").eq(col("t1.a")))
                .limit(1)
                .build(),
        ));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());

        assert!(Decorrelator::new(&memo, None)
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_semi_join_keeps_inner_side_correlations() {
        let inner = {
            let t3 = LogicalPlanBuilder::scan("t3")
                .select(col("t3.a").eq(col("t1.a")))
                .build();
            LogicalPlanBuilder::scan("t2")
                .join(JoinKind::LeftSemi, col("t2.a").eq(col("t3.a")), t3)
                .build()
        };
        let memo = memo_for_test(apply_plan(inner));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());

        assert!(Decorrelator::new(&memo, None)
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_external_references_stay_in_place() {
        // t3.a is produced outside of the apply over t1 and t2.
        let inner = LogicalPlanBuilder::scan("t2")
            .select(col("t2.b").eq(col("t1.a")).and(col("t2.c").eq(col("t3.a"))))
            .build();
        let memo = memo_for_test(apply_plan(inner));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());
        let outer_columns = bindings[0][0]
            .logical_prop(&memo)
            .unwrap()
            .output_columns()
            .clone();

        let result = Decorrelator::new(&memo, Some(&outer_columns))
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .unwrap();
        assert_eq!(vec![col("t2.b").eq(col("t1.a"))], result.correlations);
        assert_eq!(
            &Logical(LogicalSelect(Select::new(col("t2.c").eq(col("t3.a"))))),
            result.expr.get_operator(&memo).unwrap()
        );
    }

    #[test]
    fn test_mixed_conjunct_fails_with_external_references() {
        let inner = LogicalPlanBuilder::scan("t2")
            .select(col("t1.a").eq(col("t3.a")))
            .build();
        let memo = memo_for_test(apply_plan(inner));
        let bindings = bind_root(&memo, &pattern(|_| true).any_leaf().tree().finish());
        let outer_columns = bindings[0][0]
            .logical_prop(&memo)
            .unwrap()
            .output_columns()
            .clone();

        assert!(Decorrelator::new(&memo, Some(&outer_columns))
            .decorrelate(&bindings[0][1], false)
            .unwrap()
            .is_none());
    }
}
