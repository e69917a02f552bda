//! Statistics of operators.
//!
//! Base table statistics come from a [`StatisticsProvider`], statistics of other operators are
//! derived from their children's.
use std::collections::HashMap;

use datafusion_common::{Column, ScalarValue};
use datafusion::optimizer::utils::split_conjunction;
use datafusion_expr::{BinaryExpr, Operator as BinaryOperator};

use crate::catalog::TableDescriptor;
use crate::error::OptResult;
use crate::operator::JoinKind;
use crate::Expr;

pub const DEFAULT_ROW_COUNT: f64 = 1000.0;
/// Selectivity of predicates we can't estimate.
pub const DEFAULT_SELECTIVITY: f64 = 0.1;
/// Ratio of distinct values to rows of columns without statistics.
const DEFAULT_NDV_RATIO: f64 = 0.1;

/// Statistics of operator.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Statistics {
    /// Total number of row count.
    ///
    /// This maybe an estimated value.
    row_count: f64,
    /// Statistics of each column.
    column_stats: HashMap<Column, ColumnStatistics>,
}

/// Statistics of one column.
#[derive(Clone, PartialEq, Debug)]
pub struct ColumnStatistics {
    /// Number of distinct value of a column.
    ndv: f64,
}

impl Statistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count: row_count.max(0.0),
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column_ndv(mut self, column: Column, ndv: f64) -> Self {
        self.column_stats.insert(
            column,
            ColumnStatistics {
                ndv: ndv.max(1.0),
            },
        );
        self
    }

    pub fn row_count(&self) -> f64 {
        self.row_count
    }

    /// Number of distinct values of `column`, guessed from row count when unknown.
    pub fn ndv(&self, column: &Column) -> f64 {
        self.column_stats
            .get(column)
            .map(|s| s.ndv)
            .unwrap_or_else(|| (self.row_count * DEFAULT_NDV_RATIO).max(1.0))
            .min(self.row_count.max(1.0))
    }

    /// Statistics with a new row count, column ndvs capped by it.
    pub fn with_row_count(&self, row_count: f64) -> Statistics {
        let row_count = row_count.max(0.0);
        Statistics {
            row_count,
            column_stats: self
                .column_stats
                .iter()
                .map(|(c, s)| {
                    (
                        c.clone(),
                        ColumnStatistics {
                            ndv: s.ndv.min(row_count.max(1.0)),
                        },
                    )
                })
                .collect(),
        }
    }

    fn merge_columns(mut self, other: &Statistics) -> Statistics {
        for (column, stats) in &other.column_stats {
            self.column_stats
                .entry(column.clone())
                .or_insert_with(|| stats.clone());
        }
        self
    }
}

/// Source of base table statistics.
pub trait StatisticsProvider: Send + Sync {
    fn table_statistics(&self, table: &TableDescriptor) -> OptResult<Statistics>;
}

/// Provides registered statistics, or [`DEFAULT_ROW_COUNT`] rows for unknown tables.
#[derive(Default, Debug)]
pub struct DefaultStatisticsProvider {
    tables: HashMap<String, Statistics>,
}

impl DefaultStatisticsProvider {
    pub fn with_table<S: Into<String>>(mut self, table: S, stats: Statistics) -> Self {
        self.tables.insert(table.into(), stats);
        self
    }
}

impl StatisticsProvider for DefaultStatisticsProvider {
    fn table_statistics(&self, table: &TableDescriptor) -> OptResult<Statistics> {
        if let Some(stats) = self.tables.get(table.name().as_str()) {
            return Ok(stats.clone());
        }

        let mut stats = Statistics::new(DEFAULT_ROW_COUNT);
        if let Some(key) = table.key() {
            for column in key {
                stats = stats.with_column_ndv(column.clone(), DEFAULT_ROW_COUNT);
            }
        }
        Ok(stats)
    }
}

/// Stats promise of an expression, higher promise stats are preferred as group statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatPromise {
    Low,
    Medium,
    High,
}

/// Selectivity of `predicate` over rows described by `input`.
pub fn selectivity(input: &Statistics, predicate: &Expr) -> f64 {
    split_conjunction(predicate)
        .into_iter()
        .map(|conjunct| conjunct_selectivity(input, conjunct))
        .product()
}

fn conjunct_selectivity(input: &Statistics, conjunct: &Expr) -> f64 {
    match conjunct {
        Expr::Literal(ScalarValue::Boolean(Some(true))) => 1.0,
        Expr::Literal(ScalarValue::Boolean(Some(false))) => 0.0,
        Expr::BinaryExpr(BinaryExpr {
            left,
            op: BinaryOperator::Eq,
            right,
        }) => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(l), Expr::Column(r)) => 1.0 / input.ndv(l).max(input.ndv(r)),
            (Expr::Column(c), Expr::Literal(_)) | (Expr::Literal(_), Expr::Column(c)) => {
                1.0 / input.ndv(c)
            }
            _ => DEFAULT_SELECTIVITY,
        },
        _ => DEFAULT_SELECTIVITY,
    }
}

/// Estimates statistics of a filter.
pub fn filter_statistics(input: &Statistics, predicate: &Expr) -> Statistics {
    input.with_row_count(input.row_count() * selectivity(input, predicate))
}

/// Combines statistics of join children.
pub struct JoinStatsProcessor;

impl JoinStatsProcessor {
    pub fn derive(
        kind: JoinKind,
        outer: &Statistics,
        inner: &Statistics,
        predicate: &Expr,
    ) -> Statistics {
        let combined = outer.clone().merge_columns(inner);
        let selectivity = selectivity(&combined, predicate);
        let inner_join_rows = outer.row_count() * inner.row_count() * selectivity;

        match kind {
            JoinKind::Inner => combined.with_row_count(inner_join_rows),
            JoinKind::LeftOuter => combined.with_row_count(inner_join_rows.max(outer.row_count())),
            JoinKind::LeftSemi => outer.with_row_count(inner_join_rows.min(outer.row_count())),
            JoinKind::LeftAntiSemi | JoinKind::LeftAntiSemiNotIn => {
                let matched = inner_join_rows.min(outer.row_count());
                outer.with_row_count((outer.row_count() - matched).max(1.0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::operator::JoinKind;
    use crate::stat::{selectivity, JoinStatsProcessor, Statistics, DEFAULT_SELECTIVITY};
    use datafusion::prelude::{col, lit};
    use datafusion_common::Column;

    fn column(name: &str) -> Column {
        Column::from_qualified_name(name)
    }

    #[test]
    fn test_selectivity() {
        let stats = Statistics::new(1000.0).with_column_ndv(column("t1.a"), 100.0);

        assert_eq!(0.01, selectivity(&stats, &col("t1.a").eq(lit(5))));
        assert_eq!(DEFAULT_SELECTIVITY, selectivity(&stats, &col("t1.a").gt(lit(5))));
        assert_eq!(1.0, selectivity(&stats, &lit(true)));
    }

    #[test]
    fn test_join_stats() {
        let outer = Statistics::new(1000.0).with_column_ndv(column("t1.a"), 1000.0);
        let inner = Statistics::new(100.0).with_column_ndv(column("t2.b"), 100.0);
        let predicate = col("t1.a").eq(col("t2.b"));

        let inner_join = JoinStatsProcessor::derive(JoinKind::Inner, &outer, &inner, &predicate);
        assert_eq!(100.0, inner_join.row_count());
        assert_eq!(100.0, inner_join.ndv(&column("t1.a")));

        let left_outer =
            JoinStatsProcessor::derive(JoinKind::LeftOuter, &outer, &inner, &predicate);
        assert_eq!(1000.0, left_outer.row_count());

        let semi = JoinStatsProcessor::derive(JoinKind::LeftSemi, &outer, &inner, &predicate);
        assert_eq!(100.0, semi.row_count());

        let anti = JoinStatsProcessor::derive(JoinKind::LeftAntiSemi, &outer, &inner, &predicate);
        assert_eq!(900.0, anti.row_count());
    }
}
