use crate::operator::Operator;

pub type OperatorMatcher = fn(&Operator) -> bool;

/// How a pattern node binds expressions of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    /// Binds each logical expression accepted by the matcher. Without child patterns its
    /// children are bound as group handles.
    Operator,
    /// Binds the whole group as one group handle.
    Leaf,
    /// Binds one fully expanded expression tree of the group.
    Tree,
    /// Binds all remaining children as group handles, only valid as the last child pattern.
    MultiLeaf,
}

/// A pattern defines how to match a sub tree of a plan.
///
/// If we want to match `Apply(<any>, <expanded tree>)`, the pattern tree should be defined like:
/// ```
/// use orcinus::operator::LogicalOperator::LogicalApply;
/// use orcinus::operator::Operator::Logical;
/// use orcinus::rules::{pattern, PatternBuilder};
///
/// pattern(|op| matches!(op, Logical(LogicalApply(_))))
///   .any_leaf()
///   .tree()
/// .finish();
/// ```
pub struct Pattern {
    pub kind: PatternKind,
    /// Matches against an operator, only consulted by [`PatternKind::Operator`] nodes.
    pub predict: OperatorMatcher,
    /// `None` when children are not matched.
    pub children: Option<Vec<Pattern>>,
}

impl Pattern {
    pub fn new_leaf(matcher: OperatorMatcher) -> Pattern {
        Pattern {
            kind: PatternKind::Operator,
            predict: matcher,
            children: None,
        }
    }

    /// Operator node with child patterns, no children means children aren't matched.
    pub fn new<I: IntoIterator<Item = Pattern>>(matcher: OperatorMatcher, children: I) -> Pattern {
        let children = children.into_iter().collect::<Vec<Pattern>>();
        Pattern {
            kind: PatternKind::Operator,
            predict: matcher,
            children: (!children.is_empty()).then_some(children),
        }
    }

    fn placeholder(kind: PatternKind) -> Pattern {
        Pattern {
            kind,
            predict: any,
            children: None,
        }
    }

    pub fn matches_without_children(&self, operator: &Operator) -> bool {
        match self.kind {
            PatternKind::Operator => (self.predict)(operator),
            _ => true,
        }
    }

    /// Whether an expression with `arity` children can match child patterns.
    pub fn accepts_arity(&self, arity: usize) -> bool {
        match &self.children {
            None => true,
            Some(children) => match children.last() {
                Some(last) if last.kind == PatternKind::MultiLeaf => arity + 1 >= children.len(),
                _ => arity == children.len(),
            },
        }
    }
}

pub fn any(_: &Operator) -> bool {
    true
}

pub fn pattern(matcher: OperatorMatcher) -> RootPatternBuilder {
    PatternNodeBuilder {
        parent: (),
        matcher,
        children: vec![],
    }
}

/// Fluent construction of pattern trees, see [`Pattern`].
pub trait PatternBuilder: Sized {
    type Child;
    type Output;

    /// Starts a child pattern node, [`PatternBuilder::finish`] returns to this node.
    fn pattern(self, matcher: OperatorMatcher) -> Self::Child;
    /// Adds a child matching operator without checking its children.
    fn leaf(self, matcher: OperatorMatcher) -> Self;
    fn finish(self) -> Self::Output;
    fn add_placeholder(self, kind: PatternKind) -> Self;

    fn any_leaf(self) -> Self {
        self.add_placeholder(PatternKind::Leaf)
    }

    fn tree(self) -> Self {
        self.add_placeholder(PatternKind::Tree)
    }

    fn multi_leaf(self) -> Self {
        self.add_placeholder(PatternKind::MultiLeaf)
    }
}

/// Receives a finished child pattern node.
pub trait PatternParent {
    type Finished;

    fn attach(self, child: Pattern) -> Self::Finished;
}

/// Builder of one pattern node, `P` is the builder of its parent.
pub struct PatternNodeBuilder<P> {
    parent: P,
    matcher: OperatorMatcher,
    children: Vec<Pattern>,
}

pub type RootPatternBuilder = PatternNodeBuilder<()>;

impl PatternParent for () {
    type Finished = Pattern;

    fn attach(self, child: Pattern) -> Pattern {
        child
    }
}

impl<P> PatternParent for PatternNodeBuilder<P> {
    type Finished = Self;

    fn attach(mut self, child: Pattern) -> Self {
        self.children.push(child);
        self
    }
}

impl<P: PatternParent> PatternBuilder for PatternNodeBuilder<P> {
    type Child = PatternNodeBuilder<Self>;
    type Output = P::Finished;

    fn pattern(self, matcher: OperatorMatcher) -> Self::Child {
        PatternNodeBuilder {
            parent: self,
            matcher,
            children: vec![],
        }
    }

    fn leaf(mut self, matcher: OperatorMatcher) -> Self {
        self.children.push(Pattern::new_leaf(matcher));
        self
    }

    fn finish(self) -> Self::Output {
        let node = Pattern::new(self.matcher, self.children);
        self.parent.attach(node)
    }

    fn add_placeholder(mut self, kind: PatternKind) -> Self {
        self.children.push(Pattern::placeholder(kind));
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::operator::LogicalOperator::{LogicalGet, LogicalJoin, LogicalSelect};
    use crate::operator::Operator::Logical;
    use crate::operator::{Get, Limit, LogicalOperator};
    use crate::rules::{pattern, PatternBuilder, PatternKind};

    #[test]
    fn test_nested_pattern() {
        let p = pattern(|op| matches!(op, Logical(LogicalJoin(_))))
            .pattern(|op| matches!(op, Logical(LogicalSelect(_))))
            .any_leaf()
            .finish()
            .leaf(|op| matches!(op, Logical(LogicalGet(_))))
            .finish();

        let children = p.children.as_ref().unwrap();
        assert_eq!(2, children.len());
        assert_eq!(PatternKind::Leaf, children[0].children.as_ref().unwrap()[0].kind);
        assert!(children[1].matches_without_children(&Logical(LogicalGet(Get::new("t1")))));
        assert!(!children[1].matches_without_children(&Logical(
            LogicalOperator::LogicalLimit(Limit::new(1))
        )));
        assert!(p.accepts_arity(2));
        assert!(!p.accepts_arity(3));
    }

    #[test]
    fn test_multi_leaf_arity() {
        let p = pattern(|op| matches!(op, Logical(LogicalJoin(_))))
            .any_leaf()
            .multi_leaf()
            .finish();

        assert!(p.accepts_arity(1));
        assert!(p.accepts_arity(4));
        assert!(!p.accepts_arity(0));
    }
}
