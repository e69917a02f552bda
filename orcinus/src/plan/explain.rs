use std::borrow::Cow;
use std::default::Default;
use std::io::{BufWriter, Write};

use ptree::print_config::UTF_CHARS;
use ptree::{write_tree_with, PrintConfig, Style, TreeItem};

use crate::plan::{Plan, PlanNode};

#[derive(Clone)]
struct ExplainNode<'a> {
    plan: &'a Plan,
    node: &'a PlanNode,
}

impl<'a> TreeItem for ExplainNode<'a> {
    type Child = Self;

    fn write_self<W: Write>(&self, f: &mut W, style: &Style) -> std::io::Result<()> {
        write!(f, "{}", style.paint(self.node.operator()))
    }

    fn children(&self) -> Cow<[Self::Child]> {
        Cow::from(
            self.plan
                .inputs_of(self.node)
                .map(|node| ExplainNode {
                    plan: self.plan,
                    node,
                })
                .collect::<Vec<_>>(),
        )
    }
}

pub fn explain<W: Write>(plan: &Plan, output: &mut W) -> std::io::Result<()> {
    let config = PrintConfig {
        indent: 3,
        characters: UTF_CHARS.into(),
        ..Default::default()
    };
    let root = ExplainNode {
        plan,
        node: plan.root(),
    };
    write_tree_with(&root, output, &config)
}

pub fn explain_to_string(plan: &Plan) -> std::io::Result<String> {
    let mut buf = BufWriter::new(Vec::new());
    explain(plan, &mut buf)?;

    let bytes = buf.into_inner()?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use crate::operator::{JoinKind, MotionKind};
    use crate::plan::explain::explain_to_string;
    use crate::plan::{LogicalPlanBuilder, PhysicalPlanBuilder};
    use datafusion::prelude::col;

    #[test]
    fn test_explain_logical_plan() {
        let plan = LogicalPlanBuilder::scan("t1").limit(5).limit(10).build();

        let expected_result = "\
LogicalLimit { limit: 10 }
└─ LogicalLimit { limit: 5 }
   └─ LogicalGet { table_name: \"t1\" }
";

        assert_eq!(expected_result, explain_to_string(&plan).unwrap());
    }

    #[test]
    fn test_explain_physical_plan() {
        let plan = {
            let inner = PhysicalPlanBuilder::scan("t2")
                .motion(MotionKind::Broadcast)
                .build();
            PhysicalPlanBuilder::scan("t1")
                .nl_join(JoinKind::Inner, col("t1.a").lt(col("t2.a")), inner)
                .motion(MotionKind::Gather)
                .build()
        };

        let result = explain_to_string(&plan).unwrap();
        let lines = result.lines().collect::<Vec<_>>();
        assert_eq!(5, lines.len());
        assert!(lines[0].starts_with("PhysicalMotion"));
        assert!(lines[1].starts_with("└─ PhysicalNLJoin"));
        assert_eq!("   ├─ PhysicalTableScan { table_name: \"t1\" }", lines[2]);
        assert!(lines[3].starts_with("   └─ PhysicalMotion"));
        assert_eq!("      └─ PhysicalTableScan { table_name: \"t2\" }", lines[4]);
    }
}
