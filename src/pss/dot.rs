use std::fmt::{self, Display};

use super::printer::NodeIdPrinter;
use super::Graph;

impl Graph {
    /// Renders the graph in Graphviz format: successor edges solid, call
    /// pairing dashed.
    pub fn dot(&self) -> impl Display + '_ {
        struct DotPrinter<'a>(&'a Graph);

        impl Display for DotPrinter<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                writeln!(f, "digraph pss {{")?;
                writeln!(f, "  node [shape=rect];")?;
                writeln!(f, "  edge [minlen=1; dir=forward];")?;
                writeln!(f)?;

                for (node_id, node) in self.0.iter() {
                    writeln!(
                        f,
                        "  {} [label = \"{}\"];",
                        NodeIdPrinter(node_id),
                        node.kind,
                    )?;
                }

                writeln!(f)?;

                for (node_id, node) in self.0.iter() {
                    for &succ_id in &node.successors {
                        writeln!(
                            f,
                            "  {} -> {};",
                            NodeIdPrinter(node_id),
                            NodeIdPrinter(succ_id),
                        )?;
                    }

                    if let Some(paired) = node.paired {
                        writeln!(
                            f,
                            "  {} -> {} [style=dashed];",
                            NodeIdPrinter(node_id),
                            NodeIdPrinter(paired),
                        )?;
                    }
                }

                writeln!(f, "}}")
            }
        }

        DotPrinter(self)
    }
}
