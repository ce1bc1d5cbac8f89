use std::fmt::{self, Display};

use slotmap::Key;

use super::{Graph, NodeId, NodeKind};

impl Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Alloc => "alloc",
                Self::DynAlloc => "dyn-alloc",
                Self::Load => "load",
                Self::Store => "store",
                Self::Gep => "gep",
                Self::Cast => "cast",
                Self::Phi => "phi",
                Self::Call => "call",
                Self::CallFuncptr => "call-funcptr",
                Self::CallReturn => "call-return",
                Self::Return => "return",
                Self::Entry => "entry",
                Self::Noop => "noop",
                Self::Constant => "constant",
                Self::Function => "function",
                Self::Memcpy => "memcpy",
                Self::Nullptr => "nullptr",
                Self::UnknownMem => "unknown",
            }
        )
    }
}

pub(super) struct NodeIdPrinter(pub NodeId);

impl Display for NodeIdPrinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.data().as_ffi();

        write!(f, "n{}_{}", id as u32, id >> 32)
    }
}

fn fmt_ids(f: &mut fmt::Formatter<'_>, ids: &[NodeId]) -> fmt::Result {
    write!(f, "[")?;

    for (idx, &id) in ids.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }

        write!(f, "{}", NodeIdPrinter(id))?;
    }

    write!(f, "]")
}

/// A deterministic text dump: one line per node in arena order. Building
/// the same module twice prints the same text.
impl Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pss root={} {{", NodeIdPrinter(self.root))?;

        for (node_id, node) in self.iter() {
            write!(f, "  {}: {}", NodeIdPrinter(node_id), node.kind)?;

            if node.size != 0 {
                write!(f, " size={}", node.size)?;
            }

            match node.kind {
                NodeKind::Gep | NodeKind::Constant => write!(f, " +{}", node.offset)?,
                NodeKind::Memcpy => write!(f, " +{} len={}", node.offset, node.len)?,
                _ => {}
            }

            if node.is_heap {
                write!(f, " heap")?;
            }

            if node.zero_initialized {
                write!(f, " zeroed")?;
            }

            if !node.operands.is_empty() {
                write!(f, " ops=")?;
                fmt_ids(f, &node.operands)?;
            }

            if let Some(paired) = node.paired {
                write!(f, " paired={}", NodeIdPrinter(paired))?;
            }

            if !node.successors.is_empty() {
                write!(f, " -> ")?;
                fmt_ids(f, &node.successors)?;
            }

            writeln!(f)?;
        }

        write!(f, "}}")
    }
}
