//! The pointer state subgraph: one [`Node`] per pointer-relevant event,
//! successor edges in control-flow order, all owned by a [`Graph`] arena.

mod build;
mod call;
mod constant;
mod dot;
mod globals;
mod printer;

use std::fmt::{self, Display};
use std::ops::{Index, IndexMut};

use slotmap::{new_key_type, SlotMap, SparseSecondaryMap};
use thiserror::Error;

use crate::ir::{FuncId, Intrinsic};

new_key_type! {
    pub struct NodeId;
}

/// A byte offset from the start of a memory object. The all-ones value is
/// the "unknown" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub const UNKNOWN: Offset = Offset(u64::MAX);

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A memory object plus an offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer {
    pub target: NodeId,
    pub offset: Offset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Alloc,
    DynAlloc,
    Load,
    Store,
    Gep,
    Cast,
    Phi,
    Call,
    CallFuncptr,
    CallReturn,
    Return,
    Entry,
    Noop,
    Constant,
    Function,
    Memcpy,
    Nullptr,
    UnknownMem,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub operands: Vec<NodeId>,
    /// Pointers known before the solver runs; the solver fills the rest.
    pub points_to: Vec<Pointer>,
    pub successors: Vec<NodeId>,
    pub predecessors: Vec<NodeId>,
    /// `Call <-> CallReturn` and `CallFuncptr <-> Return` pairing.
    pub paired: Option<NodeId>,
    /// Allocated bytes for `Alloc`/`DynAlloc`; 0 means unknown.
    pub size: u64,
    /// Byte offset for `Gep`/`Constant`, source offset for `Memcpy`.
    pub offset: Offset,
    /// Transfer length for `Memcpy`.
    pub len: Offset,
    pub is_heap: bool,
    pub zero_initialized: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            operands: vec![],
            points_to: vec![],
            successors: vec![],
            predecessors: vec![],
            paired: None,
            size: 0,
            offset: Offset(0),
            len: Offset(0),
            is_heap: false,
            zero_initialized: false,
        }
    }

    pub fn single_successor(&self) -> Option<NodeId> {
        match self.successors.as_slice() {
            [succ] => Some(*succ),
            _ => None,
        }
    }
}

/// The per-function slice of the graph: entry node, unified return sink,
/// and the argument PHI chain (`None` when the function takes no pointers
/// and is not variadic). For variadic functions the second argument node is
/// the PHI collecting pointers passed through `...`.
#[derive(Debug, Clone, Copy)]
pub struct Subgraph {
    pub root: NodeId,
    pub ret: NodeId,
    pub args: Option<(NodeId, NodeId)>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("module does not define `main`")]
    NoMain,

    #[error("unsupported constant operand")]
    UnsupportedConstant,

    #[error("constant resolves to {0} pointers, expected exactly one")]
    AmbiguousConstant(usize),

    #[error("constant bitcast changes representation")]
    LossyConstCast,

    #[error("`realloc` is not supported")]
    Realloc,

    #[error("unhandled intrinsic `{0}`")]
    UnhandledIntrinsic(Intrinsic),

    #[error("`va_start` outside a variadic function")]
    VaStartNotVariadic,

    #[error("`va_start` does not target an allocation")]
    VaStartTarget,

    #[error("function `{0}` has no reachable return")]
    NoReturn(String),
}

/// The arena that owns every node. Created with the two sentinel nodes
/// already in place; `root` is filled in by the builder.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: SlotMap<NodeId, Node>,
    pub root: NodeId,
    pub nullptr: NodeId,
    pub unknown_memory: NodeId,
    pub subgraphs: SparseSecondaryMap<FuncId, Subgraph>,
}

impl Graph {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();

        let nullptr = nodes.insert(Node::new(NodeKind::Nullptr));
        nodes[nullptr].points_to.push(Pointer {
            target: nullptr,
            offset: Offset(0),
        });

        let unknown_memory = nodes.insert(Node::new(NodeKind::UnknownMem));
        nodes[unknown_memory].points_to.push(Pointer {
            target: unknown_memory,
            offset: Offset::UNKNOWN,
        });

        Self {
            nodes,
            root: NodeId::default(),
            nullptr,
            unknown_memory,
            subgraphs: Default::default(),
        }
    }

    /// The pointer that stands for "could be anywhere".
    pub fn pointer_unknown(&self) -> Pointer {
        Pointer {
            target: self.unknown_memory,
            offset: Offset::UNKNOWN,
        }
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let node_id = self.nodes.insert(Node::new(kind));

        // memory objects and functions are their own targets
        if let NodeKind::Alloc | NodeKind::DynAlloc | NodeKind::Function = kind {
            self.nodes[node_id].points_to.push(Pointer {
                target: node_id,
                offset: Offset(0),
            });
        }

        node_id
    }

    pub fn add_constant(&mut self, target: NodeId, offset: Offset) -> NodeId {
        let node_id = self.add(NodeKind::Constant);
        let node = &mut self.nodes[node_id];
        node.offset = offset;
        node.points_to.push(Pointer { target, offset });

        node_id
    }

    pub fn add_operand(&mut self, node_id: NodeId, operand: NodeId) {
        self.nodes[node_id].operands.push(operand);
    }

    pub fn add_points_to(&mut self, node_id: NodeId, pointer: Pointer) {
        let points_to = &mut self.nodes[node_id].points_to;

        if !points_to.contains(&pointer) {
            points_to.push(pointer);
        }
    }

    pub fn add_successor(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].successors.push(to);
        self.nodes[to].predecessors.push(from);
    }

    /// Splices `node_id` into the successor chain right behind `after`.
    pub fn insert_after(&mut self, node_id: NodeId, after: NodeId) {
        let succs = std::mem::take(&mut self.nodes[after].successors);

        for &succ in &succs {
            for pred in &mut self.nodes[succ].predecessors {
                if *pred == after {
                    *pred = node_id;
                }
            }
        }

        self.nodes[node_id].successors = succs;
        self.add_successor(after, node_id);
    }

    /// The single pointer a constant-like node carries, if there is exactly
    /// one.
    pub fn single_points_to(&self, node_id: NodeId) -> Option<Pointer> {
        match self.nodes[node_id].points_to.as_slice() {
            [pointer] => Some(*pointer),
            _ => None,
        }
    }

    pub fn iter(&self) -> slotmap::basic::Iter<'_, NodeId, Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, node_id: NodeId) -> &Self::Output {
        &self.nodes[node_id]
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, node_id: NodeId) -> &mut Self::Output {
        &mut self.nodes[node_id]
    }
}
