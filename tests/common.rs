#![allow(dead_code)]

use ptrflow::ir::ty::{Type, TypeId};
use ptrflow::ir::{
    Block, BlockId, Const, ConstExpr, ConstExprKind, Func, FuncId, Global, GlobalId, Init, Inst,
    InstId, InstKind, Intrinsic, Module, Operand, Param, Term,
};
use ptrflow::pss::{Graph, NodeId, NodeKind};

/// Builds up an [`Module`] without the ceremony: types are interned on
/// demand, blocks get a `Trap` terminator until one is set.
pub struct ModuleBuilder {
    pub module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
        }
    }

    pub fn ptr(&mut self) -> TypeId {
        self.module.types.ptr()
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.module.types.int(bits)
    }

    pub fn void(&mut self) -> TypeId {
        self.module.types.void()
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.module.types.intern(Type::Array { elem, len })
    }

    pub fn strukt(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.module.types.intern(Type::Struct { fields })
    }

    pub fn func(&mut self, name: &str, param_tys: &[TypeId], ret: TypeId) -> FuncId {
        self.add_func(name, param_tys, ret, false, None)
    }

    pub fn variadic_func(&mut self, name: &str, param_tys: &[TypeId], ret: TypeId) -> FuncId {
        self.add_func(name, param_tys, ret, true, None)
    }

    /// An external function: no blocks, only a signature.
    pub fn declare(&mut self, name: &str, param_tys: &[TypeId], ret: TypeId) -> FuncId {
        self.add_func(name, param_tys, ret, false, None)
    }

    pub fn intrinsic(&mut self, name: &str, intrinsic: Intrinsic) -> FuncId {
        let void = self.void();
        self.add_func(name, &[], void, false, Some(intrinsic))
    }

    fn add_func(
        &mut self,
        name: &str,
        param_tys: &[TypeId],
        ret: TypeId,
        variadic: bool,
        intrinsic: Option<Intrinsic>,
    ) -> FuncId {
        let params = param_tys
            .iter()
            .map(|&ty| self.module.params.insert(Param { ty }))
            .collect();

        self.module.funcs.insert(Func {
            name: name.to_owned(),
            params,
            ret,
            variadic,
            blocks: vec![],
            intrinsic,
        })
    }

    pub fn block(&mut self, func_id: FuncId) -> BlockId {
        let block_id = self.module.blocks.insert(Block {
            insts: vec![],
            term: Term::Trap,
        });
        self.module.funcs[func_id].blocks.push(block_id);

        block_id
    }

    pub fn term(&mut self, block_id: BlockId, term: Term) {
        self.module.blocks[block_id].term = term;
    }

    pub fn inst(&mut self, block_id: BlockId, ty: TypeId, kind: InstKind) -> Operand {
        Operand::Inst(self.raw_inst(block_id, ty, kind))
    }

    pub fn raw_inst(&mut self, block_id: BlockId, ty: TypeId, kind: InstKind) -> InstId {
        let inst_id = self.module.insts.insert(Inst { ty, kind });
        self.module.blocks[block_id].insts.push(inst_id);

        inst_id
    }

    pub fn param(&self, func_id: FuncId, idx: usize) -> Operand {
        Operand::Param(self.module.funcs[func_id].params[idx])
    }

    pub fn alloca(&mut self, block_id: BlockId, allocated: TypeId) -> Operand {
        let ptr = self.ptr();
        self.inst(block_id, ptr, InstKind::Alloca { allocated })
    }

    pub fn store(&mut self, block_id: BlockId, value: Operand, ptr: Operand) -> Operand {
        let void = self.void();
        self.inst(block_id, void, InstKind::Store { value, ptr })
    }

    pub fn load(&mut self, block_id: BlockId, ty: TypeId, ptr: Operand) -> Operand {
        self.inst(block_id, ty, InstKind::Load { ptr })
    }

    pub fn call(
        &mut self,
        block_id: BlockId,
        ty: TypeId,
        callee: FuncId,
        args: Vec<Operand>,
    ) -> Operand {
        self.inst(
            block_id,
            ty,
            InstKind::Call {
                callee: Operand::Const(Const::Function(callee)),
                args,
            },
        )
    }

    pub fn int_const(&mut self, value: u64, bits: u32) -> Operand {
        let ty = self.int(bits);
        Operand::Const(Const::Int(value, ty))
    }

    pub fn null(&mut self) -> Operand {
        let ptr = self.ptr();
        Operand::Const(Const::Null(ptr))
    }

    pub fn global(&mut self, name: &str, ty: TypeId, init: Option<Init>) -> GlobalId {
        self.module.globals.insert(Global {
            name: name.to_owned(),
            ty,
            init,
        })
    }

    pub fn const_expr(&mut self, ty: TypeId, kind: ConstExprKind) -> Const {
        Const::Expr(self.module.const_exprs.insert(ConstExpr { ty, kind }))
    }
}

/// The lone successor of a node; panics when the shape is unexpected.
pub fn step(graph: &Graph, node_id: NodeId) -> NodeId {
    match graph[node_id].successors.as_slice() {
        [succ] => *succ,
        succs => panic!(
            "expected a single successor of {:?}, got {}",
            graph[node_id].kind,
            succs.len()
        ),
    }
}

/// Follows single successors from `start`, asserting the kind of every node
/// visited. Returns the last node of the walk.
pub fn expect_chain(graph: &Graph, start: NodeId, kinds: &[NodeKind]) -> NodeId {
    let mut node_id = start;

    for &kind in kinds {
        node_id = step(graph, node_id);
        assert_eq!(graph[node_id].kind, kind, "unexpected node along the chain");
    }

    node_id
}

/// Every node of the given kind, in arena order.
pub fn nodes_of_kind(graph: &Graph, kind: NodeKind) -> Vec<NodeId> {
    graph
        .iter()
        .filter(|(_, node)| node.kind == kind)
        .map(|(node_id, _)| node_id)
        .collect()
}

pub fn count_kind(graph: &Graph, kind: NodeKind) -> usize {
    nodes_of_kind(graph, kind).len()
}
