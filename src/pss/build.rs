use std::mem;

use log::warn;
use slotmap::SecondaryMap;

use crate::ir::{
    BlockId, CastOp, Const, ConstExprId, FuncId, GlobalId, InstId, InstKind, Module, Operand,
    ParamId, Term,
};
use crate::ir::ty::TypeId;
use crate::layout::DataLayout;

use super::{BuildError, Graph, NodeId, NodeKind, Offset, Subgraph};

impl Graph {
    /// Lowers the module into a pointer state subgraph. The returned graph
    /// is rooted at the global-initializer prefix, or directly at `main`'s
    /// entry when the module has no globals.
    pub fn build<L: DataLayout + ?Sized>(
        module: &Module,
        layout: &L,
    ) -> Result<Graph, BuildError> {
        Builder::new(module, layout).build()
    }
}

pub(super) struct Builder<'a, L: ?Sized> {
    pub(super) module: &'a Module,
    pub(super) layout: &'a L,
    pub(super) graph: Graph,

    // the symbol table: one owning node per IR value the graph tracks
    pub(super) inst_nodes: SecondaryMap<InstId, NodeId>,
    pub(super) param_nodes: SecondaryMap<ParamId, NodeId>,
    pub(super) global_nodes: SecondaryMap<GlobalId, NodeId>,
    pub(super) func_nodes: SecondaryMap<FuncId, NodeId>,
    pub(super) expr_nodes: SecondaryMap<ConstExprId, NodeId>,

    built_blocks: SecondaryMap<BlockId, (NodeId, NodeId)>,
    built_funcs: Vec<FuncId>,

    // pointer-returning call sites, resolved once every subgraph is done
    pub(super) pending_rets: Vec<(NodeId, FuncId)>,
}

impl<'a, L: DataLayout + ?Sized> Builder<'a, L> {
    fn new(module: &'a Module, layout: &'a L) -> Self {
        Self {
            module,
            layout,
            graph: Graph::new(),
            inst_nodes: Default::default(),
            param_nodes: Default::default(),
            global_nodes: Default::default(),
            func_nodes: Default::default(),
            expr_nodes: Default::default(),
            built_blocks: Default::default(),
            built_funcs: Default::default(),
            pending_rets: Default::default(),
        }
    }

    fn build(mut self) -> Result<Graph, BuildError> {
        let main = self.module.func_by_name("main").ok_or(BuildError::NoMain)?;

        // globals first: instructions may use them as operands
        let prefix = self.build_globals()?;
        let root = self.build_func(main)?;

        // PHI operands and return joins may refer forward across blocks and
        // into subgraphs that were mid-build at the call site, so they are
        // resolved only now
        for func_id in mem::take(&mut self.built_funcs) {
            self.add_phi_operands(func_id)?;
        }

        self.resolve_pending_rets();

        self.graph.root = match prefix {
            Some((first, tail)) => {
                self.graph.add_successor(tail, root);
                first
            }

            None => root,
        };

        Ok(self.graph)
    }

    /// Builds (or finishes building) the subgraph of a defined function and
    /// returns its entry node.
    pub(super) fn build_func(&mut self, func_id: FuncId) -> Result<NodeId, BuildError> {
        let module = self.module;
        let func = &module.funcs[func_id];

        let root = self.graph.add(NodeKind::Entry);
        let ret = self.graph.add(NodeKind::Noop);
        let args = self.build_args(func_id);

        // register before descending into the body: a recursive call site
        // must find the record instead of recursing forever
        self.graph
            .subgraphs
            .insert(func_id, Subgraph { root, ret, args });
        self.built_funcs.push(func_id);

        let mut last = root;
        if let Some((first_arg, last_arg)) = args {
            self.graph.add_successor(root, first_arg);
            last = last_arg;
        }

        let mut first = None;
        for &block_id in &func.blocks {
            let mut span = self.build_block(func_id, block_id)?;

            if first.is_none() {
                match span {
                    // an entry block without pointer-relevant instructions:
                    // let the root stand in for it so that successor
                    // stitching still starts from the function entry
                    None => {
                        first = Some(root);
                        span = Some((root, root));
                    }

                    Some((block_first, _)) => {
                        first = Some(block_first);
                        self.graph.add_successor(last, block_first);
                    }
                }
            }

            if let Some(span) = span {
                self.built_blocks.insert(block_id, span);
            }
        }

        let mut rets = vec![];
        for &block_id in &func.blocks {
            let Some(&(_, block_last)) = self.built_blocks.get(block_id) else {
                continue;
            };

            let mut found = SecondaryMap::new();
            let added = self.block_add_successors(&mut found, block_last, block_id);

            // nowhere to go: control flow leaves the function here
            if added == 0 {
                rets.push(block_last);
            }
        }

        if rets.is_empty() {
            return Err(BuildError::NoReturn(func.name.clone()));
        }

        // every real return feeds the one unified sink; call sites connect
        // to `ret` instead of chasing individual returns
        for r in rets {
            self.graph.add_successor(r, ret);
        }

        Ok(root)
    }

    /// PHI nodes for the pointer-typed parameters, chained in order, plus a
    /// trailing PHI that collects variadic pointer arguments.
    fn build_args(&mut self, func_id: FuncId) -> Option<(NodeId, NodeId)> {
        let module = self.module;
        let func = &module.funcs[func_id];

        let mut first = None;
        let mut arg: Option<NodeId> = None;

        for &param_id in &func.params {
            if module.types.is_pointer(module.params[param_id].ty) {
                let node = self.graph.add(NodeKind::Phi);
                self.param_nodes.insert(param_id, node);

                match arg {
                    Some(prev) => self.graph.add_successor(prev, node),
                    None => first = Some(node),
                }

                arg = Some(node);
            }
        }

        if func.variadic {
            let node = self.graph.add(NodeKind::Phi);

            match arg {
                Some(prev) => self.graph.add_successor(prev, node),
                None => first = Some(node),
            }

            return Some((first.unwrap_or(node), node));
        }

        first.zip(arg)
    }

    /// Lowers one basic block and returns the first and last node of its
    /// chain; `None` when nothing in the block touches pointers.
    fn build_block(
        &mut self,
        func_id: FuncId,
        block_id: BlockId,
    ) -> Result<Option<(NodeId, NodeId)>, BuildError> {
        let module = self.module;
        let block = &module.blocks[block_id];

        let mut first = None;
        let mut last: Option<NodeId> = None;

        for &inst_id in &block.insts {
            if let Some((span_first, span_last)) = self.build_inst(func_id, inst_id)? {
                match last {
                    Some(prev) => self.graph.add_successor(prev, span_first),
                    None => first = Some(span_first),
                }

                last = Some(span_last);
            }
        }

        // a return modifies control flow even when it carries no pointer
        if let Term::Ret(value) = block.term {
            let node = self.create_return(value)?;

            match last {
                Some(prev) => self.graph.add_successor(prev, node),
                None => first = Some(node),
            }

            last = Some(node);
        }

        Ok(first.zip(last))
    }

    fn build_inst(
        &mut self,
        func_id: FuncId,
        inst_id: InstId,
    ) -> Result<Option<(NodeId, NodeId)>, BuildError> {
        let module = self.module;
        let inst = &module.insts[inst_id];

        let node = match inst.kind {
            InstKind::Alloca { allocated } => Some(self.create_alloc(inst_id, Some(allocated))),

            // stores of non-pointers are ignored, unless the stored value is
            // already tracked (an inttoptr result smuggled past the type
            // system)
            InstKind::Store { value, ptr } => (module.operand_is_pointer(value)
                || self.lookup(value).is_some())
            .then(|| self.create_store(inst_id, value, ptr))
            .transpose()?,

            InstKind::Load { ptr } => (module.types.is_pointer(inst.ty)
                || self.lookup(ptr).is_some())
            .then(|| self.create_load(inst_id, ptr))
            .transpose()?,

            InstKind::Gep { base, pointee, ref indices } => {
                Some(self.create_gep(inst_id, base, pointee, indices)?)
            }

            InstKind::Select { if_true, if_false, .. } => module
                .types
                .is_pointer(inst.ty)
                .then(|| self.create_select(inst_id, if_true, if_false))
                .transpose()?,

            InstKind::Phi { .. } => module
                .types
                .is_pointer(inst.ty)
                .then(|| self.create_phi(inst_id)),

            InstKind::Cast(op, value) => Some(self.create_cast(inst_id, op, value)?),

            InstKind::Binary(..) => None,

            InstKind::Call { .. } => {
                if self.is_relevant_call(inst_id) {
                    return self.create_call(func_id, inst_id).map(Some);
                }

                None
            }
        };

        Ok(node.map(|node| (node, node)))
    }

    pub(super) fn create_alloc(&mut self, inst_id: InstId, allocated: Option<TypeId>) -> NodeId {
        let node = self.graph.add(NodeKind::Alloc);

        if let Some(allocated) = allocated {
            self.graph[node].size = self.layout.alloc_size(&self.module.types, allocated);
        }

        self.inst_nodes.insert(inst_id, node);

        node
    }

    fn create_store(
        &mut self,
        inst_id: InstId,
        value: Operand,
        ptr: Operand,
    ) -> Result<NodeId, BuildError> {
        let value = self.get_operand(value)?;
        let ptr = self.get_operand(ptr)?;

        let node = self.graph.add(NodeKind::Store);
        self.graph[node].operands.extend([value, ptr]);
        self.inst_nodes.insert(inst_id, node);

        Ok(node)
    }

    pub(super) fn create_load(&mut self, inst_id: InstId, ptr: Operand) -> Result<NodeId, BuildError> {
        let ptr = self.get_operand(ptr)?;

        let node = self.graph.add(NodeKind::Load);
        self.graph[node].operands.push(ptr);
        self.inst_nodes.insert(inst_id, node);

        Ok(node)
    }

    fn create_gep(
        &mut self,
        inst_id: InstId,
        base: Operand,
        pointee: TypeId,
        indices: &[Operand],
    ) -> Result<NodeId, BuildError> {
        let module = self.module;
        let bits = self.layout.pointer_bits(module.operand_addr_space(base));
        let op = self.get_operand(base)?;

        let mut offset = Offset::UNKNOWN;

        if let Some(indices) = const_indices(indices) {
            if let Some(acc) = self.layout.const_offset(&module.types, pointee, &indices) {
                if fits_pointer(acc, bits) {
                    offset = Offset(acc as u64);
                } else {
                    warn!("GEP offset does not fit into {bits} bits");
                }
            }
        }

        let node = self.graph.add(NodeKind::Gep);
        self.graph[node].operands.push(op);
        self.graph[node].offset = offset;
        self.inst_nodes.insert(inst_id, node);

        Ok(node)
    }

    /// A pointer-typed select is a PHI over both arms; the condition does
    /// not exist as far as the solver is concerned.
    fn create_select(
        &mut self,
        inst_id: InstId,
        if_true: Operand,
        if_false: Operand,
    ) -> Result<NodeId, BuildError> {
        let op1 = self.get_operand(if_true)?;
        let op2 = self.get_operand(if_false)?;

        let node = self.graph.add(NodeKind::Phi);
        self.graph[node].operands.extend([op1, op2]);
        self.inst_nodes.insert(inst_id, node);

        Ok(node)
    }

    /// Incoming values may live in blocks that do not exist yet; the PHI
    /// starts out empty and is completed by [`Builder::add_phi_operands`].
    fn create_phi(&mut self, inst_id: InstId) -> NodeId {
        let node = self.graph.add(NodeKind::Phi);
        self.inst_nodes.insert(inst_id, node);

        node
    }

    fn create_cast(
        &mut self,
        inst_id: InstId,
        op: CastOp,
        value: Operand,
    ) -> Result<NodeId, BuildError> {
        let operand = match op {
            // nothing useful to link the cast to; the solver will see an
            // empty points-to set
            CastOp::IntToPtr if matches!(value, Operand::Const(_)) => {
                warn!("`inttoptr` with a constant operand, points-to will be incomplete");
                None
            }

            _ => Some(self.get_operand(value)?),
        };

        let node = self.graph.add(NodeKind::Cast);

        if let Some(operand) = operand {
            self.graph[node].operands.push(operand);
        }

        self.inst_nodes.insert(inst_id, node);

        Ok(node)
    }

    fn create_return(&mut self, value: Option<Operand>) -> Result<NodeId, BuildError> {
        let operand = match value {
            Some(value) if self.module.operand_is_pointer(value) => {
                Some(self.get_operand(value)?)
            }
            _ => None,
        };

        let node = self.graph.add(NodeKind::Return);

        if let Some(operand) = operand {
            self.graph[node].operands.push(operand);
        }

        Ok(node)
    }

    /// Adds edges from `last` to the first node of every non-empty successor
    /// block, reaching *through* empty blocks transitively. Returns how many
    /// edges were added; `found` breaks cycles of empty blocks.
    fn block_add_successors(
        &mut self,
        found: &mut SecondaryMap<BlockId, ()>,
        last: NodeId,
        block_id: BlockId,
    ) -> usize {
        let module = self.module;
        let mut added = 0;

        for &succ_id in module.blocks[block_id].successors() {
            if found.insert(succ_id, ()).is_some() {
                continue;
            }

            match self.built_blocks.get(succ_id) {
                Some(&(succ_first, _)) => {
                    self.graph.add_successor(last, succ_first);
                    added += 1;
                }

                None => added += self.block_add_successors(found, last, succ_id),
            }
        }

        added
    }

    fn add_phi_operands(&mut self, func_id: FuncId) -> Result<(), BuildError> {
        let module = self.module;

        for &block_id in &module.funcs[func_id].blocks {
            for &inst_id in &module.blocks[block_id].insts {
                let inst = &module.insts[inst_id];

                if !module.types.is_pointer(inst.ty) {
                    continue;
                }

                if let InstKind::Phi { ref incoming } = inst.kind {
                    let node = self.inst_nodes[inst_id];

                    for &(value, _) in incoming {
                        let operand = self.get_operand(value)?;
                        self.graph.add_operand(node, operand);
                    }
                }
            }
        }

        Ok(())
    }

    /// Turns every pointer-returning call's `CallReturn` into a PHI over the
    /// `Return` predecessors of the callee's sink. Deferred so that call
    /// sites inside a recursive callee see the full set too.
    fn resolve_pending_rets(&mut self) {
        for (ret_node, func_id) in mem::take(&mut self.pending_rets) {
            let sink = self.graph.subgraphs[func_id].ret;
            let preds = self.graph[sink].predecessors.clone();

            for pred in preds {
                if self.graph[pred].kind == NodeKind::Return {
                    self.graph.add_operand(ret_node, pred);
                }
            }
        }
    }
}

fn const_indices(indices: &[Operand]) -> Option<Vec<i64>> {
    indices
        .iter()
        .map(|&idx| match idx {
            Operand::Const(Const::Int(value, _)) => Some(value as i64),
            _ => None,
        })
        .collect()
}

pub(super) fn fits_pointer(offset: i64, bits: u32) -> bool {
    offset >= 0 && (bits >= 63 || offset < 1i64 << bits)
}
