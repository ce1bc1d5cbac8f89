use log::warn;

use crate::ir::{
    CastOp, Const, ConstExprKind, FuncId, InstId, InstKind, Intrinsic, Module, Operand,
};
use crate::layout::DataLayout;

use super::build::Builder;
use super::constant::strip_const_pointer_casts;
use super::{BuildError, NodeId, NodeKind, Offset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocFunc {
    Malloc,
    Calloc,
    Alloca,
    Realloc,
}

fn alloc_func(name: &str) -> Option<AllocFunc> {
    Some(match name {
        "malloc" => AllocFunc::Malloc,
        "calloc" => AllocFunc::Calloc,
        "alloca" => AllocFunc::Alloca,
        "realloc" => AllocFunc::Realloc,
        _ => return None,
    })
}

/// Strips pointer casts, instruction and constant alike, to find the value
/// a call actually targets.
fn strip_pointer_casts(module: &Module, mut op: Operand) -> Operand {
    loop {
        match op {
            Operand::Inst(inst_id) => match module.insts[inst_id].kind {
                InstKind::Cast(CastOp::BitCast, inner) => op = inner,
                _ => return op,
            },

            Operand::Const(value) => {
                return Operand::Const(strip_const_pointer_casts(module, value));
            }

            Operand::Param(_) => return op,
        }
    }
}

/// Strips casts *and* GEP offsets; used to find the allocation behind a
/// `va_list`.
fn strip_offsets(module: &Module, mut op: Operand) -> Operand {
    loop {
        match op {
            Operand::Inst(inst_id) => match module.insts[inst_id].kind {
                InstKind::Cast(CastOp::BitCast, inner) => op = inner,
                InstKind::Gep { base, .. } => op = base,
                _ => return op,
            },

            Operand::Const(Const::Expr(expr_id)) => match module.const_exprs[expr_id].kind {
                ConstExprKind::BitCast(inner) => op = Operand::Const(inner),
                ConstExprKind::Gep { base, .. } => op = Operand::Const(base),
                _ => return op,
            },

            _ => return op,
        }
    }
}

// an allocation size that cannot be represented is just unknown
fn known_size(value: u64) -> u64 {
    if value == u64::MAX {
        0
    } else {
        value
    }
}

impl<L: DataLayout + ?Sized> Builder<'_, L> {
    /// Whether the call contributes anything to the graph: it allocates,
    /// takes or returns a pointer, is a tracked intrinsic, or targets a
    /// defined function that may do pointer work inside.
    pub(super) fn is_relevant_call(&self, inst_id: InstId) -> bool {
        let module = self.module;
        let inst = &module.insts[inst_id];

        let InstKind::Call { callee, .. } = inst.kind else {
            return false;
        };

        let Operand::Const(Const::Function(func_id)) = strip_pointer_casts(module, callee)
        else {
            // function pointer calls always matter
            return true;
        };

        let func = &module.funcs[func_id];

        // debug-info intrinsics are noise
        if func.intrinsic == Some(Intrinsic::Dbg) {
            return false;
        }

        if func.is_defined() {
            return true;
        }

        if alloc_func(&func.name).is_some() {
            return true;
        }

        if let Some(intrinsic) = func.intrinsic {
            return matches!(
                intrinsic,
                Intrinsic::MemCpy
                    | Intrinsic::MemMove
                    | Intrinsic::MemSet
                    | Intrinsic::VaStart
                    | Intrinsic::StackSave
                    | Intrinsic::StackRestore
            );
        }

        // an undefined function returning a pointer is an unknown pointer;
        // anything else undefined can be dropped on the floor
        module.types.is_pointer(inst.ty)
    }

    /// Lowers a relevant call; returns the entry and exit nodes of the span
    /// so the block chain can thread through it.
    pub(super) fn create_call(
        &mut self,
        func_id: FuncId,
        inst_id: InstId,
    ) -> Result<(NodeId, NodeId), BuildError> {
        let module = self.module;

        let InstKind::Call { callee, .. } = module.insts[inst_id].kind else {
            unreachable!()
        };

        match strip_pointer_casts(module, callee) {
            Operand::Const(Const::Function(callee_id)) => {
                let callee = &module.funcs[callee_id];

                // must come before the defined check: malloc and friends
                // are undefined too
                if let Some(kind) = alloc_func(&callee.name) {
                    return self.create_dyn_alloc(inst_id, kind);
                }

                if let Some(intrinsic) = callee.intrinsic {
                    return self.create_intrinsic(func_id, inst_id, intrinsic);
                }

                if !callee.is_defined() {
                    return self.create_unknown_call(inst_id);
                }

                self.create_call_to_func(inst_id, callee_id)
            }

            callee => {
                // indirect call: no callee edge yet; the solver patches the
                // successors in once the target set is known
                let op = self.get_operand(callee)?;

                let call = self.graph.add(NodeKind::CallFuncptr);
                self.graph[call].operands.push(op);

                let ret = self.graph.add(NodeKind::Return);
                self.graph[call].paired = Some(ret);
                self.graph[ret].paired = Some(call);
                self.graph.add_successor(call, ret);
                self.inst_nodes.insert(inst_id, call);

                Ok((call, ret))
            }
        }
    }

    fn create_call_to_func(
        &mut self,
        inst_id: InstId,
        callee_id: FuncId,
    ) -> Result<(NodeId, NodeId), BuildError> {
        let module = self.module;

        let InstKind::Call { ref args, .. } = module.insts[inst_id].kind else {
            unreachable!()
        };

        let call = self.graph.add(NodeKind::Call);
        let ret = self.graph.add(NodeKind::CallReturn);
        self.graph[call].paired = Some(ret);
        self.graph[ret].paired = Some(call);
        self.inst_nodes.insert(inst_id, call);

        // reuse the callee's subgraph when there is one; for a recursive
        // callee this finds the half-built record registered up front
        let subg = match self.graph.subgraphs.get(callee_id) {
            Some(&subg) => subg,
            None => {
                self.build_func(callee_id)?;
                self.graph.subgraphs[callee_id]
            }
        };

        // the call dominates the callee; its unified sink returns here
        self.graph.add_successor(call, subg.root);
        self.graph.add_successor(subg.ret, ret);

        // hand the call-site operands to the parameter PHI chain, walking
        // parameters and PHIs in lock-step
        let callee = &module.funcs[callee_id];
        let mut arg = subg.args.map(|(first, _)| first);

        for (idx, &param_id) in callee.params.iter().enumerate() {
            if module.types.is_pointer(module.params[param_id].ty) {
                let phi = arg.expect("pointer parameter without a PHI");
                let op = self.get_operand(args[idx])?;
                self.graph.add_operand(phi, op);

                if let Some(next) = self.graph[phi].single_successor() {
                    arg = Some(next);
                }
            }
        }

        // pointers handed through `...` all merge into the final PHI
        if callee.variadic {
            let va_phi = subg
                .args
                .map(|(_, last)| last)
                .expect("variadic function without an argument PHI");

            for &op in args.iter().skip(callee.params.len()) {
                if module.operand_is_pointer(op) {
                    let node = self.get_operand(op)?;
                    self.graph.add_operand(va_phi, node);
                }
            }
        }

        // a pointer-valued result behaves as a PHI over the callee's
        // returns; collected after the build so recursive callees are
        // complete by then
        if module.types.is_pointer(module.insts[inst_id].ty) {
            self.pending_rets.push((ret, callee_id));
        }

        Ok((call, ret))
    }

    fn create_dyn_alloc(
        &mut self,
        inst_id: InstId,
        kind: AllocFunc,
    ) -> Result<(NodeId, NodeId), BuildError> {
        let module = self.module;

        let InstKind::Call { ref args, .. } = module.insts[inst_id].kind else {
            unreachable!()
        };

        let node = self.graph.add(NodeKind::DynAlloc);

        let size_arg = match kind {
            AllocFunc::Malloc => {
                self.graph[node].is_heap = true;
                args.first()
            }

            AllocFunc::Alloca => args.first(),

            AllocFunc::Calloc => {
                self.graph[node].is_heap = true;
                self.graph[node].zero_initialized = true;
                args.get(1)
            }

            AllocFunc::Realloc => return Err(BuildError::Realloc),
        };

        let mut size = 0;
        if let Some(&Operand::Const(Const::Int(value, _))) = size_arg {
            size = known_size(value);

            // calloc's first argument is the element count
            if kind == AllocFunc::Calloc {
                if let Some(&Operand::Const(Const::Int(count, _))) = args.first() {
                    if count != u64::MAX {
                        size *= count;
                    }
                }
            }
        }

        self.graph[node].size = size;
        self.inst_nodes.insert(inst_id, node);

        Ok((node, node))
    }

    /// A call into a function the module knows nothing about: a single node
    /// paired with itself that points anywhere.
    fn create_unknown_call(&mut self, inst_id: InstId) -> Result<(NodeId, NodeId), BuildError> {
        let call = self.graph.add(NodeKind::Call);
        self.graph[call].paired = Some(call);

        let unknown = self.graph.pointer_unknown();
        self.graph.add_points_to(call, unknown);
        self.inst_nodes.insert(inst_id, call);

        Ok((call, call))
    }

    fn create_intrinsic(
        &mut self,
        func_id: FuncId,
        inst_id: InstId,
        intrinsic: Intrinsic,
    ) -> Result<(NodeId, NodeId), BuildError> {
        match intrinsic {
            Intrinsic::MemCpy | Intrinsic::MemMove => self.create_mem_transfer(inst_id),

            Intrinsic::VaStart => self.create_va_start(func_id, inst_id),

            Intrinsic::StackSave => {
                warn!("`stacksave` is approximated by an allocation; results may be unsound");
                let node = self.create_alloc(inst_id, None);

                Ok((node, node))
            }

            Intrinsic::StackRestore => {
                warn!("`stackrestore` is approximated by a load; results may be unsound");

                let InstKind::Call { ref args, .. } = self.module.insts[inst_id].kind else {
                    unreachable!()
                };
                let node = self.create_load(inst_id, args[0])?;

                Ok((node, node))
            }

            intrinsic => Err(BuildError::UnhandledIntrinsic(intrinsic)),
        }
    }

    fn create_mem_transfer(&mut self, inst_id: InstId) -> Result<(NodeId, NodeId), BuildError> {
        let InstKind::Call { ref args, .. } = self.module.insts[inst_id].kind else {
            unreachable!()
        };

        let dest = self.get_operand(args[0])?;
        let src = self.get_operand(args[1])?;

        // TODO: take the length from args[2] when it is a constant int
        let node = self.graph.add(NodeKind::Memcpy);
        self.graph[node].operands.extend([src, dest]);
        self.graph[node].offset = Offset::UNKNOWN;
        self.graph[node].len = Offset::UNKNOWN;
        self.inst_nodes.insert(inst_id, node);

        Ok((node, node))
    }

    /// `va_start` parks every pointer passed through `...` in a fresh
    /// buffer the `va_list` points at, all at unknown offsets. No per-slot
    /// tracking is attempted.
    fn create_va_start(
        &mut self,
        func_id: FuncId,
        inst_id: InstId,
    ) -> Result<(NodeId, NodeId), BuildError> {
        let module = self.module;

        let InstKind::Call { ref args, .. } = module.insts[inst_id].kind else {
            unreachable!()
        };

        if !module.funcs[func_id].variadic {
            return Err(BuildError::VaStartNotVariadic);
        }

        // the enclosing function is registered by now, and a variadic one
        // always carries an argument pair
        let (_, va_args) = self.graph.subgraphs[func_id]
            .args
            .expect("variadic function without an argument PHI");

        let buffer = self.create_alloc(inst_id, None);

        let va_list = self.get_operand(strip_offsets(module, args[0]))?;
        if self.graph[va_list].kind != NodeKind::Alloc {
            return Err(BuildError::VaStartTarget);
        }

        // the va_list slot points at the buffer, the buffer holds the
        // variadic pointers
        let target = self.graph.add_constant(va_list, Offset::UNKNOWN);

        let store_list = self.graph.add(NodeKind::Store);
        self.graph[store_list].operands.extend([buffer, target]);

        let store_args = self.graph.add(NodeKind::Store);
        self.graph[store_args].operands.extend([va_args, buffer]);

        self.graph.add_successor(buffer, store_list);
        self.graph.add_successor(store_list, store_args);

        Ok((buffer, store_args))
    }
}
