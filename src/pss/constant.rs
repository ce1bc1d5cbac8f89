use log::warn;

use crate::ir::ty::TypeId;
use crate::ir::{Const, ConstExprId, ConstExprKind, Module, Operand};
use crate::layout::DataLayout;

use super::build::Builder;
use super::{BuildError, NodeId, NodeKind, Offset, Pointer};

impl<L: DataLayout + ?Sized> Builder<'_, L> {
    /// Looks up the owning node of a value without creating anything.
    pub(super) fn lookup(&self, op: Operand) -> Option<NodeId> {
        match op {
            Operand::Inst(inst_id) => self.inst_nodes.get(inst_id).copied(),
            Operand::Param(param_id) => self.param_nodes.get(param_id).copied(),
            Operand::Const(Const::Global(global_id)) => {
                self.global_nodes.get(global_id).copied()
            }
            Operand::Const(Const::Function(func_id)) => self.func_nodes.get(func_id).copied(),
            Operand::Const(Const::Expr(expr_id)) => self.expr_nodes.get(expr_id).copied(),
            Operand::Const(_) => None,
        }
    }

    /// The node standing for `op` in operand position. A call resolves to
    /// its paired return node: that is the one carrying the returned
    /// pointers, not the call entry.
    pub(super) fn get_operand(&mut self, op: Operand) -> Result<NodeId, BuildError> {
        let node = match self.lookup(op) {
            Some(node) => node,
            None => self.get_constant(op)?,
        };

        match self.graph[node].kind {
            NodeKind::Call | NodeKind::CallFuncptr => Ok(self.graph[node].paired.unwrap_or(node)),
            _ => Ok(node),
        }
    }

    fn get_constant(&mut self, op: Operand) -> Result<NodeId, BuildError> {
        match op {
            Operand::Const(Const::Null(_)) => Ok(self.graph.nullptr),

            Operand::Const(Const::Function(func_id)) => {
                let node = self.graph.add(NodeKind::Function);
                self.func_nodes.insert(func_id, node);

                Ok(node)
            }

            Operand::Const(Const::Expr(expr_id)) => self.create_const_expr(expr_id),

            // plain ints, and values nothing ever lowered: either way a
            // structural surprise
            _ => Err(BuildError::UnsupportedConstant),
        }
    }

    /// Lowers a constant pointer expression into a `Constant` node. The
    /// node is memoized *before* the recursive evaluation, so a cyclic
    /// constant chain terminates (and surfaces as a cardinality error
    /// rather than a hang).
    fn create_const_expr(&mut self, expr_id: ConstExprId) -> Result<NodeId, BuildError> {
        let node = self.graph.add(NodeKind::Constant);
        self.expr_nodes.insert(expr_id, node);

        let pointer = self.const_expr_pointer(expr_id)?;
        self.graph[node].offset = pointer.offset;
        self.graph.add_points_to(node, pointer);

        Ok(node)
    }

    fn const_expr_pointer(&mut self, expr_id: ConstExprId) -> Result<Pointer, BuildError> {
        let module = self.module;
        let expr = &module.const_exprs[expr_id];

        match expr.kind {
            ConstExprKind::BitCast(value) => self.const_bitcast_pointer(value, expr.ty),

            ConstExprKind::Gep { base, pointee, ref indices } => {
                self.const_gep_pointer(base, pointee, indices)
            }

            // FIXME: a constant integer source could be matched against
            // known object addresses instead of giving up
            ConstExprKind::IntToPtr(_) => Ok(self.graph.pointer_unknown()),
        }
    }

    fn const_bitcast_pointer(
        &mut self,
        value: Const,
        ty: TypeId,
    ) -> Result<Pointer, BuildError> {
        let module = self.module;

        // a cast that changes representation cannot be reasoned about
        if !module.types.is_pointer(ty) || !module.const_is_pointer(value) {
            return Err(BuildError::LossyConstCast);
        }

        let stripped = strip_const_pointer_casts(module, value);
        let node = self.get_operand(Operand::Const(stripped))?;

        self.single_constant_pointer(node)
    }

    fn const_gep_pointer(
        &mut self,
        base: Const,
        pointee: TypeId,
        indices: &[Const],
    ) -> Result<Pointer, BuildError> {
        let module = self.module;

        let node = self.get_operand(Operand::Const(base))?;
        let mut pointer = self.single_constant_pointer(node)?;

        let bits = self
            .layout
            .pointer_bits(module.operand_addr_space(Operand::Const(base)));

        let acc = const_int_indices(indices)
            .and_then(|indices| self.layout.const_offset(&module.types, pointee, &indices));

        // when accumulation fails the base pointer passes through untouched
        if let Some(offset) = acc {
            if super::build::fits_pointer(offset, bits) && !pointer.offset.is_unknown() {
                pointer.offset = Offset(offset as u64);
            } else {
                warn!("constant GEP offset does not fit into {bits} bits");
            }
        }

        Ok(pointer)
    }

    fn single_constant_pointer(&self, node: NodeId) -> Result<Pointer, BuildError> {
        self.graph
            .single_points_to(node)
            .ok_or_else(|| BuildError::AmbiguousConstant(self.graph[node].points_to.len()))
    }
}

pub(super) fn strip_const_pointer_casts(module: &Module, mut value: Const) -> Const {
    while let Const::Expr(expr_id) = value {
        match module.const_exprs[expr_id].kind {
            ConstExprKind::BitCast(inner) => value = inner,
            _ => break,
        }
    }

    value
}

fn const_int_indices(indices: &[Const]) -> Option<Vec<i64>> {
    indices
        .iter()
        .map(|&idx| match idx {
            Const::Int(value, _) => Some(value as i64),
            _ => None,
        })
        .collect()
}
