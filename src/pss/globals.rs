use log::warn;

use crate::ir::{Const, Init, Operand};
use crate::layout::DataLayout;

use super::build::Builder;
use super::{BuildError, NodeId, NodeKind, Offset};

impl<L: DataLayout + ?Sized> Builder<'_, L> {
    /// Two passes over the module globals: allocate a node per global and
    /// chain them, then thread the initializer stores in. Returns the first
    /// node of the chain and its true tail; this prefix runs before `main`.
    pub(super) fn build_globals(&mut self) -> Result<Option<(NodeId, NodeId)>, BuildError> {
        let module = self.module;

        let mut first = None;
        let mut prev: Option<NodeId> = None;

        // every global is a static allocation
        for (global_id, _) in &module.globals {
            let node = self.graph.add(NodeKind::Alloc);
            self.global_nodes.insert(global_id, node);

            match prev {
                Some(prev) => self.graph.add_successor(prev, node),
                None => first = Some(node),
            }

            prev = Some(node);
        }

        // initializers only once every global has its node: they are free
        // to point at each other
        for (global_id, global) in &module.globals {
            if let Some(init) = &global.init {
                let node = self.global_nodes[global_id];
                self.build_global_init(&global.name, node, init)?;
            }
        }

        Ok(first.map(|first| (first, self.chain_tail(first))))
    }

    fn build_global_init(
        &mut self,
        name: &str,
        node: NodeId,
        init: &Init,
    ) -> Result<(), BuildError> {
        let module = self.module;
        let mut last = node;

        match init {
            Init::Zero | Init::Scalar(Const::Null(_)) => {
                self.graph[node].zero_initialized = true;
            }

            Init::Aggregate(elems) => {
                let mut offset = 0;

                for &(ty, ref elem) in elems {
                    if module.types.is_pointer(ty) {
                        if let Init::Scalar(value) = *elem {
                            let value = self.get_operand(Operand::Const(value))?;
                            let target = self.graph.add_constant(node, Offset(offset));

                            let store = self.graph.add(NodeKind::Store);
                            self.graph[store].operands.extend([value, target]);
                            self.graph.insert_after(store, last);
                            last = store;
                        }
                    }

                    // the cursor advances by the element's own alloc size;
                    // nested aggregates are stepped over whole
                    offset += self.layout.alloc_size(&module.types, ty);
                }
            }

            &Init::Scalar(value) if module.const_is_pointer(value) => {
                let value = self.get_operand(Operand::Const(value))?;

                let store = self.graph.add(NodeKind::Store);
                self.graph[store].operands.extend([value, node]);
                self.graph.insert_after(store, last);
            }

            Init::Scalar(Const::Int(..)) => {}

            Init::Scalar(_) => warn!("global variable initializer not handled: @{name}"),
        }

        Ok(())
    }

    /// Initializer stores are spliced into the chain, so the tail is
    /// wherever the successor links stop.
    fn chain_tail(&self, first: NodeId) -> NodeId {
        let mut node = first;

        while let Some(&next) = self.graph[node].successors.first() {
            node = next;
        }

        node
    }
}
