//! The data-layout oracle. The builder never computes sizes or field
//! offsets itself; it asks an implementation of [`DataLayout`].

use crate::ir::ty::{Type, TypeId, Types};

pub trait DataLayout {
    /// Width of a pointer in the given address space, in bits.
    fn pointer_bits(&self, addr_space: u32) -> u32;

    /// Bytes occupied by a value of the type, including trailing padding.
    /// Unsized types report 0.
    fn alloc_size(&self, types: &Types, ty: TypeId) -> u64;

    /// Byte offset of a constant-index GEP relative to its base pointer, or
    /// `None` when it cannot be computed (unexpected index shape, overflow).
    /// The first index scales the pointee as a whole; the rest step into
    /// aggregates.
    fn const_offset(&self, types: &Types, pointee: TypeId, indices: &[i64]) -> Option<i64>;
}

/// A packed layout: natural sizes, no padding, configurable pointer width.
/// Good enough for tests and for targets that do not care about alignment.
#[derive(Debug, Clone, Copy)]
pub struct FlatLayout {
    pub ptr_bits: u32,
}

impl Default for FlatLayout {
    fn default() -> Self {
        Self { ptr_bits: 64 }
    }
}

impl DataLayout for FlatLayout {
    fn pointer_bits(&self, _addr_space: u32) -> u32 {
        self.ptr_bits
    }

    fn alloc_size(&self, types: &Types, ty: TypeId) -> u64 {
        match &types[ty] {
            Type::Void | Type::Func { .. } => 0,
            Type::Int(bits) => u64::from((bits + 7) / 8),
            Type::Float => 4,
            Type::Double => 8,
            Type::Ptr(_) => u64::from(self.ptr_bits / 8),
            Type::Array { elem, len } => self.alloc_size(types, *elem) * len,

            Type::Struct { fields } => fields
                .iter()
                .map(|&field| self.alloc_size(types, field))
                .sum(),
        }
    }

    fn const_offset(&self, types: &Types, pointee: TypeId, indices: &[i64]) -> Option<i64> {
        let (&first, rest) = indices.split_first()?;
        let mut offset = first.checked_mul(self.alloc_size(types, pointee) as i64)?;
        let mut cur = pointee;

        for &idx in rest {
            match &types[cur] {
                Type::Array { elem, .. } => {
                    offset =
                        offset.checked_add(idx.checked_mul(self.alloc_size(types, *elem) as i64)?)?;
                    cur = *elem;
                }

                Type::Struct { fields } => {
                    let field = *fields.get(usize::try_from(idx).ok()?)?;
                    let skipped: u64 = fields[..idx as usize]
                        .iter()
                        .map(|&f| self.alloc_size(types, f))
                        .sum();
                    offset = offset.checked_add(i64::try_from(skipped).ok()?)?;
                    cur = field;
                }

                _ => return None,
            }
        }

        Some(offset)
    }
}
