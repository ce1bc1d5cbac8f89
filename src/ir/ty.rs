use std::collections::HashMap;
use std::fmt::{self, Display};
use std::ops::Index;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    pub struct TypeId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    Float,
    Double,
    /// An opaque pointer in the given address space.
    Ptr(u32),
    Array { elem: TypeId, len: u64 },
    Struct { fields: Vec<TypeId> },
    Func { params: Vec<TypeId>, ret: TypeId, variadic: bool },
}

impl Type {
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Ptr(_))
    }
}

/// Interning table for types. Structurally equal types share a [`TypeId`],
/// so identity comparison is enough everywhere else.
#[derive(Debug, Default, Clone)]
pub struct Types {
    map: SlotMap<TypeId, Type>,
    interned: HashMap<Type, TypeId>,
}

impl Types {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }

        let id = self.map.insert(ty.clone());
        self.interned.insert(ty, id);

        id
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(Type::Int(bits))
    }

    pub fn ptr(&mut self) -> TypeId {
        self.intern(Type::Ptr(0))
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        self.map[id].is_pointer()
    }

    pub fn addr_space(&self, id: TypeId) -> u32 {
        match self.map[id] {
            Type::Ptr(addr_space) => addr_space,
            _ => 0,
        }
    }
}

impl Index<TypeId> for Types {
    type Output = Type;

    fn index(&self, id: TypeId) -> &Self::Output {
        &self.map[id]
    }
}

impl Display for TypesPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.types[self.id] {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr(0) => write!(f, "ptr"),
            Type::Ptr(addr_space) => write!(f, "ptr addrspace({addr_space})"),
            Type::Array { elem, len } => write!(f, "[{len} x {}]", self.types.display(*elem)),

            Type::Struct { fields } => {
                write!(f, "{{")?;

                for (idx, &field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{}", self.types.display(field))?;
                }

                write!(f, "}}")
            }

            Type::Func { params, ret, variadic } => {
                write!(f, "{} (", self.types.display(*ret))?;

                for (idx, &param) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{}", self.types.display(param))?;
                }

                if *variadic {
                    if params.is_empty() {
                        write!(f, "...")?;
                    } else {
                        write!(f, ", ...")?;
                    }
                }

                write!(f, ")")
            }
        }
    }
}

pub struct TypesPrinter<'a> {
    types: &'a Types,
    id: TypeId,
}

impl Types {
    pub fn display(&self, id: TypeId) -> TypesPrinter<'_> {
        TypesPrinter { types: self, id }
    }
}
