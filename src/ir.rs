//! An arena-based model of a compiled SSA module: functions made of basic
//! blocks, typed instructions, constants, and globals. Parsing is someone
//! else's job; this is the shape the graph builder consumes.

pub mod ty;

use std::fmt::{self, Display};
use std::slice;

use slotmap::{new_key_type, SlotMap};

use self::ty::{TypeId, Types};

new_key_type! {
    pub struct FuncId;
    pub struct GlobalId;
    pub struct BlockId;
    pub struct InstId;
    pub struct ParamId;
    pub struct ConstExprId;
}

/// All arenas live on the module so that every value has a module-wide
/// identity. The builder keys its symbol table by these ids.
#[derive(Debug, Default, Clone)]
pub struct Module {
    pub types: Types,
    pub funcs: SlotMap<FuncId, Func>,
    pub globals: SlotMap<GlobalId, Global>,
    pub blocks: SlotMap<BlockId, Block>,
    pub insts: SlotMap<InstId, Inst>,
    pub params: SlotMap<ParamId, Param>,
    pub const_exprs: SlotMap<ConstExprId, ConstExpr>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .find(|(_, func)| func.name == name)
            .map(|(func_id, _)| func_id)
    }

    pub fn operand_is_pointer(&self, op: Operand) -> bool {
        match op {
            Operand::Inst(inst_id) => self.types.is_pointer(self.insts[inst_id].ty),
            Operand::Param(param_id) => self.types.is_pointer(self.params[param_id].ty),
            Operand::Const(c) => self.const_is_pointer(c),
        }
    }

    pub fn const_is_pointer(&self, c: Const) -> bool {
        match c {
            Const::Null(ty) => self.types.is_pointer(ty),
            Const::Int(..) => false,
            // function and global constants are addresses
            Const::Function(_) | Const::Global(_) => true,
            Const::Expr(expr_id) => self.types.is_pointer(self.const_exprs[expr_id].ty),
        }
    }

    /// Address space of a pointer-typed operand; 0 for anything else.
    pub fn operand_addr_space(&self, op: Operand) -> u32 {
        match op {
            Operand::Inst(inst_id) => self.types.addr_space(self.insts[inst_id].ty),
            Operand::Param(param_id) => self.types.addr_space(self.params[param_id].ty),
            Operand::Const(Const::Null(ty)) => self.types.addr_space(ty),
            Operand::Const(Const::Expr(expr_id)) => {
                self.types.addr_space(self.const_exprs[expr_id].ty)
            }
            Operand::Const(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub params: Vec<ParamId>,
    pub ret: TypeId,
    pub variadic: bool,
    /// Basic blocks in layout order; the first one is the entry. An empty
    /// list means the function is only declared.
    pub blocks: Vec<BlockId>,
    pub intrinsic: Option<Intrinsic>,
}

impl Func {
    pub fn is_defined(&self) -> bool {
        !self.blocks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    MemCpy,
    MemMove,
    MemSet,
    VaStart,
    StackSave,
    StackRestore,
    /// Debug-info intrinsics; never lowered.
    Dbg,
}

impl Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::MemCpy => "memcpy",
                Self::MemMove => "memmove",
                Self::MemSet => "memset",
                Self::VaStart => "va_start",
                Self::StackSave => "stacksave",
                Self::StackRestore => "stackrestore",
                Self::Dbg => "dbg",
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    /// Type of the value the global holds (not the address).
    pub ty: TypeId,
    pub init: Option<Init>,
}

/// The shapes of global initializers the builder distinguishes.
#[derive(Debug, Clone)]
pub enum Init {
    /// `zeroinitializer` and friends.
    Zero,
    Scalar(Const),
    /// Elements in layout order, each with its own type. Only top-level
    /// pointer elements matter to the builder.
    Aggregate(Vec<(TypeId, Init)>),
}

#[derive(Debug, Clone)]
pub struct Block {
    pub insts: Vec<InstId>,
    pub term: Term,
}

#[derive(Debug, Clone)]
pub enum Term {
    Br(BlockId),
    If(Operand, [BlockId; 2]),
    /// Case targets followed by the default target.
    Switch(Operand, Vec<BlockId>),
    Ret(Option<Operand>),
    Trap,
}

impl Term {
    pub fn successors(&self) -> &[BlockId] {
        match self {
            Self::Br(block_id) => slice::from_ref(block_id),
            Self::If(_, successors) => successors,
            Self::Switch(_, successors) => successors,
            Self::Ret(_) | Self::Trap => &[],
        }
    }
}

impl Block {
    pub fn successors(&self) -> &[BlockId] {
        self.term.successors()
    }
}

#[derive(Debug, Clone)]
pub struct Inst {
    /// Result type; `Void` when the instruction produces no value.
    pub ty: TypeId,
    pub kind: InstKind,
}

#[derive(Debug, Clone)]
pub enum InstKind {
    Alloca { allocated: TypeId },
    Store { value: Operand, ptr: Operand },
    Load { ptr: Operand },
    Gep { base: Operand, pointee: TypeId, indices: Vec<Operand> },
    Select { cond: Operand, if_true: Operand, if_false: Operand },
    Phi { incoming: Vec<(Operand, BlockId)> },
    Cast(CastOp, Operand),
    /// Non-pointer arithmetic; present in real modules, ignored by the
    /// builder.
    Binary(BinOp, Operand, Operand),
    Call { callee: Operand, args: Vec<Operand> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    BitCast,
    PtrToInt,
    IntToPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Inst(InstId),
    Param(ParamId),
    Const(Const),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Const {
    Null(TypeId),
    Int(u64, TypeId),
    Function(FuncId),
    Global(GlobalId),
    Expr(ConstExprId),
}

/// Constant pointer expressions are interned on the module so the builder
/// can memoize their nodes by identity.
#[derive(Debug, Clone)]
pub struct ConstExpr {
    pub ty: TypeId,
    pub kind: ConstExprKind,
}

#[derive(Debug, Clone)]
pub enum ConstExprKind {
    BitCast(Const),
    Gep { base: Const, pointee: TypeId, indices: Vec<Const> },
    IntToPtr(Const),
}
