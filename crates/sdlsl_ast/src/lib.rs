//! AST node definitions.
//!
//! The source this is distilled from uses a tagged union with one giant
//! struct per node kind. Here each category (expression, statement,
//! declaration) is an algebraic sum type behind a small shared header
//! (`loc`, `datatype`), dispatched on `kind` — the idiomatic Rust shape for
//! "sum-typed node with per-node source location and datatype pointer."
//!
//! Every weak back-reference (break to loop, call to resolved function,
//! struct-deref to member) is realized as a `Copy` index newtype into an
//! owning `Vec`, never a raw pointer or `Rc`: the owning `Vec` cannot be
//! outlived by the index, so there is nothing to dangle.

use sdlsl_span::{SourceLoc, Symbol};

/// Index into a per-compilation `DataTypeTable` (owned by `sdlsl_sema`).
/// Two nodes share a datatype iff their `DataTypeId`s compare equal — index
/// equality standing in for pointer equality without raw pointers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DataTypeId(pub u32);

/// Index of a function within `Shader::units` (only valid where that unit
/// is `TranslationUnit::Function`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FunctionId(pub u32);

/// Index of a struct within `Shader::units`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StructId(pub u32);

/// Identifies one loop (`while`/`do-while`/`for`) reachable from a
/// `break`/`continue` back-pointer. Assigned by the semantic analyzer's
/// scope walk, not by the parser.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LoopId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Plus,
    Neg,
    BitNot,
    Not,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompoundAssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IncDecOp {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// What a `.field` access on a vector resolves to: a swizzle selecting
/// 1-4 components, each an index 0..=3 into the source vector.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SwizzleSpec {
    pub components: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FieldResolution {
    Member { struct_id: StructId, index: u32 },
    Swizzle(SwizzleSpec),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CalleeResolution {
    Function(FunctionId),
    Constructor(DataTypeId),
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLoc,
    pub datatype: Option<DataTypeId>,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: SourceLoc) -> Self {
        Expr { kind, loc, datatype: None }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Ident(Symbol),
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// A parenthesized sub-expression, kept as its own node so
    /// pretty-printing can round-trip explicit grouping.
    Paren(Box<Expr>),
    Index { base: Box<Expr>, index: Box<Expr> },
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Call { callee: Symbol, args: Vec<Expr>, resolved: Option<CalleeResolution> },
    Field { base: Box<Expr>, field: Symbol, resolved: Option<FieldResolution> },
}

impl ExprKind {
    pub fn is_lvalue_shape(&self) -> bool {
        matches!(self, ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Field { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: SourceLoc,
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: SourceLoc) -> Self {
        Stmt { kind, loc }
    }
}

#[derive(Clone, Debug)]
pub struct ForDetails {
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub step: Option<Box<Stmt>>,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Empty,
    Break { target: Option<LoopId> },
    Continue { target: Option<LoopId> },
    Discard,
    VarDecl(VarDecl),
    DoWhile { body: Box<Stmt>, cond: Expr, loop_id: Option<LoopId> },
    While { cond: Expr, body: Box<Stmt>, loop_id: Option<LoopId> },
    For { details: ForDetails, body: Box<Stmt>, loop_id: Option<LoopId> },
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    Return { value: Option<Expr> },
    Block(Vec<Stmt>),
    Call(Expr),
    Assign { targets: Vec<Expr>, value: Expr },
    CompoundAssign { op: CompoundAssignOp, target: Expr, value: Expr },
    IncDec { op: IncDecOp, target: Expr },
}

/// A single attribute, e.g. `@vertex` or `@location(0)`.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: Symbol,
    pub arg: Option<i64>,
    pub loc: SourceLoc,
}

/// `{c_style flag, datatype name, name, array-bounds list, @-attribute}`.
/// Reused for local variable declarations, function parameters, and a
/// function's return-type declaration.
#[derive(Clone, Debug)]
pub struct VarDecl {
    pub c_style: bool,
    pub type_name: Symbol,
    pub name: Symbol,
    pub array_bounds: Vec<Expr>,
    pub attribute: Option<Attribute>,
    pub init: Option<Expr>,
    pub datatype: Option<DataTypeId>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct StructMember {
    pub type_name: Symbol,
    pub name: Symbol,
    pub array_bounds: Vec<Expr>,
    pub attribute: Option<Attribute>,
    pub datatype: Option<DataTypeId>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: Symbol,
    pub members: Vec<StructMember>,
    pub datatype: Option<DataTypeId>,
    pub loc: SourceLoc,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FnType {
    Unknown,
    Normal,
    Vertex,
    Fragment,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub return_type: VarDecl,
    pub name: Symbol,
    pub params: Vec<VarDecl>,
    pub body: Vec<Stmt>,
    pub fntype: FnType,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub enum TranslationUnit {
    Function(FunctionDecl),
    Struct(StructDecl),
}

/// The top-level node. `function_ids`/`struct_ids` are traversal shortcuts
/// built during semantic analysis; they borrow nothing and own nothing —
/// deleting through them is a type error because `FunctionId`/`StructId`
/// are `Copy` indices, not owning handles.
#[derive(Clone, Debug, Default)]
pub struct Shader {
    pub units: Vec<TranslationUnit>,
    pub function_ids: Vec<FunctionId>,
    pub struct_ids: Vec<StructId>,
}

impl Shader {
    pub fn new() -> Self {
        Shader::default()
    }

    pub fn function(&self, id: FunctionId) -> &FunctionDecl {
        match &self.units[id.0 as usize] {
            TranslationUnit::Function(f) => f,
            TranslationUnit::Struct(_) => panic!("FunctionId did not name a function unit"),
        }
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionDecl {
        match &mut self.units[id.0 as usize] {
            TranslationUnit::Function(f) => f,
            TranslationUnit::Struct(_) => panic!("FunctionId did not name a function unit"),
        }
    }

    pub fn struct_decl(&self, id: StructId) -> &StructDecl {
        match &self.units[id.0 as usize] {
            TranslationUnit::Struct(s) => s,
            TranslationUnit::Function(_) => panic!("StructId did not name a struct unit"),
        }
    }

    pub fn struct_decl_mut(&mut self, id: StructId) -> &mut StructDecl {
        match &mut self.units[id.0 as usize] {
            TranslationUnit::Struct(s) => s,
            TranslationUnit::Function(_) => panic!("StructId did not name a struct unit"),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.function_ids.iter().map(move |&id| self.function(id))
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDecl> {
        self.struct_ids.iter().map(move |&id| self.struct_decl(id))
    }
}
