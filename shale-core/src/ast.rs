//! The executable program representation.
//!
//! This is the resolved form the interpreter consumes: arena-allocated
//! expression and statement nodes with types, evaluation stages, and folded
//! constants already attached. A [`crate::builder::ProgramBuilder`] stands in
//! for the front end that would normally produce it.

use crate::arena::{Arena, Handle};
use crate::constant::ConstValue;
use crate::source::Source;
use crate::types::{AddressSpace, TypeArena, TypeHandle};
use std::collections::HashSet;

pub type ExprId = Handle<Expression>;
pub type StmtId = Handle<Statement>;
pub type BlockId = Handle<Block>;
pub type FuncId = Handle<Function>;
pub type LocalId = Handle<LocalVar>;
pub type GlobalId = Handle<GlobalVar>;

/// When an expression's value is knowable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Constant,
    Override,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub ty: TypeHandle,
    pub stage: Stage,
    /// Pre-folded value for constant-stage expressions. The stepping
    /// machine short-cuts these straight into the result cache.
    pub constant: Option<ConstValue>,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A literal; its value lives in `Expression::constant`.
    Literal,
    LocalRef(LocalId),
    GlobalRef(GlobalId),
    Unary { op: UnaryOp, expr: ExprId },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Index { object: ExprId, index: ExprId },
    Member { object: ExprId, member: u32 },
    Swizzle { object: ExprId, lanes: Vec<u32> },
    Call { target: CallTarget, args: Vec<ExprId> },
    /// Bit reinterpretation to `Expression::ty`.
    Bitcast { expr: ExprId },
    AddressOf { expr: ExprId },
    Deref { expr: ExprId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Function(FuncId),
    Builtin(BuiltinFn),
    /// Value construction of `Expression::ty` (zero value, splat, or
    /// elementwise).
    Construct,
    /// Value conversion to `Expression::ty`.
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    WorkgroupBarrier,
    StorageBarrier,
    WorkgroupUniformLoad,
    ArrayLength,
    AtomicLoad,
    AtomicStore,
    AtomicAdd,
    AtomicSub,
    AtomicMax,
    AtomicMin,
    AtomicAnd,
    AtomicOr,
    AtomicXor,
    AtomicExchange,
    AtomicCompareExchangeWeak,
    Abs,
    Min,
    Max,
    Clamp,
    Select,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Sin,
    Cos,
    Dot,
}

impl BuiltinFn {
    /// Builtins that suspend the invocation at a synchronization point.
    pub fn is_barrier(self) -> bool {
        matches!(
            self,
            BuiltinFn::WorkgroupBarrier | BuiltinFn::StorageBarrier | BuiltinFn::WorkgroupUniformLoad
        )
    }
}

/// Shader-stage inputs available to entry-point parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinValue {
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    WorkgroupId,
    NumWorkgroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Var,
    Let,
    Param,
}

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: String,
    pub ty: TypeHandle,
    pub kind: LocalKind,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StmtKind,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(BlockId),
    VarDecl { var: LocalId, init: Option<ExprId> },
    LetDecl { var: LocalId, init: ExprId },
    Assign { lhs: ExprId, rhs: ExprId },
    CompoundAssign { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Increment { lhs: ExprId },
    Decrement { lhs: ExprId },
    /// `_ = expr`: evaluated for side effects, result discarded.
    Phony { expr: ExprId },
    /// A call expression in statement position.
    CallStmt { expr: ExprId },
    If { condition: ExprId, then_block: BlockId, else_stmt: Option<StmtId> },
    Switch { condition: ExprId, cases: Vec<SwitchCase> },
    ForLoop {
        initializer: Option<StmtId>,
        condition: Option<ExprId>,
        continuing: Option<StmtId>,
        body: BlockId,
    },
    While { condition: ExprId, body: BlockId },
    Loop { body: BlockId, continuing: Option<BlockId> },
    Break,
    Continue,
    BreakIf { condition: ExprId },
    Return { value: Option<ExprId> },
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub selectors: Vec<CaseSelector>,
    pub body: BlockId,
    pub source: Source,
}

/// Case selectors compare by the selector value's bit pattern widened to
/// i64, so i32 and u32 conditions share one representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSelector {
    Value(i64),
    Default,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<StmtId>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub local: LocalId,
    pub builtin: Option<BuiltinValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionStage {
    None,
    Compute,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Option<TypeHandle>,
    pub body: BlockId,
    pub stage: FunctionStage,
    /// Per-dimension size expression; `None` means 1.
    pub workgroup_size: [Option<ExprId>; 3],
    pub source: Source,
}

#[derive(Debug, Clone)]
pub enum GlobalKind {
    Var { init: Option<ExprId> },
    Override { id: Option<u32>, init: Option<ExprId> },
    Const { value: ConstValue },
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: TypeHandle,
    pub space: AddressSpace,
    pub binding: Option<(u32, u32)>,
    pub kind: GlobalKind,
    pub source: Source,
}

/// A complete, immutable program. Shared read-only between the executor and
/// its invocations while a dispatch runs.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: TypeArena,
    pub exprs: Arena<Expression>,
    pub stmts: Arena<Statement>,
    pub blocks: Arena<Block>,
    pub funcs: Arena<Function>,
    pub locals: Arena<LocalVar>,
    pub globals: Arena<GlobalVar>,
}

impl Module {
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    /// Globals reachable from `entry` through statements, expressions, and
    /// callee bodies.
    pub fn referenced_globals(&self, entry: FuncId) -> HashSet<GlobalId> {
        let mut globals = HashSet::new();
        let mut seen = HashSet::new();
        let mut worklist = vec![entry];
        while let Some(func) = worklist.pop() {
            if !seen.insert(func) {
                continue;
            }
            self.collect_block_refs(self.funcs[func].body, &mut globals, &mut worklist);
        }
        globals
    }

    fn collect_block_refs(
        &self,
        block: BlockId,
        globals: &mut HashSet<GlobalId>,
        funcs: &mut Vec<FuncId>,
    ) {
        for &stmt in &self.blocks[block].stmts {
            self.collect_stmt_refs(stmt, globals, funcs);
        }
    }

    fn collect_stmt_refs(
        &self,
        stmt: StmtId,
        globals: &mut HashSet<GlobalId>,
        funcs: &mut Vec<FuncId>,
    ) {
        match &self.stmts[stmt].kind {
            StmtKind::Block(b) => self.collect_block_refs(*b, globals, funcs),
            StmtKind::VarDecl { init, .. } => {
                if let Some(init) = init {
                    self.collect_expr_refs(*init, globals, funcs);
                }
            }
            StmtKind::LetDecl { init, .. } => self.collect_expr_refs(*init, globals, funcs),
            StmtKind::Assign { lhs, rhs } | StmtKind::CompoundAssign { lhs, rhs, .. } => {
                self.collect_expr_refs(*lhs, globals, funcs);
                self.collect_expr_refs(*rhs, globals, funcs);
            }
            StmtKind::Increment { lhs } | StmtKind::Decrement { lhs } => {
                self.collect_expr_refs(*lhs, globals, funcs);
            }
            StmtKind::Phony { expr } | StmtKind::CallStmt { expr } => {
                self.collect_expr_refs(*expr, globals, funcs);
            }
            StmtKind::If { condition, then_block, else_stmt } => {
                self.collect_expr_refs(*condition, globals, funcs);
                self.collect_block_refs(*then_block, globals, funcs);
                if let Some(else_stmt) = else_stmt {
                    self.collect_stmt_refs(*else_stmt, globals, funcs);
                }
            }
            StmtKind::Switch { condition, cases } => {
                self.collect_expr_refs(*condition, globals, funcs);
                for case in cases {
                    self.collect_block_refs(case.body, globals, funcs);
                }
            }
            StmtKind::ForLoop { initializer, condition, continuing, body } => {
                if let Some(init) = initializer {
                    self.collect_stmt_refs(*init, globals, funcs);
                }
                if let Some(cond) = condition {
                    self.collect_expr_refs(*cond, globals, funcs);
                }
                if let Some(cont) = continuing {
                    self.collect_stmt_refs(*cont, globals, funcs);
                }
                self.collect_block_refs(*body, globals, funcs);
            }
            StmtKind::While { condition, body } => {
                self.collect_expr_refs(*condition, globals, funcs);
                self.collect_block_refs(*body, globals, funcs);
            }
            StmtKind::Loop { body, continuing } => {
                self.collect_block_refs(*body, globals, funcs);
                if let Some(cont) = continuing {
                    self.collect_block_refs(*cont, globals, funcs);
                }
            }
            StmtKind::BreakIf { condition } => self.collect_expr_refs(*condition, globals, funcs),
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    self.collect_expr_refs(*value, globals, funcs);
                }
            }
            StmtKind::Break | StmtKind::Continue => {}
        }
    }

    pub fn collect_expr_refs(
        &self,
        expr: ExprId,
        globals: &mut HashSet<GlobalId>,
        funcs: &mut Vec<FuncId>,
    ) {
        match &self.exprs[expr].kind {
            ExprKind::Literal | ExprKind::LocalRef(_) => {}
            ExprKind::GlobalRef(g) => {
                globals.insert(*g);
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::Bitcast { expr }
            | ExprKind::AddressOf { expr }
            | ExprKind::Deref { expr } => self.collect_expr_refs(*expr, globals, funcs),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.collect_expr_refs(*lhs, globals, funcs);
                self.collect_expr_refs(*rhs, globals, funcs);
            }
            ExprKind::Index { object, index } => {
                self.collect_expr_refs(*object, globals, funcs);
                self.collect_expr_refs(*index, globals, funcs);
            }
            ExprKind::Member { object, .. } | ExprKind::Swizzle { object, .. } => {
                self.collect_expr_refs(*object, globals, funcs);
            }
            ExprKind::Call { target, args } => {
                if let CallTarget::Function(f) = target {
                    funcs.push(*f);
                }
                for &arg in args {
                    self.collect_expr_refs(arg, globals, funcs);
                }
            }
        }
    }
}
