//! A single compute invocation, executed as an explicit state machine.
//!
//! Each call to [`Invocation::step`] performs one unit of work: it either
//! evaluates one expression from the current statement's evaluation queue,
//! or it executes the statement whose operands are all evaluated. Control
//! flow is a stack of call frames, each holding a stack of block frames, so
//! an invocation can be suspended at any point (most importantly at a
//! barrier) and resumed later without host-side recursion.

use crate::ast::{
    BinaryOp, Block, BlockId, BuiltinFn, BuiltinValue, CallTarget, CaseSelector, ExprId, ExprKind,
    FuncId, GlobalId, GlobalKind, LocalId, Module, StmtId, StmtKind,
};
use crate::constant::ConstValue;
use crate::diag::Diagnostic;
use crate::error::Result;
use crate::eval;
use crate::executor::ExecCtx;
use crate::memory::{AtomicOp, Memory, ViewId};
use crate::scope::ScopeStack;
use crate::source::Source;
use crate::types::{AddressSpace, ArrayCount, ScalarKind, Type, TypeHandle};
use crate::{bail_runtime, bail_runtime_at, bail_setup};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UVec3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl UVec3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        UVec3 { x, y, z }
    }

    pub fn count(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl fmt::Display for UVec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// What evaluating an expression produced.
///
/// References and pointers both name a memory view; a reference loads
/// implicitly when its value is consumed, a pointer only through an
/// explicit dereference.
#[derive(Debug, Clone)]
pub enum ExprResult {
    Value(ConstValue),
    Reference(ViewId),
    Pointer(ViewId),
    /// A call with no return value, or a cleared barrier.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    /// Suspended at a barrier, waiting for the rest of the workgroup.
    Barrier,
    Finished,
}

#[derive(Debug, Clone, Copy)]
enum BlockEnd {
    Regular,
    Break,
    Continue,
}

/// The work to do once the current evaluation queue is drained.
#[derive(Debug, Clone, Copy)]
enum Pending {
    /// Execute this statement with its operands evaluated.
    Exec(StmtId),
    /// Execute the initializer of this for loop, then its condition.
    ForInit(StmtId),
    /// Execute the continuing statement of this for loop, then its
    /// condition.
    ForContinuing(StmtId),
    /// Decide whether to run another loop iteration.
    LoopCondition { condition: Option<ExprId>, body: BlockId },
    EndOfBlock,
}

#[derive(Debug)]
struct BlockFrame {
    block: BlockId,
    stmt_idx: usize,
    /// Set when this frame runs the continuing block of a `loop`.
    continuing: bool,
    /// Expressions of the current statement in evaluation order.
    queue: Vec<ExprId>,
    next: usize,
    results: HashMap<ExprId, ExprResult>,
    /// Maps the queue index where a short-circuit operator's right side
    /// starts to the index of the operator itself.
    short_circuit: HashMap<usize, usize>,
    pending: Option<Pending>,
}

impl BlockFrame {
    fn new(block: BlockId, continuing: bool) -> Self {
        BlockFrame {
            block,
            stmt_idx: 0,
            continuing,
            queue: Vec::new(),
            next: 0,
            results: HashMap::new(),
            short_circuit: HashMap::new(),
            pending: None,
        }
    }

    fn reset_eval(&mut self) {
        self.queue.clear();
        self.next = 0;
        self.results.clear();
        self.short_circuit.clear();
        self.pending = None;
    }
}

#[derive(Debug)]
struct CallFrame {
    blocks: Vec<BlockFrame>,
    /// Results of local declarations: references for `var`, values for
    /// `let` and parameters, pointers for pointer-typed bindings.
    values: HashMap<LocalId, ExprResult>,
    /// Name resolution for the debugging API, tracking shadowing.
    scopes: ScopeStack<LocalId>,
}

enum EvalFlow {
    Done(ExprResult),
    /// A function call pushed a new call frame; the call expression's
    /// result arrives when the callee returns.
    Call,
    /// Suspended at a barrier; the expression is re-dispatched by
    /// `clear_barrier`.
    Suspend,
}

pub struct Invocation {
    pub group_id: UVec3,
    pub local_id: UVec3,
    state: State,
    calls: Vec<CallFrame>,
    /// Views of the private and workgroup variables this invocation sees.
    globals: HashMap<GlobalId, ViewId>,
    /// The barrier call currently suspended on.
    barrier: Option<ExprId>,
    statements_executed: u64,
}

impl Invocation {
    /// Creates an invocation poised at the first statement of `func`,
    /// with builtin parameters bound and private variables allocated.
    pub fn new(
        ctx: &mut ExecCtx,
        func: FuncId,
        group_id: UVec3,
        local_id: UVec3,
        workgroup_size: UVec3,
        num_workgroups: UVec3,
        workgroup_views: &HashMap<GlobalId, ViewId>,
    ) -> Result<Invocation> {
        let module = ctx.module.clone();
        let function = &module.funcs[func];

        let global_id = UVec3::new(
            group_id.x * workgroup_size.x + local_id.x,
            group_id.y * workgroup_size.y + local_id.y,
            group_id.z * workgroup_size.z + local_id.z,
        );
        let local_index = local_id.x
            + local_id.y * workgroup_size.x
            + local_id.z * workgroup_size.x * workgroup_size.y;

        let mut values = HashMap::new();
        let mut scopes = ScopeStack::new();
        for param in &function.params {
            let local = &module.locals[param.local];
            let Some(builtin) = param.builtin else {
                bail_setup!("entry point parameter '{}' is not a builtin value", local.name);
            };
            let value = match builtin {
                BuiltinValue::LocalInvocationId => uvec3_value(&module, local_id)?,
                BuiltinValue::LocalInvocationIndex => ConstValue::U32(local_index),
                BuiltinValue::GlobalInvocationId => uvec3_value(&module, global_id)?,
                BuiltinValue::WorkgroupId => uvec3_value(&module, group_id)?,
                BuiltinValue::NumWorkgroups => uvec3_value(&module, num_workgroups)?,
            };
            values.insert(param.local, ExprResult::Value(value));
            scopes.insert(local.name.clone(), param.local);
        }

        let mut globals = workgroup_views.clone();
        for (id, g) in module.globals.iter() {
            if g.space != AddressSpace::Private || !ctx.referenced.contains(&id) {
                continue;
            }
            let size = module.types.size_of(g.ty) as u64;
            let memory = Memory::new_shared(size);
            let view = ctx.views.create_root(memory, AddressSpace::Private, g.ty, 0, size, g.source);
            if let GlobalKind::Var { init: Some(init) } = &g.kind {
                let value = ctx.eval_const_expr(*init)?;
                ctx.view_store(view, &value, g.source)?;
            }
            globals.insert(id, view);
        }

        let mut invocation = Invocation {
            group_id,
            local_id,
            state: State::Ready,
            calls: vec![CallFrame { blocks: Vec::new(), values, scopes }],
            globals,
            barrier: None,
            statements_executed: 0,
        };
        invocation.push_block(ctx, function.body, false)?;
        Ok(invocation)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The barrier call this invocation is suspended on.
    pub fn barrier(&self) -> Option<ExprId> {
        self.barrier
    }

    pub fn statements_executed(&self) -> u64 {
        self.statements_executed
    }

    /// Source of the statement currently being evaluated or executed.
    pub fn current_statement_source(&self, ctx: &ExecCtx) -> Option<Source> {
        let frame = self.calls.last()?.blocks.last()?;
        let stmt = *ctx.module.blocks[frame.block].stmts.get(frame.stmt_idx)?;
        Some(ctx.module.stmts[stmt].source)
    }

    /// Source of the expression the next step will evaluate, if the
    /// current statement still has operands outstanding.
    pub fn current_expression_source(&self, ctx: &ExecCtx) -> Option<Source> {
        let frame = self.calls.last()?.blocks.last()?;
        let expr = *frame.queue.get(frame.next)?;
        Some(ctx.module.exprs[expr].source)
    }

    /// Performs one unit of work: evaluate one expression or execute one
    /// prepared statement.
    pub fn step(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        if self.state != State::Ready {
            return Ok(());
        }
        let module = ctx.module.clone();
        let (next, queue_len) = {
            let f = self.frame()?;
            (f.next, f.queue.len())
        };
        if next < queue_len {
            if self.try_short_circuit(ctx, &module, next)? {
                return Ok(());
            }
            let expr = self.frame()?.queue[next];
            let flow = self.eval_expression(ctx, &module, expr)?;
            if let EvalFlow::Done(result) = flow {
                let f = self.frame_mut()?;
                f.results.insert(expr, result);
                f.next += 1;
            }
            return Ok(());
        }
        let Some(pending) = self.frame_mut()?.pending.take() else {
            bail_runtime!("invocation has no pending work");
        };
        self.execute_pending(ctx, &module, pending)
    }

    /// Releases a barrier suspension. Plain barriers produce no value;
    /// `workgroupUniformLoad` performs its load now that the whole
    /// workgroup has synchronized.
    pub fn clear_barrier(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        let module = ctx.module.clone();
        let Some(expr) = self.barrier.take() else {
            bail_runtime!("invocation is not suspended at a barrier");
        };
        let source = module.exprs[expr].source;
        let result = match &module.exprs[expr].kind {
            ExprKind::Call { target: CallTarget::Builtin(b), args } => match b {
                BuiltinFn::WorkgroupBarrier | BuiltinFn::StorageBarrier => ExprResult::Invalid,
                BuiltinFn::WorkgroupUniformLoad => {
                    let view = self.view_arg(args[0], source)?;
                    ExprResult::Value(ctx.view_load(view, source)?)
                }
                _ => bail_runtime_at!(source, "suspended expression is not a barrier"),
            },
            _ => bail_runtime_at!(source, "suspended expression is not a barrier"),
        };
        let f = self.frame_mut()?;
        f.results.insert(expr, result);
        f.next += 1;
        self.state = State::Ready;
        Ok(())
    }

    /// Looks up a name visible at the current execution point and renders
    /// its value. Returns `<identifier not found>` for unknown names.
    pub fn get_value(&self, ctx: &mut ExecCtx, name: &str) -> String {
        let module = ctx.module.clone();
        if let Some(call) = self.calls.last() {
            if let Some(&local) = call.scopes.lookup(name) {
                if let Some(result) = call.values.get(&local) {
                    let result = result.clone();
                    return self.format_result(ctx, &module, &result);
                }
            }
        }
        for (id, g) in module.globals.iter() {
            if g.name != name {
                continue;
            }
            if let Some(&view) = self.globals.get(&id) {
                return self.format_result(ctx, &module, &ExprResult::Reference(view));
            }
            if let Some(&view) = ctx.binding_views.get(&id) {
                return self.format_result(ctx, &module, &ExprResult::Reference(view));
            }
            if let Some(value) = ctx.override_values.get(&id) {
                return value.display(&module.types, 0);
            }
            if let GlobalKind::Const { value } = &g.kind {
                return value.display(&module.types, 0);
            }
        }
        "<identifier not found>".to_string()
    }

    fn format_result(&self, ctx: &mut ExecCtx, module: &Module, result: &ExprResult) -> String {
        match result {
            ExprResult::Value(v) => v.display(&module.types, 0),
            ExprResult::Reference(view) => match ctx.view_load(*view, Source::default()) {
                Ok(v) => v.display(&module.types, 0),
                Err(_) => "<unreadable memory>".to_string(),
            },
            ExprResult::Pointer(view) => {
                let v = &ctx.views[*view];
                format!("ptr<{}, {}>", v.space, module.types.display(v.ty))
            }
            ExprResult::Invalid => "<no value>".to_string(),
        }
    }

    // Frame access

    fn frame(&self) -> Result<&BlockFrame> {
        match self.calls.last().and_then(|c| c.blocks.last()) {
            Some(f) => Ok(f),
            None => bail_runtime!("invocation has no active block"),
        }
    }

    fn frame_mut(&mut self) -> Result<&mut BlockFrame> {
        match self.calls.last_mut().and_then(|c| c.blocks.last_mut()) {
            Some(f) => Ok(f),
            None => bail_runtime!("invocation has no active block"),
        }
    }

    fn call_mut(&mut self) -> Result<&mut CallFrame> {
        match self.calls.last_mut() {
            Some(c) => Ok(c),
            None => bail_runtime!("invocation has no active call"),
        }
    }

    // Expression results

    fn result_of(&self, expr: ExprId) -> Result<ExprResult> {
        match self.frame()?.results.get(&expr) {
            Some(r) => Ok(r.clone()),
            None => bail_runtime!("expression has not been evaluated"),
        }
    }

    fn result_value(&self, ctx: &mut ExecCtx, result: ExprResult, source: Source) -> Result<ConstValue> {
        match result {
            ExprResult::Value(v) => Ok(v),
            ExprResult::Reference(view) => ctx.view_load(view, source),
            ExprResult::Pointer(_) => bail_runtime_at!(source, "cannot use a pointer as a value"),
            ExprResult::Invalid => bail_runtime_at!(source, "expression has no value"),
        }
    }

    /// The value of an evaluated expression, applying the load rule to
    /// references.
    fn value_of(&self, ctx: &mut ExecCtx, expr: ExprId, source: Source) -> Result<ConstValue> {
        let result = self.result_of(expr)?;
        self.result_value(ctx, result, source)
    }

    fn bool_of(&self, ctx: &mut ExecCtx, expr: ExprId, source: Source) -> Result<bool> {
        match self.value_of(ctx, expr, source)? {
            ConstValue::Bool(b) => Ok(b),
            _ => bail_runtime_at!(source, "condition is not a bool"),
        }
    }

    /// The view behind a pointer or reference argument.
    fn view_arg(&self, expr: ExprId, source: Source) -> Result<ViewId> {
        match self.result_of(expr)? {
            ExprResult::Pointer(view) | ExprResult::Reference(view) => Ok(view),
            _ => bail_runtime_at!(source, "argument is not a pointer"),
        }
    }

    // Evaluation

    /// Skips a short-circuit operator's right side when the already
    /// evaluated left side decides the result.
    fn try_short_circuit(&mut self, ctx: &mut ExecCtx, module: &Module, next: usize) -> Result<bool> {
        let Some(&op_idx) = self.frame()?.short_circuit.get(&next) else {
            return Ok(false);
        };
        let op_expr = self.frame()?.queue[op_idx];
        let (op, lhs) = match &module.exprs[op_expr].kind {
            ExprKind::Binary { op, lhs, .. } => (*op, *lhs),
            _ => bail_runtime!("short-circuit entry is not a logical operator"),
        };
        let source = module.exprs[op_expr].source;
        // Load the left side once so a later full evaluation does not
        // reload it.
        let lhs_value = self.value_of(ctx, lhs, source)?;
        let ConstValue::Bool(decided) = lhs_value else {
            bail_runtime_at!(source, "logical operand is not a bool");
        };
        self.frame_mut()?.results.insert(lhs, ExprResult::Value(ConstValue::Bool(decided)));
        let skip = match op {
            BinaryOp::LogicalAnd => !decided,
            BinaryOp::LogicalOr => decided,
            _ => bail_runtime!("short-circuit entry is not a logical operator"),
        };
        if !skip {
            return Ok(false);
        }
        let f = self.frame_mut()?;
        f.results.insert(op_expr, ExprResult::Value(ConstValue::Bool(decided)));
        f.next = op_idx + 1;
        Ok(true)
    }

    fn eval_expression(&mut self, ctx: &mut ExecCtx, module: &Module, expr: ExprId) -> Result<EvalFlow> {
        let e = module.exprs[expr].clone();
        if let Some(constant) = e.constant {
            return Ok(EvalFlow::Done(ExprResult::Value(constant)));
        }
        let source = e.source;
        let result = match &e.kind {
            ExprKind::Literal => bail_runtime_at!(source, "literal has no folded value"),
            ExprKind::LocalRef(local) => {
                let Some(call) = self.calls.last() else {
                    bail_runtime!("invocation has no active call");
                };
                match call.values.get(local) {
                    Some(r) => r.clone(),
                    None => bail_runtime_at!(
                        source,
                        "'{}' has not been declared",
                        module.locals[*local].name
                    ),
                }
            }
            ExprKind::GlobalRef(global) => {
                if let Some(&view) = self.globals.get(global) {
                    ExprResult::Reference(view)
                } else if let Some(&view) = ctx.binding_views.get(global) {
                    ExprResult::Reference(view)
                } else if let Some(value) = ctx.override_values.get(global) {
                    ExprResult::Value(value.clone())
                } else {
                    bail_runtime_at!(
                        source,
                        "global '{}' is not available",
                        module.globals[*global].name
                    )
                }
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.value_of(ctx, *operand, source)?;
                ExprResult::Value(eval::unary_op(*op, &value, &module.types, source)?)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_value = self.value_of(ctx, *lhs, source)?;
                let rhs_value = self.value_of(ctx, *rhs, source)?;
                ExprResult::Value(eval::binary_op(
                    *op,
                    &lhs_value,
                    &rhs_value,
                    &module.types,
                    &mut ctx.diags,
                    source,
                )?)
            }
            ExprKind::Index { object, index } => {
                let Some(i) = self.value_of(ctx, *index, source)?.scalar_u32() else {
                    bail_runtime_at!(source, "index is not a scalar");
                };
                match self.result_of(*object)? {
                    // A pointer object converts back to a reference, so
                    // chained access through pointer parameters needs no
                    // explicit dereference.
                    ExprResult::Reference(view) | ExprResult::Pointer(view) => {
                        let sub = self.element_view(ctx, module, view, i as u64, source)?;
                        ExprResult::Reference(sub)
                    }
                    ExprResult::Value(composite) => match composite.index(i as usize) {
                        Some(elem) => ExprResult::Value(elem.clone()),
                        None => {
                            ctx.diags
                                .push(Diagnostic::warning("out-of-bounds index", Some(source)));
                            ExprResult::Value(ConstValue::zero(&module.types, e.ty)?)
                        }
                    },
                    _ => bail_runtime_at!(source, "cannot index this expression"),
                }
            }
            ExprKind::Member { object, member } => match self.result_of(*object)? {
                ExprResult::Reference(view) | ExprResult::Pointer(view) => {
                    let sub = self.member_view(ctx, module, view, *member, source)?;
                    ExprResult::Reference(sub)
                }
                ExprResult::Value(composite) => match composite.index(*member as usize) {
                    Some(elem) => ExprResult::Value(elem.clone()),
                    None => bail_runtime_at!(source, "member index out of range"),
                },
                _ => bail_runtime_at!(source, "cannot access a member of this expression"),
            },
            ExprKind::Swizzle { object, lanes } => {
                let object_result = self.result_of(*object)?;
                match (&object_result, lanes.as_slice()) {
                    // A single-lane swizzle of a reference (or a pointer,
                    // which converts back) names the lane's storage, so it
                    // is writable like an index accessor.
                    (ExprResult::Reference(view), &[lane])
                    | (ExprResult::Pointer(view), &[lane]) => {
                        let sub = self.element_view(ctx, module, *view, lane as u64, source)?;
                        ExprResult::Reference(sub)
                    }
                    _ => {
                        let value = self.result_value(ctx, object_result, source)?;
                        if let &[lane] = lanes.as_slice() {
                            match value.index(lane as usize) {
                                Some(elem) => ExprResult::Value(elem.clone()),
                                None => bail_runtime_at!(source, "swizzle lane out of range"),
                            }
                        } else {
                            let elems = lanes
                                .iter()
                                .map(|&lane| match value.index(lane as usize) {
                                    Some(elem) => Ok(elem.clone()),
                                    None => bail_runtime_at!(source, "swizzle lane out of range"),
                                })
                                .collect::<Result<Vec<_>>>()?;
                            ExprResult::Value(ConstValue::Composite { ty: e.ty, elems })
                        }
                    }
                }
            }
            ExprKind::Call { target: CallTarget::Function(func), args } => {
                self.begin_call(ctx, module, *func, args, source)?;
                return Ok(EvalFlow::Call);
            }
            ExprKind::Call { target: CallTarget::Builtin(builtin), args } => {
                if builtin.is_barrier() {
                    self.state = State::Barrier;
                    self.barrier = Some(expr);
                    return Ok(EvalFlow::Suspend);
                }
                self.eval_builtin(ctx, module, *builtin, args, e.ty, source)?
            }
            ExprKind::Call { target: CallTarget::Construct, args } => {
                let values = args
                    .iter()
                    .map(|&arg| self.value_of(ctx, arg, source))
                    .collect::<Result<Vec<_>>>()?;
                ExprResult::Value(eval::construct(e.ty, &values, &module.types, source)?)
            }
            ExprKind::Call { target: CallTarget::Convert, args } => {
                let value = self.value_of(ctx, args[0], source)?;
                ExprResult::Value(value.convert(&module.types, e.ty, source)?)
            }
            ExprKind::Bitcast { expr: operand } => {
                let value = self.value_of(ctx, *operand, source)?;
                ExprResult::Value(eval::bitcast(&value, e.ty, &module.types, source)?)
            }
            ExprKind::AddressOf { expr: operand } => match self.result_of(*operand)? {
                ExprResult::Reference(view) => ExprResult::Pointer(view),
                _ => bail_runtime_at!(source, "cannot take the address of this expression"),
            },
            ExprKind::Deref { expr: operand } => match self.result_of(*operand)? {
                ExprResult::Pointer(view) => ExprResult::Reference(view),
                _ => bail_runtime_at!(source, "cannot dereference this expression"),
            },
        };
        Ok(EvalFlow::Done(result))
    }

    fn eval_builtin(
        &mut self,
        ctx: &mut ExecCtx,
        module: &Module,
        builtin: BuiltinFn,
        args: &[ExprId],
        ty: TypeHandle,
        source: Source,
    ) -> Result<ExprResult> {
        use BuiltinFn::*;
        Ok(match builtin {
            ArrayLength => {
                let view = self.view_arg(args[0], source)?;
                let (view_ty, view_size) = {
                    let v = &ctx.views[view];
                    (v.ty, v.size)
                };
                let Type::Array { stride, .. } = &module.types[view_ty] else {
                    bail_runtime_at!(source, "arrayLength argument is not an array");
                };
                ExprResult::Value(ConstValue::U32((view_size / *stride as u64) as u32))
            }
            AtomicLoad => {
                let view = self.view_arg(args[0], source)?;
                ExprResult::Value(ctx.atomic_load(view, source)?)
            }
            AtomicStore => {
                let view = self.view_arg(args[0], source)?;
                let value = self.value_of(ctx, args[1], source)?;
                ctx.atomic_store(view, &value, source)?;
                ExprResult::Invalid
            }
            AtomicAdd | AtomicSub | AtomicMax | AtomicMin | AtomicAnd | AtomicOr | AtomicXor
            | AtomicExchange => {
                let op = match builtin {
                    AtomicAdd => AtomicOp::Add,
                    AtomicSub => AtomicOp::Sub,
                    AtomicMax => AtomicOp::Max,
                    AtomicMin => AtomicOp::Min,
                    AtomicAnd => AtomicOp::And,
                    AtomicOr => AtomicOp::Or,
                    AtomicXor => AtomicOp::Xor,
                    _ => AtomicOp::Exchange,
                };
                let view = self.view_arg(args[0], source)?;
                let value = self.value_of(ctx, args[1], source)?;
                ExprResult::Value(ctx.atomic_rmw(view, op, &value, source)?)
            }
            AtomicCompareExchangeWeak => {
                let view = self.view_arg(args[0], source)?;
                let cmp = self.value_of(ctx, args[1], source)?;
                let value = self.value_of(ctx, args[2], source)?;
                ExprResult::Value(ctx.atomic_compare_exchange(view, &cmp, &value, ty, source)?)
            }
            WorkgroupBarrier | StorageBarrier | WorkgroupUniformLoad => {
                bail_runtime_at!(source, "barrier reached the builtin evaluator")
            }
            _ => {
                let values = args
                    .iter()
                    .map(|&arg| self.value_of(ctx, arg, source))
                    .collect::<Result<Vec<_>>>()?;
                ExprResult::Value(eval::builtin(builtin, &values, &module.types, &mut ctx.diags, source)?)
            }
        })
    }

    fn begin_call(
        &mut self,
        ctx: &mut ExecCtx,
        module: &Module,
        func: FuncId,
        args: &[ExprId],
        source: Source,
    ) -> Result<()> {
        let function = &module.funcs[func];
        if function.params.len() != args.len() {
            bail_runtime_at!(source, "wrong number of arguments to '{}'", function.name);
        }
        let mut values = HashMap::new();
        let mut scopes = ScopeStack::new();
        for (param, &arg) in function.params.iter().zip(args) {
            let bound = match self.result_of(arg)? {
                ExprResult::Pointer(view) => ExprResult::Pointer(view),
                result => ExprResult::Value(self.result_value(ctx, result, source)?),
            };
            values.insert(param.local, bound);
            scopes.insert(module.locals[param.local].name.clone(), param.local);
        }
        self.calls.push(CallFrame { blocks: Vec::new(), values, scopes });
        self.push_block(ctx, function.body, false)
    }

    fn return_from_function(&mut self, result: ExprResult) -> Result<()> {
        self.calls.pop();
        if self.calls.is_empty() {
            self.state = State::Finished;
            return Ok(());
        }
        // The caller is suspended mid-evaluation on the call expression.
        let f = self.frame_mut()?;
        if f.next >= f.queue.len() {
            bail_runtime!("returned to a caller that is not awaiting a call");
        }
        let expr = f.queue[f.next];
        f.results.insert(expr, result);
        f.next += 1;
        Ok(())
    }

    // Statement execution

    fn execute_pending(&mut self, ctx: &mut ExecCtx, module: &Module, pending: Pending) -> Result<()> {
        match pending {
            Pending::Exec(stmt) => {
                self.statements_executed += 1;
                self.exec_stmt(ctx, module, stmt)
            }
            Pending::ForInit(stmt) => {
                self.statements_executed += 1;
                let (init, condition, body) = match &module.stmts[stmt].kind {
                    StmtKind::ForLoop { initializer: Some(init), condition, body, .. } => {
                        (*init, *condition, *body)
                    }
                    _ => bail_runtime!("for loop lost its initializer"),
                };
                self.exec_simple_stmt(ctx, module, init)?;
                self.prepare_loop_condition(module, condition, body)
            }
            Pending::ForContinuing(stmt) => {
                self.statements_executed += 1;
                let (cont, condition, body) = match &module.stmts[stmt].kind {
                    StmtKind::ForLoop { continuing: Some(cont), condition, body, .. } => {
                        (*cont, *condition, *body)
                    }
                    _ => bail_runtime!("for loop lost its continuing statement"),
                };
                self.exec_simple_stmt(ctx, module, cont)?;
                self.prepare_loop_condition(module, condition, body)
            }
            Pending::LoopCondition { condition, body } => {
                let run = match condition {
                    Some(cond) => {
                        let source = module.exprs[cond].source;
                        self.bool_of(ctx, cond, source)?
                    }
                    None => true,
                };
                if run {
                    self.push_block(ctx, body, false)
                } else {
                    self.next_statement(ctx, module)
                }
            }
            Pending::EndOfBlock => self.end_block(ctx, module, BlockEnd::Regular),
        }
    }

    fn exec_stmt(&mut self, ctx: &mut ExecCtx, module: &Module, stmt: StmtId) -> Result<()> {
        let source = module.stmts[stmt].source;
        match &module.stmts[stmt].kind {
            StmtKind::VarDecl { .. }
            | StmtKind::LetDecl { .. }
            | StmtKind::Assign { .. }
            | StmtKind::CompoundAssign { .. }
            | StmtKind::Increment { .. }
            | StmtKind::Decrement { .. }
            | StmtKind::Phony { .. }
            | StmtKind::CallStmt { .. } => {
                self.exec_simple_stmt(ctx, module, stmt)?;
                self.next_statement(ctx, module)
            }
            StmtKind::Block(block) => self.push_block(ctx, *block, false),
            StmtKind::If { condition, then_block, else_stmt } => {
                let (condition, then_block, else_stmt) = (*condition, *then_block, *else_stmt);
                if self.bool_of(ctx, condition, source)? {
                    self.push_block(ctx, then_block, false)
                } else if let Some(else_stmt) = else_stmt {
                    // Run the else branch in place; the frame still points
                    // at the if statement, so block ends dispatch on it.
                    self.prepare_statement(module, else_stmt)
                } else {
                    self.next_statement(ctx, module)
                }
            }
            StmtKind::Switch { condition, cases } => {
                let value = self.value_of(ctx, *condition, source)?;
                let selector = match value {
                    ConstValue::I32(v) => v as i64,
                    ConstValue::U32(v) => v as i64,
                    _ => bail_runtime_at!(source, "switch condition is not an integer"),
                };
                let matched = cases
                    .iter()
                    .find(|case| case.selectors.contains(&CaseSelector::Value(selector)))
                    .or_else(|| {
                        cases.iter().find(|case| case.selectors.contains(&CaseSelector::Default))
                    })
                    .map(|case| case.body);
                match matched {
                    Some(body) => self.push_block(ctx, body, false),
                    None => self.next_statement(ctx, module),
                }
            }
            StmtKind::Loop { body, .. } => self.push_block(ctx, *body, false),
            StmtKind::Break => self.end_block(ctx, module, BlockEnd::Break),
            StmtKind::Continue => self.end_block(ctx, module, BlockEnd::Continue),
            StmtKind::BreakIf { condition } => {
                if self.bool_of(ctx, *condition, source)? {
                    self.end_block(ctx, module, BlockEnd::Break)
                } else {
                    self.next_statement(ctx, module)
                }
            }
            StmtKind::Return { value } => {
                let result = match value {
                    Some(expr) => ExprResult::Value(self.value_of(ctx, *expr, source)?),
                    None => ExprResult::Invalid,
                };
                self.return_from_function(result)
            }
            StmtKind::ForLoop { .. } | StmtKind::While { .. } => {
                bail_runtime_at!(source, "loop header reached the statement dispatcher")
            }
        }
    }

    /// Executes a statement with no control flow of its own. Used directly
    /// and for the initializer and continuing statements of for loops.
    fn exec_simple_stmt(&mut self, ctx: &mut ExecCtx, module: &Module, stmt: StmtId) -> Result<()> {
        let source = module.stmts[stmt].source;
        match &module.stmts[stmt].kind {
            StmtKind::VarDecl { var, init } => {
                let local = &module.locals[*var];
                let size = module.types.size_of(local.ty) as u64;
                let memory = Memory::new_shared(size);
                let view = ctx.views.create_root(
                    memory,
                    AddressSpace::Function,
                    local.ty,
                    0,
                    size,
                    local.source,
                );
                if let Some(init) = init {
                    let value = self.value_of(ctx, *init, source)?;
                    ctx.view_store(view, &value, source)?;
                }
                let call = self.call_mut()?;
                call.values.insert(*var, ExprResult::Reference(view));
                call.scopes.insert(local.name.clone(), *var);
                Ok(())
            }
            StmtKind::LetDecl { var, init } => {
                let bound = match self.result_of(*init)? {
                    ExprResult::Pointer(view) => ExprResult::Pointer(view),
                    result => ExprResult::Value(self.result_value(ctx, result, source)?),
                };
                let name = module.locals[*var].name.clone();
                let call = self.call_mut()?;
                call.values.insert(*var, bound);
                call.scopes.insert(name, *var);
                Ok(())
            }
            StmtKind::Assign { lhs, rhs } => {
                let value = self.value_of(ctx, *rhs, source)?;
                match self.result_of(*lhs)? {
                    ExprResult::Reference(view) => ctx.view_store(view, &value, source),
                    _ => bail_runtime_at!(source, "assignment target is not a reference"),
                }
            }
            StmtKind::CompoundAssign { op, lhs, rhs } => {
                let ExprResult::Reference(view) = self.result_of(*lhs)? else {
                    bail_runtime_at!(source, "assignment target is not a reference");
                };
                let old = ctx.view_load(view, source)?;
                let rhs_value = self.value_of(ctx, *rhs, source)?;
                let new =
                    eval::binary_op(*op, &old, &rhs_value, &module.types, &mut ctx.diags, source)?;
                ctx.view_store(view, &new, source)
            }
            StmtKind::Increment { lhs } | StmtKind::Decrement { lhs } => {
                let op = match &module.stmts[stmt].kind {
                    StmtKind::Increment { .. } => BinaryOp::Add,
                    _ => BinaryOp::Subtract,
                };
                let ExprResult::Reference(view) = self.result_of(*lhs)? else {
                    bail_runtime_at!(source, "increment target is not a reference");
                };
                let old = ctx.view_load(view, source)?;
                let one = match old.scalar_kind() {
                    Some(ScalarKind::I32) => ConstValue::I32(1),
                    Some(ScalarKind::U32) => ConstValue::U32(1),
                    _ => bail_runtime_at!(source, "increment target is not an integer"),
                };
                let new = eval::binary_op(op, &old, &one, &module.types, &mut ctx.diags, source)?;
                ctx.view_store(view, &new, source)
            }
            StmtKind::Phony { .. } | StmtKind::CallStmt { .. } => Ok(()),
            _ => bail_runtime_at!(source, "statement is not a simple statement"),
        }
    }

    // Statement preparation and block sequencing

    fn push_block(&mut self, ctx: &mut ExecCtx, block: BlockId, continuing: bool) -> Result<()> {
        let module = ctx.module.clone();
        let call = self.call_mut()?;
        call.scopes.push_scope();
        call.blocks.push(BlockFrame::new(block, continuing));
        match first_statement(&module.blocks[block]) {
            Some(stmt) => self.prepare_statement(&module, stmt),
            None => {
                self.frame_mut()?.pending = Some(Pending::EndOfBlock);
                Ok(())
            }
        }
    }

    fn next_statement(&mut self, ctx: &mut ExecCtx, module: &Module) -> Result<()> {
        let _ = ctx;
        let (block, idx) = {
            let f = self.frame_mut()?;
            f.stmt_idx += 1;
            (f.block, f.stmt_idx)
        };
        match module.blocks[block].stmts.get(idx) {
            Some(&stmt) => self.prepare_statement(module, stmt),
            None => {
                let f = self.frame_mut()?;
                f.reset_eval();
                f.pending = Some(Pending::EndOfBlock);
                Ok(())
            }
        }
    }

    /// Resets the frame's evaluation state, queues the statement's operand
    /// expressions, and records what to do once they are evaluated.
    fn prepare_statement(&mut self, module: &Module, stmt: StmtId) -> Result<()> {
        self.frame_mut()?.reset_eval();
        let pending = match &module.stmts[stmt].kind {
            StmtKind::VarDecl { .. }
            | StmtKind::LetDecl { .. }
            | StmtKind::Assign { .. }
            | StmtKind::CompoundAssign { .. }
            | StmtKind::Increment { .. }
            | StmtKind::Decrement { .. }
            | StmtKind::Phony { .. }
            | StmtKind::CallStmt { .. } => {
                self.enqueue_simple_operands(module, stmt)?;
                Pending::Exec(stmt)
            }
            StmtKind::If { condition, .. }
            | StmtKind::Switch { condition, .. }
            | StmtKind::BreakIf { condition } => {
                self.enqueue(module, *condition)?;
                Pending::Exec(stmt)
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    self.enqueue(module, *value)?;
                }
                Pending::Exec(stmt)
            }
            StmtKind::Block(_) | StmtKind::Loop { .. } | StmtKind::Break | StmtKind::Continue => {
                Pending::Exec(stmt)
            }
            StmtKind::ForLoop { initializer: Some(init), .. } => {
                self.enqueue_simple_operands(module, *init)?;
                Pending::ForInit(stmt)
            }
            StmtKind::ForLoop { initializer: None, condition, body, .. } => {
                return self.prepare_loop_condition(module, *condition, *body);
            }
            StmtKind::While { condition, body } => {
                return self.prepare_loop_condition(module, Some(*condition), *body);
            }
        };
        self.frame_mut()?.pending = Some(pending);
        Ok(())
    }

    fn prepare_loop_condition(
        &mut self,
        module: &Module,
        condition: Option<ExprId>,
        body: BlockId,
    ) -> Result<()> {
        self.frame_mut()?.reset_eval();
        if let Some(cond) = condition {
            self.enqueue(module, cond)?;
        }
        self.frame_mut()?.pending = Some(Pending::LoopCondition { condition, body });
        Ok(())
    }

    fn enqueue_simple_operands(&mut self, module: &Module, stmt: StmtId) -> Result<()> {
        match &module.stmts[stmt].kind {
            StmtKind::VarDecl { init: Some(init), .. } => self.enqueue(module, *init),
            StmtKind::VarDecl { init: None, .. } => Ok(()),
            StmtKind::LetDecl { init, .. } => self.enqueue(module, *init),
            StmtKind::Assign { lhs, rhs } | StmtKind::CompoundAssign { lhs, rhs, .. } => {
                // Left before right; evaluation order is observable through
                // calls with side effects.
                self.enqueue(module, *lhs)?;
                self.enqueue(module, *rhs)
            }
            StmtKind::Increment { lhs } | StmtKind::Decrement { lhs } => self.enqueue(module, *lhs),
            StmtKind::Phony { expr } | StmtKind::CallStmt { expr } => self.enqueue(module, *expr),
            _ => bail_runtime!("statement is not a simple statement"),
        }
    }

    /// Appends an expression tree to the evaluation queue, children before
    /// parents. Pre-folded constants enqueue as leaves.
    fn enqueue(&mut self, module: &Module, expr: ExprId) -> Result<()> {
        if module.exprs[expr].constant.is_some() {
            self.frame_mut()?.queue.push(expr);
            return Ok(());
        }
        match &module.exprs[expr].kind {
            ExprKind::Literal | ExprKind::LocalRef(_) | ExprKind::GlobalRef(_) => {}
            ExprKind::Unary { expr: operand, .. }
            | ExprKind::Bitcast { expr: operand }
            | ExprKind::AddressOf { expr: operand }
            | ExprKind::Deref { expr: operand } => self.enqueue(module, *operand)?,
            ExprKind::Binary { op, lhs, rhs } if op.is_short_circuit() => {
                self.enqueue(module, *lhs)?;
                let rhs_start = self.frame()?.queue.len();
                self.enqueue(module, *rhs)?;
                let f = self.frame_mut()?;
                let op_idx = f.queue.len();
                f.queue.push(expr);
                f.short_circuit.insert(rhs_start, op_idx);
                return Ok(());
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.enqueue(module, *lhs)?;
                self.enqueue(module, *rhs)?;
            }
            ExprKind::Index { object, index } => {
                self.enqueue(module, *object)?;
                self.enqueue(module, *index)?;
            }
            ExprKind::Member { object, .. } | ExprKind::Swizzle { object, .. } => {
                self.enqueue(module, *object)?;
            }
            ExprKind::Call { args, .. } => {
                for &arg in args {
                    self.enqueue(module, arg)?;
                }
            }
        }
        self.frame_mut()?.queue.push(expr);
        Ok(())
    }

    /// Pops the finished block frame and dispatches on the statement the
    /// parent frame is suspended at. Break and continue unwind through
    /// frames that are not loop or switch bodies.
    fn end_block(&mut self, ctx: &mut ExecCtx, module: &Module, kind: BlockEnd) -> Result<()> {
        loop {
            let call = self.call_mut()?;
            let Some(finished) = call.blocks.pop() else {
                bail_runtime!("no block to end");
            };
            call.scopes.pop_scope();
            if call.blocks.is_empty() {
                // Function body ran off the end.
                return self.return_from_function(ExprResult::Invalid);
            }
            let stmt = {
                let f = self.frame()?;
                match module.blocks[f.block].stmts.get(f.stmt_idx) {
                    Some(&stmt) => stmt,
                    None => bail_runtime!("parent frame has no current statement"),
                }
            };
            match (&module.stmts[stmt].kind, kind) {
                (StmtKind::ForLoop { .. } | StmtKind::While { .. }, BlockEnd::Break) => {
                    return self.next_statement(ctx, module);
                }
                (StmtKind::ForLoop { condition, continuing, body, .. }, _) => {
                    let (condition, continuing, body) = (*condition, *continuing, *body);
                    return match continuing {
                        Some(cont) => {
                            self.frame_mut()?.reset_eval();
                            self.enqueue_simple_operands(module, cont)?;
                            self.frame_mut()?.pending = Some(Pending::ForContinuing(stmt));
                            Ok(())
                        }
                        None => self.prepare_loop_condition(module, condition, body),
                    };
                }
                (StmtKind::While { condition, body }, _) => {
                    let (condition, body) = (*condition, *body);
                    return self.prepare_loop_condition(module, Some(condition), body);
                }
                (StmtKind::Loop { body, continuing }, _) => {
                    let (body, continuing) = (*body, *continuing);
                    return if finished.continuing {
                        match kind {
                            BlockEnd::Break => self.next_statement(ctx, module),
                            BlockEnd::Regular => self.push_block(ctx, body, false),
                            BlockEnd::Continue => {
                                bail_runtime!("continue inside a continuing block")
                            }
                        }
                    } else {
                        match kind {
                            BlockEnd::Break => self.next_statement(ctx, module),
                            _ => match continuing {
                                Some(cont) => self.push_block(ctx, cont, true),
                                None => self.push_block(ctx, body, false),
                            },
                        }
                    };
                }
                (StmtKind::Switch { .. }, BlockEnd::Break | BlockEnd::Regular) => {
                    return self.next_statement(ctx, module);
                }
                (_, BlockEnd::Regular) => return self.next_statement(ctx, module),
                // Break or continue inside an if or bare block: unwind
                // into the enclosing frame.
                (_, _) => continue,
            }
        }
    }

    // Views derived from aggregate references

    fn element_view(
        &self,
        ctx: &mut ExecCtx,
        module: &Module,
        view: ViewId,
        index: u64,
        source: Source,
    ) -> Result<ViewId> {
        let types = &module.types;
        let ty = ctx.views[view].ty;
        let (offset, elem_ty, size) = match &types[ty] {
            Type::Vector { elem, .. } => {
                let Some(elem_ty) = types.scalar(*elem) else {
                    bail_runtime!("vector element type is not registered");
                };
                (index * elem.size() as u64, elem_ty, elem.size() as u64)
            }
            Type::Matrix { rows, .. } => {
                let Some(column_ty) = types.vector(ScalarKind::F32, *rows) else {
                    bail_runtime!("matrix column type is not registered");
                };
                let stride = types.column_stride(*rows) as u64;
                (index * stride, column_ty, types.size_of(column_ty) as u64)
            }
            Type::Array { elem, stride, .. } => {
                (index * *stride as u64, *elem, types.size_of(*elem) as u64)
            }
            _ => bail_runtime_at!(source, "cannot index a value of type '{}'", types.display(ty)),
        };
        Ok(ctx.views.create_subview(view, offset, elem_ty, size, source))
    }

    fn member_view(
        &self,
        ctx: &mut ExecCtx,
        module: &Module,
        view: ViewId,
        member: u32,
        source: Source,
    ) -> Result<ViewId> {
        let types = &module.types;
        let (parent_ty, parent_size) = {
            let v = &ctx.views[view];
            (v.ty, v.size)
        };
        let Type::Struct { members, .. } = &types[parent_ty] else {
            bail_runtime_at!(
                source,
                "cannot access a member of type '{}'",
                types.display(parent_ty)
            );
        };
        let Some(m) = members.get(member as usize) else {
            bail_runtime_at!(source, "member index out of range");
        };
        // A trailing runtime-sized array extends to the end of the view.
        let size = match types[m.ty] {
            Type::Array { count: ArrayCount::Runtime, .. } => {
                parent_size.saturating_sub(m.offset as u64)
            }
            _ => types.size_of(m.ty) as u64,
        };
        Ok(ctx.views.create_subview(view, m.offset as u64, m.ty, size, source))
    }
}

fn first_statement(block: &Block) -> Option<StmtId> {
    block.stmts.first().copied()
}

fn uvec3_value(module: &Module, v: UVec3) -> Result<ConstValue> {
    let Some(ty) = module.types.vector(ScalarKind::U32, 3) else {
        bail_runtime!("vec3<u32> type is not registered");
    };
    Ok(ConstValue::Composite {
        ty,
        elems: vec![ConstValue::U32(v.x), ConstValue::U32(v.y), ConstValue::U32(v.z)],
    })
}
