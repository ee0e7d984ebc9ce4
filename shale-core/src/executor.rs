//! Pipeline setup and dispatch.
//!
//! [`ShaderExecutor::create`] resolves a compute entry point and its
//! pipeline overrides; [`ShaderExecutor::run`] binds buffers and executes a
//! dispatch one workgroup at a time, with workgroups and invocations
//! stepped deterministically. Host observation happens through registered
//! callbacks; diagnostics that no callback consumes go to the log.

use crate::ast::{ExprId, FuncId, FunctionStage, GlobalId, GlobalKind, Module};
use crate::constant::ConstValue;
use crate::diag::{DiagList, Diagnostic, Severity};
use crate::error::{ExecError, Result};
use crate::eval;
use crate::invocation::UVec3;
use crate::memory::{SharedMemory, ViewArena, ViewId};
use crate::number;
use crate::source::Source;
use crate::types::{AddressSpace, ArrayCount, ScalarKind, Type, TypeArena, TypeHandle};
use crate::workgroup::Workgroup;
use crate::{bail_binding, bail_override, bail_override_at, bail_setup};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

/// A buffer bound to a `@group`/`@binding` pair. The variable's contents
/// start at `offset` within the allocation.
#[derive(Clone)]
pub struct Binding {
    pub memory: SharedMemory,
    pub offset: u64,
}

pub type BindingList = HashMap<(u32, u32), Binding>;

/// Host-supplied pipeline override values, keyed by the stringified
/// `@id` when present and the variable name otherwise.
pub type OverrideList = HashMap<String, f64>;

/// A load or store observed through a memory view.
#[derive(Debug, Clone, Copy)]
pub struct MemoryEvent {
    pub space: AddressSpace,
    pub offset: u64,
    pub size: u64,
    pub source: Source,
}

type DiagCallback = Box<dyn FnMut(&[Diagnostic])>;
type MemoryCallback = Box<dyn FnMut(&MemoryEvent)>;
type InvocationCallback = Box<dyn FnMut(UVec3, UVec3)>;
type WorkgroupCallback = Box<dyn FnMut(UVec3)>;
type DispatchCallback = Box<dyn FnMut()>;

#[derive(Default)]
struct Callbacks {
    error: Vec<DiagCallback>,
    memory_load: Vec<MemoryCallback>,
    memory_store: Vec<MemoryCallback>,
    barrier: Vec<InvocationCallback>,
    pre_step: Vec<InvocationCallback>,
    post_step: Vec<InvocationCallback>,
    workgroup_begin: Vec<WorkgroupCallback>,
    workgroup_complete: Vec<WorkgroupCallback>,
    dispatch_begin: Vec<DispatchCallback>,
    dispatch_complete: Vec<DispatchCallback>,
}

/// Shared execution state: the module, every live memory view, pending
/// diagnostics, and the values resolved at pipeline creation.
pub struct ExecCtx {
    pub module: Rc<Module>,
    pub views: ViewArena,
    /// Diagnostics accumulated since the last flush.
    pub diags: DiagList,
    /// Resolved pipeline override values.
    pub override_values: HashMap<GlobalId, ConstValue>,
    /// Views of the buffers bound for the current dispatch.
    pub binding_views: HashMap<GlobalId, ViewId>,
    /// Globals reachable from the entry point; only these are allocated
    /// and only their bindings are required.
    pub referenced: HashSet<GlobalId>,
    /// The invocation currently stepping, for diagnostic attribution.
    pub(crate) current_invocation: Option<(UVec3, UVec3)>,
    fatal: Option<ExecError>,
    callbacks: Callbacks,
}

impl ExecCtx {
    pub fn new(module: Rc<Module>) -> ExecCtx {
        ExecCtx {
            module,
            views: ViewArena::new(),
            diags: DiagList::new(),
            override_values: HashMap::new(),
            binding_views: HashMap::new(),
            referenced: HashSet::new(),
            current_invocation: None,
            fatal: None,
            callbacks: Callbacks::default(),
        }
    }

    pub(crate) fn notify_load(&mut self, space: AddressSpace, offset: u64, size: u64, source: Source) {
        let event = MemoryEvent { space, offset, size, source };
        for cb in &mut self.callbacks.memory_load {
            cb(&event);
        }
    }

    pub(crate) fn notify_store(&mut self, space: AddressSpace, offset: u64, size: u64, source: Source) {
        let event = MemoryEvent { space, offset, size, source };
        for cb in &mut self.callbacks.memory_store {
            cb(&event);
        }
    }

    pub(crate) fn notify_barrier(&mut self, group: UVec3, local: UVec3) {
        for cb in &mut self.callbacks.barrier {
            cb(group, local);
        }
    }

    pub(crate) fn notify_pre_step(&mut self, group: UVec3, local: UVec3) {
        for cb in &mut self.callbacks.pre_step {
            cb(group, local);
        }
    }

    pub(crate) fn notify_post_step(&mut self, group: UVec3, local: UVec3) {
        for cb in &mut self.callbacks.post_step {
            cb(group, local);
        }
    }

    /// Drains pending diagnostics to the error callbacks, or to the log
    /// when none are registered. The first diagnostic is attributed to the
    /// invocation that produced it.
    pub fn flush_diags(&mut self) {
        if self.diags.is_empty() {
            return;
        }
        if let Some((group, local)) = self.current_invocation {
            if let Some(first) = self.diags.first_mut() {
                first.message =
                    format!("{} (invocation {} of workgroup {})", first.message, local, group);
            }
        }
        let diags = std::mem::take(&mut self.diags);
        if self.callbacks.error.is_empty() {
            for diag in &diags {
                match diag.severity {
                    Severity::Error => log::error!("{}", diag),
                    Severity::Warning => log::warn!("{}", diag),
                    Severity::Note => log::info!("{}", diag),
                }
            }
            return;
        }
        for cb in &mut self.callbacks.error {
            cb(&diags);
        }
    }

    /// Takes pending diagnostics without reporting them.
    pub fn take_diags(&mut self) -> DiagList {
        std::mem::take(&mut self.diags)
    }

    /// Records a fatal error. The first one wins; later errors during the
    /// same dispatch are dropped.
    pub fn set_fatal(&mut self, err: ExecError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    pub fn fatal(&self) -> Option<&ExecError> {
        self.fatal.as_ref()
    }

    pub fn take_fatal(&mut self) -> Option<ExecError> {
        self.fatal.take()
    }

    /// Evaluates an expression whose value must be known at pipeline
    /// creation: constants, resolved overrides, and operators over them.
    pub fn eval_const_expr(&mut self, expr: ExprId) -> Result<ConstValue> {
        let module = self.module.clone();
        self.eval_const(&module, expr)
    }

    fn eval_const(&mut self, module: &Module, expr: ExprId) -> Result<ConstValue> {
        use crate::ast::{CallTarget, ExprKind};
        let e = &module.exprs[expr];
        if let Some(constant) = &e.constant {
            return Ok(constant.clone());
        }
        let source = e.source;
        match &e.kind {
            ExprKind::GlobalRef(global) => {
                if let Some(value) = self.override_values.get(global) {
                    return Ok(value.clone());
                }
                if let GlobalKind::Const { value } = &module.globals[*global].kind {
                    return Ok(value.clone());
                }
                bail_override_at!(
                    source,
                    "'{}' is not usable at pipeline creation",
                    module.globals[*global].name
                )
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.eval_const(module, *operand)?;
                eval::unary_op(*op, &value, &module.types, source)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval_const(module, *lhs)?;
                let rhs = self.eval_const(module, *rhs)?;
                eval::binary_op(*op, &lhs, &rhs, &module.types, &mut self.diags, source)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval_const(module, *object)?;
                let Some(i) = self.eval_const(module, *index)?.scalar_u32() else {
                    bail_override_at!(source, "index is not a scalar");
                };
                match object.index(i as usize) {
                    Some(elem) => Ok(elem.clone()),
                    None => bail_override_at!(source, "index out of range"),
                }
            }
            ExprKind::Member { object, member } => {
                let object = self.eval_const(module, *object)?;
                match object.index(*member as usize) {
                    Some(elem) => Ok(elem.clone()),
                    None => bail_override_at!(source, "member index out of range"),
                }
            }
            ExprKind::Swizzle { object, lanes } => {
                let object = self.eval_const(module, *object)?;
                if lanes.len() == 1 {
                    match object.index(lanes[0] as usize) {
                        Some(elem) => Ok(elem.clone()),
                        None => bail_override_at!(source, "swizzle lane out of range"),
                    }
                } else {
                    let elems = lanes
                        .iter()
                        .map(|&lane| match object.index(lane as usize) {
                            Some(elem) => Ok(elem.clone()),
                            None => bail_override_at!(source, "swizzle lane out of range"),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(ConstValue::Composite { ty: e.ty, elems })
                }
            }
            ExprKind::Bitcast { expr: operand } => {
                let value = self.eval_const(module, *operand)?;
                eval::bitcast(&value, e.ty, &module.types, source)
            }
            ExprKind::Call { target: CallTarget::Construct, args } => {
                let values = args
                    .iter()
                    .map(|&arg| self.eval_const(module, arg))
                    .collect::<Result<Vec<_>>>()?;
                eval::construct(e.ty, &values, &module.types, source)
            }
            ExprKind::Call { target: CallTarget::Convert, args } => {
                let value = self.eval_const(module, args[0])?;
                value.convert(&module.types, e.ty, source)
            }
            ExprKind::Call { target: CallTarget::Builtin(builtin), args } => {
                let values = args
                    .iter()
                    .map(|&arg| self.eval_const(module, arg))
                    .collect::<Result<Vec<_>>>()?;
                eval::builtin(*builtin, &values, &module.types, &mut self.diags, source)
            }
            _ => bail_override_at!(source, "expression is not evaluable at pipeline creation"),
        }
    }

    /// Byte size of a workgroup variable, resolving override-sized array
    /// counts.
    pub(crate) fn allocation_size(&mut self, ty: TypeHandle) -> Result<u64> {
        let module = self.module.clone();
        if let Type::Array { count: ArrayCount::Override(count), stride, .. } = module.types[ty] {
            let Some(n) = self.eval_const_expr(count)?.scalar_u32() else {
                bail_override!("array count is not a scalar");
            };
            if n == 0 {
                bail_override!("array count must be at least 1");
            }
            return Ok(n as u64 * stride as u64);
        }
        Ok(module.types.size_of(ty) as u64)
    }
}

pub struct ShaderExecutor {
    ctx: ExecCtx,
    entry: FuncId,
    workgroup_size: UVec3,
    step_limit: Option<u64>,
}

impl ShaderExecutor {
    /// Resolves `entry_name` and the pipeline overrides it depends on.
    /// Overrides are keyed by stringified `@id` when one is declared and
    /// by name otherwise; an unresolved override without an initializer is
    /// an error.
    pub fn create(module: Module, entry_name: &str, overrides: &OverrideList) -> Result<ShaderExecutor> {
        let module = Rc::new(module);
        let Some(entry) = module.find_function(entry_name) else {
            bail_setup!("entry point '{}' not found", entry_name);
        };
        if module.funcs[entry].stage != FunctionStage::Compute {
            bail_setup!("entry point '{}' is not a compute shader", entry_name);
        }

        let mut ctx = ExecCtx::new(module.clone());
        ctx.referenced = referenced_closure(&module, entry);

        // Declaration order, so initializers may use earlier overrides.
        for (id, g) in module.globals.iter() {
            let GlobalKind::Override { id: num, init } = &g.kind else {
                continue;
            };
            if !ctx.referenced.contains(&id) {
                continue;
            }
            let key = match num {
                Some(n) => n.to_string(),
                None => g.name.clone(),
            };
            let value = match overrides.get(&key) {
                Some(&host) => narrow_override(&module.types, g.ty, host, g.name.as_str())?,
                None => match init {
                    Some(init) => ctx.eval_const_expr(*init)?,
                    None => {
                        bail_override!("missing pipeline override value for '{}'", g.name)
                    }
                },
            };
            ctx.override_values.insert(id, value);
        }

        let mut dims = [1u32; 3];
        for (i, dim) in module.funcs[entry].workgroup_size.iter().enumerate() {
            if let Some(expr) = dim {
                let Some(n) = ctx.eval_const_expr(*expr)?.scalar_u32() else {
                    bail_override!("workgroup size is not a scalar");
                };
                if n == 0 {
                    bail_override!("workgroup size must be at least 1");
                }
                dims[i] = n;
            }
        }

        Ok(ShaderExecutor {
            ctx,
            entry,
            workgroup_size: UVec3::new(dims[0], dims[1], dims[2]),
            step_limit: None,
        })
    }

    pub fn workgroup_size(&self) -> UVec3 {
        self.workgroup_size
    }

    /// Caps the number of steps a dispatch may take; exceeding it is a
    /// fatal runtime error. Unset by default.
    pub fn set_step_limit(&mut self, limit: u64) {
        self.step_limit = Some(limit);
    }

    /// The execution context, exposed for the debugging API.
    pub fn ctx_mut(&mut self) -> &mut ExecCtx {
        &mut self.ctx
    }

    pub fn add_error_callback(&mut self, cb: impl FnMut(&[Diagnostic]) + 'static) {
        self.ctx.callbacks.error.push(Box::new(cb));
    }

    pub fn add_memory_load_callback(&mut self, cb: impl FnMut(&MemoryEvent) + 'static) {
        self.ctx.callbacks.memory_load.push(Box::new(cb));
    }

    pub fn add_memory_store_callback(&mut self, cb: impl FnMut(&MemoryEvent) + 'static) {
        self.ctx.callbacks.memory_store.push(Box::new(cb));
    }

    pub fn add_barrier_callback(&mut self, cb: impl FnMut(UVec3, UVec3) + 'static) {
        self.ctx.callbacks.barrier.push(Box::new(cb));
    }

    pub fn add_pre_step_callback(&mut self, cb: impl FnMut(UVec3, UVec3) + 'static) {
        self.ctx.callbacks.pre_step.push(Box::new(cb));
    }

    pub fn add_post_step_callback(&mut self, cb: impl FnMut(UVec3, UVec3) + 'static) {
        self.ctx.callbacks.post_step.push(Box::new(cb));
    }

    pub fn add_workgroup_begin_callback(&mut self, cb: impl FnMut(UVec3) + 'static) {
        self.ctx.callbacks.workgroup_begin.push(Box::new(cb));
    }

    pub fn add_workgroup_complete_callback(&mut self, cb: impl FnMut(UVec3) + 'static) {
        self.ctx.callbacks.workgroup_complete.push(Box::new(cb));
    }

    pub fn add_dispatch_begin_callback(&mut self, cb: impl FnMut() + 'static) {
        self.ctx.callbacks.dispatch_begin.push(Box::new(cb));
    }

    pub fn add_dispatch_complete_callback(&mut self, cb: impl FnMut() + 'static) {
        self.ctx.callbacks.dispatch_complete.push(Box::new(cb));
    }

    /// Executes a dispatch. Workgroups run to completion one at a time in
    /// ascending (z, y, x) order; within a workgroup, scheduling is the
    /// deterministic order described on [`Workgroup`].
    pub fn run(&mut self, workgroup_count: UVec3, bindings: &BindingList) -> Result<()> {
        let module = self.ctx.module.clone();
        if workgroup_count.count() == 0 {
            bail_setup!("dispatch requires at least one workgroup per dimension");
        }
        self.bind_buffers(&module, bindings)?;

        for cb in &mut self.ctx.callbacks.dispatch_begin {
            cb();
        }

        let mut groups = BTreeSet::new();
        for z in 0..workgroup_count.z {
            for y in 0..workgroup_count.y {
                for x in 0..workgroup_count.x {
                    groups.insert((z, y, x));
                }
            }
        }

        // Views past this mark belong to a single workgroup (its shared and
        // private allocations plus every accessor subview) and are released
        // when the workgroup finishes; binding roots stay.
        let view_mark = self.ctx.views.len();
        let mut steps = 0u64;
        'dispatch: for (z, y, x) in groups {
            let group_id = UVec3::new(x, y, z);
            log::debug!("scheduling workgroup {}", group_id);
            let mut workgroup = match Workgroup::new(
                &mut self.ctx,
                self.entry,
                group_id,
                self.workgroup_size,
                workgroup_count,
            ) {
                Ok(w) => w,
                Err(err) => {
                    self.ctx.set_fatal(err);
                    break 'dispatch;
                }
            };
            for cb in &mut self.ctx.callbacks.workgroup_begin {
                cb(group_id);
            }
            while !workgroup.is_finished() {
                if let Err(err) = workgroup.step(&mut self.ctx) {
                    self.ctx.set_fatal(err);
                    break 'dispatch;
                }
                self.ctx.flush_diags();
                steps += 1;
                if let Some(limit) = self.step_limit {
                    if steps > limit {
                        self.ctx.set_fatal(ExecError::RuntimeError(
                            "step limit exceeded".to_string(),
                            None,
                        ));
                        break 'dispatch;
                    }
                }
            }
            for cb in &mut self.ctx.callbacks.workgroup_complete {
                cb(group_id);
            }
            drop(workgroup);
            self.ctx.views.truncate(view_mark);
        }
        self.ctx.flush_diags();

        for cb in &mut self.ctx.callbacks.dispatch_complete {
            cb();
        }

        if let Some(fatal) = self.ctx.take_fatal() {
            self.ctx.diags.push(Diagnostic::error(fatal.to_string(), fatal.source()));
            self.ctx.flush_diags();
            return Err(fatal);
        }
        Ok(())
    }

    fn bind_buffers(&mut self, module: &Module, bindings: &BindingList) -> Result<()> {
        self.ctx.binding_views.clear();
        for (id, g) in module.globals.iter() {
            if !self.ctx.referenced.contains(&id) {
                continue;
            }
            if g.space != AddressSpace::Storage && g.space != AddressSpace::Uniform {
                continue;
            }
            let Some((group, binding)) = g.binding else {
                bail_binding!("variable '{}' has no binding attribute", g.name);
            };
            let Some(bound) = bindings.get(&(group, binding)) else {
                bail_binding!("missing binding for @group({}) @binding({})", group, binding);
            };
            let size = if has_runtime_extent(&module.types, g.ty) {
                bound.memory.borrow().size().saturating_sub(bound.offset)
            } else {
                module.types.size_of(g.ty) as u64
            };
            let view = self.ctx.views.create_root(
                bound.memory.clone(),
                g.space,
                g.ty,
                bound.offset,
                size,
                g.source,
            );
            self.ctx.binding_views.insert(id, view);
        }
        Ok(())
    }
}

/// Globals reachable from the entry point, its workgroup size, override
/// initializers, and override-sized workgroup array counts.
fn referenced_closure(module: &Module, entry: FuncId) -> HashSet<GlobalId> {
    let mut referenced = module.referenced_globals(entry);
    let mut funcs = Vec::new();
    for dim in module.funcs[entry].workgroup_size.iter().flatten() {
        module.collect_expr_refs(*dim, &mut referenced, &mut funcs);
    }
    loop {
        let before = referenced.len();
        for (id, g) in module.globals.iter() {
            if !referenced.contains(&id) {
                continue;
            }
            if let GlobalKind::Override { init: Some(init), .. } = &g.kind {
                module.collect_expr_refs(*init, &mut referenced, &mut funcs);
            }
            if g.space == AddressSpace::Workgroup {
                if let Type::Array { count: ArrayCount::Override(count), .. } = module.types[g.ty] {
                    module.collect_expr_refs(count, &mut referenced, &mut funcs);
                }
            }
        }
        if referenced.len() == before {
            break;
        }
    }
    referenced
}

/// True when the type's extent comes from the bound buffer rather than
/// the type itself.
fn has_runtime_extent(types: &TypeArena, ty: TypeHandle) -> bool {
    match &types[ty] {
        Type::Array { count: ArrayCount::Runtime, .. } => true,
        Type::Struct { members, .. } => {
            members.last().is_some_and(|m| has_runtime_extent(types, m.ty))
        }
        _ => false,
    }
}

/// Narrows a host-supplied double to the override's scalar type.
fn narrow_override(types: &TypeArena, ty: TypeHandle, host: f64, name: &str) -> Result<ConstValue> {
    match types.scalar_kind_of(ty) {
        Some(ScalarKind::Bool) => Ok(ConstValue::Bool(host != 0.0)),
        Some(ScalarKind::I32) => Ok(ConstValue::I32(number::f64_to_i32_clamped(host))),
        Some(ScalarKind::U32) => Ok(ConstValue::U32(number::f64_to_u32_clamped(host))),
        Some(ScalarKind::F32) => Ok(ConstValue::F32(host as f32)),
        Some(ScalarKind::F16) => Ok(ConstValue::F16(number::quantize_f16(host as f32))),
        None => bail_override!("override '{}' does not have a scalar type", name),
    }
}
