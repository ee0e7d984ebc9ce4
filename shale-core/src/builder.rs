//! Programmatic construction of executable modules.
//!
//! The builder plays the role of the front end: it interns types, computes
//! default storage layouts, folds literals, and assembles resolved
//! expression and statement nodes. Tests and the driver use it to write
//! shaders directly in Rust.

use crate::ast::*;
use crate::constant::ConstValue;
use crate::number;
use crate::source::Source;
use crate::types::{AddressSpace, ArrayCount, ScalarKind, StructMember, Type, TypeHandle};

pub struct ProgramBuilder {
    module: Module,
    current_source: Source,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let mut module = Module::default();
        // Pre-intern every type the interpreter may need to mint values of
        // at runtime; the module's type arena is immutable once built.
        module.types.intern(Type::Void);
        for kind in [ScalarKind::Bool, ScalarKind::I32, ScalarKind::U32, ScalarKind::F32, ScalarKind::F16] {
            module.types.intern(Type::Scalar(kind));
            for width in 2..=4 {
                module.types.intern(Type::Vector { elem: kind, width });
            }
        }
        ProgramBuilder { module, current_source: Source::default() }
    }

    /// Sets the source location attached to subsequently created nodes.
    pub fn at(&mut self, line: u32, col: u32) -> &mut Self {
        self.current_source = Source::new(line, col);
        self
    }

    pub fn build(self) -> Module {
        self.module
    }

    // Types

    pub fn ty_void(&self) -> TypeHandle {
        self.module.types.handle_for(&Type::Void).unwrap()
    }

    pub fn ty_bool(&self) -> TypeHandle {
        self.module.types.scalar(ScalarKind::Bool).unwrap()
    }

    pub fn ty_i32(&self) -> TypeHandle {
        self.module.types.scalar(ScalarKind::I32).unwrap()
    }

    pub fn ty_u32(&self) -> TypeHandle {
        self.module.types.scalar(ScalarKind::U32).unwrap()
    }

    pub fn ty_f32(&self) -> TypeHandle {
        self.module.types.scalar(ScalarKind::F32).unwrap()
    }

    pub fn ty_f16(&self) -> TypeHandle {
        self.module.types.scalar(ScalarKind::F16).unwrap()
    }

    pub fn ty_vec(&mut self, elem: ScalarKind, width: u32) -> TypeHandle {
        self.module.types.intern(Type::Vector { elem, width })
    }

    pub fn ty_mat(&mut self, columns: u32, rows: u32) -> TypeHandle {
        self.module.types.intern(Type::Vector { elem: ScalarKind::F32, width: rows });
        self.module.types.intern(Type::Matrix { columns, rows })
    }

    pub fn ty_array(&mut self, elem: TypeHandle, count: u32) -> TypeHandle {
        let stride = self.module.types.default_stride(elem);
        self.module.types.intern(Type::Array { elem, count: ArrayCount::Constant(count), stride })
    }

    pub fn ty_array_strided(&mut self, elem: TypeHandle, count: u32, stride: u32) -> TypeHandle {
        self.module.types.intern(Type::Array { elem, count: ArrayCount::Constant(count), stride })
    }

    pub fn ty_runtime_array(&mut self, elem: TypeHandle) -> TypeHandle {
        let stride = self.module.types.default_stride(elem);
        self.module.types.intern(Type::Array { elem, count: ArrayCount::Runtime, stride })
    }

    /// Array sized by an override-stage expression, usable for workgroup
    /// variables.
    pub fn ty_override_array(&mut self, elem: TypeHandle, count: ExprId) -> TypeHandle {
        let stride = self.module.types.default_stride(elem);
        self.module.types.intern(Type::Array { elem, count: ArrayCount::Override(count), stride })
    }

    pub fn ty_atomic(&mut self, elem: ScalarKind) -> TypeHandle {
        self.module.types.intern(Type::Atomic { elem })
    }

    pub fn ty_ptr(&mut self, space: AddressSpace, elem: TypeHandle) -> TypeHandle {
        self.module.types.intern(Type::Pointer { space, elem })
    }

    /// Struct with members laid out per default WGSL rules: each member at
    /// its alignment, struct size rounded up to struct alignment.
    pub fn ty_struct(&mut self, name: &str, members: &[(&str, TypeHandle)]) -> TypeHandle {
        let mut laid_out = Vec::with_capacity(members.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        for (member_name, ty) in members {
            let member_align = self.module.types.align_of(*ty);
            let member_size = self.module.types.size_of(*ty);
            offset = offset.div_ceil(member_align) * member_align;
            laid_out.push(StructMember { name: member_name.to_string(), ty: *ty, offset });
            offset += member_size;
            align = align.max(member_align);
        }
        let size = offset.div_ceil(align) * align;
        self.module.types.intern(Type::Struct {
            name: name.to_string(),
            members: laid_out,
            size,
            align,
        })
    }

    // Expressions

    fn expr(&mut self, kind: ExprKind, ty: TypeHandle, stage: Stage, constant: Option<ConstValue>) -> ExprId {
        self.module.exprs.push(Expression { kind, ty, stage, constant, source: self.current_source })
    }

    pub fn lit_bool(&mut self, value: bool) -> ExprId {
        let ty = self.ty_bool();
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(ConstValue::Bool(value)))
    }

    pub fn lit_i32(&mut self, value: i32) -> ExprId {
        let ty = self.ty_i32();
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(ConstValue::I32(value)))
    }

    pub fn lit_u32(&mut self, value: u32) -> ExprId {
        let ty = self.ty_u32();
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(ConstValue::U32(value)))
    }

    pub fn lit_f32(&mut self, value: f32) -> ExprId {
        let ty = self.ty_f32();
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(ConstValue::F32(value)))
    }

    pub fn lit_f16(&mut self, value: f32) -> ExprId {
        let ty = self.ty_f16();
        let quantized = number::quantize_f16(value);
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(ConstValue::F16(quantized)))
    }

    /// A pre-folded constant of an arbitrary type.
    pub fn constant(&mut self, value: ConstValue, ty: TypeHandle) -> ExprId {
        self.expr(ExprKind::Literal, ty, Stage::Constant, Some(value))
    }

    pub fn local(&mut self, local: LocalId) -> ExprId {
        let ty = self.module.locals[local].ty;
        self.expr(ExprKind::LocalRef(local), ty, Stage::Runtime, None)
    }

    pub fn global(&mut self, global: GlobalId) -> ExprId {
        let g = &self.module.globals[global];
        let ty = g.ty;
        let (stage, constant) = match &g.kind {
            GlobalKind::Const { value } => (Stage::Constant, Some(value.clone())),
            GlobalKind::Override { .. } => (Stage::Override, None),
            GlobalKind::Var { .. } => (Stage::Runtime, None),
        };
        self.expr(ExprKind::GlobalRef(global), ty, stage, constant)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        let ty = self.module.exprs[operand].ty;
        self.expr(ExprKind::Unary { op, expr: operand }, ty, Stage::Runtime, None)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let ty = self.binary_result_ty(op, lhs, rhs);
        self.expr(ExprKind::Binary { op, lhs, rhs }, ty, Stage::Runtime, None)
    }

    fn binary_result_ty(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> TypeHandle {
        let lhs_ty = self.module.exprs[lhs].ty;
        let rhs_ty = self.module.exprs[rhs].ty;
        let operand_ty = match (&self.module.types[lhs_ty], &self.module.types[rhs_ty]) {
            (_, Type::Vector { .. }) => rhs_ty,
            _ => lhs_ty,
        };
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => self.ty_bool(),
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::LessThan
            | BinaryOp::LessThanEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanEqual => match self.module.types[operand_ty] {
                Type::Vector { width, .. } => self.ty_vec(ScalarKind::Bool, width),
                _ => self.ty_bool(),
            },
            _ => operand_ty,
        }
    }

    pub fn index(&mut self, object: ExprId, index: ExprId) -> ExprId {
        let object_ty = self.module.exprs[object].ty;
        let inner = self.module.types.unwrap_pointer(object_ty);
        let ty = match &self.module.types[inner] {
            Type::Vector { elem, .. } => self.module.types.scalar(*elem).unwrap(),
            Type::Matrix { rows, .. } => self.module.types.vector(ScalarKind::F32, *rows).unwrap(),
            Type::Array { elem, .. } => *elem,
            _ => inner,
        };
        self.expr(ExprKind::Index { object, index }, ty, Stage::Runtime, None)
    }

    pub fn member(&mut self, object: ExprId, member: u32) -> ExprId {
        let object_ty = self.module.exprs[object].ty;
        let inner = self.module.types.unwrap_pointer(object_ty);
        let ty = match &self.module.types[inner] {
            Type::Struct { members, .. } => members[member as usize].ty,
            _ => inner,
        };
        self.expr(ExprKind::Member { object, member }, ty, Stage::Runtime, None)
    }

    pub fn swizzle(&mut self, object: ExprId, lanes: &[u32]) -> ExprId {
        let object_ty = self.module.exprs[object].ty;
        let inner = self.module.types.unwrap_pointer(object_ty);
        let elem = match &self.module.types[inner] {
            Type::Vector { elem, .. } => *elem,
            _ => ScalarKind::F32,
        };
        let ty = if lanes.len() == 1 {
            self.module.types.scalar(elem).unwrap()
        } else {
            self.ty_vec(elem, lanes.len() as u32)
        };
        self.expr(ExprKind::Swizzle { object, lanes: lanes.to_vec() }, ty, Stage::Runtime, None)
    }

    pub fn call(&mut self, func: FuncId, args: &[ExprId]) -> ExprId {
        let ty = self.module.funcs[func].ret_ty.unwrap_or_else(|| self.ty_void());
        self.expr(
            ExprKind::Call { target: CallTarget::Function(func), args: args.to_vec() },
            ty,
            Stage::Runtime,
            None,
        )
    }

    pub fn call_builtin(&mut self, builtin: BuiltinFn, args: &[ExprId], ty: TypeHandle) -> ExprId {
        self.expr(
            ExprKind::Call { target: CallTarget::Builtin(builtin), args: args.to_vec() },
            ty,
            Stage::Runtime,
            None,
        )
    }

    /// A `workgroupBarrier()` or `storageBarrier()` call expression.
    pub fn barrier(&mut self, builtin: BuiltinFn) -> ExprId {
        let ty = self.ty_void();
        self.call_builtin(builtin, &[], ty)
    }

    pub fn construct(&mut self, ty: TypeHandle, args: &[ExprId]) -> ExprId {
        self.expr(
            ExprKind::Call { target: CallTarget::Construct, args: args.to_vec() },
            ty,
            Stage::Runtime,
            None,
        )
    }

    pub fn convert(&mut self, ty: TypeHandle, arg: ExprId) -> ExprId {
        self.expr(ExprKind::Call { target: CallTarget::Convert, args: vec![arg] }, ty, Stage::Runtime, None)
    }

    pub fn bitcast(&mut self, ty: TypeHandle, arg: ExprId) -> ExprId {
        self.expr(ExprKind::Bitcast { expr: arg }, ty, Stage::Runtime, None)
    }

    pub fn addr_of(&mut self, expr: ExprId, space: AddressSpace) -> ExprId {
        let elem = self.module.exprs[expr].ty;
        let ty = self.ty_ptr(space, elem);
        self.expr(ExprKind::AddressOf { expr }, ty, Stage::Runtime, None)
    }

    pub fn deref(&mut self, expr: ExprId) -> ExprId {
        let ptr_ty = self.module.exprs[expr].ty;
        let ty = self.module.types.unwrap_pointer(ptr_ty);
        self.expr(ExprKind::Deref { expr }, ty, Stage::Runtime, None)
    }

    // Statements

    fn stmt(&mut self, kind: StmtKind) -> StmtId {
        self.module.stmts.push(Statement { kind, source: self.current_source })
    }

    fn local_var(&mut self, name: &str, ty: TypeHandle, kind: LocalKind) -> LocalId {
        self.module.locals.push(LocalVar {
            name: name.to_string(),
            ty,
            kind,
            source: self.current_source,
        })
    }

    pub fn decl_var(&mut self, name: &str, ty: TypeHandle, init: Option<ExprId>) -> (StmtId, LocalId) {
        let var = self.local_var(name, ty, LocalKind::Var);
        (self.stmt(StmtKind::VarDecl { var, init }), var)
    }

    pub fn decl_let(&mut self, name: &str, ty: TypeHandle, init: ExprId) -> (StmtId, LocalId) {
        let var = self.local_var(name, ty, LocalKind::Let);
        (self.stmt(StmtKind::LetDecl { var, init }), var)
    }

    pub fn assign(&mut self, lhs: ExprId, rhs: ExprId) -> StmtId {
        self.stmt(StmtKind::Assign { lhs, rhs })
    }

    pub fn compound_assign(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> StmtId {
        self.stmt(StmtKind::CompoundAssign { op, lhs, rhs })
    }

    pub fn increment(&mut self, lhs: ExprId) -> StmtId {
        self.stmt(StmtKind::Increment { lhs })
    }

    pub fn decrement(&mut self, lhs: ExprId) -> StmtId {
        self.stmt(StmtKind::Decrement { lhs })
    }

    pub fn phony(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Phony { expr })
    }

    pub fn call_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::CallStmt { expr })
    }

    pub fn block(&mut self, stmts: &[StmtId]) -> BlockId {
        self.module.blocks.push(Block { stmts: stmts.to_vec() })
    }

    pub fn block_stmt(&mut self, block: BlockId) -> StmtId {
        self.stmt(StmtKind::Block(block))
    }

    pub fn if_stmt(&mut self, condition: ExprId, then_block: BlockId, else_stmt: Option<StmtId>) -> StmtId {
        self.stmt(StmtKind::If { condition, then_block, else_stmt })
    }

    pub fn case(&mut self, selectors: &[CaseSelector], body: BlockId) -> SwitchCase {
        SwitchCase { selectors: selectors.to_vec(), body, source: self.current_source }
    }

    pub fn switch(&mut self, condition: ExprId, cases: Vec<SwitchCase>) -> StmtId {
        self.stmt(StmtKind::Switch { condition, cases })
    }

    pub fn for_loop(
        &mut self,
        initializer: Option<StmtId>,
        condition: Option<ExprId>,
        continuing: Option<StmtId>,
        body: BlockId,
    ) -> StmtId {
        self.stmt(StmtKind::ForLoop { initializer, condition, continuing, body })
    }

    pub fn while_loop(&mut self, condition: ExprId, body: BlockId) -> StmtId {
        self.stmt(StmtKind::While { condition, body })
    }

    pub fn loop_stmt(&mut self, body: BlockId, continuing: Option<BlockId>) -> StmtId {
        self.stmt(StmtKind::Loop { body, continuing })
    }

    pub fn brk(&mut self) -> StmtId {
        self.stmt(StmtKind::Break)
    }

    pub fn cont(&mut self) -> StmtId {
        self.stmt(StmtKind::Continue)
    }

    pub fn break_if(&mut self, condition: ExprId) -> StmtId {
        self.stmt(StmtKind::BreakIf { condition })
    }

    pub fn ret(&mut self, value: Option<ExprId>) -> StmtId {
        self.stmt(StmtKind::Return { value })
    }

    // Functions

    pub fn param(&mut self, name: &str, ty: TypeHandle, builtin: Option<BuiltinValue>) -> Param {
        let local = self.local_var(name, ty, LocalKind::Param);
        Param { local, builtin }
    }

    pub fn function(
        &mut self,
        name: &str,
        params: Vec<Param>,
        ret_ty: Option<TypeHandle>,
        body: BlockId,
    ) -> FuncId {
        self.module.funcs.push(Function {
            name: name.to_string(),
            params,
            ret_ty,
            body,
            stage: FunctionStage::None,
            workgroup_size: [None, None, None],
            source: self.current_source,
        })
    }

    pub fn entry_point(
        &mut self,
        name: &str,
        workgroup_size: [Option<ExprId>; 3],
        params: Vec<Param>,
        body: BlockId,
    ) -> FuncId {
        self.module.funcs.push(Function {
            name: name.to_string(),
            params,
            ret_ty: None,
            body,
            stage: FunctionStage::Compute,
            workgroup_size,
            source: self.current_source,
        })
    }

    // Globals

    pub fn global_var(
        &mut self,
        name: &str,
        space: AddressSpace,
        ty: TypeHandle,
        binding: Option<(u32, u32)>,
        init: Option<ExprId>,
    ) -> GlobalId {
        self.module.globals.push(GlobalVar {
            name: name.to_string(),
            ty,
            space,
            binding,
            kind: GlobalKind::Var { init },
            source: self.current_source,
        })
    }

    pub fn override_var(
        &mut self,
        name: &str,
        id: Option<u32>,
        ty: TypeHandle,
        init: Option<ExprId>,
    ) -> GlobalId {
        self.module.globals.push(GlobalVar {
            name: name.to_string(),
            ty,
            space: AddressSpace::Undefined,
            binding: None,
            kind: GlobalKind::Override { id, init },
            source: self.current_source,
        })
    }

    pub fn const_var(&mut self, name: &str, ty: TypeHandle, value: ConstValue) -> GlobalId {
        self.module.globals.push(GlobalVar {
            name: name.to_string(),
            ty,
            space: AddressSpace::Undefined,
            binding: None,
            kind: GlobalKind::Const { value },
            source: self.current_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_aligns_members() {
        let mut b = ProgramBuilder::new();
        let f32_ty = b.ty_f32();
        let v3 = b.ty_vec(ScalarKind::F32, 3);
        let s = b.ty_struct("S", &[("a", f32_ty), ("b", v3), ("c", f32_ty)]);
        let module = b.build();
        let Type::Struct { members, size, align, .. } = &module.types[s] else {
            panic!("expected a struct");
        };
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 16); // vec3 aligns to 16
        assert_eq!(members[2].offset, 28);
        assert_eq!(*align, 16);
        assert_eq!(*size, 32);
    }

    #[test]
    fn comparison_exprs_are_bool_typed() {
        let mut b = ProgramBuilder::new();
        let one = b.lit_i32(1);
        let two = b.lit_i32(2);
        let cmp = b.binary(BinaryOp::LessThan, one, two);
        let bool_ty = b.ty_bool();
        let module = b.build();
        assert_eq!(module.exprs[cmp].ty, bool_ty);
    }

    #[test]
    fn index_into_array_yields_element_type() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let arr_ty = b.ty_array(i32_ty, 4);
        let (_, x) = b.decl_var("x", arr_ty, None);
        let x_ref = b.local(x);
        let idx = b.lit_i32(1);
        let elem = b.index(x_ref, idx);
        let module = b.build();
        assert_eq!(module.exprs[elem].ty, i32_ty);
    }
}
