//! Linear memory allocations and the typed views the interpreter accesses
//! them through.
//!
//! A [`Memory`] is a flat little-endian byte buffer. A [`MemoryView`] is a
//! typed window into one, created either as the root view of an allocation
//! or as a subview of another view. Validity is decided at creation time:
//! a subview that escapes its parent's extent is marked invalid, and every
//! access through it is diagnosed and substituted (loads produce zero,
//! stores are dropped) instead of failing execution.

use crate::arena::{Arena, Handle};
use crate::constant::ConstValue;
use crate::diag::Diagnostic;
use crate::error::Result;
use crate::executor::ExecCtx;
use crate::number;
use crate::source::Source;
use crate::types::{AddressSpace, ArrayCount, ScalarKind, Type, TypeArena, TypeHandle};
use crate::bail_runtime;
use std::cell::RefCell;
use std::rc::Rc;

/// An allocation, zero-initialized.
#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
}

pub type SharedMemory = Rc<RefCell<Memory>>;

impl Memory {
    pub fn new(size: u64) -> Memory {
        Memory { bytes: vec![0; size as usize] }
    }

    pub fn new_shared(size: u64) -> SharedMemory {
        Rc::new(RefCell::new(Memory::new(size)))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Accessors index directly; callers reach them through views whose
    /// bounds were checked at creation time.
    pub fn load_u32(&self, offset: u64) -> u32 {
        let i = offset as usize;
        u32::from_le_bytes([self.bytes[i], self.bytes[i + 1], self.bytes[i + 2], self.bytes[i + 3]])
    }

    pub fn store_u32(&mut self, offset: u64, value: u32) {
        let i = offset as usize;
        self.bytes[i..i + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn load_u16(&self, offset: u64) -> u16 {
        let i = offset as usize;
        u16::from_le_bytes([self.bytes[i], self.bytes[i + 1]])
    }

    pub fn store_u16(&mut self, offset: u64, value: u16) {
        let i = offset as usize;
        self.bytes[i..i + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn load_f32(&self, offset: u64) -> f32 {
        f32::from_bits(self.load_u32(offset))
    }

    pub fn store_f32(&mut self, offset: u64, value: f32) {
        self.store_u32(offset, value.to_bits());
    }

    /// Copies a byte range from another allocation. Returns false and
    /// leaves this allocation untouched when either range is out of bounds.
    pub fn copy_from(&mut self, dst_offset: u64, src: &Memory, src_offset: u64, len: u64) -> bool {
        if dst_offset + len > self.size() || src_offset + len > src.size() {
            return false;
        }
        let (d, s, n) = (dst_offset as usize, src_offset as usize, len as usize);
        self.bytes[d..d + n].copy_from_slice(&src.bytes[s..s + n]);
        true
    }
}

pub type ViewId = Handle<MemoryView>;

/// A typed window into an allocation. `offset` is absolute within the
/// allocation; the parent chain is kept only for diagnostics.
#[derive(Debug, Clone)]
pub struct MemoryView {
    pub memory: SharedMemory,
    pub parent: Option<ViewId>,
    pub space: AddressSpace,
    pub ty: TypeHandle,
    pub offset: u64,
    pub size: u64,
    pub valid: bool,
    /// Where the view was created, for out-of-bounds blame.
    pub source: Source,
}

#[derive(Debug, Default)]
pub struct ViewArena {
    views: Arena<MemoryView>,
}

impl ViewArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root view of an allocation. A root whose extent escapes the
    /// allocation (an undersized binding, say) is created invalid rather
    /// than rejected.
    pub fn create_root(
        &mut self,
        memory: SharedMemory,
        space: AddressSpace,
        ty: TypeHandle,
        offset: u64,
        size: u64,
        source: Source,
    ) -> ViewId {
        let valid = offset + size <= memory.borrow().size();
        self.views.push(MemoryView { memory, parent: None, space, ty, offset, size, valid, source })
    }

    /// Subview at a byte offset relative to the parent. Invalidity is
    /// sticky: a child of an invalid view is invalid no matter its range.
    pub fn create_subview(
        &mut self,
        parent: ViewId,
        rel_offset: u64,
        ty: TypeHandle,
        size: u64,
        source: Source,
    ) -> ViewId {
        let p = &self.views[parent];
        let valid = p.valid && rel_offset + size <= p.size;
        let view = MemoryView {
            memory: p.memory.clone(),
            parent: Some(parent),
            space: p.space,
            ty,
            offset: p.offset + rel_offset,
            size,
            valid,
            source,
        };
        self.views.push(view)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Releases every view created at or past `mark`, along with the
    /// allocations those views were keeping alive. Handles issued past the
    /// mark must not be used afterwards.
    pub fn truncate(&mut self, mark: usize) {
        self.views.truncate(mark);
    }

    pub fn root_of(&self, mut view: ViewId) -> ViewId {
        while let Some(parent) = self.views[view].parent {
            view = parent;
        }
        view
    }

    /// The view closest to the root that is already invalid. `None` when
    /// the whole chain is valid.
    pub fn first_invalid(&self, view: ViewId) -> Option<ViewId> {
        let mut chain = vec![view];
        while let Some(parent) = self.views[*chain.last().unwrap()].parent {
            chain.push(parent);
        }
        chain.into_iter().rev().find(|&v| !self.views[v].valid)
    }
}

impl std::ops::Index<ViewId> for ViewArena {
    type Output = MemoryView;

    fn index(&self, view: ViewId) -> &MemoryView {
        &self.views[view]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Sub,
    Max,
    Min,
    And,
    Or,
    Xor,
    Exchange,
}

impl ExecCtx {
    /// Loads the typed value a view refers to. An invalid view is diagnosed
    /// and yields the zero value of the view's type.
    pub fn view_load(&mut self, view: ViewId, source: Source) -> Result<ConstValue> {
        let module = self.module.clone();
        let v = &self.views[view];
        if !v.valid {
            let ty = v.ty;
            self.report_out_of_bounds("load", view, source);
            return ConstValue::zero(&module.types, ty);
        }
        let (memory, ty, offset, extent, space) = (v.memory.clone(), v.ty, v.offset, v.size, v.space);
        self.notify_load(space, offset, extent, source);
        let mem = memory.borrow();
        self.load_value(&module.types, &mem, ty, offset, extent, source)
    }

    fn load_value(
        &mut self,
        types: &TypeArena,
        mem: &Memory,
        ty: TypeHandle,
        offset: u64,
        extent: u64,
        source: Source,
    ) -> Result<ConstValue> {
        match &types[ty] {
            Type::Scalar(kind) | Type::Atomic { elem: kind } => {
                self.load_scalar(mem, *kind, offset, source)
            }
            Type::Vector { elem, width } => {
                let elems = (0..*width)
                    .map(|i| self.load_scalar(mem, *elem, offset + (i * elem.size()) as u64, source))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty, elems })
            }
            Type::Matrix { columns, rows } => {
                let Some(column_ty) = types.vector(ScalarKind::F32, *rows) else {
                    bail_runtime!("matrix column type is not registered");
                };
                let stride = types.column_stride(*rows) as u64;
                let elems = (0..*columns)
                    .map(|i| {
                        self.load_value(types, mem, column_ty, offset + i as u64 * stride, stride, source)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty, elems })
            }
            Type::Array { elem, count, stride } => {
                let stride = *stride as u64;
                // Runtime-sized and override-sized arrays take their count
                // from the extent of the view that holds them.
                let n = match count {
                    ArrayCount::Constant(n) => *n as u64,
                    _ => extent / stride,
                };
                let elems = (0..n)
                    .map(|i| self.load_value(types, mem, *elem, offset + i * stride, stride, source))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty, elems })
            }
            Type::Struct { members, .. } => {
                let elems = members
                    .iter()
                    .map(|m| {
                        let extent = types.size_of(m.ty) as u64;
                        self.load_value(types, mem, m.ty, offset + m.offset as u64, extent, source)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty, elems })
            }
            _ => bail_runtime!("cannot load a value of type '{}'", types.display(ty)),
        }
    }

    /// Non-finite float bit patterns are not producible by WGSL arithmetic,
    /// only by bad buffer contents; they load as a diagnosed zero.
    fn load_scalar(
        &mut self,
        mem: &Memory,
        kind: ScalarKind,
        offset: u64,
        source: Source,
    ) -> Result<ConstValue> {
        Ok(match kind {
            ScalarKind::Bool => ConstValue::Bool(mem.load_u32(offset) != 0),
            ScalarKind::I32 => ConstValue::I32(mem.load_u32(offset) as i32),
            ScalarKind::U32 => ConstValue::U32(mem.load_u32(offset)),
            ScalarKind::F32 => {
                let value = mem.load_f32(offset);
                if value.is_finite() {
                    ConstValue::F32(value)
                } else {
                    self.diags.push(Diagnostic::warning(
                        "non-finite value loaded from memory",
                        Some(source),
                    ));
                    ConstValue::F32(0.0)
                }
            }
            ScalarKind::F16 => {
                let value = number::f16_bits_to_f32(mem.load_u16(offset));
                if value.is_finite() {
                    ConstValue::F16(value)
                } else {
                    self.diags.push(Diagnostic::warning(
                        "non-finite value loaded from memory",
                        Some(source),
                    ));
                    ConstValue::F16(0.0)
                }
            }
        })
    }

    /// Stores a typed value through a view. An invalid view is diagnosed
    /// and the store is dropped.
    pub fn view_store(&mut self, view: ViewId, value: &ConstValue, source: Source) -> Result<()> {
        let module = self.module.clone();
        let v = &self.views[view];
        if !v.valid {
            self.report_out_of_bounds("store", view, source);
            return Ok(());
        }
        let (memory, ty, offset, extent, space) = (v.memory.clone(), v.ty, v.offset, v.size, v.space);
        if !value.matches_type(&module.types, ty) {
            bail_runtime!("mismatched value type for store to '{}'", module.types.display(ty));
        }
        self.notify_store(space, offset, extent, source);
        let mut mem = memory.borrow_mut();
        self.store_value(&module.types, &mut mem, ty, offset, extent, value)
    }

    fn store_value(
        &mut self,
        types: &TypeArena,
        mem: &mut Memory,
        ty: TypeHandle,
        offset: u64,
        extent: u64,
        value: &ConstValue,
    ) -> Result<()> {
        match &types[ty] {
            Type::Scalar(kind) | Type::Atomic { elem: kind } => store_scalar(mem, *kind, offset, value),
            Type::Vector { elem, .. } => {
                let ConstValue::Composite { elems, .. } = value else {
                    bail_runtime!("mismatched vector store value");
                };
                for (i, e) in elems.iter().enumerate() {
                    store_scalar(mem, *elem, offset + (i as u32 * elem.size()) as u64, e)?;
                }
                Ok(())
            }
            Type::Matrix { rows, .. } => {
                let ConstValue::Composite { elems, .. } = value else {
                    bail_runtime!("mismatched matrix store value");
                };
                let Some(column_ty) = types.vector(ScalarKind::F32, *rows) else {
                    bail_runtime!("matrix column type is not registered");
                };
                let stride = types.column_stride(*rows) as u64;
                for (i, column) in elems.iter().enumerate() {
                    self.store_value(types, mem, column_ty, offset + i as u64 * stride, stride, column)?;
                }
                Ok(())
            }
            Type::Array { elem, count, stride } => {
                let ConstValue::Composite { elems, .. } = value else {
                    bail_runtime!("mismatched array store value");
                };
                let stride = *stride as u64;
                if let ArrayCount::Constant(n) = count {
                    if elems.len() != *n as usize {
                        bail_runtime!("mismatched array store length");
                    }
                }
                let _ = extent;
                for (i, e) in elems.iter().enumerate() {
                    self.store_value(types, mem, *elem, offset + i as u64 * stride, stride, e)?;
                }
                Ok(())
            }
            Type::Struct { members, .. } => {
                let ConstValue::Composite { elems, .. } = value else {
                    bail_runtime!("mismatched struct store value");
                };
                for (m, e) in members.iter().zip(elems) {
                    let extent = types.size_of(m.ty) as u64;
                    self.store_value(types, mem, m.ty, offset + m.offset as u64, extent, e)?;
                }
                Ok(())
            }
            _ => bail_runtime!("cannot store a value of type '{}'", types.display(ty)),
        }
    }

    pub fn atomic_load(&mut self, view: ViewId, source: Source) -> Result<ConstValue> {
        let kind = self.atomic_kind(view)?;
        let v = &self.views[view];
        if !v.valid {
            self.report_out_of_bounds("load", view, source);
            return Ok(ConstValue::zero_scalar(kind));
        }
        let (memory, offset, space) = (v.memory.clone(), v.offset, v.space);
        self.notify_load(space, offset, 4, source);
        let word = memory.borrow().load_u32(offset);
        Ok(atomic_value(kind, word))
    }

    pub fn atomic_store(&mut self, view: ViewId, value: &ConstValue, source: Source) -> Result<()> {
        let kind = self.atomic_kind(view)?;
        let v = &self.views[view];
        if !v.valid {
            self.report_out_of_bounds("store", view, source);
            return Ok(());
        }
        let (memory, offset, space) = (v.memory.clone(), v.offset, v.space);
        self.notify_store(space, offset, 4, source);
        memory.borrow_mut().store_u32(offset, atomic_word(kind, value)?);
        Ok(())
    }

    /// Read-modify-write; returns the old value.
    pub fn atomic_rmw(
        &mut self,
        view: ViewId,
        op: AtomicOp,
        value: &ConstValue,
        source: Source,
    ) -> Result<ConstValue> {
        let kind = self.atomic_kind(view)?;
        let v = &self.views[view];
        if !v.valid {
            self.report_out_of_bounds("store", view, source);
            return Ok(ConstValue::zero_scalar(kind));
        }
        let (memory, offset, space) = (v.memory.clone(), v.offset, v.space);
        self.notify_load(space, offset, 4, source);
        self.notify_store(space, offset, 4, source);
        let mut mem = memory.borrow_mut();
        let old = mem.load_u32(offset);
        let arg = atomic_word(kind, value)?;
        let new = match (op, kind) {
            (AtomicOp::Add, _) => old.wrapping_add(arg),
            (AtomicOp::Sub, _) => old.wrapping_sub(arg),
            (AtomicOp::Max, ScalarKind::I32) => (old as i32).max(arg as i32) as u32,
            (AtomicOp::Max, _) => old.max(arg),
            (AtomicOp::Min, ScalarKind::I32) => (old as i32).min(arg as i32) as u32,
            (AtomicOp::Min, _) => old.min(arg),
            (AtomicOp::And, _) => old & arg,
            (AtomicOp::Or, _) => old | arg,
            (AtomicOp::Xor, _) => old ^ arg,
            (AtomicOp::Exchange, _) => arg,
        };
        mem.store_u32(offset, new);
        Ok(atomic_value(kind, old))
    }

    /// Returns `result_ty{old_value, exchanged}`.
    pub fn atomic_compare_exchange(
        &mut self,
        view: ViewId,
        cmp: &ConstValue,
        value: &ConstValue,
        result_ty: TypeHandle,
        source: Source,
    ) -> Result<ConstValue> {
        let kind = self.atomic_kind(view)?;
        let v = &self.views[view];
        if !v.valid {
            self.report_out_of_bounds("store", view, source);
            return Ok(ConstValue::Composite {
                ty: result_ty,
                elems: vec![ConstValue::zero_scalar(kind), ConstValue::Bool(false)],
            });
        }
        let (memory, offset, space) = (v.memory.clone(), v.offset, v.space);
        self.notify_load(space, offset, 4, source);
        let mut mem = memory.borrow_mut();
        let old = mem.load_u32(offset);
        let exchanged = old == atomic_word(kind, cmp)?;
        if exchanged {
            drop(mem);
            self.notify_store(space, offset, 4, source);
            memory.borrow_mut().store_u32(offset, atomic_word(kind, value)?);
        }
        Ok(ConstValue::Composite {
            ty: result_ty,
            elems: vec![atomic_value(kind, old), ConstValue::Bool(exchanged)],
        })
    }

    fn atomic_kind(&self, view: ViewId) -> Result<ScalarKind> {
        let ty = self.views[view].ty;
        match self.module.types.unwrap_atomic(ty) {
            Some(kind) => Ok(kind),
            None => bail_runtime!(
                "atomic operation on non-atomic type '{}'",
                self.module.types.display(ty)
            ),
        }
    }

    /// Diagnoses an access through an invalid view: a warning naming the
    /// operation, a note blaming the root allocation, and a note blaming
    /// the first view in the chain that went out of range.
    pub fn report_out_of_bounds(&mut self, op: &str, view: ViewId, source: Source) {
        self.diags
            .push(Diagnostic::warning(format!("out-of-bounds memory {}", op), Some(source)));
        let root = self.views.root_of(view);
        let root_view = &self.views[root];
        self.diags.push(Diagnostic::note(
            format!(
                "accessing {} byte allocation in '{}' address space",
                root_view.memory.borrow().size(),
                root_view.space
            ),
            Some(root_view.source),
        ));
        if let Some(culprit) = self.views.first_invalid(view) {
            let culprit_view = &self.views[culprit];
            let rel = culprit_view.offset
                - culprit_view.parent.map_or(0, |p| self.views[p].offset);
            self.diags.push(Diagnostic::note(
                format!("created a {} byte view at offset {}", culprit_view.size, rel),
                Some(culprit_view.source),
            ));
        }
    }
}

fn atomic_value(kind: ScalarKind, word: u32) -> ConstValue {
    match kind {
        ScalarKind::I32 => ConstValue::I32(word as i32),
        _ => ConstValue::U32(word),
    }
}

fn atomic_word(kind: ScalarKind, value: &ConstValue) -> Result<u32> {
    match (kind, value) {
        (ScalarKind::I32, ConstValue::I32(v)) => Ok(*v as u32),
        (ScalarKind::U32, ConstValue::U32(v)) => Ok(*v),
        _ => bail_runtime!("mismatched atomic operand type"),
    }
}

fn store_scalar(mem: &mut Memory, kind: ScalarKind, offset: u64, value: &ConstValue) -> Result<()> {
    match (kind, value) {
        (ScalarKind::Bool, ConstValue::Bool(b)) => mem.store_u32(offset, *b as u32),
        (ScalarKind::I32, ConstValue::I32(v)) => mem.store_u32(offset, *v as u32),
        (ScalarKind::U32, ConstValue::U32(v)) => mem.store_u32(offset, *v),
        (ScalarKind::F32, ConstValue::F32(v)) => mem.store_f32(offset, *v),
        (ScalarKind::F16, ConstValue::F16(v)) => mem.store_u16(offset, number::f32_to_f16_bits(*v)),
        _ => bail_runtime!("mismatched scalar store value"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::diag::Severity;
    use std::rc::Rc;

    fn ctx_with(b: ProgramBuilder) -> ExecCtx {
        ExecCtx::new(Rc::new(b.build()))
    }

    #[test]
    fn typed_round_trip() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let arr = b.ty_array(i32_ty, 4);
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(16);
        let view = ctx.views.create_root(
            memory,
            AddressSpace::Storage,
            arr,
            0,
            16,
            Source::default(),
        );
        let value = ConstValue::Composite {
            ty: arr,
            elems: vec![
                ConstValue::I32(10),
                ConstValue::I32(-20),
                ConstValue::I32(30),
                ConstValue::I32(-40),
            ],
        };
        ctx.view_store(view, &value, Source::default()).unwrap();
        assert_eq!(ctx.view_load(view, Source::default()).unwrap(), value);
        assert!(ctx.take_diags().is_empty());
    }

    #[test]
    fn strided_array_elements_do_not_overlap() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let arr = b.ty_array_strided(i32_ty, 2, 8);
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(16);
        let view = ctx.views.create_root(
            memory.clone(),
            AddressSpace::Storage,
            arr,
            0,
            16,
            Source::default(),
        );
        let value = ConstValue::Composite {
            ty: arr,
            elems: vec![ConstValue::I32(7), ConstValue::I32(9)],
        };
        ctx.view_store(view, &value, Source::default()).unwrap();
        assert_eq!(memory.borrow().load_u32(0), 7);
        assert_eq!(memory.borrow().load_u32(8), 9);
    }

    #[test]
    fn out_of_bounds_load_yields_zero_and_blame_chain() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let arr = b.ty_array(i32_ty, 2);
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(8);
        let root = ctx.views.create_root(
            memory,
            AddressSpace::Storage,
            arr,
            0,
            8,
            Source::new(1, 1),
        );
        // Element 3 of a 2-element array.
        let bad = ctx.views.create_subview(root, 12, i32_ty, 4, Source::new(4, 9));
        let loaded = ctx.view_load(bad, Source::new(4, 9)).unwrap();
        assert_eq!(loaded, ConstValue::I32(0));
        let diags = ctx.take_diags();
        assert_eq!(diags.len(), 3);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].message, "out-of-bounds memory load");
        assert_eq!(diags[1].message, "accessing 8 byte allocation in 'storage' address space");
        assert_eq!(diags[2].message, "created a 4 byte view at offset 12");
    }

    #[test]
    fn invalidity_is_sticky_for_subviews() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let arr = b.ty_array(i32_ty, 2);
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(8);
        let root = ctx.views.create_root(
            memory,
            AddressSpace::Function,
            arr,
            0,
            8,
            Source::default(),
        );
        let bad = ctx.views.create_subview(root, 16, arr, 8, Source::default());
        // In range of the invalid parent, still invalid.
        let child = ctx.views.create_subview(bad, 0, i32_ty, 4, Source::default());
        assert!(!ctx.views[child].valid);
        ctx.view_store(child, &ConstValue::I32(1), Source::default()).unwrap();
        assert!(!ctx.take_diags().is_empty());
    }

    #[test]
    fn out_of_bounds_store_is_dropped() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(4);
        let root = ctx.views.create_root(
            memory.clone(),
            AddressSpace::Storage,
            i32_ty,
            0,
            4,
            Source::default(),
        );
        let bad = ctx.views.create_subview(root, 4, i32_ty, 4, Source::default());
        ctx.view_store(bad, &ConstValue::I32(99), Source::default()).unwrap();
        assert_eq!(memory.borrow().load_u32(0), 0);
        assert_eq!(ctx.take_diags()[0].message, "out-of-bounds memory store");
    }

    #[test]
    fn atomic_rmw_returns_old_value() {
        let mut b = ProgramBuilder::new();
        let atomic = b.ty_atomic(ScalarKind::U32);
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(4);
        let view = ctx.views.create_root(
            memory,
            AddressSpace::Workgroup,
            atomic,
            0,
            4,
            Source::default(),
        );
        ctx.atomic_store(view, &ConstValue::U32(5), Source::default()).unwrap();
        let old = ctx
            .atomic_rmw(view, AtomicOp::Add, &ConstValue::U32(3), Source::default())
            .unwrap();
        assert_eq!(old, ConstValue::U32(5));
        assert_eq!(ctx.atomic_load(view, Source::default()).unwrap(), ConstValue::U32(8));
    }

    #[test]
    fn compare_exchange_reports_outcome() {
        let mut b = ProgramBuilder::new();
        let i32_ty = b.ty_i32();
        let bool_ty = b.ty_bool();
        let atomic = b.ty_atomic(ScalarKind::I32);
        let result_ty = b.ty_struct(
            "__atomic_compare_exchange_result",
            &[("old_value", i32_ty), ("exchanged", bool_ty)],
        );
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(4);
        let view = ctx.views.create_root(
            memory,
            AddressSpace::Storage,
            atomic,
            0,
            4,
            Source::default(),
        );
        ctx.atomic_store(view, &ConstValue::I32(7), Source::default()).unwrap();

        let miss = ctx
            .atomic_compare_exchange(
                view,
                &ConstValue::I32(3),
                &ConstValue::I32(1),
                result_ty,
                Source::default(),
            )
            .unwrap();
        assert_eq!(miss.index(0), Some(&ConstValue::I32(7)));
        assert_eq!(miss.index(1), Some(&ConstValue::Bool(false)));

        let hit = ctx
            .atomic_compare_exchange(
                view,
                &ConstValue::I32(7),
                &ConstValue::I32(1),
                result_ty,
                Source::default(),
            )
            .unwrap();
        assert_eq!(hit.index(1), Some(&ConstValue::Bool(true)));
        assert_eq!(ctx.atomic_load(view, Source::default()).unwrap(), ConstValue::I32(1));
    }

    #[test]
    fn non_finite_float_load_is_diagnosed() {
        let mut b = ProgramBuilder::new();
        let f32_ty = b.ty_f32();
        let mut ctx = ctx_with(b);
        let memory = Memory::new_shared(4);
        memory.borrow_mut().store_u32(0, f32::NAN.to_bits());
        let view = ctx.views.create_root(
            memory,
            AddressSpace::Storage,
            f32_ty,
            0,
            4,
            Source::default(),
        );
        assert_eq!(ctx.view_load(view, Source::default()).unwrap(), ConstValue::F32(0.0));
        let diags = ctx.take_diags();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "non-finite value loaded from memory");
    }

    #[test]
    fn copy_between_allocations_checks_bounds() {
        let mut dst = Memory::new(8);
        let mut src = Memory::new(8);
        src.store_u32(4, 0xdead_beef);
        assert!(dst.copy_from(0, &src, 4, 4));
        assert_eq!(dst.load_u32(0), 0xdead_beef);
        assert!(!dst.copy_from(6, &src, 0, 4));
        assert_eq!(dst.load_u32(4), 0);
    }
}
