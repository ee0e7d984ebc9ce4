//! The interpreter's view of WGSL types: an interned, closed type enum with
//! storage layout (size, alignment, array stride) and WGSL-syntax display
//! names used by diagnostics and the value stringifier.

use crate::arena::Handle;
use crate::ast::Expression;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

pub type TypeHandle = Handle<Type>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I32,
    U32,
    F32,
    F16,
}

impl ScalarKind {
    pub fn size(self) -> u32 {
        match self {
            ScalarKind::F16 => 2,
            _ => 4,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::I32 => write!(f, "i32"),
            ScalarKind::U32 => write!(f, "u32"),
            ScalarKind::F32 => write!(f, "f32"),
            ScalarKind::F16 => write!(f, "f16"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    Undefined,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Function => write!(f, "function"),
            AddressSpace::Private => write!(f, "private"),
            AddressSpace::Workgroup => write!(f, "workgroup"),
            AddressSpace::Uniform => write!(f, "uniform"),
            AddressSpace::Storage => write!(f, "storage"),
            AddressSpace::Undefined => write!(f, "undefined"),
        }
    }
}

/// Element count of an array type.
///
/// `Override` carries the count expression; it is evaluated at pipeline
/// setup when the workgroup allocation is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayCount {
    Constant(u32),
    Runtime,
    Override(Handle<Expression>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeHandle,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Result type of calls to functions with no return value.
    Void,
    Scalar(ScalarKind),
    Vector { elem: ScalarKind, width: u32 },
    /// Column-major matrix of f32 columns.
    Matrix { columns: u32, rows: u32 },
    Atomic { elem: ScalarKind },
    Array { elem: TypeHandle, count: ArrayCount, stride: u32 },
    Struct { name: String, members: Vec<StructMember>, size: u32, align: u32 },
    Pointer { space: AddressSpace, elem: TypeHandle },
}

/// Interned type storage. Structurally equal types share a handle, so type
/// equality checks at runtime are handle comparisons.
#[derive(Debug, Clone, Default)]
pub struct TypeArena {
    types: Vec<Type>,
    lookup: HashMap<Type, TypeHandle>,
}

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, ty: Type) -> TypeHandle {
        if let Some(&handle) = self.lookup.get(&ty) {
            return handle;
        }
        let handle = Handle::new(self.types.len() as u32);
        self.types.push(ty.clone());
        self.lookup.insert(ty, handle);
        handle
    }

    /// Looks up the handle of an already-interned type without inserting.
    /// The module is immutable while shaders run, so any type the
    /// interpreter mints values of must be interned at build time.
    pub fn handle_for(&self, ty: &Type) -> Option<TypeHandle> {
        self.lookup.get(ty).copied()
    }

    pub fn scalar(&self, kind: ScalarKind) -> Option<TypeHandle> {
        self.handle_for(&Type::Scalar(kind))
    }

    pub fn vector(&self, elem: ScalarKind, width: u32) -> Option<TypeHandle> {
        self.handle_for(&Type::Vector { elem, width })
    }

    /// Byte size of a type in its address space layout. Runtime-sized and
    /// override-sized arrays report one element stride; their real extent
    /// comes from the view or allocation that holds them.
    pub fn size_of(&self, handle: TypeHandle) -> u32 {
        match &self[handle] {
            Type::Void => 0,
            Type::Scalar(kind) => kind.size(),
            Type::Vector { elem, width } => elem.size() * width,
            Type::Matrix { columns, rows } => columns * self.column_stride(*rows),
            Type::Atomic { .. } => 4,
            Type::Array { count: ArrayCount::Constant(n), stride, .. } => stride * n,
            Type::Array { stride, .. } => *stride,
            Type::Struct { size, .. } => *size,
            Type::Pointer { .. } => 4,
        }
    }

    pub fn align_of(&self, handle: TypeHandle) -> u32 {
        match &self[handle] {
            Type::Void => 1,
            Type::Scalar(kind) => kind.size(),
            Type::Vector { elem, width } => {
                let width = if *width == 3 { 4 } else { *width };
                elem.size() * width
            }
            Type::Matrix { rows, .. } => self.column_stride(*rows),
            Type::Atomic { .. } => 4,
            Type::Array { elem, .. } => self.align_of(*elem),
            Type::Struct { align, .. } => *align,
            Type::Pointer { .. } => 4,
        }
    }

    /// Byte distance between matrix columns: the column vector size rounded
    /// up to its alignment.
    pub fn column_stride(&self, rows: u32) -> u32 {
        let size = ScalarKind::F32.size() * rows;
        let align = if rows == 3 { 16 } else { size };
        round_up(align, size)
    }

    /// Default stride for an array of `elem`: element size rounded up to
    /// element alignment.
    pub fn default_stride(&self, elem: TypeHandle) -> u32 {
        round_up(self.align_of(elem), self.size_of(elem))
    }

    /// WGSL-syntax name for a type, e.g. `vec3<f32>` or `array<i32, 4>`.
    pub fn display(&self, handle: TypeHandle) -> String {
        match &self[handle] {
            Type::Void => "void".to_string(),
            Type::Scalar(kind) => kind.to_string(),
            Type::Vector { elem, width } => format!("vec{}<{}>", width, elem),
            Type::Matrix { columns, rows } => format!("mat{}x{}<f32>", columns, rows),
            Type::Atomic { elem } => format!("atomic<{}>", elem),
            Type::Array { elem, count: ArrayCount::Constant(n), .. } => {
                format!("array<{}, {}>", self.display(*elem), n)
            }
            Type::Array { elem, .. } => format!("array<{}>", self.display(*elem)),
            Type::Struct { name, .. } => name.clone(),
            Type::Pointer { space, elem } => {
                format!("ptr<{}, {}>", space, self.display(*elem))
            }
        }
    }

    /// Strips one level of pointer indirection, if present.
    pub fn unwrap_pointer(&self, handle: TypeHandle) -> TypeHandle {
        match &self[handle] {
            Type::Pointer { elem, .. } => *elem,
            _ => handle,
        }
    }

    /// Strips an atomic wrapper, if present.
    pub fn unwrap_atomic(&self, handle: TypeHandle) -> Option<ScalarKind> {
        match &self[handle] {
            Type::Atomic { elem } => Some(*elem),
            _ => None,
        }
    }

    pub fn scalar_kind_of(&self, handle: TypeHandle) -> Option<ScalarKind> {
        match &self[handle] {
            Type::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl Index<TypeHandle> for TypeArena {
    type Output = Type;

    fn index(&self, handle: TypeHandle) -> &Type {
        &self.types[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_scalars() -> TypeArena {
        let mut types = TypeArena::new();
        for kind in [ScalarKind::Bool, ScalarKind::I32, ScalarKind::U32, ScalarKind::F32, ScalarKind::F16] {
            types.intern(Type::Scalar(kind));
        }
        types
    }

    #[test]
    fn interning_dedups() {
        let mut types = arena_with_scalars();
        let a = types.intern(Type::Vector { elem: ScalarKind::F32, width: 3 });
        let b = types.intern(Type::Vector { elem: ScalarKind::F32, width: 3 });
        assert_eq!(a, b);
        assert_eq!(types.vector(ScalarKind::F32, 3), Some(a));
    }

    #[test]
    fn vector_layout() {
        let mut types = arena_with_scalars();
        let v2 = types.intern(Type::Vector { elem: ScalarKind::F32, width: 2 });
        let v3 = types.intern(Type::Vector { elem: ScalarKind::F32, width: 3 });
        let v4 = types.intern(Type::Vector { elem: ScalarKind::F16, width: 4 });
        assert_eq!(types.size_of(v2), 8);
        assert_eq!(types.align_of(v2), 8);
        assert_eq!(types.size_of(v3), 12);
        assert_eq!(types.align_of(v3), 16);
        assert_eq!(types.size_of(v4), 8);
    }

    #[test]
    fn matrix_layout_pads_vec3_columns() {
        let mut types = arena_with_scalars();
        let m2x3 = types.intern(Type::Matrix { columns: 2, rows: 3 });
        let m2x2 = types.intern(Type::Matrix { columns: 2, rows: 2 });
        assert_eq!(types.size_of(m2x3), 32);
        assert_eq!(types.size_of(m2x2), 16);
    }

    #[test]
    fn array_stride_respects_alignment() {
        let mut types = arena_with_scalars();
        let v3 = types.intern(Type::Vector { elem: ScalarKind::F32, width: 3 });
        assert_eq!(types.default_stride(v3), 16);
        let i32_ty = types.scalar(ScalarKind::I32).unwrap();
        assert_eq!(types.default_stride(i32_ty), 4);
    }

    #[test]
    fn display_names() {
        let mut types = arena_with_scalars();
        let i32_ty = types.scalar(ScalarKind::I32).unwrap();
        let v4 = types.intern(Type::Vector { elem: ScalarKind::I32, width: 4 });
        let arr = types.intern(Type::Array { elem: i32_ty, count: ArrayCount::Constant(4), stride: 4 });
        let rt = types.intern(Type::Array { elem: i32_ty, count: ArrayCount::Runtime, stride: 4 });
        let ptr = types.intern(Type::Pointer { space: AddressSpace::Function, elem: i32_ty });
        assert_eq!(types.display(v4), "vec4<i32>");
        assert_eq!(types.display(arr), "array<i32, 4>");
        assert_eq!(types.display(rt), "array<i32>");
        assert_eq!(types.display(ptr), "ptr<function, i32>");
    }
}
