//! Runtime constant values: scalars and typed composites, with the numeric
//! conversion rules and the deterministic stringification used by the
//! debugging API.

use crate::error::Result;
use crate::number;
use crate::source::Source;
use crate::types::{ArrayCount, ScalarKind, Type, TypeArena, TypeHandle};
use crate::bail_runtime;

/// A fully-evaluated value. Scalars are self-describing; composites carry
/// their interned type handle so element layout and display names are
/// recoverable.
///
/// F16 values are held widened to f32; they are quantized whenever they are
/// produced, so the widened form is always exactly representable.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    F16(f32),
    Composite { ty: TypeHandle, elems: Vec<ConstValue> },
}

impl ConstValue {
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            ConstValue::Bool(_) => Some(ScalarKind::Bool),
            ConstValue::I32(_) => Some(ScalarKind::I32),
            ConstValue::U32(_) => Some(ScalarKind::U32),
            ConstValue::F32(_) => Some(ScalarKind::F32),
            ConstValue::F16(_) => Some(ScalarKind::F16),
            ConstValue::Composite { .. } => None,
        }
    }

    /// Element access for composites; `None` for scalars or out-of-range
    /// indices.
    pub fn index(&self, i: usize) -> Option<&ConstValue> {
        match self {
            ConstValue::Composite { elems, .. } => elems.get(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ConstValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ConstValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric widening for scalar values; bools widen to 0/1.
    pub fn scalar_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ConstValue::I32(v) => Some(*v as f64),
            ConstValue::U32(v) => Some(*v as f64),
            ConstValue::F32(v) => Some(*v as f64),
            ConstValue::F16(v) => Some(*v as f64),
            ConstValue::Composite { .. } => None,
        }
    }

    /// Scalar as an unsigned count, used for array sizes and workgroup
    /// dimensions.
    pub fn scalar_u32(&self) -> Option<u32> {
        match self {
            ConstValue::Bool(b) => Some(*b as u32),
            ConstValue::I32(v) => Some(*v as u32),
            ConstValue::U32(v) => Some(*v),
            ConstValue::F32(v) => Some(number::f64_to_u32_clamped(*v as f64)),
            ConstValue::F16(v) => Some(number::f64_to_u32_clamped(*v as f64)),
            ConstValue::Composite { .. } => None,
        }
    }

    pub fn all_zero(&self) -> bool {
        match self {
            ConstValue::Bool(b) => !b,
            ConstValue::I32(v) => *v == 0,
            ConstValue::U32(v) => *v == 0,
            ConstValue::F32(v) => *v == 0.0,
            ConstValue::F16(v) => *v == 0.0,
            ConstValue::Composite { elems, .. } => elems.iter().all(ConstValue::all_zero),
        }
    }

    pub fn any_zero(&self) -> bool {
        match self {
            ConstValue::Composite { elems, .. } => elems.iter().any(ConstValue::any_zero),
            _ => self.all_zero(),
        }
    }

    pub fn zero_scalar(kind: ScalarKind) -> ConstValue {
        match kind {
            ScalarKind::Bool => ConstValue::Bool(false),
            ScalarKind::I32 => ConstValue::I32(0),
            ScalarKind::U32 => ConstValue::U32(0),
            ScalarKind::F32 => ConstValue::F32(0.0),
            ScalarKind::F16 => ConstValue::F16(0.0),
        }
    }

    /// The zero value of a type. Runtime-sized and override-sized arrays
    /// have no intrinsic count and zero to an empty composite.
    pub fn zero(types: &TypeArena, ty: TypeHandle) -> Result<ConstValue> {
        match &types[ty] {
            Type::Scalar(kind) => Ok(Self::zero_scalar(*kind)),
            Type::Atomic { elem } => Ok(Self::zero_scalar(*elem)),
            Type::Vector { elem, width } => Ok(ConstValue::Composite {
                ty,
                elems: vec![Self::zero_scalar(*elem); *width as usize],
            }),
            Type::Matrix { columns, rows } => {
                let Some(column_ty) = types.vector(ScalarKind::F32, *rows) else {
                    bail_runtime!("matrix column type is not registered");
                };
                let column = Self::zero(types, column_ty)?;
                Ok(ConstValue::Composite { ty, elems: vec![column; *columns as usize] })
            }
            Type::Array { elem, count, .. } => {
                let n = match count {
                    ArrayCount::Constant(n) => *n as usize,
                    _ => 0,
                };
                let elem = Self::zero(types, *elem)?;
                Ok(ConstValue::Composite { ty, elems: vec![elem; n] })
            }
            Type::Struct { members, .. } => {
                let elems = members
                    .iter()
                    .map(|m| Self::zero(types, m.ty))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty, elems })
            }
            Type::Pointer { .. } => bail_runtime!("cannot create a zero value of a pointer type"),
            Type::Void => bail_runtime!("cannot create a zero value of the void type"),
        }
    }

    /// Checks that a value is layout-compatible with a type. Atomics accept
    /// their wrapped scalar.
    pub fn matches_type(&self, types: &TypeArena, ty: TypeHandle) -> bool {
        match (&types[ty], self) {
            (Type::Scalar(kind), value) => value.scalar_kind() == Some(*kind),
            (Type::Atomic { elem }, value) => value.scalar_kind() == Some(*elem),
            (_, ConstValue::Composite { ty: value_ty, .. }) => *value_ty == ty,
            _ => false,
        }
    }

    /// Converts a concrete value to another concrete type per the scalar
    /// conversion rules: identity for same kind, `!is_positive_zero` to
    /// bool, 0/1 from bool, clamping for float-to-int, wrapping for
    /// int-to-int, quantization for f16 targets. Composites convert
    /// elementwise.
    pub fn convert(&self, types: &TypeArena, target: TypeHandle, source: Source) -> Result<ConstValue> {
        match &types[target] {
            Type::Scalar(kind) => self.convert_scalar(*kind, source),
            Type::Vector { elem, .. } => {
                let ConstValue::Composite { elems, .. } = self else {
                    bail_runtime!("cannot convert a scalar to a vector");
                };
                let elems = elems
                    .iter()
                    .map(|e| e.convert_scalar(*elem, source))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ConstValue::Composite { ty: target, elems })
            }
            _ => bail_runtime!("unsupported conversion target '{}'", types.display(target)),
        }
    }

    fn convert_scalar(&self, target: ScalarKind, _source: Source) -> Result<ConstValue> {
        if self.scalar_kind() == Some(target) {
            return Ok(self.clone());
        }
        if target == ScalarKind::Bool {
            let Some(value) = self.scalar_f64() else {
                bail_runtime!("cannot convert a composite to bool");
            };
            return Ok(ConstValue::Bool(number::f64_to_bool(value)));
        }
        let value = match self {
            ConstValue::Bool(b) => {
                return Ok(match target {
                    ScalarKind::I32 => ConstValue::I32(*b as i32),
                    ScalarKind::U32 => ConstValue::U32(*b as u32),
                    ScalarKind::F32 => ConstValue::F32(*b as u32 as f32),
                    ScalarKind::F16 => ConstValue::F16(*b as u32 as f32),
                    ScalarKind::Bool => unreachable!(),
                });
            }
            ConstValue::I32(v) => *v as f64,
            ConstValue::U32(v) => *v as f64,
            ConstValue::F32(v) => *v as f64,
            ConstValue::F16(v) => *v as f64,
            ConstValue::Composite { .. } => {
                bail_runtime!("cannot convert a composite to a scalar")
            }
        };
        Ok(match target {
            ScalarKind::I32 => match self {
                // Integer to integer reinterprets with wrapping.
                ConstValue::U32(v) => ConstValue::I32(*v as i32),
                _ => ConstValue::I32(number::f64_to_i32_clamped(value)),
            },
            ScalarKind::U32 => match self {
                ConstValue::I32(v) => ConstValue::U32(*v as u32),
                _ => ConstValue::U32(number::f64_to_u32_clamped(value)),
            },
            ScalarKind::F32 => ConstValue::F32(value as f32),
            ScalarKind::F16 => ConstValue::F16(number::quantize_f16(value as f32)),
            ScalarKind::Bool => unreachable!(),
        })
    }

    /// Deterministic human-readable form, used by the single-step debugging
    /// API. Floats print with six fractional digits; vectors are single
    /// line; matrices, arrays, and structs are multiline with two-space
    /// indentation and trailing commas.
    pub fn display(&self, types: &TypeArena, indent: usize) -> String {
        match self {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::I32(v) => v.to_string(),
            ConstValue::U32(v) => v.to_string(),
            ConstValue::F32(v) | ConstValue::F16(v) => format!("{:.6}", v),
            ConstValue::Composite { ty, elems } => match &types[*ty] {
                Type::Vector { .. } => {
                    let parts: Vec<String> =
                        elems.iter().map(|e| e.display(types, indent)).collect();
                    format!("{}{{{}}}", types.display(*ty), parts.join(", "))
                }
                Type::Matrix { .. } => self.display_multiline(types, *ty, elems, indent, |_| String::new()),
                Type::Array { .. } => {
                    self.display_multiline(types, *ty, elems, indent, |i| format!("[{}] = ", i))
                }
                Type::Struct { members, .. } => {
                    self.display_multiline(types, *ty, elems, indent, |i| {
                        format!(".{} = ", members[i].name)
                    })
                }
                _ => format!("<unhandled composite {}>", types.display(*ty)),
            },
        }
    }

    fn display_multiline(
        &self,
        types: &TypeArena,
        ty: TypeHandle,
        elems: &[ConstValue],
        indent: usize,
        label: impl Fn(usize) -> String,
    ) -> String {
        let pad = " ".repeat(indent + 2);
        let mut out = format!("{}{{\n", types.display(ty));
        for (i, elem) in elems.iter().enumerate() {
            out.push_str(&pad);
            out.push_str(&label(i));
            out.push_str(&elem.display(types, indent + 2));
            out.push_str(",\n");
        }
        out.push_str(&" ".repeat(indent));
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_types() -> TypeArena {
        let mut types = TypeArena::new();
        for kind in [ScalarKind::Bool, ScalarKind::I32, ScalarKind::U32, ScalarKind::F32, ScalarKind::F16] {
            types.intern(Type::Scalar(kind));
        }
        types
    }

    #[test]
    fn scalar_display() {
        let types = test_types();
        assert_eq!(ConstValue::I32(42).display(&types, 0), "42");
        assert_eq!(ConstValue::I32(-7).display(&types, 0), "-7");
        assert_eq!(ConstValue::F32(42.0).display(&types, 0), "42.000000");
        assert_eq!(ConstValue::Bool(true).display(&types, 0), "true");
    }

    #[test]
    fn vector_display_is_single_line() {
        let mut types = test_types();
        let v4 = types.intern(Type::Vector { elem: ScalarKind::I32, width: 4 });
        let value = ConstValue::Composite {
            ty: v4,
            elems: vec![ConstValue::I32(1), ConstValue::I32(2), ConstValue::I32(3), ConstValue::I32(4)],
        };
        assert_eq!(value.display(&types, 0), "vec4<i32>{1, 2, 3, 4}");
    }

    #[test]
    fn array_display_is_multiline() {
        let mut types = test_types();
        let i32_ty = types.scalar(ScalarKind::I32).unwrap();
        let arr = types.intern(Type::Array { elem: i32_ty, count: ArrayCount::Constant(2), stride: 4 });
        let value = ConstValue::Composite {
            ty: arr,
            elems: vec![ConstValue::I32(5), ConstValue::I32(6)],
        };
        assert_eq!(
            value.display(&types, 0),
            "array<i32, 2>{\n  [0] = 5,\n  [1] = 6,\n}"
        );
    }

    #[test]
    fn matrix_display_nests_columns() {
        let mut types = test_types();
        let v2 = types.intern(Type::Vector { elem: ScalarKind::F32, width: 2 });
        let m2 = types.intern(Type::Matrix { columns: 2, rows: 2 });
        let column = |a: f32, b: f32| ConstValue::Composite {
            ty: v2,
            elems: vec![ConstValue::F32(a), ConstValue::F32(b)],
        };
        let value = ConstValue::Composite { ty: m2, elems: vec![column(1.0, 2.0), column(3.0, 4.0)] };
        assert_eq!(
            value.display(&types, 0),
            "mat2x2<f32>{\n  vec2<f32>{1.000000, 2.000000},\n  vec2<f32>{3.000000, 4.000000},\n}"
        );
    }

    #[test]
    fn convert_float_to_int_clamps() {
        let types = test_types();
        let i32_ty = types.scalar(ScalarKind::I32).unwrap();
        let big = ConstValue::F32(1e12);
        assert_eq!(big.convert(&types, i32_ty, Source::default()).unwrap(), ConstValue::I32(i32::MAX));
    }

    #[test]
    fn convert_int_to_int_wraps() {
        let types = test_types();
        let u32_ty = types.scalar(ScalarKind::U32).unwrap();
        let negative = ConstValue::I32(-1);
        assert_eq!(
            negative.convert(&types, u32_ty, Source::default()).unwrap(),
            ConstValue::U32(u32::MAX)
        );
    }

    #[test]
    fn convert_to_bool_ignores_negative_zero() {
        let types = test_types();
        let bool_ty = types.scalar(ScalarKind::Bool).unwrap();
        let positive_zero = ConstValue::F32(0.0);
        let negative_zero = ConstValue::F32(-0.0);
        assert_eq!(
            positive_zero.convert(&types, bool_ty, Source::default()).unwrap(),
            ConstValue::Bool(false)
        );
        assert_eq!(
            negative_zero.convert(&types, bool_ty, Source::default()).unwrap(),
            ConstValue::Bool(true)
        );
    }

    #[test]
    fn zero_of_struct() {
        let mut types = test_types();
        let i32_ty = types.scalar(ScalarKind::I32).unwrap();
        let member = |name: &str, ty, offset| crate::types::StructMember {
            name: name.to_string(),
            ty,
            offset,
        };
        let s = types.intern(Type::Struct {
            name: "S".to_string(),
            members: vec![member("a", i32_ty, 0), member("b", i32_ty, 4)],
            size: 8,
            align: 4,
        });
        let zero = ConstValue::zero(&types, s).unwrap();
        assert!(zero.all_zero());
        assert_eq!(zero.index(1), Some(&ConstValue::I32(0)));
    }

    #[test]
    fn zero_of_void_is_an_error() {
        let mut types = test_types();
        let void = types.intern(Type::Void);
        let err = ConstValue::zero(&types, void).err().unwrap();
        assert_eq!(err.to_string(), "Runtime error: cannot create a zero value of the void type");
    }
}
