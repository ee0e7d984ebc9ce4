//! Operator, conversion, and builtin-function evaluation over constant
//! values, with runtime semantics: integer arithmetic wraps, integer
//! division by zero is diagnosed as a warning and yields the left operand,
//! and f16 results are quantized.

use crate::ast::{BinaryOp, BuiltinFn, UnaryOp};
use crate::constant::ConstValue;
use crate::diag::{DiagList, Diagnostic};
use crate::error::Result;
use crate::number;
use crate::source::Source;
use crate::types::{ScalarKind, Type, TypeArena, TypeHandle};
use crate::bail_runtime;

pub fn unary_op(op: UnaryOp, value: &ConstValue, types: &TypeArena, source: Source) -> Result<ConstValue> {
    if let ConstValue::Composite { ty, elems } = value {
        let elems = elems
            .iter()
            .map(|e| unary_op(op, e, types, source))
            .collect::<Result<Vec<_>>>()?;
        return Ok(ConstValue::Composite { ty: *ty, elems });
    }
    match (op, value) {
        (UnaryOp::Negate, ConstValue::I32(v)) => Ok(ConstValue::I32(v.wrapping_neg())),
        (UnaryOp::Negate, ConstValue::F32(v)) => Ok(ConstValue::F32(-v)),
        (UnaryOp::Negate, ConstValue::F16(v)) => Ok(ConstValue::F16(-v)),
        (UnaryOp::Not, ConstValue::Bool(v)) => Ok(ConstValue::Bool(!v)),
        (UnaryOp::Complement, ConstValue::I32(v)) => Ok(ConstValue::I32(!v)),
        (UnaryOp::Complement, ConstValue::U32(v)) => Ok(ConstValue::U32(!v)),
        _ => bail_runtime!("unhandled unary operand type"),
    }
}

/// Evaluates a binary operator. Operands must share a scalar kind; a scalar
/// operand broadcasts across a vector operand.
pub fn binary_op(
    op: BinaryOp,
    lhs: &ConstValue,
    rhs: &ConstValue,
    types: &TypeArena,
    diags: &mut DiagList,
    source: Source,
) -> Result<ConstValue> {
    match (lhs, rhs) {
        (ConstValue::Composite { ty, elems: l }, ConstValue::Composite { elems: r, .. }) => {
            if l.len() != r.len() {
                bail_runtime!("mismatched vector widths in binary operator");
            }
            let elems = l
                .iter()
                .zip(r)
                .map(|(a, b)| binary_op(op, a, b, types, diags, source))
                .collect::<Result<Vec<_>>>()?;
            composite_result(op, *ty, elems, types)
        }
        (ConstValue::Composite { ty, elems }, scalar) => {
            let elems = elems
                .iter()
                .map(|a| binary_op(op, a, scalar, types, diags, source))
                .collect::<Result<Vec<_>>>()?;
            composite_result(op, *ty, elems, types)
        }
        (scalar, ConstValue::Composite { ty, elems }) => {
            let elems = elems
                .iter()
                .map(|b| binary_op(op, scalar, b, types, diags, source))
                .collect::<Result<Vec<_>>>()?;
            composite_result(op, *ty, elems, types)
        }
        _ => scalar_binary_op(op, lhs, rhs, diags, source),
    }
}

/// Comparison operators on vectors produce `vecN<bool>`; everything else
/// keeps the operand vector type.
fn composite_result(
    op: BinaryOp,
    operand_ty: TypeHandle,
    elems: Vec<ConstValue>,
    types: &TypeArena,
) -> Result<ConstValue> {
    let is_comparison = matches!(
        op,
        BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::LessThan
            | BinaryOp::LessThanEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanEqual
    );
    let ty = if is_comparison {
        let Type::Vector { width, .. } = types[operand_ty] else {
            bail_runtime!("comparison on a non-vector composite");
        };
        let Some(bool_vec) = types.vector(ScalarKind::Bool, width) else {
            bail_runtime!("bool vector type is not registered");
        };
        bool_vec
    } else {
        operand_ty
    };
    Ok(ConstValue::Composite { ty, elems })
}

fn scalar_binary_op(
    op: BinaryOp,
    lhs: &ConstValue,
    rhs: &ConstValue,
    diags: &mut DiagList,
    source: Source,
) -> Result<ConstValue> {
    use ConstValue::*;
    match op {
        BinaryOp::LogicalAnd | BinaryOp::And if matches!(lhs, Bool(_)) => {
            match (lhs, rhs) {
                (Bool(a), Bool(b)) => Ok(Bool(*a && *b)),
                _ => bail_runtime!("mismatched logical operand types"),
            }
        }
        BinaryOp::LogicalOr | BinaryOp::Or if matches!(lhs, Bool(_)) => {
            match (lhs, rhs) {
                (Bool(a), Bool(b)) => Ok(Bool(*a || *b)),
                _ => bail_runtime!("mismatched logical operand types"),
            }
        }
        BinaryOp::Equal => Ok(Bool(scalar_equal(lhs, rhs)?)),
        BinaryOp::NotEqual => Ok(Bool(!scalar_equal(lhs, rhs)?)),
        BinaryOp::LessThan
        | BinaryOp::LessThanEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanEqual => scalar_compare(op, lhs, rhs),
        _ => match (lhs, rhs) {
            (I32(a), I32(b)) => int_binary_op(op, *a, *b, diags, source),
            (U32(a), U32(b)) => uint_binary_op(op, *a, *b, diags, source),
            (F32(a), F32(b)) => Ok(F32(float_binary_op(op, *a, *b)?)),
            (F16(a), F16(b)) => Ok(F16(number::quantize_f16(float_binary_op(op, *a, *b)?))),
            // Shift amounts are always u32.
            (I32(a), U32(b)) if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) => {
                let shift = checked_shift(*b, diags, source);
                Ok(match op {
                    BinaryOp::ShiftLeft => I32(a.wrapping_shl(shift)),
                    _ => I32(a.wrapping_shr(shift)),
                })
            }
            _ => bail_runtime!("mismatched binary operand types"),
        },
    }
}

fn scalar_equal(lhs: &ConstValue, rhs: &ConstValue) -> Result<bool> {
    use ConstValue::*;
    match (lhs, rhs) {
        (Bool(a), Bool(b)) => Ok(a == b),
        (I32(a), I32(b)) => Ok(a == b),
        (U32(a), U32(b)) => Ok(a == b),
        (F32(a), F32(b)) => Ok(a == b),
        (F16(a), F16(b)) => Ok(a == b),
        _ => bail_runtime!("mismatched comparison operand types"),
    }
}

fn scalar_compare(op: BinaryOp, lhs: &ConstValue, rhs: &ConstValue) -> Result<ConstValue> {
    use ConstValue::*;
    fn apply<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
        match op {
            BinaryOp::LessThan => a < b,
            BinaryOp::LessThanEqual => a <= b,
            BinaryOp::GreaterThan => a > b,
            _ => a >= b,
        }
    }
    match (lhs, rhs) {
        (I32(a), I32(b)) => Ok(Bool(apply(op, *a, *b))),
        (U32(a), U32(b)) => Ok(Bool(apply(op, *a, *b))),
        (F32(a), F32(b)) => Ok(Bool(apply(op, *a, *b))),
        (F16(a), F16(b)) => Ok(Bool(apply(op, *a, *b))),
        _ => bail_runtime!("mismatched comparison operand types"),
    }
}

fn checked_shift(amount: u32, diags: &mut DiagList, source: Source) -> u32 {
    if amount >= 32 {
        diags.push(Diagnostic::warning(
            format!("shift amount {} exceeds the bit width of the operand", amount),
            Some(source),
        ));
    }
    amount & 31
}

fn int_binary_op(op: BinaryOp, a: i32, b: i32, diags: &mut DiagList, source: Source) -> Result<ConstValue> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        BinaryOp::Multiply => a.wrapping_mul(b),
        BinaryOp::Divide => {
            if b == 0 || (a == i32::MIN && b == -1) {
                diags.push(Diagnostic::warning("invalid integer division", Some(source)));
                a
            } else {
                a / b
            }
        }
        BinaryOp::Modulo => {
            if b == 0 || (a == i32::MIN && b == -1) {
                diags.push(Diagnostic::warning("invalid integer remainder", Some(source)));
                a
            } else {
                a % b
            }
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::ShiftLeft => a.wrapping_shl(checked_shift(b as u32, diags, source)),
        BinaryOp::ShiftRight => a.wrapping_shr(checked_shift(b as u32, diags, source)),
        _ => bail_runtime!("unhandled i32 binary operator"),
    };
    Ok(ConstValue::I32(value))
}

fn uint_binary_op(op: BinaryOp, a: u32, b: u32, diags: &mut DiagList, source: Source) -> Result<ConstValue> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        BinaryOp::Multiply => a.wrapping_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                diags.push(Diagnostic::warning("invalid integer division", Some(source)));
                a
            } else {
                a / b
            }
        }
        BinaryOp::Modulo => {
            if b == 0 {
                diags.push(Diagnostic::warning("invalid integer remainder", Some(source)));
                a
            } else {
                a % b
            }
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::ShiftLeft => a.wrapping_shl(checked_shift(b, diags, source)),
        BinaryOp::ShiftRight => a.wrapping_shr(checked_shift(b, diags, source)),
        _ => bail_runtime!("unhandled u32 binary operator"),
    };
    Ok(ConstValue::U32(value))
}

fn float_binary_op(op: BinaryOp, a: f32, b: f32) -> Result<f32> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => bail_runtime!("unhandled float binary operator"),
    })
}

/// Bit reinterpretation between 32-bit scalar types and vectors of them.
/// No numeric conversion happens; only the bit pattern carries over.
pub fn bitcast(value: &ConstValue, target: TypeHandle, types: &TypeArena, source: Source) -> Result<ConstValue> {
    let _ = source;
    let mut words = Vec::new();
    collect_words(value, &mut words)?;
    match &types[target] {
        Type::Scalar(kind) => {
            if words.len() != 1 {
                bail_runtime!("bitcast source and target widths differ");
            }
            word_to_scalar(words[0], *kind)
        }
        Type::Vector { elem, width } => {
            if words.len() != *width as usize {
                bail_runtime!("bitcast source and target widths differ");
            }
            let elems = words
                .iter()
                .map(|&w| word_to_scalar(w, *elem))
                .collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: target, elems })
        }
        _ => bail_runtime!("unhandled bitcast target '{}'", types.display(target)),
    }
}

fn collect_words(value: &ConstValue, words: &mut Vec<u32>) -> Result<()> {
    match value {
        ConstValue::I32(v) => words.push(*v as u32),
        ConstValue::U32(v) => words.push(*v),
        ConstValue::F32(v) => words.push(v.to_bits()),
        ConstValue::Composite { elems, .. } => {
            for elem in elems {
                collect_words(elem, words)?;
            }
        }
        _ => bail_runtime!("unhandled bitcast source type"),
    }
    Ok(())
}

fn word_to_scalar(word: u32, kind: ScalarKind) -> Result<ConstValue> {
    Ok(match kind {
        ScalarKind::I32 => ConstValue::I32(word as i32),
        ScalarKind::U32 => ConstValue::U32(word),
        ScalarKind::F32 => ConstValue::F32(f32::from_bits(word)),
        _ => bail_runtime!("unhandled bitcast element type"),
    })
}

/// Value construction: zero value for no arguments, splat for a single
/// scalar into a vector, otherwise elementwise assembly. Vector arguments
/// flatten into a longer element list.
pub fn construct(
    target: TypeHandle,
    args: &[ConstValue],
    types: &TypeArena,
    source: Source,
) -> Result<ConstValue> {
    if args.is_empty() {
        return ConstValue::zero(types, target);
    }
    match &types[target] {
        Type::Scalar(_) => args[0].convert(types, target, source),
        Type::Vector { elem, width } => {
            let mut scalars = Vec::new();
            for arg in args {
                match arg {
                    ConstValue::Composite { elems, .. } => scalars.extend(elems.iter().cloned()),
                    scalar => scalars.push(scalar.clone()),
                }
            }
            if scalars.len() == 1 {
                scalars = vec![scalars[0].clone(); *width as usize];
            }
            if scalars.len() != *width as usize {
                bail_runtime!("wrong number of vector constructor arguments");
            }
            let Some(elem_ty) = types.scalar(*elem) else {
                bail_runtime!("vector element type is not registered");
            };
            let elems = scalars
                .iter()
                .map(|s| s.convert(types, elem_ty, source))
                .collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: target, elems })
        }
        Type::Matrix { columns, .. } => {
            if args.len() != *columns as usize {
                bail_runtime!("wrong number of matrix constructor columns");
            }
            Ok(ConstValue::Composite { ty: target, elems: args.to_vec() })
        }
        Type::Array { .. } | Type::Struct { .. } => {
            Ok(ConstValue::Composite { ty: target, elems: args.to_vec() })
        }
        _ => bail_runtime!("unhandled construction target '{}'", types.display(target)),
    }
}

/// Math and relational builtins. Barriers, atomics, and `arrayLength` are
/// handled by the invocation since they touch memory or scheduling.
pub fn builtin(
    builtin: BuiltinFn,
    args: &[ConstValue],
    types: &TypeArena,
    diags: &mut DiagList,
    source: Source,
) -> Result<ConstValue> {
    match builtin {
        BuiltinFn::Abs => map1(&args[0], |v| match v {
            ConstValue::I32(x) => Ok(ConstValue::I32(x.wrapping_abs())),
            ConstValue::U32(x) => Ok(ConstValue::U32(*x)),
            ConstValue::F32(x) => Ok(ConstValue::F32(x.abs())),
            ConstValue::F16(x) => Ok(ConstValue::F16(x.abs())),
            _ => bail_runtime!("unhandled abs operand type"),
        }),
        BuiltinFn::Min => map2(&args[0], &args[1], scalar_min),
        BuiltinFn::Max => map2(&args[0], &args[1], scalar_max),
        BuiltinFn::Clamp => map3(&args[0], &args[1], &args[2], |v, lo, hi| {
            scalar_max(&scalar_min(v, hi)?, lo)
        }),
        BuiltinFn::Select => {
            // select(false_value, true_value, condition)
            match &args[2] {
                ConstValue::Bool(true) => Ok(args[1].clone()),
                ConstValue::Bool(false) => Ok(args[0].clone()),
                ConstValue::Composite { ty, elems } => {
                    let (f, t) = (&args[0], &args[1]);
                    let elems = elems
                        .iter()
                        .enumerate()
                        .map(|(i, cond)| {
                            let pick = if cond.as_bool().unwrap_or(false) { t } else { f };
                            pick.index(i)
                                .cloned()
                                .ok_or_else(|| crate::error::ExecError::RuntimeError(
                                    "mismatched select operand widths".to_string(),
                                    Some(source),
                                ))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let ty = match &args[0] {
                        ConstValue::Composite { ty: value_ty, .. } => *value_ty,
                        _ => *ty,
                    };
                    Ok(ConstValue::Composite { ty, elems })
                }
                _ => bail_runtime!("unhandled select condition type"),
            }
        }
        BuiltinFn::Floor => float_map1(&args[0], f32::floor),
        BuiltinFn::Ceil => float_map1(&args[0], f32::ceil),
        BuiltinFn::Sqrt => float_map1(&args[0], f32::sqrt),
        BuiltinFn::Sin => float_map1(&args[0], f32::sin),
        BuiltinFn::Cos => float_map1(&args[0], f32::cos),
        BuiltinFn::Pow => map2(&args[0], &args[1], |a, b| match (a, b) {
            (ConstValue::F32(x), ConstValue::F32(y)) => Ok(ConstValue::F32(x.powf(*y))),
            (ConstValue::F16(x), ConstValue::F16(y)) => {
                Ok(ConstValue::F16(number::quantize_f16(x.powf(*y))))
            }
            _ => bail_runtime!("unhandled pow operand type"),
        }),
        BuiltinFn::Dot => {
            let (ConstValue::Composite { elems: a, .. }, ConstValue::Composite { elems: b, .. }) =
                (&args[0], &args[1])
            else {
                bail_runtime!("dot requires vector operands");
            };
            let mut acc: Option<ConstValue> = None;
            for (x, y) in a.iter().zip(b) {
                let product = binary_op(BinaryOp::Multiply, x, y, types, diags, source)?;
                acc = Some(match acc {
                    None => product,
                    Some(sum) => binary_op(BinaryOp::Add, &sum, &product, types, diags, source)?,
                });
            }
            acc.ok_or_else(|| {
                crate::error::ExecError::RuntimeError("dot of empty vectors".to_string(), Some(source))
            })
        }
        _ => bail_runtime!("builtin is not value-evaluable"),
    }
}

fn scalar_min(a: &ConstValue, b: &ConstValue) -> Result<ConstValue> {
    use ConstValue::*;
    match (a, b) {
        (I32(x), I32(y)) => Ok(I32(*x.min(y))),
        (U32(x), U32(y)) => Ok(U32(*x.min(y))),
        (F32(x), F32(y)) => Ok(F32(x.min(*y))),
        (F16(x), F16(y)) => Ok(F16(x.min(*y))),
        _ => bail_runtime!("mismatched min operand types"),
    }
}

fn scalar_max(a: &ConstValue, b: &ConstValue) -> Result<ConstValue> {
    use ConstValue::*;
    match (a, b) {
        (I32(x), I32(y)) => Ok(I32(*x.max(y))),
        (U32(x), U32(y)) => Ok(U32(*x.max(y))),
        (F32(x), F32(y)) => Ok(F32(x.max(*y))),
        (F16(x), F16(y)) => Ok(F16(x.max(*y))),
        _ => bail_runtime!("mismatched max operand types"),
    }
}

fn float_map1(value: &ConstValue, f: impl Fn(f32) -> f32 + Copy) -> Result<ConstValue> {
    map1(value, |v| match v {
        ConstValue::F32(x) => Ok(ConstValue::F32(f(*x))),
        ConstValue::F16(x) => Ok(ConstValue::F16(number::quantize_f16(f(*x)))),
        _ => bail_runtime!("unhandled float builtin operand type"),
    })
}

fn map1(
    value: &ConstValue,
    f: impl Fn(&ConstValue) -> Result<ConstValue> + Copy,
) -> Result<ConstValue> {
    match value {
        ConstValue::Composite { ty, elems } => {
            let elems = elems.iter().map(f).collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: *ty, elems })
        }
        scalar => f(scalar),
    }
}

fn map2(
    a: &ConstValue,
    b: &ConstValue,
    f: impl Fn(&ConstValue, &ConstValue) -> Result<ConstValue> + Copy,
) -> Result<ConstValue> {
    match (a, b) {
        (ConstValue::Composite { ty, elems: x }, ConstValue::Composite { elems: y, .. }) => {
            let elems = x.iter().zip(y).map(|(p, q)| f(p, q)).collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: *ty, elems })
        }
        (ConstValue::Composite { ty, elems }, scalar) => {
            let elems = elems.iter().map(|p| f(p, scalar)).collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: *ty, elems })
        }
        (scalar, ConstValue::Composite { ty, elems }) => {
            let elems = elems.iter().map(|q| f(scalar, q)).collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: *ty, elems })
        }
        (x, y) => f(x, y),
    }
}

fn map3(
    a: &ConstValue,
    b: &ConstValue,
    c: &ConstValue,
    f: impl Fn(&ConstValue, &ConstValue, &ConstValue) -> Result<ConstValue> + Copy,
) -> Result<ConstValue> {
    match a {
        ConstValue::Composite { ty, elems } => {
            let elems = elems
                .iter()
                .enumerate()
                .map(|(i, x)| {
                    let y = b.index(i).unwrap_or(b);
                    let z = c.index(i).unwrap_or(c);
                    f(x, y, z)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ConstValue::Composite { ty: *ty, elems })
        }
        scalar => f(scalar, b, c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;

    fn types() -> TypeArena {
        ProgramBuilder::new().build().types
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let types = types();
        let mut diags = DiagList::new();
        let result = binary_op(
            BinaryOp::Add,
            &ConstValue::I32(i32::MAX),
            &ConstValue::I32(1),
            &types,
            &mut diags,
            Source::default(),
        )
        .unwrap();
        assert_eq!(result, ConstValue::I32(i32::MIN));
        assert!(diags.is_empty());
    }

    #[test]
    fn division_by_zero_warns_and_yields_lhs() {
        let types = types();
        let mut diags = DiagList::new();
        let result = binary_op(
            BinaryOp::Divide,
            &ConstValue::I32(7),
            &ConstValue::I32(0),
            &types,
            &mut diags,
            Source::default(),
        )
        .unwrap();
        assert_eq!(result, ConstValue::I32(7));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, crate::diag::Severity::Warning);
    }

    #[test]
    fn vector_comparison_produces_bool_vector() {
        let mut b = ProgramBuilder::new();
        let v2 = b.ty_vec(ScalarKind::I32, 2);
        let bool_v2 = b.ty_vec(ScalarKind::Bool, 2);
        let types = b.build().types;
        let lhs = ConstValue::Composite { ty: v2, elems: vec![ConstValue::I32(1), ConstValue::I32(5)] };
        let rhs = ConstValue::Composite { ty: v2, elems: vec![ConstValue::I32(2), ConstValue::I32(3)] };
        let mut diags = DiagList::new();
        let result =
            binary_op(BinaryOp::LessThan, &lhs, &rhs, &types, &mut diags, Source::default()).unwrap();
        assert_eq!(
            result,
            ConstValue::Composite {
                ty: bool_v2,
                elems: vec![ConstValue::Bool(true), ConstValue::Bool(false)],
            }
        );
    }

    #[test]
    fn bitcast_reinterprets_bits() {
        let b = ProgramBuilder::new();
        let f32_ty = b.ty_f32();
        let types = b.build().types;
        let result =
            bitcast(&ConstValue::I32(0x40000042), f32_ty, &types, Source::default()).unwrap();
        let ConstValue::F32(v) = result else { panic!("expected f32") };
        assert_eq!(v.to_bits(), 0x40000042);
        assert_eq!(format!("{:.6}", v), "2.000016");
    }

    #[test]
    fn vector_splat_construction() {
        let mut b = ProgramBuilder::new();
        let v3 = b.ty_vec(ScalarKind::F32, 3);
        let types = b.build().types;
        let result = construct(v3, &[ConstValue::F32(2.5)], &types, Source::default()).unwrap();
        let ConstValue::Composite { elems, .. } = result else { panic!("expected composite") };
        assert_eq!(elems, vec![ConstValue::F32(2.5); 3]);
    }

    #[test]
    fn clamp_builtin() {
        let types = types();
        let mut diags = DiagList::new();
        let result = builtin(
            BuiltinFn::Clamp,
            &[ConstValue::I32(10), ConstValue::I32(0), ConstValue::I32(5)],
            &types,
            &mut diags,
            Source::default(),
        )
        .unwrap();
        assert_eq!(result, ConstValue::I32(5));
        assert!(diags.is_empty());
    }

    #[test]
    fn dot_builtin_shares_the_caller_diagnostics() {
        let mut b = ProgramBuilder::new();
        let v2 = b.ty_vec(ScalarKind::I32, 2);
        let types = b.build().types;
        let a = ConstValue::Composite { ty: v2, elems: vec![ConstValue::I32(2), ConstValue::I32(3)] };
        let c = ConstValue::Composite { ty: v2, elems: vec![ConstValue::I32(4), ConstValue::I32(5)] };
        let mut diags = DiagList::new();
        let before = Diagnostic::warning("earlier".to_string(), None);
        diags.push(before);
        let result = builtin(BuiltinFn::Dot, &[a, c], &types, &mut diags, Source::default()).unwrap();
        assert_eq!(result, ConstValue::I32(23));
        // The element ops append to the caller's list rather than a private
        // one, so anything already there survives the call.
        assert_eq!(diags.len(), 1);
    }
}
