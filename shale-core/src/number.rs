//! Scalar numeric semantics: f16 quantization, half-precision bit
//! conversion, and the narrowing rules used when values cross type
//! boundaries at runtime.

/// Largest finite f16 value.
pub const F16_MAX: f32 = 65504.0;
/// Smallest positive normal f16 value, 2^-14.
pub const F16_SMALLEST_NORMAL: f32 = 6.103515625e-05;
/// Smallest positive subnormal f16 value, 2^-24.
pub const F16_SMALLEST_SUBNORMAL: f32 = 5.9604644775390625e-08;

/// Rounds an f32 to the nearest value representable as an f16, by masking
/// mantissa bits of the f32 representation.
///
/// Normal-range values keep the top 10 of the 23 mantissa bits. Values in
/// the f16 subnormal range keep fewer bits, down to none at 2^-24. Values
/// below the subnormal range flush to a signed zero; values beyond the f16
/// finite range become a signed infinity. NaN passes through.
pub fn quantize_f16(value: f32) -> f32 {
    if value.is_nan() {
        return value;
    }
    let bits = value.to_bits();
    let sign = bits & 0x8000_0000;
    let abs = f32::from_bits(bits & 0x7fff_ffff);
    if abs > F16_MAX {
        return f32::from_bits(sign | 0x7f80_0000);
    }
    if abs < F16_SMALLEST_SUBNORMAL {
        return f32::from_bits(sign);
    }
    if abs < F16_SMALLEST_NORMAL {
        // Subnormal range: representable values are multiples of 2^-24, so
        // the number of mantissa bits kept depends on the exponent.
        let exponent = ((bits >> 23) & 0xff) as i32 - 127;
        let kept = (exponent + 24) as u32;
        let mask = !0u32 << (23 - kept);
        return f32::from_bits(bits & mask);
    }
    f32::from_bits(bits & 0xffff_e000)
}

/// Packs an f32 into the 16-bit f16 memory representation. The value is
/// quantized first, so the packing itself is exact.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let value = quantize_f16(value);
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    if value.is_nan() {
        return sign | 0x7e00;
    }
    let abs = f32::from_bits(bits & 0x7fff_ffff);
    if abs.is_infinite() {
        return sign | 0x7c00;
    }
    if abs < F16_SMALLEST_SUBNORMAL {
        return sign;
    }
    if abs < F16_SMALLEST_NORMAL {
        // Subnormal: the mantissa counts multiples of 2^-24.
        let mant = (abs / F16_SMALLEST_SUBNORMAL) as u16;
        return sign | mant;
    }
    let exponent = ((bits >> 23) & 0xff) as u16 - 112;
    let mantissa = ((bits >> 13) & 0x3ff) as u16;
    sign | (exponent << 10) | mantissa
}

/// Expands the 16-bit f16 memory representation to an f32. Exact; every
/// f16 value is representable as an f32.
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = ((bits as u32) & 0x8000) << 16;
    let exponent = (bits >> 10) & 0x1f;
    let mantissa = (bits & 0x3ff) as u32;
    if exponent == 0 {
        if mantissa == 0 {
            return f32::from_bits(sign);
        }
        let magnitude = mantissa as f32 * F16_SMALLEST_SUBNORMAL;
        return f32::from_bits(sign | magnitude.to_bits());
    }
    if exponent == 0x1f {
        let payload = if mantissa == 0 { 0 } else { 0x40_0000 };
        return f32::from_bits(sign | 0x7f80_0000 | payload);
    }
    f32::from_bits(sign | ((exponent as u32 + 112) << 23) | (mantissa << 13))
}

/// Float to signed integer with clamping at the target range, matching GPU
/// narrowing semantics. NaN maps to zero.
pub fn f64_to_i32_clamped(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    if value <= i32::MIN as f64 {
        return i32::MIN;
    }
    if value >= i32::MAX as f64 {
        return i32::MAX;
    }
    value as i32
}

/// Float to unsigned integer with clamping at the target range. NaN maps
/// to zero.
pub fn f64_to_u32_clamped(value: f64) -> u32 {
    if value.is_nan() {
        return 0;
    }
    if value <= 0.0 {
        return 0;
    }
    if value >= u32::MAX as f64 {
        return u32::MAX;
    }
    value as u32
}

/// Conversion to bool: everything except a positive zero is true.
pub fn f64_to_bool(value: f64) -> bool {
    !(value == 0.0 && value.is_sign_positive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_masks_low_mantissa_bits() {
        // 1.5 is exactly representable; adding one ulp of f32 is not.
        let exact = 1.5f32;
        assert_eq!(quantize_f16(exact), exact);
        let noisy = f32::from_bits(exact.to_bits() | 0x1fff);
        assert_eq!(quantize_f16(noisy), exact);
        assert_eq!(quantize_f16(noisy).to_bits() & 0x1fff, 0);
    }

    #[test]
    fn quantize_preserves_sign() {
        assert_eq!(quantize_f16(-1.5f32), -1.5f32);
        let negative_noise = f32::from_bits((-1.5f32).to_bits() | 0x1fff);
        assert_eq!(quantize_f16(negative_noise), -1.5f32);
    }

    #[test]
    fn quantize_flushes_tiny_values_to_signed_zero() {
        let tiny = F16_SMALLEST_SUBNORMAL / 2.0;
        assert_eq!(quantize_f16(tiny).to_bits(), 0);
        assert_eq!(quantize_f16(-tiny).to_bits(), 0x8000_0000);
    }

    #[test]
    fn quantize_overflows_to_infinity() {
        assert_eq!(quantize_f16(65536.0), f32::INFINITY);
        assert_eq!(quantize_f16(-65536.0), f32::NEG_INFINITY);
        assert_eq!(quantize_f16(F16_MAX), F16_MAX);
    }

    #[test]
    fn quantize_subnormal_range() {
        // 2^-24 is the smallest subnormal and quantizes to itself.
        assert_eq!(quantize_f16(F16_SMALLEST_SUBNORMAL), F16_SMALLEST_SUBNORMAL);
        // A value between two subnormal steps truncates to the lower one.
        let step = F16_SMALLEST_SUBNORMAL;
        let between = step * 2.5;
        assert_eq!(quantize_f16(between), step * 2.0);
    }

    #[test]
    fn f16_bits_round_trip() {
        for value in [0.0f32, -0.0, 1.0, -1.0, 0.5, 1.5, 65504.0, F16_SMALLEST_NORMAL, F16_SMALLEST_SUBNORMAL] {
            let bits = f32_to_f16_bits(value);
            assert_eq!(f16_bits_to_f32(bits), value, "value {value}");
        }
        assert_eq!(f16_bits_to_f32(f32_to_f16_bits(f32::INFINITY)), f32::INFINITY);
        assert!(f16_bits_to_f32(f32_to_f16_bits(f32::NAN)).is_nan());
    }

    #[test]
    fn float_to_int_clamps() {
        assert_eq!(f64_to_i32_clamped(3.7), 3);
        assert_eq!(f64_to_i32_clamped(-3.7), -3);
        assert_eq!(f64_to_i32_clamped(1e12), i32::MAX);
        assert_eq!(f64_to_i32_clamped(-1e12), i32::MIN);
        assert_eq!(f64_to_u32_clamped(-1.0), 0);
        assert_eq!(f64_to_u32_clamped(1e12), u32::MAX);
        assert_eq!(f64_to_u32_clamped(f64::NAN), 0);
    }

    #[test]
    fn bool_conversion_uses_positive_zero() {
        assert!(!f64_to_bool(0.0));
        assert!(f64_to_bool(-0.0));
        assert!(f64_to_bool(2.0));
    }
}
