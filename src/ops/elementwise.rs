//! Per-element math shared by the Transform and Scalar families.
//!
//! Every function has the shape `fn(x, other, extra_args) -> T`. Unary ops
//! ignore `other`; scalar ops receive their scalar as `other`.

use num_complex::Complex64;
use num_traits::Float;

/// Reads `args[i]` as `T`, falling back to `default` when absent.
fn arg<T: Float>(args: &[f64], i: usize, default: f64) -> T {
    T::from(args.get(i).copied().unwrap_or(default)).unwrap_or_else(T::nan)
}

fn bool_to<T: Float>(b: bool) -> T {
    if b {
        T::one()
    } else {
        T::zero()
    }
}

pub fn identity<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x
}

pub fn neg<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    -x
}

pub fn abs<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.abs()
}

pub fn exp<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.exp()
}

pub fn log<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.ln()
}

pub fn log1p<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.ln_1p()
}

pub fn sqrt<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.sqrt()
}

pub fn square<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x * x
}

pub fn cube<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x * x * x
}

pub fn reciprocal<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.recip()
}

/// -1, 0 or 1. NaN stays NaN.
pub fn sign<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    if x.is_nan() || x == T::zero() {
        x
    } else {
        x.signum()
    }
}

pub fn floor<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.floor()
}

pub fn ceil<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.ceil()
}

pub fn round<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.round()
}

pub fn sin<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.sin()
}

pub fn cos<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.cos()
}

pub fn tan<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.tan()
}

pub fn asin<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.asin()
}

pub fn acos<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.acos()
}

pub fn atan<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.atan()
}

pub fn sinh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.sinh()
}

pub fn cosh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.cosh()
}

pub fn tanh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.tanh()
}

pub fn asinh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.asinh()
}

pub fn acosh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.acosh()
}

pub fn atanh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.atanh()
}

pub fn sigmoid<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    T::one() / (T::one() + (-x).exp())
}

pub fn softplus<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x.exp().ln_1p()
}

pub fn softsign<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    x / (T::one() + x.abs())
}

/// `args[0]` is the cutoff.
pub fn relu<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    if x > arg(a, 0, 0.0) {
        x
    } else {
        T::zero()
    }
}

/// `args[0]` is the negative slope.
pub fn leaky_relu<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    if x > T::zero() {
        x
    } else {
        x * arg(a, 0, 0.01)
    }
}

/// `args[0]` is alpha.
pub fn elu<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    if x > T::zero() {
        x
    } else {
        arg::<T>(a, 0, 1.0) * (x.exp() - T::one())
    }
}

pub fn hard_tanh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    maximum(x, -T::one(), &[]).min(T::one())
}

/// 1 where `x > args[0]`, else 0.
pub fn step<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    bool_to(x > arg(a, 0, 0.0))
}

pub fn rectified_tanh<T: Float>(x: T, _y: T, _a: &[f64]) -> T {
    maximum(x.tanh(), T::zero(), &[])
}

/// `args[0]` is the exponent.
pub fn pow<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    x.powf(arg(a, 0, 1.0))
}

pub fn add<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    x + y
}

pub fn sub<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    x - y
}

pub fn mul<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    x * y
}

pub fn div<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    x / y
}

pub fn rsub<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    y - x
}

pub fn rdiv<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    y / x
}

pub fn pow_pairwise<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    x.powf(y)
}

/// NaN in either operand gives NaN.
pub fn maximum<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    if x.is_nan() || y.is_nan() {
        T::nan()
    } else {
        x.max(y)
    }
}

pub fn minimum<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    if x.is_nan() || y.is_nan() {
        T::nan()
    } else {
        x.min(y)
    }
}

pub fn set<T: Float>(_x: T, y: T, _a: &[f64]) -> T {
    y
}

pub fn eq<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    bool_to(x == y)
}

pub fn gt<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    bool_to(x > y)
}

pub fn lt<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    bool_to(x < y)
}

pub fn gte<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    bool_to(x >= y)
}

pub fn lte<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    bool_to(x <= y)
}

/// Angle of the point `(x, y)`.
pub fn atan2<T: Float>(x: T, y: T, _a: &[f64]) -> T {
    y.atan2(x)
}

/// Truthiness against `args[0]`: any value other than it counts as true.
fn truthy<T: Float>(v: T, a: &[f64]) -> bool {
    v != arg(a, 0, 0.0)
}

pub fn and<T: Float>(x: T, y: T, a: &[f64]) -> T {
    bool_to(truthy(x, a) && truthy(y, a))
}

pub fn or<T: Float>(x: T, y: T, a: &[f64]) -> T {
    bool_to(truthy(x, a) || truthy(y, a))
}

pub fn xor<T: Float>(x: T, y: T, a: &[f64]) -> T {
    bool_to(truthy(x, a) != truthy(y, a))
}

pub fn not<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    bool_to(!truthy(x, a))
}

/// `ln` of the smallest positive normal f32.
pub(crate) const STABILIZE_CUTOFF: f64 = -87.336_544_750_553_1;

/// Clamps `x * k` into `[cutoff, -cutoff]` and scales back by `k`
/// (`args[0]`), so a later `exp(x * k)` stays finite and nonzero.
pub fn stabilize<T: Float>(x: T, _y: T, a: &[f64]) -> T {
    let k: T = arg(a, 0, 1.0);
    let cutoff: T = T::from(STABILIZE_CUTOFF).unwrap_or_else(T::nan);
    if x * k > -cutoff {
        -cutoff / k
    } else if x * k < cutoff {
        cutoff / k
    } else {
        x
    }
}

// Complex representation.

pub fn c_identity(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x
}

pub fn c_neg(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    -x
}

/// Modulus, as a complex number with zero imaginary part.
pub fn c_abs(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    Complex64::new(x.norm(), 0.0)
}

pub fn c_exp(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.exp()
}

pub fn c_log(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.ln()
}

pub fn c_sqrt(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.sqrt()
}

pub fn c_square(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x * x
}

pub fn c_cube(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x * x * x
}

pub fn c_reciprocal(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.inv()
}

pub fn c_sin(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.sin()
}

pub fn c_cos(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.cos()
}

pub fn c_tan(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.tan()
}

pub fn c_asin(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.asin()
}

pub fn c_acos(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.acos()
}

pub fn c_atan(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.atan()
}

pub fn c_sinh(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.sinh()
}

pub fn c_cosh(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.cosh()
}

pub fn c_tanh(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.tanh()
}

pub fn c_asinh(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.asinh()
}

pub fn c_atanh(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    x.atanh()
}

pub fn c_sigmoid(x: Complex64, _y: Complex64, _a: &[f64]) -> Complex64 {
    (Complex64::new(1.0, 0.0) + (-x).exp()).inv()
}

pub fn c_pow(x: Complex64, _y: Complex64, a: &[f64]) -> Complex64 {
    x.powf(a.first().copied().unwrap_or(1.0))
}

pub fn c_add(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    x + y
}

pub fn c_sub(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    x - y
}

pub fn c_mul(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    x * y
}

pub fn c_div(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    x / y
}

pub fn c_rsub(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    y - x
}

pub fn c_rdiv(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    y / x
}

pub fn c_pow_pairwise(x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    x.powc(y)
}

pub fn c_set(_x: Complex64, y: Complex64, _a: &[f64]) -> Complex64 {
    y
}
