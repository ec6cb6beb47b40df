//! Reduction (accumulation) math.
//!
//! A reduction is described by a [`Fold`]: the zero element that seeds every
//! segment, the per-element `update`, the associative `combine` that merges
//! two partial folds, and `finish`, applied once to the merged total with the
//! element count. `combine(zero, p) == p` holds for every fold below, so a
//! segment can always start from the zero element.

use crate::array::{DataType, Element, Value};
use crate::error::Error;
use half::f16;
use num_complex::Complex64;
use num_traits::{Float, Zero};

#[derive(Clone, Copy)]
pub struct Fold<T> {
    pub zero: T,
    /// `(accumulator, x, y) -> accumulator`. `y` is zero for unary reductions.
    pub update: fn(T, T, T) -> T,
    pub combine: fn(T, T) -> T,
    pub finish: fn(T, usize) -> T,
}

impl<T: Element> Fold<T> {
    /// Folds `xs` (paired with `ys` when present) in segments of `block`
    /// elements, merging segment results with `combine`.
    pub(crate) fn fold_segmented(&self, zero: T, xs: &[T], ys: Option<&[T]>, block: usize) -> T {
        let block = block.max(1);
        let mut total = zero;
        for (segment, chunk) in xs.chunks(block).enumerate() {
            let base = segment * block;
            let mut acc = zero;
            for (i, &x) in chunk.iter().enumerate() {
                let y = ys.map(|ys| ys[base + i]).unwrap_or_else(T::zero);
                acc = (self.update)(acc, x, y);
            }
            total = (self.combine)(total, acc);
        }
        (self.finish)(total, xs.len())
    }
}

#[derive(Clone, Copy)]
pub struct AccumulationMath {
    pub float: Fold<f32>,
    pub double: Fold<f64>,
    pub complex: Option<Fold<Complex64>>,
    pub half_zero: f16,
}

impl AccumulationMath {
    /// The zero element for data of type `dtype`.
    pub fn zero(&self, op: &str, dtype: DataType) -> Result<Value, Error> {
        match dtype {
            DataType::Half => Ok(Value::Real(self.half_zero.to_f64())),
            DataType::Float => Ok(Value::Real(self.float.zero as f64)),
            DataType::Double => Ok(Value::Real(self.double.zero)),
            DataType::Complex => self
                .complex
                .map(|f| Value::Complex(f.zero))
                .ok_or_else(|| Error::unsupported(op, dtype)),
        }
    }

    /// Merges two partial results computed over data of type `dtype`.
    pub fn combine(&self, op: &str, dtype: DataType, a: Value, b: Value) -> Result<Value, Error> {
        match dtype {
            DataType::Half | DataType::Float => Ok(Value::Real(
                (self.float.combine)(a.re() as f32, b.re() as f32) as f64,
            )),
            DataType::Double => Ok(Value::Real((self.double.combine)(a.re(), b.re()))),
            DataType::Complex => {
                let fold = self.complex.ok_or_else(|| Error::unsupported(op, dtype))?;
                Ok(Value::Complex((fold.combine)(a.as_complex(), b.as_complex())))
            }
        }
    }
}

fn plus<T: Zero + Copy>(a: T, b: T) -> T {
    a + b
}

// `Float::max`/`min` skip NaN; extremes propagate it instead.
fn larger<T: Float>(a: T, b: T) -> T {
    if a.is_nan() || b.is_nan() {
        T::nan()
    } else {
        a.max(b)
    }
}

fn smaller<T: Float>(a: T, b: T) -> T {
    if a.is_nan() || b.is_nan() {
        T::nan()
    } else {
        a.min(b)
    }
}

fn times<T: Float>(a: T, b: T) -> T {
    a * b
}

fn as_is<T>(acc: T, _n: usize) -> T {
    acc
}

fn root<T: Float>(acc: T, _n: usize) -> T {
    acc.sqrt()
}

fn per_element<T: Float>(acc: T, n: usize) -> T {
    acc / T::from(n).unwrap_or_else(T::nan)
}

fn sum_update<T: Zero + Copy>(acc: T, x: T, _y: T) -> T {
    acc + x
}

fn prod_update<T: Float>(acc: T, x: T, _y: T) -> T {
    acc * x
}

fn max_update<T: Float>(acc: T, x: T, _y: T) -> T {
    larger(acc, x)
}

fn min_update<T: Float>(acc: T, x: T, _y: T) -> T {
    smaller(acc, x)
}

fn abs_sum_update<T: Float>(acc: T, x: T, _y: T) -> T {
    acc + x.abs()
}

fn square_sum_update<T: Float>(acc: T, x: T, _y: T) -> T {
    acc + x * x
}

fn abs_max_update<T: Float>(acc: T, x: T, _y: T) -> T {
    larger(acc, x.abs())
}

fn dot_update<T: Float>(acc: T, x: T, y: T) -> T {
    acc + x * y
}

fn squared_distance_update<T: Float>(acc: T, x: T, y: T) -> T {
    let d = x - y;
    acc + d * d
}

fn abs_distance_update<T: Float>(acc: T, x: T, y: T) -> T {
    acc + (x - y).abs()
}

fn mismatch_update<T: Float>(acc: T, x: T, y: T) -> T {
    if x == y {
        acc
    } else {
        acc + T::one()
    }
}

fn c_prod_update(acc: Complex64, x: Complex64, _y: Complex64) -> Complex64 {
    acc * x
}

fn c_times(a: Complex64, b: Complex64) -> Complex64 {
    a * b
}

fn c_per_element(acc: Complex64, n: usize) -> Complex64 {
    acc / n as f64
}

macro_rules! real_accumulation {
    ($zero:expr, $update:ident, $combine:ident, $finish:ident) => {
        real_accumulation!($zero, $update, $combine, $finish, None)
    };
    ($zero:expr, $update:ident, $combine:ident, $finish:ident, $complex:expr) => {
        AccumulationMath {
            float: Fold {
                zero: $zero as f32,
                update: $update::<f32>,
                combine: $combine::<f32>,
                finish: $finish::<f32>,
            },
            double: Fold {
                zero: $zero,
                update: $update::<f64>,
                combine: $combine::<f64>,
                finish: $finish::<f64>,
            },
            complex: $complex,
            half_zero: f16::from_f64($zero),
        }
    };
}

pub fn sum() -> AccumulationMath {
    real_accumulation!(
        0.0,
        sum_update,
        plus,
        as_is,
        Some(Fold {
            zero: Complex64::zero(),
            update: sum_update::<Complex64>,
            combine: plus::<Complex64>,
            finish: as_is::<Complex64>,
        })
    )
}

pub fn mean() -> AccumulationMath {
    real_accumulation!(
        0.0,
        sum_update,
        plus,
        per_element,
        Some(Fold {
            zero: Complex64::zero(),
            update: sum_update::<Complex64>,
            combine: plus::<Complex64>,
            finish: c_per_element,
        })
    )
}

pub fn prod() -> AccumulationMath {
    real_accumulation!(
        1.0,
        prod_update,
        times,
        as_is,
        Some(Fold {
            zero: Complex64::new(1.0, 0.0),
            update: c_prod_update,
            combine: c_times,
            finish: as_is::<Complex64>,
        })
    )
}

pub fn max() -> AccumulationMath {
    real_accumulation!(f64::NEG_INFINITY, max_update, larger, as_is)
}

pub fn min() -> AccumulationMath {
    real_accumulation!(f64::INFINITY, min_update, smaller, as_is)
}

pub fn norm1() -> AccumulationMath {
    real_accumulation!(0.0, abs_sum_update, plus, as_is)
}

pub fn norm2() -> AccumulationMath {
    real_accumulation!(0.0, square_sum_update, plus, root)
}

pub fn norm_max() -> AccumulationMath {
    real_accumulation!(0.0, abs_max_update, larger, as_is)
}

pub fn dot() -> AccumulationMath {
    real_accumulation!(0.0, dot_update, plus, as_is)
}

pub fn euclidean() -> AccumulationMath {
    real_accumulation!(0.0, squared_distance_update, plus, root)
}

pub fn manhattan() -> AccumulationMath {
    real_accumulation!(0.0, abs_distance_update, plus, as_is)
}

/// Fraction of positions where `x` and `y` differ.
pub fn hamming() -> AccumulationMath {
    real_accumulation!(0.0, mismatch_update, plus, per_element)
}
