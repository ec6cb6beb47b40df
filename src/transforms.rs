//! Eager convenience wrappers over the op catalogue.
//!
//! Every transform takes a `copy` flag: `true` returns a fresh array and
//! leaves the input untouched, `false` overwrites the input in place and
//! returns a handle to it.

use crate::array::{DataType, NDArray};
use crate::error::Error;
use crate::executor::OpExecutor;
use crate::ops::Operation;

/// Added to column deviations before dividing by them.
const VARIANCE_EPS: f64 = 1e-5;

fn run(executor: &OpExecutor, mut op: Operation, copy: bool) -> Result<NDArray, Error> {
    if !copy {
        op = op.in_place();
    }
    executor.exec(&mut op)
}

macro_rules! unary_transforms {
    ($($fn_name:ident => $op:literal),* $(,)?) => {
        $(
            pub fn $fn_name(executor: &OpExecutor, x: &NDArray, copy: bool) -> Result<NDArray, Error> {
                run(executor, Operation::new($op, x.clone())?, copy)
            }
        )*
    };
}

unary_transforms! {
    abs => "abs",
    neg => "neg",
    exp => "exp",
    log => "log",
    sqrt => "sqrt",
    sign => "sign",
    floor => "floor",
    round => "round",
    sin => "sin",
    cos => "cos",
    tanh => "tanh",
    sigmoid => "sigmoid",
    softplus => "softplus",
    relu => "relu",
    hard_tanh => "hardtanh",
    reverse => "reverse",
    not => "not",
}

fn pairwise(executor: &OpExecutor, name: &str, x: &NDArray, y: &NDArray, copy: bool) -> Result<NDArray, Error> {
    run(executor, Operation::new(name, x.clone())?.with_y(y.clone()), copy)
}

macro_rules! pairwise_transforms {
    ($($fn_name:ident => $op:literal),* $(,)?) => {
        $(
            pub fn $fn_name(executor: &OpExecutor, x: &NDArray, y: &NDArray, copy: bool) -> Result<NDArray, Error> {
                pairwise(executor, $op, x, y, copy)
            }
        )*
    };
}

pairwise_transforms! {
    greater_than_or_equal => "gte",
    less_than_or_equal => "lte",
    and => "and",
    or => "or",
    xor => "xor",
}

/// Angle of each point `(x, y)`, always into a fresh array.
pub fn atan2(executor: &OpExecutor, x: &NDArray, y: &NDArray) -> Result<NDArray, Error> {
    pairwise(executor, "atan2", x, y, true)
}

/// Clamps `x * k` so that `exp(x * k)` neither overflows nor underflows.
pub fn stabilize(executor: &OpExecutor, x: &NDArray, k: f64, copy: bool) -> Result<NDArray, Error> {
    let op = Operation::new("stabilize", x.clone())?.with_extra_args(vec![k]);
    run(executor, op, copy)
}

pub fn pow(executor: &OpExecutor, x: &NDArray, power: f64, copy: bool) -> Result<NDArray, Error> {
    let op = Operation::new("pow", x.clone())?.with_extra_args(vec![power]);
    run(executor, op, copy)
}

pub fn leaky_relu(executor: &OpExecutor, x: &NDArray, alpha: f64, copy: bool) -> Result<NDArray, Error> {
    let op = Operation::new("leakyrelu", x.clone())?.with_extra_args(vec![alpha]);
    run(executor, op, copy)
}

pub fn max_scalar(executor: &OpExecutor, x: &NDArray, s: f64, copy: bool) -> Result<NDArray, Error> {
    run(executor, Operation::scalar_op("max_scalar", x.clone(), s)?, copy)
}

pub fn min_scalar(executor: &OpExecutor, x: &NDArray, s: f64, copy: bool) -> Result<NDArray, Error> {
    run(executor, Operation::scalar_op("min_scalar", x.clone(), s)?, copy)
}

/// Softmax along `dims`, the last axis when `dims` is empty.
pub fn softmax(executor: &OpExecutor, x: &NDArray, dims: &[usize], copy: bool) -> Result<NDArray, Error> {
    run(executor, Operation::new("softmax", x.clone())?.along(dims), copy)
}

fn full_reduce(executor: &OpExecutor, name: &str, x: &NDArray, y: Option<&NDArray>) -> Result<f64, Error> {
    let mut op = Operation::new(name, x.clone())?;
    if let Some(y) = y {
        op = op.with_y(y.clone());
    }
    Ok(executor.exec_reduce(&mut op)?.re())
}

/// `a . b / (|a| |b|)`.
pub fn cosine_sim(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    let dot = full_reduce(executor, "dot", a, Some(b))?;
    let na = full_reduce(executor, "norm2", a, None)?;
    let nb = full_reduce(executor, "norm2", b, None)?;
    Ok(dot / (na * nb))
}

pub fn cosine_distance(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    Ok(1.0 - cosine_sim(executor, a, b)?)
}

/// Fraction of positions where `a` and `b` differ.
pub fn hamming_distance(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    full_reduce(executor, "hamming", a, Some(b))
}

/// `1 - sum(min(a, b)) / sum(max(a, b))`.
pub fn jaccard_distance(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    let lo = executor.exec(&mut Operation::new("minimum", a.clone())?.with_y(b.clone()))?;
    let hi = executor.exec(&mut Operation::new("maximum", a.clone())?.with_y(b.clone()))?;
    let lo = full_reduce(executor, "sum", &lo, None)?;
    let hi = full_reduce(executor, "sum", &hi, None)?;
    Ok(1.0 - lo / hi)
}

pub fn euclidean_distance(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    full_reduce(executor, "euclidean", a, Some(b))
}

pub fn manhattan_distance(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<f64, Error> {
    full_reduce(executor, "manhattan", a, Some(b))
}

/// `x / |x|`. A zero vector yields NaNs.
pub fn unit_vec(executor: &OpExecutor, x: &NDArray) -> Result<NDArray, Error> {
    let norm = full_reduce(executor, "norm2", x, None)?;
    executor.exec(&mut Operation::scalar_op("div_scalar", x.clone(), norm)?)
}

/// `[n_a, n_b]` matrix of `distance` between every sub-tensor of `a` and
/// every sub-tensor of `b` spanning `dims`.
fn all_pairs<F>(executor: &OpExecutor, a: &NDArray, b: &NDArray, dims: &[usize], distance: F) -> Result<NDArray, Error>
where
    F: Fn(&OpExecutor, &NDArray, &NDArray) -> Result<f64, Error>,
{
    let rows = a.tensors_along_dimension(dims)?;
    let cols = b.tensors_along_dimension(dims)?;
    let mut out = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        let ta = a.tensor_along_dimension(i, dims)?;
        for j in 0..cols {
            out.push(distance(executor, &ta, &b.tensor_along_dimension(j, dims)?)?);
        }
    }
    NDArray::from_vec(out, &[rows, cols], DataType::Double)
}

pub fn all_cosine_similarities(executor: &OpExecutor, a: &NDArray, b: &NDArray, dims: &[usize]) -> Result<NDArray, Error> {
    all_pairs(executor, a, b, dims, cosine_sim)
}

pub fn all_cosine_distances(executor: &OpExecutor, a: &NDArray, b: &NDArray, dims: &[usize]) -> Result<NDArray, Error> {
    all_pairs(executor, a, b, dims, cosine_distance)
}

pub fn all_euclidean_distances(executor: &OpExecutor, a: &NDArray, b: &NDArray, dims: &[usize]) -> Result<NDArray, Error> {
    all_pairs(executor, a, b, dims, euclidean_distance)
}

pub fn all_manhattan_distances(executor: &OpExecutor, a: &NDArray, b: &NDArray, dims: &[usize]) -> Result<NDArray, Error> {
    all_pairs(executor, a, b, dims, manhattan_distance)
}

/// Hands `result` back as a fresh array, or writes it over `x`.
fn finish(x: &NDArray, result: NDArray, copy: bool) -> Result<NDArray, Error> {
    if copy {
        Ok(result)
    } else {
        x.assign(&result)?;
        Ok(x.clone())
    }
}

/// Subtracts each column's mean and divides by its sample standard
/// deviation (plus a small epsilon). Columns run along axis 0.
pub fn normalize_zero_mean_and_unit_variance(executor: &OpExecutor, x: &NDArray, copy: bool) -> Result<NDArray, Error> {
    let rows = x.shape().first().copied().ok_or(Error::InvalidDimension { dimension: 0, rank: 0 })?;
    let means = executor.exec(&mut Operation::new("mean", x.clone())?.along(&[0]))?;
    let centered = executor.exec(&mut Operation::new("sub", x.clone())?.with_y(means))?;
    let squares = executor.exec(&mut Operation::new("square", centered.clone())?)?;
    let total = executor.exec(&mut Operation::new("sum", squares)?.along(&[0]))?;
    let variance = executor.exec(&mut Operation::scalar_op("div_scalar", total, rows.saturating_sub(1).max(1) as f64)?)?;
    let deviation = executor.exec(&mut Operation::new("sqrt", variance)?)?;
    let padded = executor.exec(&mut Operation::scalar_op("add_scalar", deviation, VARIANCE_EPS)?)?;
    let result = executor.exec(&mut Operation::new("div", centered)?.with_y(padded))?;
    finish(x, result, copy)
}

fn square_side(x: &NDArray) -> Result<usize, Error> {
    match x.shape() {
        &[r, c] if r == c => Ok(r),
        other => Err(Error::InvalidOperation(format!(
            "matrix power needs a square matrix, got {:?}",
            other
        ))),
    }
}

fn identity_matrix(n: usize, dtype: DataType) -> Result<NDArray, Error> {
    let data = (0..n * n).map(|i| if i % (n + 1) == 0 { 1.0 } else { 0.0 }).collect();
    NDArray::from_vec(data, &[n, n], dtype)
}

/// Gauss-Jordan elimination with partial pivoting.
fn invert(x: &NDArray) -> Result<NDArray, Error> {
    let n = square_side(x)?;
    if x.data_type().is_complex() {
        return Err(Error::unsupported("invert", x.data_type()));
    }
    let mut a = x.to_vec_f64()?;
    let mut inv = identity_matrix(n, DataType::Double)?.to_vec_f64()?;
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))
            .unwrap_or(col);
        let p = a[pivot * n + col];
        if p == 0.0 || !p.is_finite() {
            return Err(Error::InvalidOperation("matrix is singular".to_string()));
        }
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
                inv.swap(pivot * n + k, col * n + k);
            }
        }
        for k in 0..n {
            a[col * n + k] /= p;
            inv[col * n + k] /= p;
        }
        for row in (0..n).filter(|&r| r != col) {
            let f = a[row * n + col];
            if f != 0.0 {
                for k in 0..n {
                    a[row * n + k] -= f * a[col * n + k];
                    inv[row * n + k] -= f * inv[col * n + k];
                }
            }
        }
    }
    NDArray::from_vec(inv, &[n, n], x.data_type())
}

fn mmul(executor: &OpExecutor, a: &NDArray, b: &NDArray) -> Result<NDArray, Error> {
    executor.exec(&mut Operation::new("mmul", a.clone())?.with_y(b.clone()))
}

/// `x` raised to the integer power `n` by repeated squaring. `n == 0` gives
/// the identity; a negative `n` inverts `x` first.
pub fn mpow(executor: &OpExecutor, x: &NDArray, n: i32, copy: bool) -> Result<NDArray, Error> {
    let side = square_side(x)?;
    let mut base = if n < 0 { invert(x)? } else { x.dup()? };
    let mut result: Option<NDArray> = None;
    let mut e = n.unsigned_abs();
    while e > 0 {
        if e & 1 == 1 {
            result = Some(match result {
                Some(r) => mmul(executor, &r, &base)?,
                None => base.clone(),
            });
        }
        e >>= 1;
        if e > 0 {
            base = mmul(executor, &base, &base)?;
        }
    }
    let result = match result {
        Some(r) => r,
        None => identity_matrix(side, x.data_type())?,
    };
    finish(x, result, copy)
}
