//! Derivative rules.
//!
//! Each rule receives the accumulated output gradient `g` of one node and
//! returns, in argument order, the gradient contribution for every argument,
//! built from ordinary graph nodes. Contributions always have the shape of
//! the argument they belong to.

use super::{DiffInput, Graph, NodeRef};
use crate::array::Value;
use crate::convolution::Im2ColConfig;
use crate::error::Error;
use crate::ops::elementwise::STABILIZE_CUTOFF;
use crate::util::{shape_from_ints, validate_dimensions};

fn x(d: &DiffInput) -> NodeRef {
    d.args[0]
}

fn y(d: &DiffInput) -> Result<NodeRef, Error> {
    d.args.get(1).copied().ok_or_else(|| {
        Error::DifferentiationError(format!("{} expects two arguments", d.call.def.name))
    })
}

fn extra(d: &DiffInput, i: usize, default: f64) -> f64 {
    d.call.extra_args.get(i).copied().unwrap_or(default)
}

fn scalar(d: &DiffInput) -> Result<Value, Error> {
    d.call
        .scalar
        .ok_or_else(|| Error::DifferentiationError(format!("{} has no scalar", d.call.def.name)))
}

fn shape_of(g: &Graph, node: NodeRef) -> Result<Vec<usize>, Error> {
    Ok(g.shape(node)?.to_vec())
}

/// `g * local`, the common shape of unary rules.
fn chain(g: &mut Graph, d: &DiffInput, local: NodeRef) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![g.mul(d.grad, local)?])
}

/// Contributions for a broadcasting pairwise op.
fn pairwise(g: &mut Graph, d: &DiffInput, dx: NodeRef, dy: NodeRef) -> Result<Vec<NodeRef>, Error> {
    let sx = shape_of(g, x(d))?;
    let sy = shape_of(g, y(d)?)?;
    Ok(vec![g.unbroadcast(dx, &sx)?, g.unbroadcast(dy, &sy)?])
}

pub fn identity(_g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![d.grad])
}

pub fn neg(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![g.neg(d.grad)?])
}

pub fn abs(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = g.sign(x(d))?;
    chain(g, d, s)
}

pub fn exp(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    chain(g, d, d.node)
}

pub fn log(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![g.div(d.grad, x(d))?])
}

pub fn log1p(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let shifted = g.add_scalar(x(d), 1.0)?;
    Ok(vec![g.div(d.grad, shifted)?])
}

pub fn sqrt(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let half = g.mul_scalar(d.grad, 0.5)?;
    Ok(vec![g.div(half, d.node)?])
}

pub fn square(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let twice = g.mul_scalar(x(d), 2.0)?;
    chain(g, d, twice)
}

pub fn cube(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let sq = g.square(x(d))?;
    let local = g.mul_scalar(sq, 3.0)?;
    chain(g, d, local)
}

pub fn reciprocal(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let sq = g.square(x(d))?;
    let q = g.div(d.grad, sq)?;
    Ok(vec![g.neg(q)?])
}

pub fn sin(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let c = g.cos(x(d))?;
    chain(g, d, c)
}

pub fn cos(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = g.sin(x(d))?;
    let gs = g.mul(d.grad, s)?;
    Ok(vec![g.neg(gs)?])
}

pub fn tan(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let c = g.cos(x(d))?;
    let c2 = g.square(c)?;
    Ok(vec![g.div(d.grad, c2)?])
}

/// `1 - x^2`.
fn one_minus_square(g: &mut Graph, v: NodeRef) -> Result<NodeRef, Error> {
    let sq = g.square(v)?;
    g.rsub_scalar(sq, 1.0)
}

pub fn asin(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let inner = one_minus_square(g, x(d))?;
    let root = g.sqrt(inner)?;
    Ok(vec![g.div(d.grad, root)?])
}

pub fn acos(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let inner = one_minus_square(g, x(d))?;
    let root = g.sqrt(inner)?;
    let q = g.div(d.grad, root)?;
    Ok(vec![g.neg(q)?])
}

pub fn atan(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let sq = g.square(x(d))?;
    let denom = g.add_scalar(sq, 1.0)?;
    Ok(vec![g.div(d.grad, denom)?])
}

pub fn sinh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let c = g.cosh(x(d))?;
    chain(g, d, c)
}

pub fn cosh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = g.sinh(x(d))?;
    chain(g, d, s)
}

pub fn tanh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let local = one_minus_square(g, d.node)?;
    chain(g, d, local)
}

pub fn asinh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let sq = g.square(x(d))?;
    let inner = g.add_scalar(sq, 1.0)?;
    let root = g.sqrt(inner)?;
    Ok(vec![g.div(d.grad, root)?])
}

/// `1 / (sqrt(x - 1) * sqrt(x + 1))`, defined for `x > 1`.
pub fn acosh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let below = g.sub_scalar(x(d), 1.0)?;
    let above = g.add_scalar(x(d), 1.0)?;
    let a = g.sqrt(below)?;
    let b = g.sqrt(above)?;
    let denom = g.mul(a, b)?;
    Ok(vec![g.div(d.grad, denom)?])
}

pub fn atanh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let denom = one_minus_square(g, x(d))?;
    Ok(vec![g.div(d.grad, denom)?])
}

pub fn sigmoid(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let complement = g.rsub_scalar(d.node, 1.0)?;
    let local = g.mul(d.node, complement)?;
    chain(g, d, local)
}

pub fn softplus(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = g.sigmoid(x(d))?;
    chain(g, d, s)
}

pub fn softsign(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let a = g.abs(x(d))?;
    let shifted = g.add_scalar(a, 1.0)?;
    let denom = g.square(shifted)?;
    Ok(vec![g.div(d.grad, denom)?])
}

pub fn relu(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let mask = g.step(x(d), extra(d, 0, 0.0))?;
    chain(g, d, mask)
}

pub fn leaky_relu(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let alpha = extra(d, 0, 0.01);
    let mask = g.step(x(d), 0.0)?;
    let scaled = g.mul_scalar(mask, 1.0 - alpha)?;
    let local = g.add_scalar(scaled, alpha)?;
    chain(g, d, local)
}

/// 1 above zero, `out + alpha` below.
pub fn elu(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let alpha = extra(d, 0, 1.0);
    let mask = g.step(x(d), 0.0)?;
    let below = g.rsub_scalar(mask, 1.0)?;
    let slope = g.add_scalar(d.node, alpha)?;
    let negative_part = g.mul(below, slope)?;
    let local = g.add(mask, negative_part)?;
    chain(g, d, local)
}

pub fn hard_tanh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let a = g.abs(x(d))?;
    let inside = g.lt_scalar(a, 1.0)?;
    chain(g, d, inside)
}

/// Passes the gradient where `x * k` was left unclamped.
pub fn stabilize(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let k = extra(d, 0, 1.0);
    let scaled = g.mul_scalar(x(d), k)?;
    let a = g.abs(scaled)?;
    let inside = g.lt_scalar(a, -STABILIZE_CUTOFF)?;
    chain(g, d, inside)
}

pub fn rectified_tanh(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let slope = one_minus_square(g, d.node)?;
    let mask = g.step(x(d), 0.0)?;
    let local = g.mul(slope, mask)?;
    chain(g, d, local)
}

pub fn pow(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let p = extra(d, 0, 1.0);
    let lowered = g.pow(x(d), p - 1.0)?;
    let local = g.mul_scalar(lowered, p)?;
    chain(g, d, local)
}

fn softmax_dims(g: &Graph, d: &DiffInput) -> Result<Vec<usize>, Error> {
    let rank = g.shape(x(d))?.len();
    if d.call.dimensions.is_empty() {
        return Ok(if rank > 0 { vec![rank - 1] } else { Vec::new() });
    }
    validate_dimensions(&d.call.dimensions, rank)
}

/// `out * (g - sum(g * out))` along the softmax axes.
pub fn softmax(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let dims = softmax_dims(g, d)?;
    let shape = shape_of(g, x(d))?;
    let weighted = g.mul(d.grad, d.node)?;
    let total = g.sum(weighted, &dims)?;
    let spread = g.repeat(total, &shape, &dims)?;
    let centered = g.sub(d.grad, spread)?;
    Ok(vec![g.mul(d.node, centered)?])
}

/// `g - exp(out) * sum(g)` along the softmax axes.
pub fn log_softmax(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let dims = softmax_dims(g, d)?;
    let shape = shape_of(g, x(d))?;
    let total = g.sum(d.grad, &dims)?;
    let spread = g.repeat(total, &shape, &dims)?;
    let probs = g.exp(d.node)?;
    let correction = g.mul(probs, spread)?;
    Ok(vec![g.sub(d.grad, correction)?])
}

pub fn add(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    pairwise(g, d, d.grad, d.grad)
}

pub fn sub(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let ng = g.neg(d.grad)?;
    pairwise(g, d, d.grad, ng)
}

pub fn mul(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let dx = g.mul(d.grad, b)?;
    let dy = g.mul(d.grad, x(d))?;
    pairwise(g, d, dx, dy)
}

/// `(g / b, -g * a / b^2)`.
pub fn div(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let dx = g.div(d.grad, b)?;
    let ga = g.mul(d.grad, x(d))?;
    let b2 = g.square(b)?;
    let q = g.div(ga, b2)?;
    let dy = g.neg(q)?;
    pairwise(g, d, dx, dy)
}

/// `out = y - x`.
pub fn rsub(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let ng = g.neg(d.grad)?;
    pairwise(g, d, ng, d.grad)
}

/// `out = y / x`.
pub fn rdiv(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let gb = g.mul(d.grad, b)?;
    let a2 = g.square(x(d))?;
    let q = g.div(gb, a2)?;
    let dx = g.neg(q)?;
    let dy = g.div(d.grad, x(d))?;
    pairwise(g, d, dx, dy)
}

/// `out = a ^ b`: `(g * b * a^(b-1), g * out * ln a)`.
pub fn pow_pairwise(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let a = x(d);
    let b = y(d)?;
    let lowered = g.sub_scalar(b, 1.0)?;
    let p = g.pow_pairwise(a, lowered)?;
    let local_a = g.mul(b, p)?;
    let dx = g.mul(d.grad, local_a)?;
    let ln_a = g.log(a)?;
    let local_b = g.mul(d.node, ln_a)?;
    let dy = g.mul(d.grad, local_b)?;
    pairwise(g, d, dx, dy)
}

/// `out = atan2(y, x)`: `d/dx = -y / r^2`, `d/dy = x / r^2`.
pub fn atan2(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let x2 = g.square(x(d))?;
    let y2 = g.square(b)?;
    let r2 = g.add(x2, y2)?;
    let gr = g.div(d.grad, r2)?;
    let gy = g.mul(gr, b)?;
    let dx = g.neg(gy)?;
    let dy = g.mul(gr, x(d))?;
    pairwise(g, d, dx, dy)
}

/// Ties send the gradient to `x`.
pub fn maximum(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let to_y = g.gt(b, x(d))?;
    let to_x = g.rsub_scalar(to_y, 1.0)?;
    let dx = g.mul(d.grad, to_x)?;
    let dy = g.mul(d.grad, to_y)?;
    pairwise(g, d, dx, dy)
}

pub fn minimum(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let to_y = g.lt(b, x(d))?;
    let to_x = g.rsub_scalar(to_y, 1.0)?;
    let dx = g.mul(d.grad, to_x)?;
    let dy = g.mul(d.grad, to_y)?;
    pairwise(g, d, dx, dy)
}

/// add_scalar and sub_scalar.
pub fn shift_scalar(_g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![d.grad])
}

pub fn mul_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = scalar(d)?;
    Ok(vec![g.mul_scalar(d.grad, s)?])
}

pub fn div_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = scalar(d)?;
    Ok(vec![g.div_scalar(d.grad, s)?])
}

pub fn rsub_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![g.neg(d.grad)?])
}

/// `out = s / x`.
pub fn rdiv_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = scalar(d)?;
    let gs = g.mul_scalar(d.grad, s)?;
    let x2 = g.square(x(d))?;
    let q = g.div(gs, x2)?;
    Ok(vec![g.neg(q)?])
}

pub fn max_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = scalar(d)?.re();
    let mask = g.gt_scalar(x(d), s)?;
    chain(g, d, mask)
}

pub fn min_scalar(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let s = scalar(d)?.re();
    let mask = g.lt_scalar(x(d), s)?;
    chain(g, d, mask)
}

/// Reduced axes of an accumulation node, every axis when none were given.
fn reduced_axes(g: &Graph, d: &DiffInput) -> Result<Vec<usize>, Error> {
    let rank = g.shape(x(d))?.len();
    if d.call.dimensions.is_empty() {
        return Ok((0..rank).collect());
    }
    validate_dimensions(&d.call.dimensions, rank)
}

/// Broadcasts a reduced-shape node back over the reduced axes.
fn expand(g: &mut Graph, d: &DiffInput, reduced: NodeRef) -> Result<NodeRef, Error> {
    let dims = reduced_axes(g, d)?;
    let shape = shape_of(g, x(d))?;
    g.repeat(reduced, &shape, &dims)
}

pub fn sum(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    Ok(vec![expand(g, d, d.grad)?])
}

pub fn mean(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let shape = shape_of(g, x(d))?;
    let n: usize = reduced_axes(g, d)?.iter().map(|&a| shape[a]).product();
    let spread = expand(g, d, d.grad)?;
    Ok(vec![g.div_scalar(spread, n.max(1) as f64)?])
}

/// `g * out / x`; undefined where `x` is zero.
pub fn prod(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let eo = expand(g, d, d.node)?;
    let num = g.mul(eg, eo)?;
    Ok(vec![g.div(num, x(d))?])
}

/// max and min: the gradient goes to every element equal to the extreme.
pub fn extreme(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let eo = expand(g, d, d.node)?;
    let mask = g.eq(x(d), eo)?;
    Ok(vec![g.mul(eg, mask)?])
}

pub fn norm1(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let s = g.sign(x(d))?;
    Ok(vec![g.mul(eg, s)?])
}

pub fn norm2(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let eo = expand(g, d, d.node)?;
    let gx = g.mul(eg, x(d))?;
    Ok(vec![g.div(gx, eo)?])
}

pub fn norm_max(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let eo = expand(g, d, d.node)?;
    let a = g.abs(x(d))?;
    let mask = g.eq(a, eo)?;
    let s = g.sign(x(d))?;
    let signed = g.mul(eg, s)?;
    Ok(vec![g.mul(signed, mask)?])
}

pub fn dot(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let b = y(d)?;
    let dx = g.mul(eg, b)?;
    let dy = g.mul(eg, x(d))?;
    pairwise(g, d, dx, dy)
}

pub fn euclidean(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let eo = expand(g, d, d.node)?;
    let diff = g.sub(x(d), y(d)?)?;
    let scaled = g.mul(eg, diff)?;
    let dx = g.div(scaled, eo)?;
    let dy = g.neg(dx)?;
    pairwise(g, d, dx, dy)
}

pub fn manhattan(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let eg = expand(g, d, d.grad)?;
    let diff = g.sub(x(d), y(d)?)?;
    let s = g.sign(diff)?;
    let dx = g.mul(eg, s)?;
    let dy = g.neg(dx)?;
    pairwise(g, d, dx, dy)
}

/// `(g . b^T, a^T . g)`.
pub fn mmul(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let b = y(d)?;
    let bt = g.transpose(b)?;
    let at = g.transpose(x(d))?;
    Ok(vec![g.mmul(d.grad, bt)?, g.mmul(at, d.grad)?])
}

pub fn transpose(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    if d.call.int_args.is_empty() {
        return Ok(vec![g.transpose(d.grad)?]);
    }
    let perm = shape_from_ints(&d.call.int_args)?;
    let mut inverse = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inverse[p] = i;
    }
    Ok(vec![g.permute(d.grad, &inverse)?])
}

pub fn reshape(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let shape = shape_of(g, x(d))?;
    Ok(vec![g.reshape(d.grad, &shape)?])
}

pub fn repeat(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    if d.call.dimensions.is_empty() {
        let shape = shape_of(g, x(d))?;
        return Ok(vec![g.reduce_to(d.grad, &shape)?]);
    }
    let dims = d.call.dimensions.clone();
    Ok(vec![g.sum(d.grad, &dims)?])
}

pub fn reduce_to(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let shape = shape_of(g, x(d))?;
    Ok(vec![g.repeat(d.grad, &shape, &[])?])
}

/// col2im is the adjoint of im2col.
pub fn im2col(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let cfg = Im2ColConfig::from_int_args(&d.call.int_args)?;
    let shape = shape_of(g, x(d))?;
    let (h, w) = match shape.as_slice() {
        [_, _, h, w] => (*h, *w),
        _ => return Err(Error::shape_mismatch(&[0, 0, 0, 0], &shape)),
    };
    let geometry = cfg.geometry(h, w)?;
    Ok(vec![g.col2im(
        d.grad,
        cfg.stride,
        (geometry.pad_top, geometry.pad_left),
        (h, w),
        cfg.dilation,
    )?])
}

pub fn col2im(g: &mut Graph, d: &DiffInput) -> Result<Vec<NodeRef>, Error> {
    let a = shape_from_ints(&d.call.int_args)?;
    let cols = shape_of(g, x(d))?;
    if a.len() != 8 || cols.len() != 6 {
        return Err(Error::DifferentiationError(format!(
            "malformed col2im node: args {:?}, input shape {:?}",
            a, cols
        )));
    }
    let cfg = Im2ColConfig::new((cols[2], cols[3]))
        .with_stride((a[0], a[1]))
        .with_padding((a[2], a[3]))
        .with_dilation((a[6], a[7]))
        .with_out_size((cols[4], cols[5]));
    Ok(vec![g.im2col(d.grad, &cfg)?])
}
