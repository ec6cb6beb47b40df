//! Multi-input and structural ops that do not fit the elementwise or
//! reduction contracts: matrix multiply, layout changes, the broadcast and
//! unbroadcast pair used by gradient rules, and the convolution layout
//! transform.

use crate::array::NDArray;
use crate::convolution::{self, Im2ColConfig};
use crate::error::Error;
use crate::util::{
    broadcast_shapes, expanded_shape, reduced_shape, shape_from_ints, validate_dimensions,
};
use ndarray::{Axis, Ix2};

/// Integer, float and dimension arguments handed to a custom op.
#[derive(Debug, Clone, Copy)]
pub struct OpArgs<'a> {
    pub extra: &'a [f64],
    pub ints: &'a [i64],
    pub dims: &'a [usize],
}

pub type CustomExecFn = fn(&[NDArray], &OpArgs<'_>) -> Result<NDArray, Error>;
pub type CustomShapeFn = fn(&[Vec<usize>], &OpArgs<'_>) -> Result<Vec<usize>, Error>;

#[derive(Clone, Copy)]
pub struct CustomMath {
    pub exec: CustomExecFn,
    pub shape: CustomShapeFn,
}

fn nth<'a, T>(items: &'a [T], i: usize, op: &str) -> Result<&'a T, Error> {
    items
        .get(i)
        .ok_or_else(|| Error::InvalidOperation(format!("{} expects at least {} inputs", op, i + 1)))
}

fn real_only<'a>(array: &'a NDArray, op: &str) -> Result<&'a NDArray, Error> {
    if array.data_type().is_complex() {
        return Err(Error::unsupported(op, array.data_type()));
    }
    Ok(array)
}

pub fn mmul_shape(shapes: &[Vec<usize>], _args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let a = nth(shapes, 0, "mmul")?;
    let b = nth(shapes, 1, "mmul")?;
    if a.len() != 2 || b.len() != 2 || a[1] != b[0] {
        return Err(Error::IncompatibleShapes {
            op: "mmul".to_string(),
            shape_a: a.clone(),
            shape_b: b.clone(),
        });
    }
    Ok(vec![a[0], b[1]])
}

/// `[m, k] x [k, n] -> [m, n]`, delegated to ndarray's matrix product.
pub fn mmul(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let a = real_only(nth(inputs, 0, "mmul")?, "mmul")?;
    let b = real_only(nth(inputs, 1, "mmul")?, "mmul")?;
    mmul_shape(&[a.shape().to_vec(), b.shape().to_vec()], args)?;
    let to_2d = |arr: &NDArray| {
        arr.to_ndarray()?
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::InternalLogicError(format!("mmul operand: {}", e)))
    };
    let product = to_2d(a)?.dot(&to_2d(b)?);
    Ok(NDArray::from_ndarray(
        &product.into_dyn(),
        a.data_type().promote(b.data_type()),
    ))
}

fn permutation(rank: usize, ints: &[i64]) -> Result<Vec<usize>, Error> {
    if ints.is_empty() {
        return Ok((0..rank).rev().collect());
    }
    let axes = shape_from_ints(ints)?;
    if axes.len() != rank {
        return Err(Error::InvalidOperation(format!(
            "permutation {:?} does not match rank {}",
            axes, rank
        )));
    }
    validate_dimensions(&axes, rank)?;
    Ok(axes)
}

pub fn transpose_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "transpose")?;
    Ok(permutation(x.len(), args.ints)?
        .into_iter()
        .map(|a| x[a])
        .collect())
}

/// Axis permutation, reversed axes when no permutation is given.
pub fn transpose(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = nth(inputs, 0, "transpose")?;
    x.permute(&permutation(x.rank(), args.ints)?)?.dup()
}

pub fn reshape_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "reshape")?;
    let shape = shape_from_ints(args.ints)?;
    if shape.iter().product::<usize>() != x.iter().product::<usize>() {
        return Err(Error::shape_mismatch(x, &shape));
    }
    Ok(shape)
}

pub fn reshape(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = nth(inputs, 0, "reshape")?;
    x.dup()?.reshape(&shape_from_ints(args.ints)?)
}

pub fn repeat_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "repeat")?;
    let target = shape_from_ints(args.ints)?;
    if args.dims.is_empty() {
        if broadcast_shapes(x, &target)? != target {
            return Err(Error::shape_mismatch(&target, x));
        }
    } else {
        let dims = validate_dimensions(args.dims, target.len())?;
        let expected = reduced_shape(&target, &dims);
        if *x != expected {
            return Err(Error::shape_mismatch(&expected, x));
        }
    }
    Ok(target)
}

/// Broadcasts `x` back to the shape given in `ints`. With `dims`, `x` is the
/// result of reducing those axes away and they are re-inserted first.
pub fn repeat(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = nth(inputs, 0, "repeat")?;
    let target = repeat_shape(&[x.shape().to_vec()], args)?;
    let source = if args.dims.is_empty() {
        x.clone()
    } else {
        let dims = validate_dimensions(args.dims, target.len())?;
        x.reshape(&expanded_shape(x.shape(), &dims))?
    };
    source.broadcast_to(&target)?.dup()
}

pub fn reduce_to_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "reduce_to")?;
    let target = shape_from_ints(args.ints)?;
    if broadcast_shapes(&target, x)? != *x {
        return Err(Error::shape_mismatch(&target, x));
    }
    Ok(target)
}

/// Sums `x` over every axis that numpy broadcasting would have expanded from
/// the shape given in `ints`.
pub fn reduce_to(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = real_only(nth(inputs, 0, "reduce_to")?, "reduce_to")?;
    let target = reduce_to_shape(&[x.shape().to_vec()], args)?;
    let shape = x.shape();
    let lead = shape.len() - target.len();
    let mut data = x.to_ndarray()?;
    for axis in (0..shape.len()).rev() {
        let squash = axis < lead || (target[axis - lead] == 1 && shape[axis] != 1);
        if squash {
            data = data.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    NDArray::from_vec(data.iter().copied().collect(), &target, x.data_type())
}

pub fn im2col_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "im2col")?;
    Im2ColConfig::from_int_args(args.ints)?.patch_shape(x)
}

pub fn im2col(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = nth(inputs, 0, "im2col")?;
    convolution::im2col(x, &Im2ColConfig::from_int_args(args.ints)?)
}

/// `ints = [strideH, strideW, padTop, padLeft, imageH, imageW, dilationH, dilationW]`.
fn col2im_args(ints: &[i64]) -> Result<[usize; 8], Error> {
    let v = shape_from_ints(ints)?;
    if v.len() != 8 {
        return Err(Error::InvalidOperation(format!(
            "col2im expects 8 integer arguments, got {}",
            v.len()
        )));
    }
    Ok([v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7]])
}

pub fn col2im_shape(shapes: &[Vec<usize>], args: &OpArgs<'_>) -> Result<Vec<usize>, Error> {
    let x = nth(shapes, 0, "col2im")?;
    let a = col2im_args(args.ints)?;
    if x.len() != 6 {
        return Err(Error::InvalidOperation(format!(
            "col2im expects a 6-d patch tensor, got shape {:?}",
            x
        )));
    }
    Ok(vec![x[0], x[1], a[4], a[5]])
}

pub fn col2im(inputs: &[NDArray], args: &OpArgs<'_>) -> Result<NDArray, Error> {
    let x = nth(inputs, 0, "col2im")?;
    let a = col2im_args(args.ints)?;
    convolution::col2im(x, (a[0], a[1]), (a[2], a[3]), (a[4], a[5]), (a[6], a[7]))
}
