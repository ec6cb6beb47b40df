//! Dispatches an [`Operation`] over its arrays.

use crate::array::{DataType, Element, NDArray, Value};
use crate::context::ExecutionContext;
use crate::error::Error;
use crate::ops::{
    AccumulationMath, Arity, CustomMath, ElementFn, Elementwise, IndexMath, OpFamily, OpKind,
    Operation, TransformMath,
};
use crate::util::{broadcast_shapes, reduced_shape, validate_dimensions};
use num_complex::Complex64;

/// The second operand of an elementwise kernel.
enum Other<'a> {
    None,
    Array(&'a NDArray),
    Scalar(Value),
}

#[derive(Debug, Clone, Default)]
pub struct OpExecutor {
    ctx: ExecutionContext,
}

impl OpExecutor {
    pub fn new(ctx: ExecutionContext) -> Self {
        OpExecutor { ctx }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Executes `op` and returns its output array.
    ///
    /// Reductions return the reduced array (rank 0 for a full reduction) and
    /// additionally record [`Operation::final_result`] or
    /// [`Operation::final_index`] when no dimensions were given.
    ///
    /// # Errors
    /// * `ShapeMismatch` when `x`, `y` and `z` cannot be reconciled.
    /// * `InvalidDimension` when `dimensions` is not a subset of `x`'s axes.
    /// * `UnsupportedOperation` when the op has no math for the data type.
    /// * `UseAfterFree` when any operand's storage has been released.
    pub fn exec(&self, op: &mut Operation) -> Result<NDArray, Error> {
        crate::debug_println!(
            "exec {} ({:?}) x={:?} dims={:?}",
            op.name(),
            op.family(),
            op.x().shape(),
            op.dimensions()
        );
        let kind = op.def().kind;
        match kind {
            OpKind::Transform(math) => self.exec_transform(op, math),
            OpKind::Scalar(math) => self.exec_scalar_op(op, math),
            OpKind::Accumulation(math) => self.exec_accumulation(op, &math),
            OpKind::IndexAccumulation(math) => self.exec_index_accumulation(op, &math),
            OpKind::Custom(math) => self.exec_custom(op, &math),
        }
    }

    /// Runs a full accumulation and returns the reduced value.
    pub fn exec_reduce(&self, op: &mut Operation) -> Result<Value, Error> {
        if op.family() != OpFamily::Accumulation || !op.dimensions().is_empty() {
            return Err(Error::InvalidOperation(format!(
                "{} is not a full accumulation",
                op.name()
            )));
        }
        self.exec(op)?;
        op.final_result()
            .ok_or_else(|| Error::InternalLogicError("accumulation left no result".to_string()))
    }

    /// Runs a full index accumulation and returns the winning flat index.
    pub fn exec_index(&self, op: &mut Operation) -> Result<i64, Error> {
        if op.family() != OpFamily::IndexAccumulation || !op.dimensions().is_empty() {
            return Err(Error::InvalidOperation(format!(
                "{} is not a full index accumulation",
                op.name()
            )));
        }
        self.exec(op)?;
        op.final_index()
            .ok_or_else(|| Error::InternalLogicError("index accumulation left no index".to_string()))
    }

    /// Uses the caller's `z` (checking its shape) or allocates a fresh output.
    fn prepare_output(
        &self,
        op: &mut Operation,
        shape: &[usize],
        dtype: DataType,
    ) -> Result<NDArray, Error> {
        if let Some(z) = op.z() {
            if z.shape() != shape {
                return Err(Error::shape_mismatch(shape, z.shape()));
            }
            if dtype.is_complex() && !z.data_type().is_complex() {
                return Err(Error::unsupported(op.name(), z.data_type()));
            }
            return Ok(z.clone());
        }
        let z = NDArray::zeros_with_order(shape, dtype, self.ctx.default_order);
        op.set_z(z.clone());
        Ok(z)
    }

    fn exec_transform(&self, op: &mut Operation, math: TransformMath) -> Result<NDArray, Error> {
        let binary = op.def().arity == Arity::Binary;
        let mut out_shape = op.x().shape().to_vec();
        let mut dtype = op.x().data_type();
        if binary {
            let y = op.y().cloned().ok_or_else(|| {
                Error::InvalidOperation(format!("{} needs a second operand", op.name()))
            })?;
            out_shape = broadcast_shapes(op.x().shape(), y.shape())?;
            dtype = dtype.promote(y.data_type());
            if out_shape.as_slice() != op.x().shape() {
                // x itself must span the output for sub-tensor restriction.
                let x_b = op.x().broadcast_to(&out_shape)?.dup()?;
                let mut widened = Operation::from_def(op.def(), x_b)
                    .with_y(y)
                    .with_extra_args(op.extra_args().to_vec())
                    .along(op.dimensions());
                if let Some(z) = op.z() {
                    widened = widened.with_z(z.clone());
                }
                let result = self.exec_transform(&mut widened, math)?;
                op.set_z(result.clone());
                return Ok(result);
            }
        }
        let z = self.prepare_output(op, &out_shape, dtype)?;
        if binary {
            let y_b = op.y().map(|y| y.broadcast_to(&out_shape)).transpose()?;
            let keep_alive = op.y().cloned();
            op.set_y(y_b);
            let result = self.run_restricted(op, math, &z);
            op.set_y(keep_alive);
            result?;
        } else {
            self.run_restricted(op, math, &z)?;
        }
        Ok(z)
    }

    fn run_restricted(&self, op: &Operation, math: TransformMath, z: &NDArray) -> Result<(), Error> {
        let mut dims = validate_dimensions(op.dimensions(), op.x().rank())?;
        if let TransformMath::Special {
            default_last_axis: true,
            ..
        } = math
        {
            if dims.is_empty() && op.x().rank() > 0 {
                dims = vec![op.x().rank() - 1];
            }
        }
        if dims.is_empty() {
            return self.apply_transform(op, math, z);
        }
        let count = op.x().tensors_along_dimension(&dims)?;
        for i in 0..count {
            let sub = op.op_for_dimension(i, &dims)?;
            let sub_z = z.tensor_along_dimension(i, &dims)?;
            self.apply_transform(&sub, math, &sub_z)?;
        }
        Ok(())
    }

    fn apply_transform(&self, op: &Operation, math: TransformMath, z: &NDArray) -> Result<(), Error> {
        match math {
            TransformMath::Special { exec, .. } => exec(op.x(), z, op.extra_args()),
            TransformMath::Elementwise(fns) => {
                let other = match (op.def().arity, op.y()) {
                    (Arity::Binary, Some(y)) => Other::Array(y),
                    _ => Other::None,
                };
                apply_elementwise(op.name(), &fns, op.x(), other, z, op.extra_args())
            }
        }
    }

    fn exec_scalar_op(&self, op: &mut Operation, math: Elementwise) -> Result<NDArray, Error> {
        let dims = validate_dimensions(op.dimensions(), op.x().rank())?;
        let mut dtype = op.x().data_type();
        match (op.scalar(), op.y()) {
            (_, Some(y)) if !dims.is_empty() => {
                let count = op.x().tensors_along_dimension(&dims)?;
                if y.length() != count {
                    return Err(Error::shape_mismatch(&[count], y.shape()));
                }
                dtype = dtype.promote(y.data_type());
            }
            (Some(s), _) => {
                if s.is_complex() {
                    dtype = DataType::Complex;
                }
            }
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "{} needs a scalar, or a per-sub-tensor y with dimensions",
                    op.name()
                )))
            }
        }
        let shape = op.x().shape().to_vec();
        let z = self.prepare_output(op, &shape, dtype)?;
        if dims.is_empty() {
            let scalar = op.scalar().unwrap_or(Value::Real(0.0));
            return apply_elementwise(
                op.name(),
                &math,
                op.x(),
                Other::Scalar(scalar),
                &z,
                op.extra_args(),
            )
            .map(|_| z);
        }
        let count = op.x().tensors_along_dimension(&dims)?;
        for i in 0..count {
            let sub = op.op_for_dimension(i, &dims)?;
            let sub_z = z.tensor_along_dimension(i, &dims)?;
            let scalar = sub.scalar().unwrap_or(Value::Real(0.0));
            apply_elementwise(
                op.name(),
                &math,
                sub.x(),
                Other::Scalar(scalar),
                &sub_z,
                op.extra_args(),
            )?;
        }
        Ok(z)
    }

    /// Broadcasts `y` onto `x` for a pairwise reduction.
    fn reduction_operands(&self, op: &Operation) -> Result<Option<NDArray>, Error> {
        match (op.def().arity, op.y()) {
            (Arity::Binary, Some(y)) => {
                if broadcast_shapes(op.x().shape(), y.shape())?.as_slice() != op.x().shape() {
                    return Err(Error::shape_mismatch(op.x().shape(), y.shape()));
                }
                Ok(Some(y.broadcast_to(op.x().shape())?))
            }
            (Arity::Binary, None) => Err(Error::InvalidOperation(format!(
                "{} needs a second operand",
                op.name()
            ))),
            _ => Ok(None),
        }
    }

    fn exec_accumulation(
        &self,
        op: &mut Operation,
        math: &AccumulationMath,
    ) -> Result<NDArray, Error> {
        let dims = validate_dimensions(op.dimensions(), op.x().rank())?;
        let y = self.reduction_operands(op)?;
        let mut dtype = op.x().data_type();
        if let Some(y) = &y {
            dtype = dtype.promote(y.data_type());
        }
        let out_shape = reduced_shape(op.x().shape(), &dims);
        let z = self.prepare_output(op, &out_shape, dtype)?;

        let values = if dims.is_empty() {
            let v = self.reduce(op.name(), math, op.x(), y.as_ref(), dtype)?;
            op.set_final_result(v);
            vec![v]
        } else {
            let keep_alive = op.y().cloned();
            op.set_y(y);
            let count = op.x().tensors_along_dimension(&dims)?;
            let values = (0..count)
                .map(|i| {
                    let sub = op.op_for_dimension(i, &dims)?;
                    self.reduce(op.name(), math, sub.x(), sub.y(), dtype)
                })
                .collect::<Result<Vec<_>, Error>>();
            op.set_y(keep_alive);
            values?
        };
        write_values(&z, &values)?;
        Ok(z)
    }

    /// Folds one (sub-)array to a single value.
    pub(crate) fn reduce(
        &self,
        name: &str,
        math: &AccumulationMath,
        x: &NDArray,
        y: Option<&NDArray>,
        dtype: DataType,
    ) -> Result<Value, Error> {
        let block = self.ctx.reduction_block;
        match dtype {
            DataType::Complex => {
                let fold = math.complex.ok_or_else(|| Error::unsupported(name, dtype))?;
                let xs = x.gather::<Complex64>()?;
                let ys = y.map(|y| y.gather::<Complex64>()).transpose()?;
                Ok(Value::Complex(fold.fold_segmented(
                    fold.zero,
                    &xs,
                    ys.as_deref(),
                    block,
                )))
            }
            DataType::Double => {
                let xs = x.gather::<f64>()?;
                let ys = y.map(|y| y.gather::<f64>()).transpose()?;
                let fold = &math.double;
                Ok(Value::Real(fold.fold_segmented(fold.zero, &xs, ys.as_deref(), block)))
            }
            DataType::Float | DataType::Half => {
                let zero = if dtype == DataType::Half {
                    math.half_zero.to_f32()
                } else {
                    math.float.zero
                };
                let xs = x.gather::<f32>()?;
                let ys = y.map(|y| y.gather::<f32>()).transpose()?;
                Ok(Value::Real(
                    math.float.fold_segmented(zero, &xs, ys.as_deref(), block) as f64,
                ))
            }
        }
    }

    fn exec_index_accumulation(
        &self,
        op: &mut Operation,
        math: &IndexMath,
    ) -> Result<NDArray, Error> {
        let dtype = op.x().data_type();
        if dtype.is_complex() {
            return Err(Error::unsupported(op.name(), dtype));
        }
        let dims = validate_dimensions(op.dimensions(), op.x().rank())?;
        let out_shape = reduced_shape(op.x().shape(), &dims);
        let z = self.prepare_output(op, &out_shape, DataType::Double)?;

        let indices = if dims.is_empty() {
            let i = self.reduce_index(math, op.x())?;
            op.set_final_index(i);
            vec![i]
        } else {
            let count = op.x().tensors_along_dimension(&dims)?;
            (0..count)
                .map(|i| {
                    let sub = op.op_for_dimension(i, &dims)?;
                    self.reduce_index(math, sub.x())
                })
                .collect::<Result<Vec<_>, Error>>()?
        };
        let as_values: Vec<f64> = indices.iter().map(|&i| i as f64).collect();
        z.scatter(&as_values)?;
        Ok(z)
    }

    fn reduce_index(&self, math: &IndexMath, x: &NDArray) -> Result<i64, Error> {
        let block = self.ctx.reduction_block;
        Ok(match x.data_type() {
            DataType::Double => math.double.fold_segmented(&x.gather::<f64>()?, block).1,
            _ => math.float.fold_segmented(&x.gather::<f32>()?, block).1,
        })
    }

    fn exec_custom(&self, op: &mut Operation, math: &CustomMath) -> Result<NDArray, Error> {
        let mut inputs = vec![op.x().clone()];
        if op.def().arity == Arity::Binary {
            let y = op.y().cloned().ok_or_else(|| {
                Error::InvalidOperation(format!("{} needs a second operand", op.name()))
            })?;
            inputs.push(y);
        }
        let result = (math.exec)(&inputs, &op.op_args())?;
        match op.z() {
            Some(z) => {
                if z.shape() != result.shape() {
                    return Err(Error::shape_mismatch(result.shape(), z.shape()));
                }
                z.assign(&result)?;
                Ok(z.clone())
            }
            None => {
                op.set_z(result.clone());
                Ok(result)
            }
        }
    }
}

/// Writes reduction results into `z` in row-major order.
pub(crate) fn write_values(z: &NDArray, values: &[Value]) -> Result<(), Error> {
    if z.data_type().is_complex() {
        let vals: Vec<Complex64> = values.iter().map(Value::as_complex).collect();
        z.scatter(&vals)
    } else {
        let vals: Vec<f64> = values.iter().map(Value::re).collect();
        z.scatter(&vals)
    }
}

/// Representation a kernel runs in for the given operand types.
fn compute_type(x: &NDArray, other: &Other<'_>) -> DataType {
    let dtype = x.data_type();
    match other {
        Other::None => dtype,
        Other::Array(y) => dtype.promote(y.data_type()),
        Other::Scalar(Value::Complex(_)) => DataType::Complex,
        Other::Scalar(Value::Real(_)) => dtype,
    }
}

fn apply_elementwise(
    name: &str,
    fns: &Elementwise,
    x: &NDArray,
    other: Other<'_>,
    z: &NDArray,
    args: &[f64],
) -> Result<(), Error> {
    let dtype = compute_type(x, &other);
    match dtype {
        DataType::Complex => {
            let f = fns.complex.ok_or_else(|| Error::unsupported(name, dtype))?;
            run_kernel(f, x, &other, z, args, Value::as_complex)
        }
        DataType::Double => {
            let f = fns.double.ok_or_else(|| Error::unsupported(name, dtype))?;
            run_kernel(f, x, &other, z, args, |v| v.re())
        }
        DataType::Float | DataType::Half => {
            let f = fns.float.ok_or_else(|| Error::unsupported(name, dtype))?;
            run_kernel(f, x, &other, z, args, |v| v.re() as f32)
        }
    }
}

/// Gathers every operand before scattering, so `z` may alias `x`.
fn run_kernel<T: Element>(
    f: ElementFn<T>,
    x: &NDArray,
    other: &Other<'_>,
    z: &NDArray,
    args: &[f64],
    convert: fn(&Value) -> T,
) -> Result<(), Error> {
    let xs = x.gather::<T>()?;
    let out: Vec<T> = match other {
        Other::None => xs.iter().map(|&a| f(a, T::zero(), args)).collect(),
        Other::Scalar(s) => {
            let s = convert(s);
            xs.iter().map(|&a| f(a, s, args)).collect()
        }
        Other::Array(y) => {
            let ys = y.gather::<T>()?;
            xs.iter().zip(&ys).map(|(&a, &b)| f(a, b, args)).collect()
        }
    };
    z.scatter(&out)
}
