//! Fused execution of an elementwise producer with its consumer.
//!
//! A predicate fuses two elementwise ops into one pass; a postulate folds an
//! elementwise op straight into a reduction. Either way the intermediate
//! array is never allocated. Fused ops exist only inside graph execution and
//! have no derivative; gradients are built from the unfused graph.

use crate::array::{DataType, Element, NDArray, Value};
use crate::error::Error;
use crate::executor::{write_values, OpExecutor};
use crate::ops::{
    AccumulationMath, Arity, ElementFn, Elementwise, Fold, OpDef, OpKind, Operation,
    TransformMath,
};
use crate::util::{reduced_shape, validate_dimensions};
use half::f16;
use num_complex::Complex64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetaKind {
    /// Elementwise followed by elementwise.
    Predicate,
    /// Elementwise followed by a reduction.
    Postulate,
}

/// The consumer half of a fusion: an op without operands.
#[derive(Debug, Clone)]
pub(crate) struct OpDescriptor {
    pub def: &'static OpDef,
    pub scalar: Option<Value>,
    pub extra_args: Vec<f64>,
    pub dimensions: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct MetaOperation {
    kind: MetaKind,
    first: Operation,
    second: OpDescriptor,
}

/// Elementwise math of an unrestricted unary transform or a scalar op.
fn producer_math(def: &OpDef, scalar: Option<Value>, dims: &[usize]) -> Option<Elementwise> {
    if !dims.is_empty() {
        return None;
    }
    match def.kind {
        OpKind::Transform(TransformMath::Elementwise(e)) if def.arity == Arity::Unary => Some(e),
        OpKind::Scalar(e) if scalar.is_some() => Some(e),
        _ => None,
    }
}

impl MetaOperation {
    /// # Errors
    /// `FusionError` unless `first` is an elementwise op over a single array
    /// and `second` is an elementwise op or a unary reduction.
    pub(crate) fn fuse(first: Operation, second: OpDescriptor) -> Result<Self, Error> {
        let scalar_y = first.family() == crate::ops::OpFamily::Scalar && first.y().is_some();
        if scalar_y || producer_math(first.def(), first.scalar(), first.dimensions()).is_none() {
            return Err(Error::FusionError(format!(
                "{} cannot feed a fused op",
                first.name()
            )));
        }
        let real_producer = !first.x().data_type().is_complex()
            && !matches!(first.scalar(), Some(Value::Complex(_)));
        if real_producer && matches!(second.scalar, Some(Value::Complex(_))) {
            // Unfused, the producer would run in real math before promotion.
            return Err(Error::FusionError(format!(
                "complex {} cannot follow real {}",
                second.def.name,
                first.name()
            )));
        }
        let kind = match second.def.kind {
            OpKind::Accumulation(_) if second.def.arity == Arity::Unary => MetaKind::Postulate,
            _ if producer_math(second.def, second.scalar, &second.dimensions).is_some() => {
                MetaKind::Predicate
            }
            _ => {
                return Err(Error::FusionError(format!(
                    "cannot fuse {} into {}",
                    first.name(),
                    second.def.name
                )))
            }
        };
        Ok(MetaOperation {
            kind,
            first,
            second,
        })
    }

    pub(crate) fn kind(&self) -> MetaKind {
        self.kind
    }

    pub(crate) fn name(&self) -> String {
        let prefix = match self.kind {
            MetaKind::Predicate => "meta_predicate",
            MetaKind::Postulate => "meta_postulate",
        };
        format!("{}({}, {})", prefix, self.first.name(), self.second.def.name)
    }

    fn compute_type(&self) -> DataType {
        let mut dtype = self.first.x().data_type();
        let complex_scalar = [self.first.scalar(), self.second.scalar]
            .iter()
            .any(|s| matches!(s, Some(Value::Complex(_))));
        if complex_scalar {
            dtype = dtype.promote(DataType::Complex);
        }
        dtype
    }
}

/// Per-representation access to op math.
trait Repr: Element {
    fn elementwise(e: &Elementwise) -> Option<ElementFn<Self>>;
    fn fold(m: &AccumulationMath, dtype: DataType) -> Option<(Fold<Self>, Self)>;
    fn from_value(v: Value) -> Self;
    fn into_value(self) -> Value;
    /// The value as it reads back from an array of `dtype`.
    fn stored(self, dtype: DataType) -> Self;
}

impl Repr for f32 {
    fn elementwise(e: &Elementwise) -> Option<ElementFn<Self>> {
        e.float
    }

    fn fold(m: &AccumulationMath, dtype: DataType) -> Option<(Fold<Self>, Self)> {
        let zero = if dtype == DataType::Half {
            m.half_zero.to_f32()
        } else {
            m.float.zero
        };
        Some((m.float, zero))
    }

    fn from_value(v: Value) -> Self {
        v.re() as f32
    }

    fn into_value(self) -> Value {
        Value::Real(self as f64)
    }

    fn stored(self, dtype: DataType) -> Self {
        if dtype == DataType::Half {
            f16::from_f32(self).to_f32()
        } else {
            self
        }
    }
}

impl Repr for f64 {
    fn elementwise(e: &Elementwise) -> Option<ElementFn<Self>> {
        e.double
    }

    fn fold(m: &AccumulationMath, _dtype: DataType) -> Option<(Fold<Self>, Self)> {
        Some((m.double, m.double.zero))
    }

    fn from_value(v: Value) -> Self {
        v.re()
    }

    fn into_value(self) -> Value {
        Value::Real(self)
    }

    fn stored(self, _dtype: DataType) -> Self {
        self
    }
}

impl Repr for Complex64 {
    fn elementwise(e: &Elementwise) -> Option<ElementFn<Self>> {
        e.complex
    }

    fn fold(m: &AccumulationMath, _dtype: DataType) -> Option<(Fold<Self>, Self)> {
        m.complex.map(|f| (f, f.zero))
    }

    fn from_value(v: Value) -> Self {
        v.as_complex()
    }

    fn into_value(self) -> Value {
        Value::Complex(self)
    }

    fn stored(self, _dtype: DataType) -> Self {
        self
    }
}

/// Segmented fold of `produce(x)` over `xs`.
fn fused_fold<T: Element>(fold: &Fold<T>, zero: T, xs: &[T], produce: impl Fn(T) -> T, block: usize) -> T {
    let mut total = zero;
    for chunk in xs.chunks(block.max(1)) {
        let acc = chunk
            .iter()
            .fold(zero, |acc, &v| (fold.update)(acc, produce(v), T::zero()));
        total = (fold.combine)(total, acc);
    }
    (fold.finish)(total, xs.len())
}

impl OpExecutor {
    /// Runs a fused pair; equivalent to executing `first` and then `second`
    /// on its output.
    pub(crate) fn exec_meta(&self, meta: &MetaOperation) -> Result<NDArray, Error> {
        crate::debug_println!("exec {}", meta.name());
        let dtype = meta.compute_type();
        match dtype {
            DataType::Complex => self.run_meta::<Complex64>(meta, dtype),
            DataType::Double => self.run_meta::<f64>(meta, dtype),
            DataType::Float | DataType::Half => self.run_meta::<f32>(meta, dtype),
        }
    }

    fn run_meta<T: Repr>(&self, meta: &MetaOperation, dtype: DataType) -> Result<NDArray, Error> {
        let first = &meta.first;
        let second = &meta.second;
        let first_math = producer_math(first.def(), first.scalar(), first.dimensions())
            .ok_or_else(|| Error::FusionError(format!("{}: producer is not elementwise", meta.name())))?;
        let f = T::elementwise(&first_math).ok_or_else(|| Error::unsupported(first.name(), dtype))?;
        let s1 = first.scalar().map(T::from_value).unwrap_or_else(T::zero);
        let args1 = first.extra_args();
        // The intermediate is rounded the way storing it would round it.
        let produce = |v: T| f(v, s1, args1).stored(dtype);

        let x = first.x();
        let order = self.context().default_order;
        match meta.kind() {
            MetaKind::Predicate => {
                let second_math = producer_math(second.def, second.scalar, &second.dimensions)
                    .ok_or_else(|| Error::FusionError(format!("{} is not elementwise", second.def.name)))?;
                let g = T::elementwise(&second_math)
                    .ok_or_else(|| Error::unsupported(second.def.name, dtype))?;
                let s2 = second.scalar.map(T::from_value).unwrap_or_else(T::zero);
                let out: Vec<T> = x
                    .gather::<T>()?
                    .into_iter()
                    .map(|v| g(produce(v), s2, &second.extra_args))
                    .collect();
                let z = NDArray::zeros_with_order(x.shape(), dtype, order);
                z.scatter(&out)?;
                Ok(z)
            }
            MetaKind::Postulate => {
                let OpKind::Accumulation(math) = &second.def.kind else {
                    return Err(Error::FusionError(format!("{} is not a reduction", second.def.name)));
                };
                let (fold, zero) =
                    T::fold(math, dtype).ok_or_else(|| Error::unsupported(second.def.name, dtype))?;
                let block = self.context().reduction_block;
                let dims = validate_dimensions(&second.dimensions, x.rank())?;
                let values = if dims.is_empty() {
                    vec![fused_fold(&fold, zero, &x.gather::<T>()?, produce, block).into_value()]
                } else {
                    (0..x.tensors_along_dimension(&dims)?)
                        .map(|i| {
                            let xs = x.tensor_along_dimension(i, &dims)?.gather::<T>()?;
                            Ok(fused_fold(&fold, zero, &xs, produce, block).into_value())
                        })
                        .collect::<Result<Vec<_>, Error>>()?
                };
                let z = NDArray::zeros_with_order(&reduced_shape(x.shape(), &dims), dtype, order);
                write_values(&z, &values)?;
                Ok(z)
            }
        }
    }
}
