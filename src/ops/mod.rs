//! Operation taxonomy.
//!
//! Every op is described once, statically, by an [`OpDef`] in the registry.
//! The def carries a closed [`OpKind`] whose variant fixes the execution
//! contract and holds the math as plain function fields, plus a
//! [`DiffRule`] used when the op appears in a differentiable graph.
//! An [`Operation`] binds a def to concrete arrays and arguments.

pub mod accum;
pub mod custom;
pub mod elementwise;
pub mod index_accum;
pub mod special;

use crate::array::{DataType, NDArray, Value};
use crate::error::Error;
use crate::graph::DiffFn;
use crate::registry;
use num_complex::Complex64;
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};
use std::fmt;

pub use accum::{AccumulationMath, Fold};
pub use custom::{CustomMath, OpArgs};
pub use index_accum::{IndexFold, IndexMath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum OpFamily {
    Transform,
    Scalar,
    Accumulation,
    IndexAccumulation,
    Custom,
}

/// Number of array inputs an op consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum Arity {
    Unary,
    Binary,
}

impl Arity {
    pub fn inputs(self) -> usize {
        match self {
            Arity::Unary => 1,
            Arity::Binary => 2,
        }
    }
}

pub type ElementFn<T> = fn(T, T, &[f64]) -> T;

/// Elementwise math, one entry per numeric representation. `None` means the
/// op is undefined for that representation. Half data runs through `float`.
#[derive(Clone, Copy)]
pub struct Elementwise {
    pub float: Option<ElementFn<f32>>,
    pub double: Option<ElementFn<f64>>,
    pub complex: Option<ElementFn<Complex64>>,
}

/// `(input sub-tensor, output sub-tensor, extra args)`.
pub type SpecialFn = fn(&NDArray, &NDArray, &[f64]) -> Result<(), Error>;

#[derive(Clone, Copy)]
pub enum TransformMath {
    Elementwise(Elementwise),
    /// Runs on a whole sub-tensor. `default_last_axis` ops restrict to the
    /// last axis when no dimensions are given.
    Special {
        exec: SpecialFn,
        default_last_axis: bool,
    },
}

#[derive(Clone, Copy)]
pub enum OpKind {
    Transform(TransformMath),
    Scalar(Elementwise),
    Accumulation(AccumulationMath),
    IndexAccumulation(IndexMath),
    Custom(CustomMath),
}

impl OpKind {
    pub fn family(&self) -> OpFamily {
        match self {
            OpKind::Transform(_) => OpFamily::Transform,
            OpKind::Scalar(_) => OpFamily::Scalar,
            OpKind::Accumulation(_) => OpFamily::Accumulation,
            OpKind::IndexAccumulation(_) => OpFamily::IndexAccumulation,
            OpKind::Custom(_) => OpFamily::Custom,
        }
    }
}

#[derive(Clone, Copy)]
pub enum DiffRule {
    /// Local gradient expressed as graph nodes.
    Rule(DiffFn),
    /// Derivative is zero almost everywhere; the op contributes nothing.
    ZeroGradient,
    /// Requesting a gradient through the op is a `DifferentiationError`.
    NotDifferentiable,
}

/// Static description of one op.
pub struct OpDef {
    pub num: u16,
    pub name: &'static str,
    pub arity: Arity,
    pub kind: OpKind,
    pub default_args: &'static [f64],
    pub diff: DiffRule,
}

impl OpDef {
    pub fn family(&self) -> OpFamily {
        self.kind.family()
    }

    pub fn is_differentiable(&self) -> bool {
        !matches!(self.diff, DiffRule::NotDifferentiable)
    }
}

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("num", &self.num)
            .field("name", &self.name)
            .field("family", &self.family())
            .field("arity", &self.arity)
            .finish()
    }
}

/// A unit of computation: an op applied to `x` (and optionally `y`), writing
/// into `z`.
///
/// Leaving `z` unset requests copy semantics: the executor allocates a fresh
/// output and never writes into `x`. [`Operation::in_place`] makes `z` the
/// same storage as `x`.
#[derive(Debug, Clone)]
pub struct Operation {
    def: &'static OpDef,
    x: NDArray,
    y: Option<NDArray>,
    z: Option<NDArray>,
    scalar: Option<Value>,
    extra_args: Vec<f64>,
    int_args: Vec<i64>,
    dimensions: Vec<usize>,
    final_result: Option<Value>,
    final_index: Option<i64>,
}

impl Operation {
    /// Looks `name` up in the registry and binds it to `x` with the op's
    /// default extra arguments.
    ///
    /// # Errors
    /// `UnknownOp` if no op is registered under `name`.
    pub fn new(name: &str, x: NDArray) -> Result<Self, Error> {
        Ok(Self::from_def(registry::lookup(name)?, x))
    }

    pub fn from_def(def: &'static OpDef, x: NDArray) -> Self {
        Operation {
            def,
            x,
            y: None,
            z: None,
            scalar: None,
            extra_args: def.default_args.to_vec(),
            int_args: Vec::new(),
            dimensions: Vec::new(),
            final_result: None,
            final_index: None,
        }
    }

    /// Shorthand for a scalar-family op.
    pub fn scalar_op(name: &str, x: NDArray, scalar: impl Into<Value>) -> Result<Self, Error> {
        Ok(Self::new(name, x)?.with_scalar(scalar))
    }

    pub fn with_y(mut self, y: NDArray) -> Self {
        self.y = Some(y);
        self
    }

    pub fn with_z(mut self, z: NDArray) -> Self {
        self.z = Some(z);
        self
    }

    /// Output goes into `x`'s own storage.
    pub fn in_place(mut self) -> Self {
        self.z = Some(self.x.clone());
        self
    }

    pub fn with_scalar(mut self, scalar: impl Into<Value>) -> Self {
        self.scalar = Some(scalar.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<f64>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_int_args(mut self, args: Vec<i64>) -> Self {
        self.int_args = args;
        self
    }

    /// Restricts execution to sub-tensors spanning `dims`.
    pub fn along(mut self, dims: &[usize]) -> Self {
        self.dimensions = dims.to_vec();
        self
    }

    pub fn def(&self) -> &'static OpDef {
        self.def
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn op_num(&self) -> u16 {
        self.def.num
    }

    pub fn family(&self) -> OpFamily {
        self.def.family()
    }

    pub fn x(&self) -> &NDArray {
        &self.x
    }

    pub fn y(&self) -> Option<&NDArray> {
        self.y.as_ref()
    }

    pub fn z(&self) -> Option<&NDArray> {
        self.z.as_ref()
    }

    /// Element count of `x`.
    pub fn n(&self) -> usize {
        self.x.length()
    }

    pub fn scalar(&self) -> Option<Value> {
        self.scalar
    }

    pub fn extra_args(&self) -> &[f64] {
        &self.extra_args
    }

    pub fn int_args(&self) -> &[i64] {
        &self.int_args
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Reduced value of the last full-array accumulation.
    pub fn final_result(&self) -> Option<Value> {
        self.final_result
    }

    /// Winning flat index of the last full-array index accumulation.
    pub fn final_index(&self) -> Option<i64> {
        self.final_index
    }

    pub(crate) fn set_z(&mut self, z: NDArray) {
        self.z = Some(z);
    }

    pub(crate) fn set_y(&mut self, y: Option<NDArray>) {
        self.y = y;
    }

    pub(crate) fn set_final_result(&mut self, value: Value) {
        self.final_result = Some(value);
    }

    pub(crate) fn set_final_index(&mut self, index: i64) {
        self.final_index = Some(index);
    }

    pub(crate) fn op_args(&self) -> OpArgs<'_> {
        OpArgs {
            extra: &self.extra_args,
            ints: &self.int_args,
            dims: &self.dimensions,
        }
    }

    /// The lower-rank operation covering the `index`-th sub-tensor along
    /// `dims`. Views of `x`, `y` and `z` are taken as the family requires:
    /// scalar ops read their scalar for sub-tensor `index` from `y[index]`,
    /// reductions leave `z` unset.
    pub fn op_for_dimension(&self, index: usize, dims: &[usize]) -> Result<Operation, Error> {
        let family = self.family();
        let mut sub = Operation {
            def: self.def,
            x: self.x.tensor_along_dimension(index, dims)?,
            y: None,
            z: None,
            scalar: self.scalar,
            extra_args: self.extra_args.clone(),
            int_args: self.int_args.clone(),
            dimensions: Vec::new(),
            final_result: None,
            final_index: None,
        };
        match (&self.y, family) {
            (Some(y), OpFamily::Scalar) => sub.scalar = Some(y.get_linear(index)?),
            (Some(y), _) => sub.y = Some(y.tensor_along_dimension(index, dims)?),
            (None, _) => {}
        }
        if matches!(family, OpFamily::Transform | OpFamily::Scalar) {
            if let Some(z) = &self.z {
                sub.z = Some(z.tensor_along_dimension(index, dims)?);
            }
        }
        Ok(sub)
    }

    /// Zero element of this reduction for `x`'s element type.
    pub fn zero_value(&self) -> Result<Value, Error> {
        match &self.def.kind {
            OpKind::Accumulation(m) => m.zero(self.name(), self.x.data_type()),
            OpKind::IndexAccumulation(m) => match self.x.data_type() {
                DataType::Half => Ok(Value::Real(m.half_zero.to_f64())),
                DataType::Float => Ok(Value::Real(m.float.zero as f64)),
                DataType::Double => Ok(Value::Real(m.double.zero)),
                dtype => Err(Error::unsupported(self.name(), dtype)),
            },
            _ => Err(self.not_a_reduction()),
        }
    }

    /// Merges two partial results of this accumulation.
    pub fn combine_sub_results(&self, a: Value, b: Value) -> Result<Value, Error> {
        match &self.def.kind {
            OpKind::Accumulation(m) => m.combine(self.name(), self.x.data_type(), a, b),
            _ => Err(self.not_a_reduction()),
        }
    }

    /// Merges two partial `(value, index)` results of this index accumulation.
    pub fn combine_index_results(
        &self,
        a: (f64, i64),
        b: (f64, i64),
    ) -> Result<(f64, i64), Error> {
        match &self.def.kind {
            OpKind::IndexAccumulation(m) => m.combine(self.name(), self.x.data_type(), a, b),
            _ => Err(self.not_a_reduction()),
        }
    }

    fn not_a_reduction(&self) -> Error {
        Error::InvalidOperation(format!("{} is not a reduction", self.name()))
    }
}
