//! Strided, typed array handle consumed by the op layer.
//!
//! An [`NDArray`] is either an *owning* handle (shared ownership of its
//! storage, like an `Rc`) or a *view* that only holds a weak back-reference
//! to the storage of the array it was derived from. Views never keep storage
//! alive: touching a view after every owner is gone yields
//! [`Error::UseAfterFree`].

use crate::error::Error;
use crate::util::{c_strides, complement_dimensions, f_strides, unravel_index, validate_dimensions};
use half::f16;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use num_traits::Zero;
use rand_distr::{Distribution, Normal, Uniform};
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

/// Element type of an array. Uniform per array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum DataType {
    Half,
    Float,
    Double,
    Complex,
}

impl DataType {
    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Complex)
    }

    /// Result type when two operands of different types meet in one op.
    pub fn promote(self, other: DataType) -> DataType {
        fn rank(d: DataType) -> u8 {
            match d {
                DataType::Half => 0,
                DataType::Float => 1,
                DataType::Double => 2,
                DataType::Complex => 3,
            }
        }
        if rank(self) >= rank(other) {
            self
        } else {
            other
        }
    }
}

/// Memory ordering tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum Order {
    /// Row-major.
    C,
    /// Column-major.
    F,
}

/// A single element read out of (or written into) an array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Real(f64),
    Complex(Complex64),
}

impl Value {
    /// Real part.
    pub fn re(&self) -> f64 {
        match self {
            Value::Real(v) => *v,
            Value::Complex(c) => c.re,
        }
    }

    pub fn as_complex(&self) -> Complex64 {
        match self {
            Value::Real(v) => Complex64::new(*v, 0.0),
            Value::Complex(c) => *c,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Value::Complex(_))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v as f64)
    }
}

impl From<Complex64> for Value {
    fn from(v: Complex64) -> Self {
        Value::Complex(v)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Buffer {
    Half(Vec<f16>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Buffer {
    fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Half => Buffer::Half(vec![f16::ZERO; len]),
            DataType::Float => Buffer::Float(vec![0.0; len]),
            DataType::Double => Buffer::Double(vec![0.0; len]),
            DataType::Complex => Buffer::Complex(vec![Complex64::zero(); len]),
        }
    }
}

/// Numeric representation a kernel computes in. Half data is computed as f32.
pub(crate) trait Element: Copy + Debug + Zero + 'static {
    fn load(buf: &Buffer, off: usize) -> Self;
    fn store(buf: &mut Buffer, off: usize, v: Self);
}

impl Element for f32 {
    fn load(buf: &Buffer, off: usize) -> Self {
        match buf {
            Buffer::Half(v) => v[off].to_f32(),
            Buffer::Float(v) => v[off],
            Buffer::Double(v) => v[off] as f32,
            Buffer::Complex(v) => v[off].re as f32,
        }
    }

    fn store(buf: &mut Buffer, off: usize, x: Self) {
        match buf {
            Buffer::Half(v) => v[off] = f16::from_f32(x),
            Buffer::Float(v) => v[off] = x,
            Buffer::Double(v) => v[off] = x as f64,
            Buffer::Complex(v) => v[off] = Complex64::new(x as f64, 0.0),
        }
    }
}

impl Element for f64 {
    fn load(buf: &Buffer, off: usize) -> Self {
        match buf {
            Buffer::Half(v) => v[off].to_f64(),
            Buffer::Float(v) => v[off] as f64,
            Buffer::Double(v) => v[off],
            Buffer::Complex(v) => v[off].re,
        }
    }

    fn store(buf: &mut Buffer, off: usize, x: Self) {
        match buf {
            Buffer::Half(v) => v[off] = f16::from_f64(x),
            Buffer::Float(v) => v[off] = x as f32,
            Buffer::Double(v) => v[off] = x,
            Buffer::Complex(v) => v[off] = Complex64::new(x, 0.0),
        }
    }
}

impl Element for Complex64 {
    fn load(buf: &Buffer, off: usize) -> Self {
        match buf {
            Buffer::Complex(v) => v[off],
            other => Complex64::new(f64::load(other, off), 0.0),
        }
    }

    fn store(buf: &mut Buffer, off: usize, x: Self) {
        match buf {
            Buffer::Complex(v) => v[off] = x,
            other => f64::store(other, off, x.re),
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Owned(Rc<RefCell<Buffer>>),
    View(Weak<RefCell<Buffer>>),
}

#[derive(Debug, Clone)]
pub struct NDArray {
    storage: Storage,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    order: Order,
    dtype: DataType,
}

impl NDArray {
    fn from_buffer(buffer: Buffer, shape: &[usize], order: Order, dtype: DataType) -> Self {
        let strides = match order {
            Order::C => c_strides(shape),
            Order::F => f_strides(shape),
        };
        NDArray {
            storage: Storage::Owned(Rc::new(RefCell::new(buffer))),
            shape: shape.to_vec(),
            strides,
            offset: 0,
            order,
            dtype,
        }
    }

    pub fn zeros(shape: &[usize], dtype: DataType) -> Self {
        Self::zeros_with_order(shape, dtype, Order::C)
    }

    pub fn zeros_with_order(shape: &[usize], dtype: DataType, order: Order) -> Self {
        let len = shape.iter().product();
        Self::from_buffer(Buffer::zeros(dtype, len), shape, order, dtype)
    }

    pub fn ones(shape: &[usize], dtype: DataType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    pub fn full(shape: &[usize], value: f64, dtype: DataType) -> Self {
        let len: usize = shape.iter().product();
        Self::from_buffer(real_buffer(vec![value; len], dtype), shape, Order::C, dtype)
    }

    /// Builds an array from row-major `data`, converted to `dtype`.
    pub fn from_vec(data: Vec<f64>, shape: &[usize], dtype: DataType) -> Result<Self, Error> {
        check_len(data.len(), shape)?;
        Ok(Self::from_buffer(real_buffer(data, dtype), shape, Order::C, dtype))
    }

    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self, Error> {
        check_len(data.len(), shape)?;
        Ok(Self::from_buffer(Buffer::Float(data), shape, Order::C, DataType::Float))
    }

    pub fn from_complex(data: Vec<Complex64>, shape: &[usize]) -> Result<Self, Error> {
        check_len(data.len(), shape)?;
        Ok(Self::from_buffer(
            Buffer::Complex(data),
            shape,
            Order::C,
            DataType::Complex,
        ))
    }

    /// Rank-0 array holding `value`.
    pub fn scalar(value: f64, dtype: DataType) -> Self {
        Self::full(&[], value, dtype)
    }

    /// `[0, 1, .., n-1]` as a vector.
    pub fn arange(n: usize, dtype: DataType) -> Self {
        Self::from_buffer(
            real_buffer((0..n).map(|i| i as f64).collect(), dtype),
            &[n],
            Order::C,
            dtype,
        )
    }

    pub fn linspace(lower: f64, upper: f64, num: usize, dtype: DataType) -> Self {
        let step = if num > 1 {
            (upper - lower) / (num - 1) as f64
        } else {
            0.0
        };
        let data = (0..num).map(|i| lower + step * i as f64).collect();
        Self::from_buffer(real_buffer(data, dtype), &[num], Order::C, dtype)
    }

    pub fn random_uniform(
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DataType,
    ) -> Result<Self, Error> {
        let dist = Uniform::new(low, high)
            .map_err(|e| Error::InvalidOperation(format!("uniform distribution: {}", e)))?;
        let mut rng = rand::rng();
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| dist.sample(&mut rng)).collect();
        Self::from_vec(data, shape, dtype)
    }

    pub fn random_normal(
        shape: &[usize],
        mean: f64,
        std_dev: f64,
        dtype: DataType,
    ) -> Result<Self, Error> {
        let dist = Normal::new(mean, std_dev)
            .map_err(|e| Error::InvalidOperation(format!("normal distribution: {}", e)))?;
        let mut rng = rand::rng();
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| dist.sample(&mut rng)).collect();
        Self::from_vec(data, shape, dtype)
    }

    pub fn from_ndarray(array: &ArrayD<f64>, dtype: DataType) -> Self {
        let data: Vec<f64> = array.iter().copied().collect();
        Self::from_buffer(real_buffer(data, dtype), array.shape(), Order::C, dtype)
    }

    /// Copies the (real part of the) logical contents into an `ndarray` array.
    pub fn to_ndarray(&self) -> Result<ArrayD<f64>, Error> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.to_vec_f64()?)
            .map_err(|e| Error::InternalLogicError(format!("to_ndarray: {}", e)))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn ordering(&self) -> Order {
        self.order
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// Total element count. A rank-0 array has one element.
    pub fn length(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.length() == 1
    }

    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View(_))
    }

    /// False once the storage behind this handle has been released.
    pub fn is_alive(&self) -> bool {
        match &self.storage {
            Storage::Owned(_) => true,
            Storage::View(w) => w.strong_count() > 0,
        }
    }

    /// Drops this owning handle. Views derived from it fail with
    /// [`Error::UseAfterFree`] once no other owner remains.
    pub fn release(self) {
        crate::debug_println!("releasing array of shape {:?}", self.shape);
        drop(self);
    }

    pub(crate) fn buffer(&self) -> Result<Rc<RefCell<Buffer>>, Error> {
        match &self.storage {
            Storage::Owned(rc) => Ok(Rc::clone(rc)),
            Storage::View(w) => w.upgrade().ok_or(Error::UseAfterFree),
        }
    }

    /// True when both handles address the same storage.
    pub fn shares_storage(&self, other: &NDArray) -> bool {
        match (self.buffer(), other.buffer()) {
            (Ok(a), Ok(b)) => Rc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    fn offset_of(&self, index: &[usize]) -> Result<usize, Error> {
        if index.len() != self.rank() {
            return Err(Error::shape_mismatch(&self.shape, index));
        }
        let mut off = self.offset;
        for ((&i, &dim), &stride) in index.iter().zip(&self.shape).zip(&self.strides) {
            if i >= dim {
                return Err(Error::IndexOutOfBounds { index: i, size: dim });
            }
            off += i * stride;
        }
        Ok(off)
    }

    /// Buffer offsets of every element in logical row-major order.
    pub(crate) fn offsets(&self) -> Vec<usize> {
        let len = self.length();
        let mut out = Vec::with_capacity(len);
        if len == 0 {
            return out;
        }
        let rank = self.rank();
        let mut index = vec![0usize; rank];
        let mut offset = self.offset;
        for _ in 0..len {
            out.push(offset);
            for axis in (0..rank).rev() {
                index[axis] += 1;
                offset += self.strides[axis];
                if index[axis] < self.shape[axis] {
                    break;
                }
                offset -= self.strides[axis] * self.shape[axis];
                index[axis] = 0;
            }
        }
        out
    }

    pub fn get(&self, index: &[usize]) -> Result<Value, Error> {
        let off = self.offset_of(index)?;
        let buffer = self.buffer()?;
        let buf = buffer.borrow();
        Ok(match self.dtype {
            DataType::Complex => Value::Complex(Complex64::load(&buf, off)),
            _ => Value::Real(f64::load(&buf, off)),
        })
    }

    pub fn get_f64(&self, index: &[usize]) -> Result<f64, Error> {
        self.get(index).map(|v| v.re())
    }

    /// Element at logical row-major position `i`.
    pub fn get_linear(&self, i: usize) -> Result<Value, Error> {
        let len = self.length();
        if i >= len {
            return Err(Error::IndexOutOfBounds { index: i, size: len });
        }
        self.get(&unravel_index(i, &self.shape))
    }

    /// Writes through shared storage; every handle on the same storage observes it.
    pub fn set(&self, index: &[usize], value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let off = self.offset_of(index)?;
        let buffer = self.buffer()?;
        let mut buf = buffer.borrow_mut();
        match (value, self.dtype) {
            (Value::Complex(c), DataType::Complex) => Complex64::store(&mut buf, off, c),
            (Value::Complex(_), dtype) => return Err(Error::unsupported("set", dtype)),
            (Value::Real(v), _) => f64::store(&mut buf, off, v),
        }
        Ok(())
    }

    pub(crate) fn gather<T: Element>(&self) -> Result<Vec<T>, Error> {
        let buffer = self.buffer()?;
        let buf = buffer.borrow();
        Ok(self.offsets().into_iter().map(|o| T::load(&buf, o)).collect())
    }

    pub(crate) fn scatter<T: Element>(&self, values: &[T]) -> Result<(), Error> {
        if values.len() != self.length() {
            return Err(Error::shape_mismatch(&self.shape, &[values.len()]));
        }
        let buffer = self.buffer()?;
        let mut buf = buffer.borrow_mut();
        for (off, &v) in self.offsets().into_iter().zip(values) {
            T::store(&mut buf, off, v);
        }
        Ok(())
    }

    /// Real parts in logical row-major order.
    pub fn to_vec_f64(&self) -> Result<Vec<f64>, Error> {
        self.gather()
    }

    pub fn to_vec_f32(&self) -> Result<Vec<f32>, Error> {
        self.gather()
    }

    pub fn to_vec_complex(&self) -> Result<Vec<Complex64>, Error> {
        self.gather()
    }

    fn derive(&self, shape: Vec<usize>, strides: Vec<usize>, offset: usize) -> Result<NDArray, Error> {
        let weak = match &self.storage {
            Storage::Owned(rc) => Rc::downgrade(rc),
            Storage::View(w) => {
                if w.strong_count() == 0 {
                    return Err(Error::UseAfterFree);
                }
                w.clone()
            }
        };
        let order = if strides == c_strides(&shape) {
            Order::C
        } else if strides == f_strides(&shape) {
            Order::F
        } else {
            self.order
        };
        Ok(NDArray {
            storage: Storage::View(weak),
            shape,
            strides,
            offset,
            order,
            dtype: self.dtype,
        })
    }

    /// A non-owning view with the same layout.
    pub fn view(&self) -> Result<NDArray, Error> {
        self.derive(self.shape.clone(), self.strides.clone(), self.offset)
    }

    /// View with axes reordered: axis `i` of the result is axis `axes[i]` of `self`.
    pub fn permute(&self, axes: &[usize]) -> Result<NDArray, Error> {
        if axes.len() != self.rank() {
            return Err(Error::shape_mismatch(&self.shape, axes));
        }
        validate_dimensions(axes, self.rank())?;
        let shape = axes.iter().map(|&a| self.shape[a]).collect();
        let strides = axes.iter().map(|&a| self.strides[a]).collect();
        self.derive(shape, strides, self.offset)
    }

    /// View with all axes reversed.
    pub fn transpose(&self) -> Result<NDArray, Error> {
        let axes: Vec<usize> = (0..self.rank()).rev().collect();
        self.permute(&axes)
    }

    /// Zero-stride view expanding size-1 (and missing leading) axes to `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<NDArray, Error> {
        let incompatible = || Error::IncompatibleShapes {
            op: "broadcast_to".to_string(),
            shape_a: self.shape.clone(),
            shape_b: shape.to_vec(),
        };
        if shape.len() < self.rank() {
            return Err(incompatible());
        }
        let lead = shape.len() - self.rank();
        let mut strides = vec![0; shape.len()];
        for (axis, &target) in shape.iter().enumerate().skip(lead) {
            let own = self.shape[axis - lead];
            if own == target {
                strides[axis] = self.strides[axis - lead];
            } else if own != 1 {
                return Err(incompatible());
            }
        }
        self.derive(shape.to_vec(), strides, self.offset)
    }

    /// Number of sub-tensors spanning `dims`.
    pub fn tensors_along_dimension(&self, dims: &[usize]) -> Result<usize, Error> {
        let dims = validate_dimensions(dims, self.rank())?;
        Ok(complement_dimensions(&dims, self.rank())
            .iter()
            .map(|&a| self.shape[a])
            .product())
    }

    /// The `index`-th sub-tensor spanning `dims`; sub-tensors are numbered in
    /// row-major order over the remaining axes.
    pub fn tensor_along_dimension(&self, index: usize, dims: &[usize]) -> Result<NDArray, Error> {
        let dims = validate_dimensions(dims, self.rank())?;
        let rest = complement_dimensions(&dims, self.rank());
        let rest_shape: Vec<usize> = rest.iter().map(|&a| self.shape[a]).collect();
        let count: usize = rest_shape.iter().product();
        if index >= count {
            return Err(Error::IndexOutOfBounds { index, size: count });
        }
        let pos = unravel_index(index, &rest_shape);
        let offset = self.offset
            + rest
                .iter()
                .zip(&pos)
                .map(|(&axis, &i)| i * self.strides[axis])
                .sum::<usize>();
        let shape = dims.iter().map(|&a| self.shape[a]).collect();
        let strides = dims.iter().map(|&a| self.strides[a]).collect();
        self.derive(shape, strides, offset)
    }

    pub fn vector_along_dimension(&self, index: usize, dim: usize) -> Result<NDArray, Error> {
        self.tensor_along_dimension(index, &[dim])
    }

    fn collect_buffer(&self, dtype: DataType) -> Result<Buffer, Error> {
        if self.dtype.is_complex() && !dtype.is_complex() {
            return Err(Error::unsupported("cast", self.dtype));
        }
        Ok(match dtype {
            DataType::Half => Buffer::Half(
                self.gather::<f32>()?
                    .into_iter()
                    .map(f16::from_f32)
                    .collect(),
            ),
            DataType::Float => Buffer::Float(self.gather()?),
            DataType::Double => Buffer::Double(self.gather()?),
            DataType::Complex => Buffer::Complex(self.gather()?),
        })
    }

    /// Deep copy into fresh row-major storage.
    pub fn dup(&self) -> Result<NDArray, Error> {
        self.cast(self.dtype)
    }

    pub fn dup_with_order(&self, order: Order) -> Result<NDArray, Error> {
        let out = NDArray::zeros_with_order(&self.shape, self.dtype, order);
        out.assign(self)?;
        Ok(out)
    }

    /// Converts into a fresh array of `dtype`. Complex to real is unsupported.
    pub fn cast(&self, dtype: DataType) -> Result<NDArray, Error> {
        let buffer = self.collect_buffer(dtype)?;
        Ok(NDArray::from_buffer(buffer, &self.shape, Order::C, dtype))
    }

    /// Reshapes row-major. Contiguous row-major arrays keep sharing storage,
    /// anything else is copied first.
    pub fn reshape(&self, shape: &[usize]) -> Result<NDArray, Error> {
        let len: usize = shape.iter().product();
        if len != self.length() {
            return Err(Error::shape_mismatch(&self.shape, shape));
        }
        if self.strides != c_strides(&self.shape) {
            return self.dup()?.reshape(shape);
        }
        let storage = match &self.storage {
            Storage::Owned(rc) => Storage::Owned(Rc::clone(rc)),
            Storage::View(w) => {
                if w.strong_count() == 0 {
                    return Err(Error::UseAfterFree);
                }
                Storage::View(w.clone())
            }
        };
        Ok(NDArray {
            storage,
            shape: shape.to_vec(),
            strides: c_strides(shape),
            offset: self.offset,
            order: Order::C,
            dtype: self.dtype,
        })
    }

    /// Copies `other` (broadcast to this shape) into this array's elements.
    pub fn assign(&self, other: &NDArray) -> Result<(), Error> {
        let src = other.broadcast_to(&self.shape)?;
        match (self.dtype, other.dtype) {
            (DataType::Complex, _) => self.scatter(&src.gather::<Complex64>()?),
            (_, DataType::Complex) => Err(Error::unsupported("assign", DataType::Complex)),
            (DataType::Double, _) => self.scatter(&src.gather::<f64>()?),
            _ => self.scatter(&src.gather::<f32>()?),
        }
    }

    /// Element-wise comparison within `eps`. NaNs compare equal to NaNs.
    pub fn approx_eq(&self, other: &NDArray, eps: f64) -> Result<bool, Error> {
        if self.shape != other.shape {
            return Ok(false);
        }
        let a = self.to_vec_complex()?;
        let b = other.to_vec_complex()?;
        Ok(a.iter().zip(&b).all(|(x, y)| {
            let nan_x = x.re.is_nan() || x.im.is_nan();
            let nan_y = y.re.is_nan() || y.im.is_nan();
            if nan_x || nan_y {
                return nan_x && nan_y;
            }
            (x - y).norm() <= eps || x == y
        }))
    }
}

fn check_len(len: usize, shape: &[usize]) -> Result<(), Error> {
    let expected: usize = shape.iter().product();
    if len != expected {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![len],
        });
    }
    Ok(())
}

fn real_buffer(data: Vec<f64>, dtype: DataType) -> Buffer {
    match dtype {
        DataType::Half => Buffer::Half(data.into_iter().map(f16::from_f64).collect()),
        DataType::Float => Buffer::Float(data.into_iter().map(|v| v as f32).collect()),
        DataType::Double => Buffer::Double(data),
        DataType::Complex => Buffer::Complex(
            data.into_iter()
                .map(|v| Complex64::new(v, 0.0))
                .collect(),
        ),
    }
}
