//! Functional helpers for building graphs, one per catalogue op.

use super::{Graph, NodeRef, PendingFunction};
use crate::array::{NDArray, Value};
use crate::convolution::Im2ColConfig;
use crate::error::Error;

impl Graph {
    fn apply(&mut self, name: &str, args: &[NodeRef]) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new(name, args)?)
    }

    fn apply_scalar(&mut self, name: &str, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new(name, &[x])?.with_scalar(s))
    }

    fn apply_ints(&mut self, name: &str, x: NodeRef, ints: Vec<i64>, dims: &[usize]) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new(name, &[x])?.with_int_args(ints).along(dims))
    }

    /// Any unary transform by name, with its default arguments.
    pub fn transform(&mut self, name: &str, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply(name, &[x])
    }

    pub fn ones_like(&mut self, node: NodeRef) -> Result<NodeRef, Error> {
        let shape = self.shape(node)?.to_vec();
        let dtype = self.context().default_dtype;
        Ok(self.constant(NDArray::ones(&shape, dtype)))
    }

    pub fn zeros_like(&mut self, node: NodeRef) -> Result<NodeRef, Error> {
        let shape = self.shape(node)?.to_vec();
        let dtype = self.context().default_dtype;
        Ok(self.constant(NDArray::zeros(&shape, dtype)))
    }

    pub fn add(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("add", &[a, b])
    }

    pub fn sub(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sub", &[a, b])
    }

    pub fn mul(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("mul", &[a, b])
    }

    pub fn div(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("div", &[a, b])
    }

    /// `a ^ b` elementwise.
    pub fn pow_pairwise(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("pow_pairwise", &[a, b])
    }

    pub fn maximum(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("maximum", &[a, b])
    }

    pub fn minimum(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("minimum", &[a, b])
    }

    pub fn eq(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("eq", &[a, b])
    }

    pub fn gt(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("gt", &[a, b])
    }

    pub fn lt(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("lt", &[a, b])
    }

    pub fn gte(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("gte", &[a, b])
    }

    pub fn lte(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("lte", &[a, b])
    }

    /// Angle of the points `(a, b)`.
    pub fn atan2(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("atan2", &[a, b])
    }

    pub fn and(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("and", &[a, b])
    }

    pub fn or(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("or", &[a, b])
    }

    pub fn xor(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("xor", &[a, b])
    }

    pub fn not(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("not", &[x])
    }

    pub fn stabilize(&mut self, x: NodeRef, k: f64) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new("stabilize", &[x])?.with_extra_args(vec![k]))
    }

    pub fn neg(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("neg", &[x])
    }

    pub fn abs(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("abs", &[x])
    }

    pub fn sign(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sign", &[x])
    }

    pub fn exp(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("exp", &[x])
    }

    pub fn log(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("log", &[x])
    }

    pub fn sqrt(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sqrt", &[x])
    }

    pub fn square(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("square", &[x])
    }

    pub fn sin(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sin", &[x])
    }

    pub fn cos(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("cos", &[x])
    }

    pub fn sinh(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sinh", &[x])
    }

    pub fn cosh(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("cosh", &[x])
    }

    pub fn tanh(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("tanh", &[x])
    }

    pub fn sigmoid(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("sigmoid", &[x])
    }

    pub fn relu(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("relu", &[x])
    }

    /// 1 where `x > cutoff`, else 0.
    pub fn step(&mut self, x: NodeRef, cutoff: f64) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new("step", &[x])?.with_extra_args(vec![cutoff]))
    }

    pub fn pow(&mut self, x: NodeRef, power: f64) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new("pow", &[x])?.with_extra_args(vec![power]))
    }

    /// Softmax over `dims` (the last axis when empty).
    pub fn softmax(&mut self, x: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new("softmax", &[x])?.along(dims))
    }

    pub fn add_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("add_scalar", x, s)
    }

    pub fn sub_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("sub_scalar", x, s)
    }

    pub fn mul_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("mul_scalar", x, s)
    }

    pub fn div_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("div_scalar", x, s)
    }

    /// `s - x`.
    pub fn rsub_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("rsub_scalar", x, s)
    }

    /// `s / x`.
    pub fn rdiv_scalar(&mut self, x: NodeRef, s: impl Into<Value>) -> Result<NodeRef, Error> {
        self.apply_scalar("rdiv_scalar", x, s)
    }

    pub fn gt_scalar(&mut self, x: NodeRef, s: f64) -> Result<NodeRef, Error> {
        self.apply_scalar("gt_scalar", x, s)
    }

    pub fn lt_scalar(&mut self, x: NodeRef, s: f64) -> Result<NodeRef, Error> {
        self.apply_scalar("lt_scalar", x, s)
    }

    /// Any accumulation by name over `dims` (all axes when empty).
    pub fn reduce(&mut self, name: &str, x: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new(name, &[x])?.along(dims))
    }

    pub fn sum(&mut self, x: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        self.reduce("sum", x, dims)
    }

    pub fn mean(&mut self, x: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        self.reduce("mean", x, dims)
    }

    /// Any pairwise accumulation (`dot`, `euclidean`, `hamming`, ...) by name.
    pub fn reduce_pair(&mut self, name: &str, a: NodeRef, b: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        self.bind(PendingFunction::new(name, &[a, b])?.along(dims))
    }

    /// `b` broadcast up to the shape of `a`.
    fn widen_to(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        let shape = self.shape(a)?.to_vec();
        if self.shape(b)? == shape.as_slice() {
            return Ok(b);
        }
        self.repeat(b, &shape, &[])
    }

    /// `a . b / (|a| |b|)` over `dims`, built from `dot` and `norm2`.
    pub fn cosine_similarity(&mut self, a: NodeRef, b: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        let b = self.widen_to(a, b)?;
        let dot = self.reduce_pair("dot", a, b, dims)?;
        let na = self.reduce("norm2", a, dims)?;
        let nb = self.reduce("norm2", b, dims)?;
        let norms = self.mul(na, nb)?;
        self.div(dot, norms)
    }

    pub fn cosine_distance(&mut self, a: NodeRef, b: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        let sim = self.cosine_similarity(a, b, dims)?;
        self.rsub_scalar(sim, 1.0)
    }

    /// `1 - sum(min(a, b)) / sum(max(a, b))` over `dims`.
    pub fn jaccard_distance(&mut self, a: NodeRef, b: NodeRef, dims: &[usize]) -> Result<NodeRef, Error> {
        let lo = self.minimum(a, b)?;
        let hi = self.maximum(a, b)?;
        let lo_sum = self.sum(lo, dims)?;
        let hi_sum = self.sum(hi, dims)?;
        let ratio = self.div(lo_sum, hi_sum)?;
        self.rsub_scalar(ratio, 1.0)
    }

    pub fn mmul(&mut self, a: NodeRef, b: NodeRef) -> Result<NodeRef, Error> {
        self.apply("mmul", &[a, b])
    }

    /// Reverses the axes of `x`.
    pub fn transpose(&mut self, x: NodeRef) -> Result<NodeRef, Error> {
        self.apply("transpose", &[x])
    }

    pub fn permute(&mut self, x: NodeRef, axes: &[usize]) -> Result<NodeRef, Error> {
        let ints = axes.iter().map(|&a| a as i64).collect();
        self.apply_ints("transpose", x, ints, &[])
    }

    pub fn reshape(&mut self, x: NodeRef, shape: &[usize]) -> Result<NodeRef, Error> {
        self.apply_ints("reshape", x, to_ints(shape), &[])
    }

    /// Broadcasts `x` to `shape`. With `dims`, `x` is a reduction over those
    /// axes of a `shape`-shaped array.
    pub fn repeat(&mut self, x: NodeRef, shape: &[usize], dims: &[usize]) -> Result<NodeRef, Error> {
        self.apply_ints("repeat", x, to_ints(shape), dims)
    }

    /// Sums `x` down to the broadcast source shape `shape`.
    pub fn reduce_to(&mut self, x: NodeRef, shape: &[usize]) -> Result<NodeRef, Error> {
        self.apply_ints("reduce_to", x, to_ints(shape), &[])
    }

    /// `grad` summed down to `shape` when it was broadcast, unchanged otherwise.
    pub fn unbroadcast(&mut self, grad: NodeRef, shape: &[usize]) -> Result<NodeRef, Error> {
        if self.shape(grad)? == shape {
            return Ok(grad);
        }
        self.reduce_to(grad, shape)
    }

    pub fn im2col(&mut self, x: NodeRef, cfg: &Im2ColConfig) -> Result<NodeRef, Error> {
        self.apply_ints("im2col", x, cfg.to_int_args(), &[])
    }

    pub fn col2im(
        &mut self,
        cols: NodeRef,
        stride: (usize, usize),
        padding: (usize, usize),
        image_size: (usize, usize),
        dilation: (usize, usize),
    ) -> Result<NodeRef, Error> {
        let ints = to_ints(&[
            stride.0,
            stride.1,
            padding.0,
            padding.1,
            image_size.0,
            image_size.1,
            dilation.0,
            dilation.1,
        ]);
        self.apply_ints("col2im", cols, ints, &[])
    }
}

fn to_ints(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}
