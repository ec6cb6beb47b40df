//! Static op table.
//!
//! Built once on first use and never mutated. Names are unique across the
//! whole table; op numbers are unique within a family. Adding an op means
//! adding one entry here together with its math and derivative rule.

use crate::error::Error;
use crate::graph::diff;
use crate::ops::elementwise::*;
use crate::ops::{
    accum, custom, index_accum, special, Arity, CustomMath, DiffRule, Elementwise, OpDef,
    OpFamily, OpKind, TransformMath,
};
use lazy_static::lazy_static;
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

macro_rules! real {
    ($f:ident) => {
        Elementwise {
            float: Some($f::<f32>),
            double: Some($f::<f64>),
            complex: None,
        }
    };
}

macro_rules! with_complex {
    ($f:ident, $c:ident) => {
        Elementwise {
            float: Some($f::<f32>),
            double: Some($f::<f64>),
            complex: Some($c),
        }
    };
}

fn transform(num: u16, name: &'static str, math: Elementwise, diff: DiffRule) -> OpDef {
    OpDef {
        num,
        name,
        arity: Arity::Unary,
        kind: OpKind::Transform(TransformMath::Elementwise(math)),
        default_args: &[],
        diff,
    }
}

fn pairwise(num: u16, name: &'static str, math: Elementwise, diff: DiffRule) -> OpDef {
    OpDef {
        arity: Arity::Binary,
        ..transform(num, name, math, diff)
    }
}

fn special(
    num: u16,
    name: &'static str,
    exec: crate::ops::SpecialFn,
    default_last_axis: bool,
    diff: DiffRule,
) -> OpDef {
    OpDef {
        num,
        name,
        arity: Arity::Unary,
        kind: OpKind::Transform(TransformMath::Special {
            exec,
            default_last_axis,
        }),
        default_args: &[],
        diff,
    }
}

fn scalar(num: u16, name: &'static str, math: Elementwise, diff: DiffRule) -> OpDef {
    OpDef {
        num,
        name,
        arity: Arity::Unary,
        kind: OpKind::Scalar(math),
        default_args: &[],
        diff,
    }
}

fn reduction(
    num: u16,
    name: &'static str,
    arity: Arity,
    math: accum::AccumulationMath,
    diff: DiffRule,
) -> OpDef {
    OpDef {
        num,
        name,
        arity,
        kind: OpKind::Accumulation(math),
        default_args: &[],
        diff,
    }
}

fn index_reduction(num: u16, name: &'static str, math: index_accum::IndexMath) -> OpDef {
    OpDef {
        num,
        name,
        arity: Arity::Unary,
        kind: OpKind::IndexAccumulation(math),
        default_args: &[],
        diff: DiffRule::NotDifferentiable,
    }
}

fn custom_op(
    num: u16,
    name: &'static str,
    arity: Arity,
    exec: custom::CustomExecFn,
    shape: custom::CustomShapeFn,
    diff: DiffRule,
) -> OpDef {
    OpDef {
        num,
        name,
        arity,
        kind: OpKind::Custom(CustomMath { exec, shape }),
        default_args: &[],
        diff,
    }
}

fn with_defaults(def: OpDef, default_args: &'static [f64]) -> OpDef {
    OpDef {
        default_args,
        ..def
    }
}

fn build_table() -> Vec<OpDef> {
    use DiffRule::{NotDifferentiable, Rule, ZeroGradient};
    vec![
        // Transforms
        transform(0, "identity", with_complex!(identity, c_identity), Rule(diff::identity)),
        transform(1, "neg", with_complex!(neg, c_neg), Rule(diff::neg)),
        transform(2, "abs", with_complex!(abs, c_abs), Rule(diff::abs)),
        transform(3, "exp", with_complex!(exp, c_exp), Rule(diff::exp)),
        transform(4, "log", with_complex!(log, c_log), Rule(diff::log)),
        transform(5, "log1p", real!(log1p), Rule(diff::log1p)),
        transform(6, "sqrt", with_complex!(sqrt, c_sqrt), Rule(diff::sqrt)),
        transform(7, "square", with_complex!(square, c_square), Rule(diff::square)),
        transform(8, "cube", with_complex!(cube, c_cube), Rule(diff::cube)),
        transform(9, "reciprocal", with_complex!(reciprocal, c_reciprocal), Rule(diff::reciprocal)),
        transform(10, "sign", real!(sign), ZeroGradient),
        transform(11, "floor", real!(floor), ZeroGradient),
        transform(12, "ceil", real!(ceil), ZeroGradient),
        transform(13, "round", real!(round), ZeroGradient),
        transform(14, "sin", with_complex!(sin, c_sin), Rule(diff::sin)),
        transform(15, "cos", with_complex!(cos, c_cos), Rule(diff::cos)),
        transform(16, "acosh", real!(acosh), Rule(diff::acosh)),
        transform(17, "tan", with_complex!(tan, c_tan), Rule(diff::tan)),
        transform(18, "asin", with_complex!(asin, c_asin), Rule(diff::asin)),
        transform(19, "acos", with_complex!(acos, c_acos), Rule(diff::acos)),
        transform(20, "atan", with_complex!(atan, c_atan), Rule(diff::atan)),
        transform(21, "sinh", with_complex!(sinh, c_sinh), Rule(diff::sinh)),
        transform(22, "cosh", with_complex!(cosh, c_cosh), Rule(diff::cosh)),
        transform(23, "tanh", with_complex!(tanh, c_tanh), Rule(diff::tanh)),
        transform(24, "asinh", with_complex!(asinh, c_asinh), Rule(diff::asinh)),
        transform(25, "atanh", with_complex!(atanh, c_atanh), Rule(diff::atanh)),
        transform(26, "sigmoid", with_complex!(sigmoid, c_sigmoid), Rule(diff::sigmoid)),
        transform(27, "softplus", real!(softplus), Rule(diff::softplus)),
        transform(28, "softsign", real!(softsign), Rule(diff::softsign)),
        with_defaults(transform(29, "relu", real!(relu), Rule(diff::relu)), &[0.0]),
        with_defaults(
            transform(30, "leakyrelu", real!(leaky_relu), Rule(diff::leaky_relu)),
            &[0.01],
        ),
        with_defaults(transform(31, "elu", real!(elu), Rule(diff::elu)), &[1.0]),
        transform(32, "hardtanh", real!(hard_tanh), Rule(diff::hard_tanh)),
        with_defaults(transform(33, "step", real!(step), ZeroGradient), &[0.0]),
        with_defaults(
            transform(34, "pow", with_complex!(pow, c_pow), Rule(diff::pow)),
            &[1.0],
        ),
        special(38, "softmax", special::softmax, true, Rule(diff::softmax)),
        special(39, "log_softmax", special::log_softmax, true, Rule(diff::log_softmax)),
        pairwise(40, "add", with_complex!(add, c_add), Rule(diff::add)),
        pairwise(41, "sub", with_complex!(sub, c_sub), Rule(diff::sub)),
        pairwise(42, "mul", with_complex!(mul, c_mul), Rule(diff::mul)),
        pairwise(43, "div", with_complex!(div, c_div), Rule(diff::div)),
        pairwise(44, "rsub", with_complex!(rsub, c_rsub), Rule(diff::rsub)),
        pairwise(45, "rdiv", with_complex!(rdiv, c_rdiv), Rule(diff::rdiv)),
        pairwise(
            46,
            "pow_pairwise",
            with_complex!(pow_pairwise, c_pow_pairwise),
            Rule(diff::pow_pairwise),
        ),
        pairwise(47, "maximum", real!(maximum), Rule(diff::maximum)),
        pairwise(48, "minimum", real!(minimum), Rule(diff::minimum)),
        pairwise(49, "eq", real!(eq), ZeroGradient),
        pairwise(50, "gt", real!(gt), ZeroGradient),
        pairwise(51, "lt", real!(lt), ZeroGradient),
        pairwise(52, "gte", real!(gte), ZeroGradient),
        pairwise(53, "lte", real!(lte), ZeroGradient),
        pairwise(54, "atan2", real!(atan2), Rule(diff::atan2)),
        with_defaults(pairwise(55, "and", real!(and), ZeroGradient), &[0.0]),
        with_defaults(pairwise(56, "or", real!(or), ZeroGradient), &[0.0]),
        with_defaults(pairwise(57, "xor", real!(xor), ZeroGradient), &[0.0]),
        with_defaults(transform(58, "not", real!(not), ZeroGradient), &[0.0]),
        with_defaults(
            transform(59, "stabilize", real!(stabilize), Rule(diff::stabilize)),
            &[1.0],
        ),
        transform(61, "rectified_tanh", real!(rectified_tanh), Rule(diff::rectified_tanh)),
        special(70, "reverse", special::reverse, false, NotDifferentiable),
        // Scalar
        scalar(0, "add_scalar", with_complex!(add, c_add), Rule(diff::shift_scalar)),
        scalar(1, "sub_scalar", with_complex!(sub, c_sub), Rule(diff::shift_scalar)),
        scalar(2, "mul_scalar", with_complex!(mul, c_mul), Rule(diff::mul_scalar)),
        scalar(3, "div_scalar", with_complex!(div, c_div), Rule(diff::div_scalar)),
        scalar(4, "rsub_scalar", with_complex!(rsub, c_rsub), Rule(diff::rsub_scalar)),
        scalar(5, "rdiv_scalar", with_complex!(rdiv, c_rdiv), Rule(diff::rdiv_scalar)),
        scalar(6, "max_scalar", real!(maximum), Rule(diff::max_scalar)),
        scalar(7, "min_scalar", real!(minimum), Rule(diff::min_scalar)),
        scalar(8, "set_scalar", with_complex!(set, c_set), ZeroGradient),
        scalar(9, "eq_scalar", real!(eq), ZeroGradient),
        scalar(10, "gt_scalar", real!(gt), ZeroGradient),
        scalar(11, "lt_scalar", real!(lt), ZeroGradient),
        // Accumulation
        reduction(0, "mean", Arity::Unary, accum::mean(), Rule(diff::mean)),
        reduction(1, "sum", Arity::Unary, accum::sum(), Rule(diff::sum)),
        reduction(2, "prod", Arity::Unary, accum::prod(), Rule(diff::prod)),
        reduction(3, "max", Arity::Unary, accum::max(), Rule(diff::extreme)),
        reduction(4, "min", Arity::Unary, accum::min(), Rule(diff::extreme)),
        reduction(5, "norm1", Arity::Unary, accum::norm1(), Rule(diff::norm1)),
        reduction(6, "norm2", Arity::Unary, accum::norm2(), Rule(diff::norm2)),
        reduction(7, "normmax", Arity::Unary, accum::norm_max(), Rule(diff::norm_max)),
        reduction(8, "dot", Arity::Binary, accum::dot(), Rule(diff::dot)),
        reduction(9, "euclidean", Arity::Binary, accum::euclidean(), Rule(diff::euclidean)),
        reduction(10, "manhattan", Arity::Binary, accum::manhattan(), Rule(diff::manhattan)),
        reduction(11, "hamming", Arity::Binary, accum::hamming(), ZeroGradient),
        // Index accumulation
        index_reduction(0, "imax", index_accum::imax()),
        index_reduction(1, "imin", index_accum::imin()),
        index_reduction(2, "iamax", index_accum::iamax()),
        index_reduction(3, "iamin", index_accum::iamin()),
        // Custom
        custom_op(0, "mmul", Arity::Binary, custom::mmul, custom::mmul_shape, Rule(diff::mmul)),
        custom_op(
            1,
            "transpose",
            Arity::Unary,
            custom::transpose,
            custom::transpose_shape,
            Rule(diff::transpose),
        ),
        custom_op(
            2,
            "reshape",
            Arity::Unary,
            custom::reshape,
            custom::reshape_shape,
            Rule(diff::reshape),
        ),
        custom_op(
            3,
            "repeat",
            Arity::Unary,
            custom::repeat,
            custom::repeat_shape,
            Rule(diff::repeat),
        ),
        custom_op(
            4,
            "reduce_to",
            Arity::Unary,
            custom::reduce_to,
            custom::reduce_to_shape,
            Rule(diff::reduce_to),
        ),
        custom_op(
            5,
            "im2col",
            Arity::Unary,
            custom::im2col,
            custom::im2col_shape,
            Rule(diff::im2col),
        ),
        custom_op(
            6,
            "col2im",
            Arity::Unary,
            custom::col2im,
            custom::col2im_shape,
            Rule(diff::col2im),
        ),
    ]
}

struct Registry {
    defs: Vec<OpDef>,
    by_name: HashMap<&'static str, usize>,
    by_num: HashMap<(OpFamily, u16), usize>,
}

impl Registry {
    fn build() -> Self {
        let defs = build_table();
        let by_name = defs.iter().enumerate().map(|(i, d)| (d.name, i)).collect();
        let by_num = defs
            .iter()
            .enumerate()
            .map(|(i, d)| ((d.family(), d.num), i))
            .collect();
        Registry {
            defs,
            by_name,
            by_num,
        }
    }
}

lazy_static! {
    static ref REGISTRY: Registry = Registry::build();
}

/// Finds an op by name.
pub fn lookup(name: &str) -> Result<&'static OpDef, Error> {
    let registry: &'static Registry = &REGISTRY;
    registry
        .by_name
        .get(name)
        .map(|&i| &registry.defs[i])
        .ok_or_else(|| Error::UnknownOp(name.to_string()))
}

/// Finds an op by its number within `family`.
pub fn lookup_num(family: OpFamily, num: u16) -> Result<&'static OpDef, Error> {
    let registry: &'static Registry = &REGISTRY;
    registry
        .by_num
        .get(&(family, num))
        .map(|&i| &registry.defs[i])
        .ok_or_else(|| Error::UnknownOp(format!("{:?} #{}", family, num)))
}

/// Every registered op, in table order.
pub fn all() -> impl Iterator<Item = &'static OpDef> {
    let registry: &'static Registry = &REGISTRY;
    registry.defs.iter()
}

/// Public description of an op, as seen by external graph producers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct OpMetadata {
    pub num: u16,
    pub name: String,
    pub family: OpFamily,
    pub arity: Arity,
    pub default_extra_args: Vec<f64>,
    pub differentiable: bool,
}

impl From<&OpDef> for OpMetadata {
    fn from(def: &OpDef) -> Self {
        OpMetadata {
            num: def.num,
            name: def.name.to_string(),
            family: def.family(),
            arity: def.arity,
            default_extra_args: def.default_args.to_vec(),
            differentiable: def.is_differentiable(),
        }
    }
}

pub fn metadata(name: &str) -> Result<OpMetadata, Error> {
    lookup(name).map(OpMetadata::from)
}

/// The whole table as JSON.
#[cfg(feature = "serialization")]
pub fn to_json() -> Result<String, Error> {
    let table: Vec<OpMetadata> = all().map(OpMetadata::from).collect();
    serde_json::to_string_pretty(&table)
        .map_err(|e| Error::InvalidOperation(format!("registry serialization failed: {}", e)))
}
