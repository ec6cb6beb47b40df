//! Image-to-column layout transform and the operations built on it.
//!
//! `im2col` unrolls a `[batch, channel, height, width]` image into a patch
//! tensor `[batch, channel, kernelH, kernelW, outH, outW]`; `col2im`
//! scatter-adds a patch tensor back into an image and is the adjoint of
//! `im2col`. Both address their destination by logical index, so the
//! destination may be any permuted or strided view.

use crate::array::{DataType, Element, NDArray};
use crate::error::Error;
use crate::executor::OpExecutor;
use crate::ops::Operation;
use crate::util::shape_from_ints;
use num_complex::Complex64;

/// Kernel extent once `dilation - 1` gaps are inserted between taps.
pub fn effective_kernel_size(kernel: usize, dilation: usize) -> usize {
    kernel + (kernel.saturating_sub(1)) * (dilation.saturating_sub(1))
}

/// Output extent of a sliding window over `size` elements with symmetric
/// padding `padding`. With `cover_all` the last partial window is kept.
///
/// # Errors
/// `InvalidOperation` for a zero stride or a window that does not fit.
pub fn out_size(
    size: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
    cover_all: bool,
) -> Result<usize, Error> {
    if stride == 0 || kernel == 0 || dilation == 0 {
        return Err(Error::InvalidOperation(
            "kernel, stride and dilation must be positive".to_string(),
        ));
    }
    let k = effective_kernel_size(kernel, dilation);
    let padded = size + 2 * padding;
    if padded < k {
        return Err(Error::InvalidOperation(format!(
            "kernel extent {} exceeds padded input {}",
            k, padded
        )));
    }
    if cover_all {
        Ok((padded - k + stride - 1) / stride + 1)
    } else {
        Ok((padded - k) / stride + 1)
    }
}

/// `(out, pad_before, pad_after)` for "same" mode along one axis:
/// `out = ceil(size / stride)` and the padding that makes it fit, with any
/// odd remainder going after.
pub fn same_mode_padding(
    size: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
) -> Result<(usize, usize, usize), Error> {
    if stride == 0 {
        return Err(Error::InvalidOperation("stride must be positive".to_string()));
    }
    let out = size.div_ceil(stride);
    let needed = out.saturating_sub(1) * stride + effective_kernel_size(kernel, dilation);
    let total = needed.saturating_sub(size);
    let before = total / 2;
    Ok((out, before, total - before))
}

/// Window geometry resolved against a concrete image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub out_h: usize,
    pub out_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Im2ColConfig {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub same_mode: bool,
    /// Caller-supplied output size, overriding the computed one.
    pub out_size: Option<(usize, usize)>,
    /// Value of cells that fall outside the image.
    pub pad_value: f64,
}

impl Im2ColConfig {
    /// Stride 1, no padding, no dilation.
    pub fn new(kernel: (usize, usize)) -> Self {
        Im2ColConfig {
            kernel,
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            same_mode: false,
            out_size: None,
            pad_value: 0.0,
        }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: (usize, usize)) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_same_mode(mut self, same_mode: bool) -> Self {
        self.same_mode = same_mode;
        self
    }

    pub fn with_out_size(mut self, out_size: (usize, usize)) -> Self {
        self.out_size = Some(out_size);
        self
    }

    pub fn with_pad_value(mut self, pad_value: f64) -> Self {
        self.pad_value = pad_value;
        self
    }

    /// Output size and leading padding for an `in_h x in_w` image.
    pub fn geometry(&self, in_h: usize, in_w: usize) -> Result<Geometry, Error> {
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (dh, dw) = self.dilation;
        let (computed, pad_top, pad_left) = if self.same_mode {
            let (oh, top, _) = same_mode_padding(in_h, kh, sh, dh)?;
            let (ow, left, _) = same_mode_padding(in_w, kw, sw, dw)?;
            (Some((oh, ow)), top, left)
        } else {
            (None, self.padding.0, self.padding.1)
        };
        let (out_h, out_w) = match (self.out_size, computed) {
            (Some(size), _) => size,
            (None, Some(size)) => size,
            (None, None) => (
                out_size(in_h, kh, sh, pad_top, dh, false)?,
                out_size(in_w, kw, sw, pad_left, dw, false)?,
            ),
        };
        Ok(Geometry {
            out_h,
            out_w,
            pad_top,
            pad_left,
        })
    }

    /// Patch tensor shape for an image of shape `[b, c, h, w]`.
    pub fn patch_shape(&self, image_shape: &[usize]) -> Result<Vec<usize>, Error> {
        let [b, c, h, w] = image_dims(image_shape)?;
        let g = self.geometry(h, w)?;
        Ok(vec![b, c, self.kernel.0, self.kernel.1, g.out_h, g.out_w])
    }

    /// Encodes as `[kh, kw, sh, sw, ph, pw, dh, dw, same, (oh, ow)]`.
    /// The pad value is not encoded.
    pub fn to_int_args(&self) -> Vec<i64> {
        let mut ints: Vec<i64> = [
            self.kernel.0,
            self.kernel.1,
            self.stride.0,
            self.stride.1,
            self.padding.0,
            self.padding.1,
            self.dilation.0,
            self.dilation.1,
        ]
        .iter()
        .map(|&v| v as i64)
        .collect();
        ints.push(self.same_mode as i64);
        if let Some((oh, ow)) = self.out_size {
            ints.push(oh as i64);
            ints.push(ow as i64);
        }
        ints
    }

    pub fn from_int_args(ints: &[i64]) -> Result<Self, Error> {
        let v = shape_from_ints(ints)?;
        if v.len() != 9 && v.len() != 11 {
            return Err(Error::InvalidOperation(format!(
                "im2col expects 9 or 11 integer arguments, got {}",
                v.len()
            )));
        }
        let mut cfg = Im2ColConfig::new((v[0], v[1]))
            .with_stride((v[2], v[3]))
            .with_padding((v[4], v[5]))
            .with_dilation((v[6], v[7]))
            .with_same_mode(v[8] != 0);
        if v.len() == 11 {
            cfg = cfg.with_out_size((v[9], v[10]));
        }
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Error> {
        let all = [
            self.kernel.0,
            self.kernel.1,
            self.stride.0,
            self.stride.1,
            self.dilation.0,
            self.dilation.1,
        ];
        if all.contains(&0) {
            return Err(Error::InvalidOperation(format!(
                "kernel, stride and dilation must be positive: {:?}",
                self
            )));
        }
        Ok(())
    }
}

fn image_dims(shape: &[usize]) -> Result<[usize; 4], Error> {
    match shape {
        [b, c, h, w] => Ok([*b, *c, *h, *w]),
        _ => Err(Error::InvalidOperation(format!(
            "expected a [batch, channel, height, width] image, got shape {:?}",
            shape
        ))),
    }
}

/// Source coordinate of a patch cell, if it lies inside the image.
#[inline]
fn source(out: usize, k: usize, stride: usize, dilation: usize, pad: usize, size: usize) -> Option<usize> {
    let pos = (out * stride + k * dilation).checked_sub(pad)?;
    (pos < size).then_some(pos)
}

/// Unrolled patch values in row-major patch order.
fn unroll<T: Element>(src: &[T], dims: [usize; 4], cfg: &Im2ColConfig, g: &Geometry, pad: T) -> Vec<T> {
    let [b, c, h, w] = dims;
    let (kh, kw) = cfg.kernel;
    let (sh, sw) = cfg.stride;
    let (dh, dw) = cfg.dilation;
    let mut out = Vec::with_capacity(b * c * kh * kw * g.out_h * g.out_w);
    for plane in 0..b * c {
        let base = plane * h * w;
        for i in 0..kh {
            for j in 0..kw {
                for oy in 0..g.out_h {
                    let row = source(oy, i, sh, dh, g.pad_top, h);
                    for ox in 0..g.out_w {
                        let value = match (row, source(ox, j, sw, dw, g.pad_left, w)) {
                            (Some(r), Some(col)) => src[base + r * w + col],
                            _ => pad,
                        };
                        out.push(value);
                    }
                }
            }
        }
    }
    out
}

/// Unrolls `image` into a freshly allocated patch tensor of the image's type.
pub fn im2col(image: &NDArray, cfg: &Im2ColConfig) -> Result<NDArray, Error> {
    let out = NDArray::zeros(&cfg.patch_shape(image.shape())?, image.data_type());
    im2col_into(image, cfg, &out)?;
    Ok(out)
}

/// Unrolls `image` into `out`, which must have the patch tensor's logical
/// shape but may have any memory layout.
pub fn im2col_into(image: &NDArray, cfg: &Im2ColConfig, out: &NDArray) -> Result<(), Error> {
    cfg.validate()?;
    let dims = image_dims(image.shape())?;
    let expected = cfg.patch_shape(image.shape())?;
    if out.shape() != expected.as_slice() {
        return Err(Error::shape_mismatch(&expected, out.shape()));
    }
    let g = cfg.geometry(dims[2], dims[3])?;
    crate::debug_println!("im2col {:?} -> {:?} ({:?})", image.shape(), expected, g);
    if image.data_type() == DataType::Complex {
        let src = image.gather::<Complex64>()?;
        out.scatter(&unroll(&src, dims, cfg, &g, Complex64::new(cfg.pad_value, 0.0)))
    } else {
        let src = image.gather::<f64>()?;
        out.scatter(&unroll(&src, dims, cfg, &g, cfg.pad_value))
    }
}

fn roll<T: Element>(
    cols: &[T],
    shape: &[usize],
    image: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
) -> Vec<T> {
    let (b, c, kh, kw, oh, ow) = (shape[0], shape[1], shape[2], shape[3], shape[4], shape[5]);
    let (h, w) = image;
    let mut img = vec![T::zero(); b * c * h * w];
    let mut it = cols.iter();
    for plane in 0..b * c {
        let base = plane * h * w;
        for i in 0..kh {
            for j in 0..kw {
                for oy in 0..oh {
                    let row = source(oy, i, stride.0, dilation.0, padding.0, h);
                    for ox in 0..ow {
                        let Some(&v) = it.next() else {
                            return img;
                        };
                        if let (Some(r), Some(col)) =
                            (row, source(ox, j, stride.1, dilation.1, padding.1, w))
                        {
                            let cell = &mut img[base + r * w + col];
                            *cell = *cell + v;
                        }
                    }
                }
            }
        }
    }
    img
}

/// Scatter-adds a patch tensor back into a fresh `[b, c, h, w]` image.
/// Cells that map outside the image are dropped.
pub fn col2im(
    cols: &NDArray,
    stride: (usize, usize),
    padding: (usize, usize),
    image_size: (usize, usize),
    dilation: (usize, usize),
) -> Result<NDArray, Error> {
    let shape = cols.shape();
    if shape.len() != 6 {
        return Err(Error::InvalidOperation(format!(
            "col2im expects a 6-d patch tensor, got shape {:?}",
            shape
        )));
    }
    let out = NDArray::zeros(
        &[shape[0], shape[1], image_size.0, image_size.1],
        cols.data_type(),
    );
    col2im_into(cols, stride, padding, dilation, &out)?;
    Ok(out)
}

/// Like [`col2im`], writing into `out`. The previous contents of `out` are
/// overwritten, not accumulated into.
pub fn col2im_into(
    cols: &NDArray,
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
    out: &NDArray,
) -> Result<(), Error> {
    let shape = cols.shape().to_vec();
    let [b, c, h, w] = image_dims(out.shape())?;
    if shape.len() != 6 || shape[0] != b || shape[1] != c {
        return Err(Error::shape_mismatch(&[b, c, h, w], &shape));
    }
    if stride.0 == 0 || stride.1 == 0 || dilation.0 == 0 || dilation.1 == 0 {
        return Err(Error::InvalidOperation(
            "stride and dilation must be positive".to_string(),
        ));
    }
    if cols.data_type() == DataType::Complex {
        let src = cols.gather::<Complex64>()?;
        out.scatter(&roll(&src, &shape, (h, w), stride, padding, dilation))
    } else {
        let src = cols.gather::<f64>()?;
        out.scatter(&roll(&src, &shape, (h, w), stride, padding, dilation))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoolingType {
    Max,
    /// Mean over the full window, padding cells included.
    Avg,
    /// `(sum |x|^p)^(1/p)` over the window.
    Pnorm(u32),
}

/// 2-D pooling as im2col followed by a reduction over the kernel axes.
pub fn pooling2d(
    executor: &OpExecutor,
    image: &NDArray,
    cfg: &Im2ColConfig,
    pooling: PoolingType,
) -> Result<NDArray, Error> {
    let kernel_axes = [2, 3];
    match pooling {
        PoolingType::Max => {
            let cols = im2col(image, &cfg.with_pad_value(f64::NEG_INFINITY))?;
            executor.exec(&mut Operation::new("max", cols)?.along(&kernel_axes))
        }
        PoolingType::Avg => {
            let cols = im2col(image, &cfg.with_pad_value(0.0))?;
            executor.exec(&mut Operation::new("mean", cols)?.along(&kernel_axes))
        }
        PoolingType::Pnorm(p) => {
            if p == 0 {
                return Err(Error::InvalidOperation("pnorm needs p > 0".to_string()));
            }
            let p = p as f64;
            let cols = im2col(image, &cfg.with_pad_value(0.0))?;
            executor.exec(&mut Operation::new("abs", cols.clone())?.in_place())?;
            executor.exec(
                &mut Operation::new("pow", cols.clone())?
                    .with_extra_args(vec![p])
                    .in_place(),
            )?;
            let summed = executor.exec(&mut Operation::new("sum", cols)?.along(&kernel_axes))?;
            executor.exec(
                &mut Operation::new("pow", summed)?
                    .with_extra_args(vec![1.0 / p])
                    .in_place(),
            )
        }
    }
}

/// Convolution as im2col followed by one matrix product per example.
///
/// `input` is `[n, c, h, w]`, `weights` is `[out_c, c, kh, kw]`; the kernel
/// size of `cfg` is taken from `weights`. Returns `[n, out_c, out_h, out_w]`.
pub fn conv2d(
    executor: &OpExecutor,
    input: &NDArray,
    weights: &NDArray,
    cfg: &Im2ColConfig,
) -> Result<NDArray, Error> {
    let [n, c, _, _] = image_dims(input.shape())?;
    let [out_c, w_c, kh, kw] = image_dims(weights.shape())?;
    if c != w_c {
        return Err(Error::IncompatibleShapes {
            op: "conv2d".to_string(),
            shape_a: input.shape().to_vec(),
            shape_b: weights.shape().to_vec(),
        });
    }
    let cfg = Im2ColConfig {
        kernel: (kh, kw),
        ..*cfg
    };
    let cols = im2col(input, &cfg)?;
    let (oh, ow) = (cols.shape()[4], cols.shape()[5]);
    let k = c * kh * kw;
    let w2 = weights.reshape(&[out_c, k])?;
    let mut data = Vec::with_capacity(n * out_c * oh * ow);
    for b in 0..n {
        let patches = cols
            .tensor_along_dimension(b, &[1, 2, 3, 4, 5])?
            .reshape(&[k, oh * ow])?;
        let mut product = Operation::new("mmul", w2.clone())?.with_y(patches);
        data.extend(executor.exec(&mut product)?.to_vec_f64()?);
    }
    NDArray::from_vec(data, &[n, out_c, oh, ow], input.data_type())
}
