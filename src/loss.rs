//! F-measure loss for binary classification.
//!
//! Scores a whole minibatch as `1 - F_beta`, where the counts of true
//! positives, false positives and false negatives are soft: each row
//! contributes its predicted probability rather than a hard decision.
//! Labels and outputs are `[n, 1]` (probability of the positive class) or
//! `[n, 2]` (column 0 negative, column 1 positive).

use crate::array::{DataType, NDArray};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FMeasure {
    beta: f64,
}

impl Default for FMeasure {
    fn default() -> Self {
        FMeasure { beta: 1.0 }
    }
}

/// Per-row view of the labels and outputs the score is built from.
struct Rows {
    n: usize,
    columns: usize,
    labels: Vec<f64>,
    output: Vec<f64>,
    mask: Vec<f64>,
}

impl Rows {
    fn new(labels: &NDArray, output: &NDArray, mask: Option<&NDArray>) -> Result<Self, Error> {
        let (n, columns) = match labels.shape() {
            &[n, c] if c == 1 || c == 2 => (n, c),
            other => {
                return Err(Error::InvalidOperation(format!(
                    "F-measure expects labels of shape [n, 1] or [n, 2], got {:?}",
                    other
                )))
            }
        };
        if output.shape() != labels.shape() {
            return Err(Error::ShapeMismatch {
                expected: labels.shape().to_vec(),
                actual: output.shape().to_vec(),
            });
        }
        let mask = match mask {
            Some(m) if m.length() != n => {
                return Err(Error::ShapeMismatch {
                    expected: vec![n, 1],
                    actual: m.shape().to_vec(),
                })
            }
            Some(m) => m.to_vec_f64()?,
            None => vec![1.0; n],
        };
        Ok(Rows {
            n,
            columns,
            labels: labels.to_vec_f64()?,
            output: output.to_vec_f64()?,
            mask,
        })
    }

    /// `(is_positive, is_negative, p_class0, p_class1)` for row `i`, masked.
    fn row(&self, i: usize) -> (f64, f64, f64, f64) {
        let m = self.mask[i];
        if self.columns == 1 {
            let y = self.labels[i];
            let p = self.output[i];
            let negative = if y == 0.0 { 1.0 } else { 0.0 };
            (y * m, negative * m, 1.0 - p, p)
        } else {
            let at = |v: &[f64], c: usize| v[i * 2 + c];
            (
                at(&self.labels, 1) * m,
                at(&self.labels, 0) * m,
                at(&self.output, 0),
                at(&self.output, 1),
            )
        }
    }
}

impl FMeasure {
    pub fn new(beta: f64) -> Result<Self, Error> {
        if !(beta > 0.0) {
            return Err(Error::InvalidOperation(format!(
                "beta must be > 0, got {}",
                beta
            )));
        }
        Ok(FMeasure { beta })
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn numerator_denominator(&self, rows: &Rows) -> (f64, f64) {
        let (mut tp, mut fp, mut fn_) = (0.0, 0.0, 0.0);
        for i in 0..rows.n {
            let (pos, neg, p0, p1) = rows.row(i);
            tp += pos * p1;
            fp += neg * p1;
            fn_ += pos * p0;
        }
        let b2 = self.beta * self.beta;
        let numerator = (1.0 + b2) * tp;
        (numerator, numerator + b2 * fn_ + fp)
    }

    /// `1 - F_beta` over the minibatch. A batch with no positives and no
    /// predicted positives scores `0`.
    pub fn score(&self, labels: &NDArray, output: &NDArray, mask: Option<&NDArray>) -> Result<f64, Error> {
        let rows = Rows::new(labels, output, mask)?;
        let (num, den) = self.numerator_denominator(&rows);
        if num == 0.0 && den == 0.0 {
            return Ok(0.0);
        }
        Ok(1.0 - num / den)
    }

    /// Gradient of [`FMeasure::score`] with respect to `output`, shaped like
    /// `output`. With two columns only column 1 carries gradient.
    pub fn gradient(&self, labels: &NDArray, output: &NDArray, mask: Option<&NDArray>) -> Result<NDArray, Error> {
        let rows = Rows::new(labels, output, mask)?;
        let (num, den) = self.numerator_denominator(&rows);
        let mut grad = vec![0.0; rows.n * rows.columns];
        if num != 0.0 || den != 0.0 {
            let scale = 1.0 + self.beta * self.beta;
            let second = num / (den * den);
            for i in 0..rows.n {
                let y = rows.labels[i * rows.columns + rows.columns - 1];
                grad[i * rows.columns + rows.columns - 1] = -(y * scale / den - second) * rows.mask[i];
            }
        }
        NDArray::from_vec(grad, labels.shape(), DataType::Double)
    }
}
