//! Transforms that need a whole sub-tensor at once rather than one element.

use crate::array::NDArray;
use crate::error::Error;
use num_complex::Complex64;

/// Writes the elements of `input` into `output` in reverse row-major order.
/// Works for every element type.
pub fn reverse(input: &NDArray, output: &NDArray, _args: &[f64]) -> Result<(), Error> {
    let mut values = input.gather::<Complex64>()?;
    values.reverse();
    output.scatter(&values)
}

fn real_values(op: &str, input: &NDArray) -> Result<Vec<f64>, Error> {
    if input.data_type().is_complex() {
        return Err(Error::unsupported(op, input.data_type()));
    }
    input.gather::<f64>()
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub fn softmax(input: &NDArray, output: &NDArray, _args: &[f64]) -> Result<(), Error> {
    let values = real_values("softmax", input)?;
    let max = max_of(&values);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    let out: Vec<f64> = exps.iter().map(|e| e / total).collect();
    output.scatter(&out)
}

pub fn log_softmax(input: &NDArray, output: &NDArray, _args: &[f64]) -> Result<(), Error> {
    let values = real_values("log_softmax", input)?;
    let max = max_of(&values);
    let log_total = values.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
    let out: Vec<f64> = values.iter().map(|v| v - max - log_total).collect();
    output.scatter(&out)
}
