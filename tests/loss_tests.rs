use approx::assert_relative_eq;
use ndgrad::{DataType, Error, FMeasure, NDArray};

fn array(values: &[f64], shape: &[usize]) -> NDArray {
    NDArray::from_vec(values.to_vec(), shape, DataType::Double).unwrap()
}

fn numerical_gradient(loss: &FMeasure, labels: &NDArray, output: &[f64], mask: Option<&NDArray>) -> Result<Vec<f64>, Error> {
    let eps = 1e-6;
    let shape = labels.shape().to_vec();
    let mut grad = Vec::with_capacity(output.len());
    for i in 0..output.len() {
        let mut plus = output.to_vec();
        let mut minus = output.to_vec();
        plus[i] += eps;
        minus[i] -= eps;
        let hi = loss.score(labels, &array(&plus, &shape), mask)?;
        let lo = loss.score(labels, &array(&minus, &shape), mask)?;
        grad.push((hi - lo) / (2.0 * eps));
    }
    Ok(grad)
}

#[test]
fn test_single_column_score() -> Result<(), Error> {
    let labels = array(&[1.0, 0.0, 1.0, 0.0], &[4, 1]);
    let output = array(&[0.9, 0.2, 0.6, 0.3], &[4, 1]);
    // tp = 1.5, fp = 0.5, fn = 0.5
    assert_relative_eq!(FMeasure::default().score(&labels, &output, None)?, 0.25, epsilon = 1e-12);
    // beta = 2: num = 7.5, den = 7.5 + 2 + 0.5
    let f2 = FMeasure::new(2.0)?;
    assert_relative_eq!(f2.score(&labels, &output, None)?, 0.25, epsilon = 1e-12);
    let f_half = FMeasure::new(0.5)?;
    assert_relative_eq!(f_half.score(&labels, &output, None)?, 1.0 - 1.875 / 2.5, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_two_column_score_and_gradient() -> Result<(), Error> {
    let labels = array(&[0.0, 1.0, 1.0, 0.0], &[2, 2]);
    let output = array(&[0.2, 0.8, 0.7, 0.3], &[2, 2]);
    let loss = FMeasure::default();
    // tp = 0.8, fp = 0.3, fn = 0.2
    assert_relative_eq!(loss.score(&labels, &output, None)?, 1.0 - 1.6 / 2.1, epsilon = 1e-12);

    let g = loss.gradient(&labels, &output, None)?.to_vec_f64()?;
    assert_eq!(g[0], 0.0);
    assert_eq!(g[2], 0.0);
    let second = 1.6 / (2.1 * 2.1);
    assert_relative_eq!(g[1], -(2.0 / 2.1 - second), epsilon = 1e-12);
    assert_relative_eq!(g[3], second, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_gradient_matches_finite_differences() -> Result<(), Error> {
    let labels = array(&[1.0, 0.0, 1.0, 1.0, 0.0], &[5, 1]);
    let values = [0.7, 0.4, 0.2, 0.9, 0.1];
    let output = array(&values, &[5, 1]);
    let mask = array(&[1.0, 1.0, 0.0, 1.0, 1.0], &[5, 1]);
    for beta in [0.5, 1.0, 3.0] {
        let loss = FMeasure::new(beta)?;
        for mask in [None, Some(&mask)] {
            let analytic = loss.gradient(&labels, &output, mask)?.to_vec_f64()?;
            let numeric = numerical_gradient(&loss, &labels, &values, mask)?;
            for (a, n) in analytic.iter().zip(&numeric) {
                assert_relative_eq!(*a, *n, epsilon = 1e-6);
            }
        }
    }
    Ok(())
}

#[test]
fn test_masked_rows_carry_no_gradient() -> Result<(), Error> {
    let labels = array(&[1.0, 0.0, 1.0], &[3, 1]);
    let output = array(&[0.6, 0.5, 0.4], &[3, 1]);
    let mask = array(&[1.0, 0.0, 1.0], &[3]);
    let loss = FMeasure::default();
    let g = loss.gradient(&labels, &output, Some(&mask))?.to_vec_f64()?;
    assert_eq!(g[1], 0.0);

    let dropped = loss.score(&array(&[1.0, 1.0], &[2, 1]), &array(&[0.6, 0.4], &[2, 1]), None)?;
    assert_relative_eq!(loss.score(&labels, &output, Some(&mask))?, dropped, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_invalid_inputs() {
    assert!(matches!(FMeasure::new(0.0), Err(Error::InvalidOperation(_))));
    let loss = FMeasure::default();
    let three = array(&[1.0, 0.0, 0.0], &[1, 3]);
    assert!(matches!(loss.score(&three, &three, None), Err(Error::InvalidOperation(_))));
    let labels = array(&[1.0, 0.0], &[2, 1]);
    let output = array(&[0.5, 0.5], &[1, 2]);
    assert!(matches!(loss.score(&labels, &output, None), Err(Error::ShapeMismatch { .. })));
    let mask = array(&[1.0, 1.0, 1.0], &[3]);
    assert!(matches!(
        loss.gradient(&labels, &labels, Some(&mask)),
        Err(Error::ShapeMismatch { .. })
    ));
}
