use approx::assert_relative_eq;
use ndgrad::{DataType, Error, ExecutionContext, NDArray, OpExecutor, Operation, Value};

fn sample() -> NDArray {
    NDArray::from_vec(
        vec![3.0, -1.0, 4.0, 1.0, -5.0, 9.0, 2.0, -6.0, 5.0, 3.0, -5.0, 8.0],
        &[3, 4],
        DataType::Double,
    )
    .unwrap()
}

fn full(name: &str, x: &NDArray, block: usize) -> Result<f64, Error> {
    let executor = OpExecutor::new(ExecutionContext::new(DataType::Double).with_reduction_block(block));
    Ok(executor.exec_reduce(&mut Operation::new(name, x.clone())?)?.re())
}

#[test]
fn test_full_reductions() -> Result<(), Error> {
    let x = sample();
    assert_relative_eq!(full("sum", &x, 1024)?, 18.0);
    assert_relative_eq!(full("mean", &x, 1024)?, 1.5);
    assert_relative_eq!(full("max", &x, 1024)?, 9.0);
    assert_relative_eq!(full("min", &x, 1024)?, -6.0);
    assert_relative_eq!(full("norm1", &x, 1024)?, 52.0);
    assert_relative_eq!(full("normmax", &x, 1024)?, 9.0);
    let squares: f64 = x.to_vec_f64()?.iter().map(|v| v * v).sum();
    assert_relative_eq!(full("norm2", &x, 1024)?, squares.sqrt(), epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_segmented_reduction_matches_single_pass() -> Result<(), Error> {
    let x = NDArray::random_uniform(&[7, 13], 0.5, 1.5, DataType::Double)?;
    for name in ["sum", "mean", "prod", "max", "min", "norm1", "norm2", "normmax"] {
        let whole = full(name, &x, 4096)?;
        for block in [1, 3, 8, 90] {
            assert_relative_eq!(full(name, &x, block)?, whole, max_relative = 1e-12);
        }
    }
    Ok(())
}

#[test]
fn test_final_result_is_recorded() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let mut op = Operation::new("sum", sample())?;
    assert!(op.final_result().is_none());
    let z = executor.exec(&mut op)?;
    assert!(z.shape().is_empty());
    assert_eq!(op.final_result(), Some(Value::Real(18.0)));
    assert_eq!(z.to_vec_f64()?, vec![18.0]);
    Ok(())
}

#[test]
fn test_reduction_along_dimensions() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let rows = executor.exec(&mut Operation::new("sum", sample())?.along(&[1]))?;
    assert_eq!(rows.shape(), &[3]);
    assert_eq!(rows.to_vec_f64()?, vec![7.0, 0.0, 11.0]);

    let cols = executor.exec(&mut Operation::new("max", sample())?.along(&[0]))?;
    assert_eq!(cols.shape(), &[4]);
    assert_eq!(cols.to_vec_f64()?, vec![5.0, 9.0, 4.0, 8.0]);

    // Dimension reductions do not record a final result.
    let mut op = Operation::new("mean", sample())?.along(&[1]);
    executor.exec(&mut op)?;
    assert!(op.final_result().is_none());

    let all = executor.exec(&mut Operation::new("sum", sample())?.along(&[1, 0]))?;
    assert!(all.shape().is_empty());
    assert_eq!(all.to_vec_f64()?, vec![18.0]);
    Ok(())
}

#[test]
fn test_reduction_of_a_transposed_view() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let t = sample().transpose()?;
    let sums = executor.exec(&mut Operation::new("sum", t)?.along(&[0]))?;
    assert_eq!(sums.to_vec_f64()?, vec![7.0, 0.0, 11.0]);
    Ok(())
}

#[test]
fn test_pairwise_reductions() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let a = NDArray::from_vec(vec![1.0, 2.0, 3.0], &[3], DataType::Double)?;
    let b = NDArray::from_vec(vec![4.0, 6.0, 3.0], &[3], DataType::Double)?;
    let reduce = |name: &str| -> Result<f64, Error> {
        Ok(executor
            .exec_reduce(&mut Operation::new(name, a.clone())?.with_y(b.clone()))?
            .re())
    };
    assert_eq!(reduce("dot")?, 25.0);
    assert_eq!(reduce("euclidean")?, 5.0);
    assert_eq!(reduce("manhattan")?, 7.0);

    let m = NDArray::from_vec(vec![1.0, 0.0, 0.0, 1.0], &[2, 2], DataType::Double)?;
    let row = NDArray::from_vec(vec![2.0, 3.0], &[2], DataType::Double)?;
    let per_row = executor.exec(&mut Operation::new("dot", m)?.with_y(row).along(&[1]))?;
    assert_eq!(per_row.to_vec_f64()?, vec![2.0, 3.0]);
    Ok(())
}

#[test]
fn test_combine_sub_results() -> Result<(), Error> {
    let x = sample();
    let data = x.to_vec_f64()?;
    let executor = OpExecutor::new(ExecutionContext::new(DataType::Double).with_reduction_block(4096));
    for name in ["sum", "prod", "max", "min", "norm1", "normmax"] {
        let op = Operation::new(name, x.clone())?;
        let (left, right) = data.split_at(5);
        let part = |xs: &[f64]| -> Result<Value, Error> {
            let arr = NDArray::from_vec(xs.to_vec(), &[xs.len()], DataType::Double)?;
            executor.exec_reduce(&mut Operation::new(name, arr)?)
        };
        let combined = op.combine_sub_results(part(left)?, part(right)?)?;
        assert_relative_eq!(combined.re(), full(name, &x, 4096)?, max_relative = 1e-12);

        // The zero element is neutral.
        let zero = op.zero_value()?;
        let whole = part(&data)?;
        assert_relative_eq!(op.combine_sub_results(zero, whole)?.re(), whole.re());
    }
    Ok(())
}

#[test]
fn test_combine_is_associative() -> Result<(), Error> {
    let op = Operation::new("prod", sample())?;
    let (a, b, c) = (Value::Real(2.0), Value::Real(-3.0), Value::Real(0.5));
    let left = op.combine_sub_results(op.combine_sub_results(a, b)?, c)?;
    let right = op.combine_sub_results(a, op.combine_sub_results(b, c)?)?;
    assert_eq!(left, right);

    let op = Operation::new("norm2", sample())?;
    // norm2 partials are sums of squares; they add.
    assert_eq!(op.combine_sub_results(Value::Real(9.0), Value::Real(16.0))?, Value::Real(25.0));
    Ok(())
}

#[test]
fn test_zero_values() -> Result<(), Error> {
    assert_eq!(Operation::new("sum", sample())?.zero_value()?, Value::Real(0.0));
    assert_eq!(Operation::new("prod", sample())?.zero_value()?, Value::Real(1.0));
    assert_eq!(
        Operation::new("max", sample())?.zero_value()?,
        Value::Real(f64::NEG_INFINITY)
    );
    assert!(matches!(
        Operation::new("exp", sample())?.zero_value(),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn test_index_reductions() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let x = NDArray::from_vec(vec![1.0, -7.0, 7.0, 3.0, 7.0, 0.5], &[2, 3], DataType::Double)?;
    let index = |name: &str| -> Result<i64, Error> {
        executor.exec_index(&mut Operation::new(name, x.clone())?)
    };
    assert_eq!(index("imax")?, 2);
    assert_eq!(index("imin")?, 1);
    assert_eq!(index("iamax")?, 1);
    assert_eq!(index("iamin")?, 5);

    let mut op = Operation::new("imax", x.clone())?.along(&[1]);
    let per_row = executor.exec(&mut op)?;
    assert_eq!(per_row.data_type(), DataType::Double);
    assert_eq!(per_row.to_vec_f64()?, vec![2.0, 1.0]);
    assert!(op.final_index().is_none());
    Ok(())
}

#[test]
fn test_index_ties_resolve_to_first() -> Result<(), Error> {
    let x = NDArray::from_vec(vec![2.0, 9.0, 9.0, 1.0, 9.0], &[5], DataType::Double)?;
    for block in [1, 2, 5] {
        let executor =
            OpExecutor::new(ExecutionContext::new(DataType::Double).with_reduction_block(block));
        assert_eq!(executor.exec_index(&mut Operation::new("imax", x.clone())?)?, 1);
    }
    let op = Operation::new("imax", x)?;
    assert_eq!(op.combine_index_results((9.0, 4), (9.0, 1))?, (9.0, 1));
    assert_eq!(op.combine_index_results((9.0, 4), (10.0, 7))?, (10.0, 7));
    assert_eq!(op.combine_index_results((f64::NEG_INFINITY, -1), (3.0, 2))?, (3.0, 2));
    Ok(())
}

#[test]
fn test_float_reduction() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let x = NDArray::from_f32(vec![0.5, 1.5, 2.0], &[3])?;
    let sum = executor.exec_reduce(&mut Operation::new("sum", x)?)?;
    assert_relative_eq!(sum.re(), 4.0);
    Ok(())
}

#[test]
fn test_complex_sum_and_unsupported_max() -> Result<(), Error> {
    use num_complex::Complex64;
    let executor = OpExecutor::default();
    let x = NDArray::from_complex(vec![Complex64::new(1.0, 2.0), Complex64::new(-3.0, 0.5)], &[2])?;
    let sum = executor.exec_reduce(&mut Operation::new("sum", x.clone())?)?;
    assert_eq!(sum, Value::Complex(Complex64::new(-2.0, 2.5)));
    assert!(matches!(
        executor.exec(&mut Operation::new("max", x)?),
        Err(Error::UnsupportedOperation { .. })
    ));
    Ok(())
}

#[test]
fn test_exec_reduce_rejects_non_reductions() -> Result<(), Error> {
    let executor = OpExecutor::default();
    assert!(matches!(
        executor.exec_reduce(&mut Operation::new("sum", sample())?.along(&[0])),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        executor.exec_index(&mut Operation::new("max", sample())?),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn test_extremes_propagate_nan() -> Result<(), Error> {
    let x = NDArray::from_vec(vec![1.0, f64::NAN, 3.0, -4.0], &[4], DataType::Double)?;
    for name in ["max", "min", "normmax"] {
        for block in [1, 2, 3, 1024] {
            assert!(full(name, &x, block)?.is_nan(), "{} with block {}", name, block);
        }
    }
    // The NaN sits in the second row only.
    let rows = NDArray::from_vec(vec![1.0, 2.0, f64::NAN, 0.0], &[2, 2], DataType::Double)?;
    let per_row = OpExecutor::default().exec(&mut Operation::new("max", rows)?.along(&[1]))?;
    let values = per_row.to_vec_f64()?;
    assert_eq!(values[0], 2.0);
    assert!(values[1].is_nan());
    Ok(())
}

#[test]
fn test_extremes_with_infinities() -> Result<(), Error> {
    let x = NDArray::from_vec(vec![1.0, f64::INFINITY, -2.0, f64::NEG_INFINITY], &[4], DataType::Double)?;
    assert_eq!(full("max", &x, 1024)?, f64::INFINITY);
    assert_eq!(full("min", &x, 2)?, f64::NEG_INFINITY);
    assert_eq!(full("normmax", &x, 1)?, f64::INFINITY);
    let executor = OpExecutor::default();
    assert_eq!(executor.exec_index(&mut Operation::new("imax", x.clone())?)?, 1);
    assert_eq!(executor.exec_index(&mut Operation::new("imin", x.clone())?)?, 3);
    assert_eq!(executor.exec_index(&mut Operation::new("iamax", x)?)?, 1);
    Ok(())
}

#[test]
fn test_index_reductions_pick_first_nan() -> Result<(), Error> {
    let x = NDArray::from_vec(vec![5.0, -1.0, f64::NAN, 8.0, f64::NAN], &[5], DataType::Double)?;
    for block in [1, 2, 3, 64] {
        let executor =
            OpExecutor::new(ExecutionContext::new(DataType::Double).with_reduction_block(block));
        for name in ["imax", "imin", "iamax", "iamin"] {
            assert_eq!(executor.exec_index(&mut Operation::new(name, x.clone())?)?, 2, "{}", name);
        }
    }
    let op = Operation::new("imax", x)?;
    let (value, index) = op.combine_index_results((f64::NAN, 4), (f64::NAN, 2))?;
    assert!(value.is_nan());
    assert_eq!(index, 2);
    assert_eq!(op.combine_index_results((9.0, 0), (f64::NAN, 3))?.1, 3);
    Ok(())
}

#[test]
fn test_elementwise_extremes_propagate_nan() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let a = NDArray::from_vec(vec![1.0, f64::NAN, 3.0], &[3], DataType::Double)?;
    let b = NDArray::from_vec(vec![2.0, 0.0, f64::NAN], &[3], DataType::Double)?;
    for name in ["maximum", "minimum"] {
        let z = executor.exec(&mut Operation::new(name, a.clone())?.with_y(b.clone()))?.to_vec_f64()?;
        assert!(!z[0].is_nan());
        assert!(z[1].is_nan() && z[2].is_nan(), "{}", name);
    }
    Ok(())
}

#[test]
fn test_hamming_is_a_fraction() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let a = NDArray::from_vec(vec![1.0, 0.0, 1.0, 1.0], &[4], DataType::Double)?;
    let b = NDArray::from_vec(vec![1.0, 1.0, 0.0, 1.0], &[4], DataType::Double)?;
    let mut op = Operation::new("hamming", a)?.with_y(b);
    assert_relative_eq!(executor.exec_reduce(&mut op)?.re(), 0.5);
    Ok(())
}
