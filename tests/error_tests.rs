use ndgrad::{DataType, Error, Graph, NDArray, OpExecutor, Operation, PendingFunction};
use num_complex::Complex64;

fn matrix() -> NDArray {
    NDArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], DataType::Double).unwrap()
}

#[test]
fn test_wrong_data_length() {
    let err = NDArray::from_vec(vec![1.0, 2.0, 3.0], &[2, 2], DataType::Double).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_output_shape_mismatch() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let z = NDArray::zeros(&[3, 2], DataType::Double);
    let err = executor
        .exec(&mut Operation::new("exp", matrix())?.with_z(z))
        .unwrap_err();
    assert_eq!(
        err,
        Error::ShapeMismatch {
            expected: vec![2, 3],
            actual: vec![3, 2]
        }
    );
    Ok(())
}

#[test]
fn test_operands_that_do_not_broadcast() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let y = NDArray::ones(&[4], DataType::Double);
    let err = executor
        .exec(&mut Operation::new("add", matrix())?.with_y(y))
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleShapes { .. }));
    Ok(())
}

#[test]
fn test_pairwise_reduction_shape_mismatch() -> Result<(), Error> {
    let executor = OpExecutor::default();
    // y may broadcast onto x, but not the other way round.
    let y = NDArray::ones(&[4, 2, 3], DataType::Double);
    let err = executor
        .exec(&mut Operation::new("dot", matrix())?.with_y(y))
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    Ok(())
}

#[test]
fn test_invalid_dimension() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let err = executor
        .exec(&mut Operation::new("sum", matrix())?.along(&[2]))
        .unwrap_err();
    assert_eq!(err, Error::InvalidDimension { dimension: 2, rank: 2 });
    Ok(())
}

#[test]
fn test_unknown_op() {
    assert_eq!(
        Operation::new("no_such_op", matrix()).unwrap_err(),
        Error::UnknownOp("no_such_op".to_string())
    );
}

#[test]
fn test_complex_data_without_complex_math() -> Result<(), Error> {
    let executor = OpExecutor::default();
    let x = NDArray::from_complex(vec![Complex64::new(1.0, 1.0); 3], &[3])?;
    for name in ["relu", "acosh", "floor"] {
        let err = executor.exec(&mut Operation::new(name, x.clone())?).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedOperation {
                op: name.to_string(),
                dtype: DataType::Complex
            }
        );
    }
    assert!(matches!(
        executor.exec(&mut Operation::new("imax", x)?),
        Err(Error::UnsupportedOperation { .. })
    ));
    Ok(())
}

#[test]
fn test_view_after_release() -> Result<(), Error> {
    let owner = matrix();
    let view = owner.transpose()?;
    assert!(view.is_view());
    assert!(view.is_alive());
    owner.release();
    assert!(!view.is_alive());
    assert_eq!(view.to_vec_f64().unwrap_err(), Error::UseAfterFree);

    let executor = OpExecutor::default();
    assert_eq!(
        executor
            .exec(&mut Operation::new("exp", view)?)
            .unwrap_err(),
        Error::UseAfterFree
    );
    Ok(())
}

#[test]
fn test_view_survives_while_a_clone_owns_storage() -> Result<(), Error> {
    let owner = matrix();
    let other_owner = owner.clone();
    let view = owner.view()?;
    owner.release();
    assert!(view.is_alive());
    assert_eq!(view.to_vec_f64()?, other_owner.to_vec_f64()?);
    Ok(())
}

#[test]
fn test_non_differentiable_ops() -> Result<(), Error> {
    let mut g = Graph::new();
    let x = g.var("x", matrix())?;
    let r = g.transform("reverse", x)?;
    let loss = g.sum(r, &[])?;
    assert!(matches!(
        g.differentiate(loss, &[x]),
        Err(Error::DifferentiationError(_))
    ));

    let mut g = Graph::new();
    let x = g.var("x", matrix())?;
    let i = g.bind(PendingFunction::new("imax", &[x])?)?;
    assert!(g.shape(i)?.is_empty());
    assert!(matches!(
        g.differentiate(i, &[x]),
        Err(Error::DifferentiationError(_))
    ));
    let seed = g.ones_like(i)?;
    assert!(matches!(g.do_diff(i, seed), Err(Error::DifferentiationError(_))));
    Ok(())
}

#[test]
fn test_leaf_has_no_derivative() -> Result<(), Error> {
    let mut g = Graph::new();
    let x = g.var("x", matrix())?;
    let seed = g.ones_like(x)?;
    assert!(matches!(g.do_diff(x, seed), Err(Error::DifferentiationError(_))));
    Ok(())
}

#[test]
fn test_nodes_from_another_graph() -> Result<(), Error> {
    let mut first = Graph::new();
    let mut second = Graph::new();
    let a = first.var("a", matrix())?;
    let b = second.var("b", matrix())?;
    assert_ne!(a.graph_id(), b.graph_id());
    let err = second.add(a, b).unwrap_err();
    assert_eq!(
        err,
        Error::GraphMismatch {
            expected: second.id(),
            actual: first.id()
        }
    );
    assert!(matches!(second.exec(a), Err(Error::GraphMismatch { .. })));
    Ok(())
}

#[test]
fn test_unbound_placeholder() -> Result<(), Error> {
    let mut g = Graph::new();
    let x = g.register_variable("input", &[2, 3])?;
    let e = g.exp(x)?;
    assert_eq!(g.exec(e).unwrap_err(), Error::UnboundPlaceholder("input".to_string()));

    g.bind_array("input", matrix())?;
    assert_eq!(g.exec(e)?.shape(), &[2, 3]);
    Ok(())
}

#[test]
fn test_binding_checks_shape_and_name() -> Result<(), Error> {
    let mut g = Graph::new();
    g.register_variable("input", &[2, 3])?;
    assert!(matches!(
        g.bind_array("input", NDArray::zeros(&[3, 2], DataType::Double)),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(matches!(
        g.bind_array("missing", matrix()),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn test_duplicate_variable() -> Result<(), Error> {
    let mut g = Graph::new();
    g.var("w", matrix())?;
    assert_eq!(
        g.register_variable("w", &[1]).unwrap_err(),
        Error::DuplicateVariable("w".to_string())
    );
    Ok(())
}

#[test]
fn test_graph_shape_inference_errors() -> Result<(), Error> {
    let mut g = Graph::new();
    let a = g.var("a", matrix())?;
    let b = g.var("b", NDArray::ones(&[4], DataType::Double))?;
    assert!(matches!(g.add(a, b), Err(Error::IncompatibleShapes { .. })));
    assert!(matches!(g.mmul(a, a), Err(Error::IncompatibleShapes { .. })));
    assert!(matches!(g.sum(a, &[3]), Err(Error::InvalidDimension { .. })));
    assert!(matches!(
        g.bind(PendingFunction::new("add", &[a])?),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        g.bind(PendingFunction::new("mul_scalar", &[a])?),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}
