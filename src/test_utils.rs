use crate::array::NDArray;
use crate::error::Error;
use crate::graph::{Graph, NodeKind, NodeRef};
use crate::util::unravel_index;

/// Checks the gradient graph of `loss` with respect to the variable `wrt`
/// against central finite differences.
///
/// # Arguments
/// * `graph`: the graph holding both nodes. Gradient nodes are added to it.
/// * `loss`: a node with exactly one element.
/// * `wrt`: a variable with a bound value. Its storage is perturbed during
///   the check and restored afterwards.
/// * `epsilon`: perturbation size (e.g. 1e-4 for double data).
/// * `tolerance`: largest accepted relative error (absolute error for values
///   near zero).
///
/// # Returns
/// * `Ok(())` if every component matches within `tolerance`.
/// * `Err(Error::GradientCheckError)` describing the worst component otherwise.
pub fn check_gradient(
    graph: &mut Graph,
    loss: NodeRef,
    wrt: NodeRef,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), Error> {
    let value = match graph.node(wrt)?.kind() {
        NodeKind::Variable { value: Some(v) } => v.clone(),
        _ => {
            return Err(Error::InvalidOperation(format!(
                "gradient check needs a bound variable, got {}",
                graph.node(wrt)?.name()
            )))
        }
    };
    if graph.shape(loss)?.iter().product::<usize>() != 1 {
        return Err(Error::InvalidOperation(format!(
            "loss must have a single element for gradient checking, got shape {:?}",
            graph.shape(loss)?
        )));
    }

    let grads = graph.differentiate(loss, &[wrt])?;
    let analytical = graph.exec(grads[0])?.to_vec_f64()?;
    let numerical = numerical_gradient(graph, loss, &value, epsilon)?;
    compare_gradients(&analytical, &numerical, tolerance)
}

fn scalar_loss(graph: &Graph, loss: NodeRef) -> Result<f64, Error> {
    graph
        .exec(loss)?
        .to_vec_f64()?
        .first()
        .copied()
        .ok_or_else(|| Error::InternalLogicError("loss evaluated to an empty array".to_string()))
}

/// Central difference `(f(x + e) - f(x - e)) / 2e` for every element of
/// `value`, which must be the storage of a variable feeding `loss`.
pub fn numerical_gradient(
    graph: &Graph,
    loss: NodeRef,
    value: &NDArray,
    epsilon: f64,
) -> Result<Vec<f64>, Error> {
    let original = value.to_vec_f64()?;
    let mut grad = Vec::with_capacity(original.len());
    for (i, &x) in original.iter().enumerate() {
        let index = unravel_index(i, value.shape());
        value.set(&index, x + epsilon)?;
        let plus = scalar_loss(graph, loss);
        value.set(&index, x - epsilon)?;
        let minus = scalar_loss(graph, loss);
        value.set(&index, x)?;
        grad.push((plus? - minus?) / (2.0 * epsilon));
    }
    Ok(grad)
}

fn compare_gradients(analytical: &[f64], numerical: &[f64], tolerance: f64) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;

    for (i, (a, n)) in analytical.iter().zip(numerical).enumerate() {
        let abs_err = (a - n).abs();
        let rel_err = if a.abs() > 1e-8 && n.abs() > 1e-8 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };
        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

pub fn assert_array_close(actual: &NDArray, expected: &[f64], tol: f64) {
    let data = actual.to_vec_f64().unwrap();
    assert_eq!(data.len(), expected.len(), "Array lengths don't match");
    for (i, (a, e)) in data.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < tol,
            "Values at index {i} aren't close enough: actual={a}, expected={e}, tol={tol}"
        );
    }
}
