use crate::error::Error;

/// Compute the broadcasted shape for two shapes, following numpy broadcasting rules.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, Error> {
    let ndim = std::cmp::max(a.len(), b.len());
    let mut result = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let a_dim = if i >= ndim - a.len() {
            a[i - (ndim - a.len())]
        } else {
            1
        };
        let b_dim = if i >= ndim - b.len() {
            b[i - (ndim - b.len())]
        } else {
            1
        };
        if a_dim == b_dim || a_dim == 1 || b_dim == 1 {
            result.push(if a_dim == 1 { b_dim } else { a_dim });
        } else {
            return Err(Error::IncompatibleShapes {
                op: "broadcast".to_string(),
                shape_a: a.to_vec(),
                shape_b: b.to_vec(),
            });
        }
    }
    Ok(result)
}

/// Row-major strides for `shape`.
pub fn c_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1);
    }
    strides
}

/// Column-major strides for `shape`.
pub fn f_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in 1..shape.len() {
        strides[i] = strides[i - 1] * shape[i - 1].max(1);
    }
    strides
}

/// Converts a row-major flat index into a multi-index over `shape`.
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &dim) in index.iter_mut().zip(shape.iter()).rev() {
        if dim == 0 {
            continue;
        }
        *slot = flat % dim;
        flat /= dim;
    }
    index
}

/// Checks that `dims` are distinct axes of an array of rank `rank` and returns them sorted.
pub fn validate_dimensions(dims: &[usize], rank: usize) -> Result<Vec<usize>, Error> {
    let mut sorted = dims.to_vec();
    sorted.sort_unstable();
    for (i, &d) in sorted.iter().enumerate() {
        if d >= rank || (i > 0 && sorted[i - 1] == d) {
            return Err(Error::InvalidDimension { dimension: d, rank });
        }
    }
    Ok(sorted)
}

/// Axes of a rank-`rank` array that are not in `dims`, in ascending order.
pub fn complement_dimensions(dims: &[usize], rank: usize) -> Vec<usize> {
    (0..rank).filter(|d| !dims.contains(d)).collect()
}

/// Shape left after reducing `shape` along `dims`. An empty `dims` reduces everything.
pub fn reduced_shape(shape: &[usize], dims: &[usize]) -> Vec<usize> {
    if dims.is_empty() {
        return Vec::new();
    }
    shape
        .iter()
        .enumerate()
        .filter(|(i, _)| !dims.contains(i))
        .map(|(_, &d)| d)
        .collect()
}

/// `shape` with a 1 inserted at every axis in `dims` (the inverse of [`reduced_shape`]).
pub fn expanded_shape(reduced: &[usize], dims: &[usize]) -> Vec<usize> {
    let rank = reduced.len() + dims.len();
    let mut out = Vec::with_capacity(rank);
    let mut it = reduced.iter();
    for axis in 0..rank {
        if dims.contains(&axis) {
            out.push(1);
        } else {
            out.push(it.next().copied().unwrap_or(1));
        }
    }
    out
}

/// Converts signed integer arguments into a shape.
pub fn shape_from_ints(ints: &[i64]) -> Result<Vec<usize>, Error> {
    ints.iter()
        .map(|&v| {
            usize::try_from(v)
                .map_err(|_| Error::InvalidOperation(format!("negative dimension size {}", v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(broadcast_shapes(&[4, 1, 5], &[3, 1]).unwrap(), vec![4, 3, 5]);
        assert!(broadcast_shapes(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn test_strides() {
        assert_eq!(c_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(f_strides(&[2, 3, 4]), vec![1, 2, 6]);
    }

    #[test]
    fn test_unravel_and_reduce() {
        assert_eq!(unravel_index(5, &[2, 3]), vec![1, 2]);
        assert_eq!(reduced_shape(&[2, 3, 4], &[1]), vec![2, 4]);
        assert_eq!(expanded_shape(&[2, 4], &[1]), vec![2, 1, 4]);
        assert!(validate_dimensions(&[0, 0], 2).is_err());
        assert!(validate_dimensions(&[2], 2).is_err());
    }
}
