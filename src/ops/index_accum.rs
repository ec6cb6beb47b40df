//! Index reductions: the fold carries `(value, flat index)` pairs.
//!
//! Ties always resolve to the first-seen (lowest) flat index, both inside a
//! segment and when merging partial results. A NaN beats every number, so the
//! first NaN wins whenever one is present. An empty fold yields index `-1`.

use crate::array::DataType;
use crate::error::Error;
use half::f16;
use num_traits::Float;

#[derive(Clone, Copy)]
pub struct IndexFold<T> {
    pub zero: T,
    /// Maps an element to the key being compared (identity or absolute value).
    pub key: fn(T) -> T,
    /// Strict comparison: does `candidate` beat `current`?
    pub better: fn(T, T) -> bool,
}

impl<T: Float> IndexFold<T> {
    pub fn zero_pair(&self) -> (T, i64) {
        (self.zero, -1)
    }

    fn beats(&self, candidate: T, current: T) -> bool {
        if current.is_nan() {
            false
        } else {
            candidate.is_nan() || (self.better)(candidate, current)
        }
    }

    pub fn update(&self, acc: (T, i64), x: T, index: i64) -> (T, i64) {
        let key = (self.key)(x);
        if acc.1 < 0 || self.beats(key, acc.0) {
            (key, index)
        } else {
            acc
        }
    }

    pub fn combine(&self, a: (T, i64), b: (T, i64)) -> (T, i64) {
        if a.1 < 0 {
            return b;
        }
        if b.1 < 0 {
            return a;
        }
        if self.beats(b.0, a.0) {
            b
        } else if self.beats(a.0, b.0) || a.1 <= b.1 {
            a
        } else {
            b
        }
    }

    /// Segmented fold over `xs`; indices are positions in `xs`.
    pub(crate) fn fold_segmented(&self, xs: &[T], block: usize) -> (T, i64) {
        let block = block.max(1);
        let mut total = self.zero_pair();
        for (segment, chunk) in xs.chunks(block).enumerate() {
            let base = (segment * block) as i64;
            let mut acc = self.zero_pair();
            for (i, &x) in chunk.iter().enumerate() {
                acc = self.update(acc, x, base + i as i64);
            }
            total = self.combine(total, acc);
        }
        total
    }
}

#[derive(Clone, Copy)]
pub struct IndexMath {
    pub float: IndexFold<f32>,
    pub double: IndexFold<f64>,
    pub half_zero: f16,
}

impl IndexMath {
    pub fn combine(
        &self,
        op: &str,
        dtype: DataType,
        a: (f64, i64),
        b: (f64, i64),
    ) -> Result<(f64, i64), Error> {
        match dtype {
            DataType::Half | DataType::Float => {
                let (v, i) = self
                    .float
                    .combine((a.0 as f32, a.1), (b.0 as f32, b.1));
                Ok((v as f64, i))
            }
            DataType::Double => Ok(self.double.combine(a, b)),
            DataType::Complex => Err(Error::unsupported(op, dtype)),
        }
    }
}

fn same<T: Float>(x: T) -> T {
    x
}

fn magnitude<T: Float>(x: T) -> T {
    x.abs()
}

fn greater<T: Float>(a: T, b: T) -> bool {
    a > b
}

fn less<T: Float>(a: T, b: T) -> bool {
    a < b
}

macro_rules! index_math {
    ($zero:expr, $key:ident, $better:ident) => {
        IndexMath {
            float: IndexFold {
                zero: $zero as f32,
                key: $key::<f32>,
                better: $better::<f32>,
            },
            double: IndexFold {
                zero: $zero,
                key: $key::<f64>,
                better: $better::<f64>,
            },
            half_zero: f16::from_f64($zero),
        }
    };
}

/// Index of the maximum.
pub fn imax() -> IndexMath {
    index_math!(f64::NEG_INFINITY, same, greater)
}

/// Index of the minimum.
pub fn imin() -> IndexMath {
    index_math!(f64::INFINITY, same, less)
}

/// Index of the largest absolute value.
pub fn iamax() -> IndexMath {
    index_math!(0.0, magnitude, greater)
}

/// Index of the smallest absolute value.
pub fn iamin() -> IndexMath {
    index_math!(f64::INFINITY, magnitude, less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_index_wins_ties() {
        let m = imax();
        let xs = [1.0f64, 5.0, 3.0, 5.0];
        assert_eq!(m.double.fold_segmented(&xs, 1), (5.0, 1));
        assert_eq!(m.double.fold_segmented(&xs, 3), (5.0, 1));
        assert_eq!(m.double.combine((5.0, 3), (5.0, 1)), (5.0, 1));
    }

    #[test]
    fn test_first_nan_wins() {
        let xs = [1.0f64, 9.0, f64::NAN, 4.0, f64::NAN];
        for block in [1, 2, 4, 16] {
            assert_eq!(imax().double.fold_segmented(&xs, block).1, 2);
            assert_eq!(imin().double.fold_segmented(&xs, block).1, 2);
            assert_eq!(iamin().double.fold_segmented(&xs, block).1, 2);
        }
        let (v, i) = imax().double.combine((f64::NAN, 4), (f64::NAN, 2));
        assert!(v.is_nan());
        assert_eq!(i, 2);
    }

    #[test]
    fn test_empty_fold_has_no_index() {
        assert_eq!(imin().double.fold_segmented(&[], 8).1, -1);
    }
}
