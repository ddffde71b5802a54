//! Small dense kernels over state fields.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

use crate::{Result, StateError};

/// Relative tolerance under which a pivot is considered zero.
const PIVOT_EPSILON: f64 = f64::EPSILON;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    ArrayView1::from(a).dot(&ArrayView1::from(b))
}

/// Computes `y += alpha * x`.
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.iter_mut().zip(x).for_each(|(y, &x)| *y += alpha * x);
}

/// Gives a view of a raw row-major slice as a matrix.
///
/// # Arguments
/// * `data` - A slice of exactly `dim.0 * dim.1` elements.
/// * `dim` - The amount of rows and columns.
pub fn matrix(data: &[f64], dim: (usize, usize)) -> Result<ArrayView2<'_, f64>> {
    ArrayView2::from_shape(dim, data).map_err(|_| StateError::LengthMismatch {
        what: "matrix",
        got: data.len(),
        expected: dim.0 * dim.1,
    })
}

/// Mutable counterpart of `matrix`.
pub fn matrix_mut(data: &mut [f64], dim: (usize, usize)) -> Result<ArrayViewMut2<'_, f64>> {
    let got = data.len();
    ArrayViewMut2::from_shape(dim, data).map_err(|_| StateError::LengthMismatch {
        what: "matrix",
        got,
        expected: dim.0 * dim.1,
    })
}

/// Computes `a += alpha * x x'` over a row-major square matrix.
pub fn rank_one_update(a: &mut [f64], alpha: f64, x: &[f64]) -> Result<()> {
    let n = x.len();
    let mut a = matrix_mut(a, (n, n))?;

    for (mut row, &xi) in a.axis_iter_mut(Axis(0)).zip(x) {
        let scale = alpha * xi;
        row.zip_mut_with(&ArrayView1::from(x), |a, &xj| *a += scale * xj);
    }

    Ok(())
}

/// Solves `a * x = b` by LU decomposition with partial pivoting.
///
/// # Arguments
/// * `a` - A row-major `n x n` matrix.
/// * `b` - The right hand side, of length `n`.
///
/// # Returns
/// The solution or `StateError::SingularHessian` naming the first pivot that
/// vanished relative to the scale of `a`.
pub fn solve(a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    let n = b.len();
    let mut lu: Array2<f64> = matrix(a, (n, n))?.to_owned();
    let mut x = Array1::from(b.to_vec());

    let scale = lu.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let threshold = PIVOT_EPSILON * n as f64 * scale;

    for k in 0..n {
        let (pivot, magnitude) = (k..n)
            .map(|i| (i, lu[[i, k]].abs()))
            .fold((k, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if magnitude <= threshold || magnitude.is_nan() {
            return Err(StateError::SingularHessian { pivot: k });
        }

        if pivot != k {
            for j in 0..n {
                lu.swap([k, j], [pivot, j]);
            }
            x.swap(k, pivot);
        }

        let diag = lu[[k, k]];
        for i in k + 1..n {
            let factor = lu[[i, k]] / diag;
            if factor == 0.0 {
                continue;
            }
            for j in k..n {
                lu[[i, j]] -= factor * lu[[k, j]];
            }
            x[i] -= factor * x[k];
        }
    }

    for k in (0..n).rev() {
        let tail: f64 = (k + 1..n).map(|j| lu[[k, j]] * x[j]).sum();
        x[k] = (x[k] - tail) / lu[[k, k]];
    }

    Ok(x.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_diagonal_system() {
        let x = solve(&[2.0, 0.0, 0.0, 2.0], &[-1.0, -1.0]).unwrap();
        assert_eq!(x, [-0.5, -0.5]);
    }

    #[test]
    fn solves_with_pivoting() {
        // [[0, 1], [1, 1]] x = [2, 3] => x = [1, 2]
        let x = solve(&[0.0, 1.0, 1.0, 1.0], &[2.0, 3.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        assert!(matches!(
            solve(&[1.0, 2.0, 2.0, 4.0], &[1.0, 1.0]),
            Err(StateError::SingularHessian { pivot: 1 })
        ));
        assert!(matches!(
            solve(&[0.0; 4], &[1.0, 1.0]),
            Err(StateError::SingularHessian { pivot: 0 })
        ));
    }

    #[test]
    fn rank_one_update_is_symmetric() {
        let mut a = [0.0; 4];
        rank_one_update(&mut a, 2.0, &[1.0, 3.0]).unwrap();
        assert_eq!(a, [2.0, 6.0, 6.0, 18.0]);
    }

    #[test]
    fn axpy_accumulates() {
        let mut y = [1.0, 1.0];
        axpy(-0.5, &[2.0, 4.0], &mut y);
        assert_eq!(y, [0.0, -1.0]);
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
