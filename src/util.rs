//! Utility functions
use crate::error::AttackError;
use crate::LmkFloat;
use ndarray::{Array, ArrayBase, Axis, Data, Dimension, Zip};
use num::{Float, Zero};

pub fn l2_norm<'a, I>(x: I) -> LmkFloat
where
    I: IntoIterator<Item = &'a LmkFloat>,
{
    x.into_iter().map(|v| v * v).sum::<LmkFloat>().sqrt()
}

pub fn linf_norm<'a, I>(x: I) -> LmkFloat
where
    I: IntoIterator<Item = &'a LmkFloat>,
{
    x.into_iter()
        .fold(LmkFloat::zero(), |acc, v| Float::max(acc, v.abs()))
}

/// Sign with `sign(0) == 0`, unlike `f64::signum`.
pub fn sign(x: LmkFloat) -> LmkFloat {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

pub fn sigmoid(x: LmkFloat) -> LmkFloat {
    1. / (1. + (-x).exp())
}

/// Size of the leading (batch) axis.
///
/// # Errors
/// If the tensor has no axes at all.
pub fn batch_size<S, D>(x: &ArrayBase<S, D>) -> Result<usize, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension,
{
    if x.ndim() == 0 {
        return Err(AttackError::shape_mismatch("batched tensor", &[0], x.shape()));
    }
    Ok(x.len_of(Axis(0)))
}

/// # Errors
pub fn ensure_same_shape(
    what: &'static str,
    expected: &[usize],
    given: &[usize],
) -> Result<(), AttackError> {
    if expected == given {
        Ok(())
    } else {
        Err(AttackError::shape_mismatch(what, expected, given))
    }
}

/// `clamp(base + delta)` without an intermediate allocation.
pub fn add_and_clamp<S, T, D>(
    base: &ArrayBase<S, D>,
    delta: &ArrayBase<T, D>,
    min: LmkFloat,
    max: LmkFloat,
) -> Array<LmkFloat, D>
where
    S: Data<Elem = LmkFloat>,
    T: Data<Elem = LmkFloat>,
    D: Dimension,
{
    Zip::from(base).and(delta).map_collect(|&b, &d| {
        let v = b + d;
        if v < min {
            min
        } else if v > max {
            max
        } else {
            v
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array3};

    #[test]
    fn test_norms() {
        let x = arr1(&[3., -4.]);
        assert_abs_diff_eq!(l2_norm(x.iter()), 5.);
        assert_abs_diff_eq!(linf_norm(x.iter()), 4.);
        assert_abs_diff_eq!(l2_norm(arr1::<f64>(&[]).iter()), 0.);
    }

    #[test]
    fn test_sign_of_zero() {
        assert_eq!(sign(0.), 0.);
        assert_eq!(sign(-0.), 0.);
        assert_eq!(sign(-2.5), -1.);
        assert_eq!(sign(1e-300), 1.);
    }

    #[test]
    fn test_batch_size_rejects_scalars() {
        let scalar = ndarray::arr0(1.);
        assert!(batch_size(&scalar).is_err());
        assert_eq!(batch_size(&Array3::<f64>::zeros((4, 1, 1))).unwrap(), 4);
    }

    #[test]
    fn test_add_and_clamp() {
        let base = arr1(&[0.5, -0.5, 0.]);
        let delta = arr1(&[1., -1., 0.25]);
        assert_eq!(add_and_clamp(&base, &delta, -1., 1.), arr1(&[1., -1., 0.25]));
    }
}
