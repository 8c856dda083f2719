//! Norm budgets, clipping and normalization of perturbation tensors.
//!
//! Every function here is pure: the input is borrowed and a new tensor is
//! returned. Axis 0 is always the batch axis and each sample is measured over
//! all remaining axes.
use crate::error::AttackError;
use crate::util::{batch_size, l2_norm, linf_norm, sign};
use crate::LmkFloat;
use ndarray::{Array, Array1, ArrayBase, Axis, Data, Dimension, RemoveAxis};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// Floor applied to norms before dividing by them.
pub const NORM_EPS: LmkFloat = 1e-8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum NormType {
    L2,
    LInf,
}

impl NormType {
    /// Maps a p-norm exponent onto a supported norm.
    ///
    /// # Errors
    /// Any exponent other than 2 or positive infinity.
    pub fn from_p(p: LmkFloat) -> Result<Self, AttackError> {
        if p == 2. {
            Ok(Self::L2)
        } else if p.is_infinite() && p.is_sign_positive() {
            Ok(Self::LInf)
        } else {
            Err(AttackError::UnsupportedNorm {
                norm: p.to_string(),
            })
        }
    }
}

impl FromStr for NormType {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "2" => Ok(Self::L2),
            "linf" | "l_inf" | "inf" | "infinity" => Ok(Self::LInf),
            _ => Err(AttackError::UnsupportedNorm {
                norm: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for NormType {
    type Error = AttackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NormType> for String {
    fn from(norm: NormType) -> Self {
        norm.to_string()
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::L2 => write!(f, "L2"),
            Self::LInf => write!(f, "Linf"),
        }
    }
}

/// Maximum perturbation magnitude, either shared by the whole batch or given
/// per sample. Both forms go through [`Budget::per_sample`] so clipping has a
/// single code path.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Budget {
    Scalar(LmkFloat),
    PerSample(Array1<LmkFloat>),
}

impl Budget {
    /// Broadcasts the budget to one value per sample.
    ///
    /// # Errors
    /// A per-sample budget whose length is not `batch`, or any negative or
    /// non-finite value.
    pub fn per_sample(&self, batch: usize) -> Result<Array1<LmkFloat>, AttackError> {
        let values = match self {
            Self::Scalar(b) => Array1::from_elem(batch, *b),
            Self::PerSample(b) => {
                if b.len() != batch {
                    return Err(AttackError::shape_mismatch("budget", &[batch], b.shape()));
                }
                b.clone()
            }
        };
        if let Some(&bad) = values.iter().find(|b| !b.is_finite() || **b < 0.) {
            return Err(AttackError::InvalidBudget { value: bad });
        }
        Ok(values)
    }
}

impl From<LmkFloat> for Budget {
    fn from(b: LmkFloat) -> Self {
        Self::Scalar(b)
    }
}

impl From<Array1<LmkFloat>> for Budget {
    fn from(b: Array1<LmkFloat>) -> Self {
        Self::PerSample(b)
    }
}

/// Norm of every sample along the batch axis.
///
/// # Errors
/// If `x` has no batch axis.
pub fn per_sample_norm<S, D>(
    x: &ArrayBase<S, D>,
    norm: NormType,
) -> Result<Array1<LmkFloat>, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    batch_size(x)?;
    Ok(x.outer_iter()
        .map(|sample| match norm {
            NormType::L2 => l2_norm(sample.iter()),
            NormType::LInf => linf_norm(sample.iter()),
        })
        .collect())
}

/// Projects every sample onto its norm ball.
///
/// L-infinity clamps each element to `[-b, b]`; L2 rescales samples whose
/// norm exceeds `b` by `b / norm` and leaves the rest untouched. An empty
/// batch comes back unchanged.
///
/// # Errors
/// Budget shape or value errors from [`Budget::per_sample`].
pub fn clip_norm<S, D>(
    noise: &ArrayBase<S, D>,
    norm: NormType,
    budget: &Budget,
) -> Result<Array<LmkFloat, D>, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    let batch = batch_size(noise)?;
    let mut out = noise.to_owned();
    if batch == 0 {
        return Ok(out);
    }
    let budget = budget.per_sample(batch)?;
    match norm {
        NormType::LInf => {
            out.axis_iter_mut(Axis(0))
                .zip(budget.iter())
                .for_each(|(mut sample, &b)| {
                    sample.mapv_inplace(|x| if x > b { b } else if x < -b { -b } else { x });
                });
        }
        NormType::L2 => {
            let norms = per_sample_norm(&out, NormType::L2)?;
            out.axis_iter_mut(Axis(0))
                .zip(norms.iter().zip(budget.iter()))
                .filter(|(_, (n, b))| **n > **b)
                .for_each(|(mut sample, (&n, &b))| {
                    let scale = b / n;
                    sample.mapv_inplace(|x| x * scale);
                });
        }
    }
    Ok(out)
}

/// Unit-norm ascent direction per sample: the sign under L-infinity, the
/// gradient divided by `max(norm, eps)` under L2.
///
/// # Errors
/// If `grad` has no batch axis.
pub fn normalize_grad<S, D>(
    grad: &ArrayBase<S, D>,
    norm: NormType,
    eps: LmkFloat,
) -> Result<Array<LmkFloat, D>, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    batch_size(grad)?;
    match norm {
        NormType::LInf => Ok(grad.mapv(sign)),
        NormType::L2 => {
            let norms = per_sample_norm(grad, NormType::L2)?;
            Ok(scale_samples(grad, norms.mapv(|n| 1. / n.max(eps))))
        }
    }
}

/// Rescales every sample to unit norm. Under L-infinity the divisor is
/// `max|x| + eps`, under L2 it is `max(norm, eps)`.
///
/// # Errors
/// If `noise` has no batch axis.
pub fn normalize_noise<S, D>(
    noise: &ArrayBase<S, D>,
    norm: NormType,
    eps: LmkFloat,
) -> Result<Array<LmkFloat, D>, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    let norms = per_sample_norm(noise, norm)?;
    let scales = match norm {
        NormType::LInf => norms.mapv(|n| 1. / (n + eps)),
        NormType::L2 => norms.mapv(|n| 1. / n.max(eps)),
    };
    Ok(scale_samples(noise, scales))
}

/// Whether every sample lies inside its budget, up to `tol`.
///
/// # Errors
/// Budget shape or value errors.
pub fn is_within_budget<S, D>(
    x: &ArrayBase<S, D>,
    norm: NormType,
    budget: &Budget,
    tol: LmkFloat,
) -> Result<bool, AttackError>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    let norms = per_sample_norm(x, norm)?;
    let budget = budget.per_sample(norms.len())?;
    Ok(norms.iter().zip(budget.iter()).all(|(&n, &b)| n <= b + tol))
}

pub(crate) fn scale_samples<S, D>(
    x: &ArrayBase<S, D>,
    scales: Array1<LmkFloat>,
) -> Array<LmkFloat, D>
where
    S: Data<Elem = LmkFloat>,
    D: Dimension + RemoveAxis,
{
    let mut out = x.to_owned();
    out.axis_iter_mut(Axis(0))
        .zip(scales.iter())
        .for_each(|(mut sample, &s)| sample.mapv_inplace(|v| v * s));
    out
}
