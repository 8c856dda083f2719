//! Random starting points for the attack.
use crate::error::AttackError;
use crate::norm::{clip_norm, scale_samples, Budget, NormType};
use crate::util::batch_size;
use crate::LmkFloat;
use ndarray::{Array, Dimension, RemoveAxis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Draws a perturbation of shape `dim`, uniform on `[-1, 1]` per element and
/// scaled per sample by `init_budget` (the attack budget when `None`).
///
/// The result is clipped to the init budget first and to the attack budget
/// second, so it satisfies both even when the init budget is the larger one.
///
/// # Errors
/// Budget shape or value errors.
pub fn random_noise<D, R>(
    dim: D,
    norm: NormType,
    noise_budget: &Budget,
    init_budget: Option<&Budget>,
    rng: &mut R,
) -> Result<Array<LmkFloat, D>, AttackError>
where
    D: Dimension + RemoveAxis,
    R: Rng + ?Sized,
{
    let init_budget = init_budget.unwrap_or(noise_budget);
    let unit: Array<LmkFloat, D> = Array::random_using(dim, Uniform::new_inclusive(-1., 1.), rng);
    let batch = batch_size(&unit)?;
    let scaled = scale_samples(&unit, init_budget.per_sample(batch)?);
    let noise = clip_norm(&scaled, norm, init_budget)?;
    clip_norm(&noise, norm, noise_budget)
}
