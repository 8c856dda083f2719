//! Projected gradient descent against a landmark detector.
//!
//! Each iteration takes an unconstrained step along the normalized gradient
//! of the attack objective and then projects the perturbation back onto the
//! norm ball and the adversarial image back into the pixel range, so both
//! constraints hold at the end of every iteration whatever the step size.
use crate::config::AttackConfig;
use crate::error::AttackError;
use crate::loss::{objective_gradient, LossSettings};
use crate::model::{LandmarkModel, Supervision};
use crate::noise::random_noise;
use crate::norm::{clip_norm, normalize_grad, Budget, NormType, NORM_EPS};
use crate::step::{StepMode, StepStrategy};
use crate::util::{add_and_clamp, ensure_same_shape};
use crate::LmkFloat;
use log::{debug, trace};
use ndarray::{Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AttackOptions {
    /// Start from a random point inside the budget instead of the clean image
    pub rand_init: bool,
    /// Budget of the random start; the attack budget when `None`
    pub rand_init_budget: Option<Budget>,
    /// Minimize the objective instead of maximizing it
    pub targeted: bool,
    pub clip_min: LmkFloat,
    pub clip_max: LmkFloat,
    pub step_mode: StepMode,
    pub loss: LossSettings,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            rand_init: true,
            rand_init_budget: None,
            targeted: false,
            clip_min: -1.,
            clip_max: 1.,
            step_mode: StepMode::default(),
            loss: LossSettings::default(),
        }
    }
}

/// Runs `max_iter` PGD iterations and returns the adversarial image.
///
/// The clean image is only borrowed. The returned image lies in
/// `[clip_min, clip_max]` and its difference to `image` satisfies
/// `noise_budget` under `norm` (before the pixel clamp, which can only
/// shrink it further). With `max_iter == 0` the (clamped) starting point is
/// returned as is, and an empty batch returns a copy of the input.
///
/// # Errors
/// Shape disagreements between image, supervision and model outputs, budget
/// errors, or a failing model. Nothing is returned on failure.
#[allow(clippy::too_many_arguments)]
pub fn pgd_attack<M, R>(
    model: &M,
    image: &Array4<LmkFloat>,
    supervision: &Supervision,
    noise_budget: &Budget,
    norm: NormType,
    max_iter: usize,
    step_size: LmkFloat,
    options: &AttackOptions,
    rng: &mut R,
) -> Result<Array4<LmkFloat>, AttackError>
where
    M: LandmarkModel + ?Sized,
    R: Rng + ?Sized,
{
    let batch = image.len_of(Axis(0));
    if batch == 0 {
        return Ok(image.to_owned());
    }
    if supervision.batch_size() != batch {
        return Err(AttackError::shape_mismatch(
            "supervision batch",
            &[batch],
            &[supervision.batch_size()],
        ));
    }
    if !(options.clip_min <= options.clip_max) {
        return Err(AttackError::InvalidBudget {
            value: options.clip_max - options.clip_min,
        });
    }
    let budget = Budget::PerSample(noise_budget.per_sample(batch)?);

    let mut noise = if options.rand_init {
        random_noise(
            image.raw_dim(),
            norm,
            &budget,
            options.rand_init_budget.as_ref(),
            rng,
        )?
    } else {
        Array4::zeros(image.raw_dim())
    };
    let mut adversarial = add_and_clamp(image, &noise, options.clip_min, options.clip_max);
    let mut stepper = options.step_mode.build(image.raw_dim());

    for iteration in 0..max_iter {
        let prediction = model.forward(&adversarial)?;
        let (objective, mut output_grad) =
            objective_gradient(&prediction, supervision, &options.loss)?;
        if options.targeted {
            output_grad.scale(-1.);
        }
        let grad = model.input_gradient(&adversarial, &output_grad)?;
        ensure_same_shape("input gradient", image.shape(), grad.shape())?;
        let direction = normalize_grad(&grad, norm, NORM_EPS)?;
        let candidate = stepper.next_noise(image, &adversarial, &noise, &direction, step_size);
        noise = clip_norm(&candidate, norm, &budget)?;
        adversarial = add_and_clamp(image, &noise, options.clip_min, options.clip_max);
        debug!(
            "pgd iteration {}/{}: objective {:.6}",
            iteration + 1,
            max_iter,
            objective
        );
        trace!("pgd iteration {} perturbation {:?}", iteration + 1, noise.shape());
    }
    Ok(adversarial)
}

/// A fully parameterized attack, usually built from an [`AttackConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct PgdAttack {
    pub norm: NormType,
    pub budget: Budget,
    pub max_iter: usize,
    pub step_size: LmkFloat,
    pub options: AttackOptions,
}

impl PgdAttack {
    pub fn new(norm: NormType, budget: Budget, max_iter: usize, step_size: LmkFloat) -> Self {
        Self {
            norm,
            budget,
            max_iter,
            step_size,
            options: AttackOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: AttackOptions) -> Self {
        self.options = options;
        self
    }

    /// The attack at `noise_level`, using the configured step size or
    /// `5 * noise_level / max_iter` when none is given.
    pub fn from_config(config: &AttackConfig, noise_level: LmkFloat) -> Self {
        Self {
            norm: config.norm_type,
            budget: Budget::Scalar(noise_level),
            max_iter: config.max_iter,
            step_size: config.step_size_for(noise_level),
            options: config.options(),
        }
    }

    /// # Errors
    /// See [`pgd_attack`].
    pub fn attack<M, R>(
        &self,
        model: &M,
        image: &Array4<LmkFloat>,
        supervision: &Supervision,
        rng: &mut R,
    ) -> Result<Array4<LmkFloat>, AttackError>
    where
        M: LandmarkModel + ?Sized,
        R: Rng + ?Sized,
    {
        pgd_attack(
            model,
            image,
            supervision,
            &self.budget,
            self.norm,
            self.max_iter,
            self.step_size,
            &self.options,
            rng,
        )
    }
}
