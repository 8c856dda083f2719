//! How one attack iteration turns an ascent direction into the next
//! (not yet projected) perturbation.
use crate::LmkFloat;
use enum_dispatch::enum_dispatch;
use log::trace;
use ndarray::{Array4, Ix4, Zip};
use serde::{Deserialize, Serialize};

#[enum_dispatch]
pub trait StepStrategy {
    /// Returns the unprojected perturbation for the next iterate.
    ///
    /// * `image` - the clean image
    /// * `adversarial` - the current (clamped) adversarial image
    /// * `noise` - the current projected perturbation
    /// * `direction` - the per-sample normalized gradient of the objective
    fn next_noise(
        &mut self,
        image: &Array4<LmkFloat>,
        adversarial: &Array4<LmkFloat>,
        noise: &Array4<LmkFloat>,
        direction: &Array4<LmkFloat>,
        step_size: LmkFloat,
    ) -> Array4<LmkFloat>;
}

/// `adversarial + step_size * direction - image`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GradientAscent;

impl StepStrategy for GradientAscent {
    fn next_noise(
        &mut self,
        image: &Array4<LmkFloat>,
        adversarial: &Array4<LmkFloat>,
        _noise: &Array4<LmkFloat>,
        direction: &Array4<LmkFloat>,
        step_size: LmkFloat,
    ) -> Array4<LmkFloat> {
        Zip::from(adversarial)
            .and(direction)
            .and(image)
            .map_collect(|&a, &d, &x| a + step_size * d - x)
    }
}

/// Adamax over the perturbation, ascending the objective.
///
/// The moment buffers belong to a single attack invocation and are sized for
/// its perturbation tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Adamax {
    beta1: LmkFloat,
    beta2: LmkFloat,
    eps: LmkFloat,
    step: i32,
    exp_avg: Array4<LmkFloat>,
    exp_inf: Array4<LmkFloat>,
}

impl Adamax {
    pub fn new(dim: Ix4) -> Self {
        Self::with_params(dim, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(dim: Ix4, beta1: LmkFloat, beta2: LmkFloat, eps: LmkFloat) -> Self {
        Self {
            beta1,
            beta2,
            eps,
            step: 0,
            exp_avg: Array4::zeros(dim),
            exp_inf: Array4::zeros(dim),
        }
    }

    pub fn steps_taken(&self) -> i32 {
        self.step
    }
}

impl StepStrategy for Adamax {
    fn next_noise(
        &mut self,
        _image: &Array4<LmkFloat>,
        _adversarial: &Array4<LmkFloat>,
        noise: &Array4<LmkFloat>,
        direction: &Array4<LmkFloat>,
        step_size: LmkFloat,
    ) -> Array4<LmkFloat> {
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);
        self.step += 1;
        // the optimizer minimizes, so it is handed the negated direction
        Zip::from(&mut self.exp_avg)
            .and(&mut self.exp_inf)
            .and(direction)
            .for_each(|m, u, &d| {
                let g = -d;
                *m = beta1 * *m + (1. - beta1) * g;
                *u = (beta2 * *u).max(g.abs() + eps);
            });
        let clr = step_size / (1. - beta1.powi(self.step));
        trace!("adamax step {} with lr {}", self.step, clr);
        Zip::from(noise)
            .and(&self.exp_avg)
            .and(&self.exp_inf)
            .map_collect(|&p, &m, &u| p - clr * m / u)
    }
}

#[enum_dispatch(StepStrategy)]
#[derive(Clone, Debug, PartialEq)]
pub enum Stepper {
    GradientAscent,
    Adamax,
}

/// Serializable choice of [`Stepper`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum StepMode {
    #[default]
    GradientAscent,
    Adamax,
}

impl StepMode {
    /// A fresh stepper with empty state for a perturbation of shape `dim`.
    pub fn build(self, dim: Ix4) -> Stepper {
        match self {
            Self::GradientAscent => GradientAscent.into(),
            Self::Adamax => Adamax::new(dim).into(),
        }
    }
}
