//! Attack objectives over heatmap and offset predictions.
//!
//! The localization term is either `1 - Dice` or binary cross-entropy on the
//! heatmap; the regression term is the masked L1 error of both offset maps.
//! [`objective_gradient`] additionally returns the analytic derivative of the
//! chosen objective with respect to each predicted map, which is what the
//! attack feeds into the model's backward pass.
use crate::error::AttackError;
use crate::model::{Prediction, Supervision};
use crate::util::{ensure_same_shape, sign};
use crate::LmkFloat;
use itertools::Itertools;
use log::warn;
use ndarray::{s, Array1, Array2, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Lower clamp of `ln` inside the cross-entropy.
const LOG_FLOOR: LmkFloat = -100.;
/// Floor of `p (1 - p)` in the cross-entropy gradient.
const BCE_GRAD_EPS: LmkFloat = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Reduction {
    /// Mean over the whole batch
    Mean,
    /// One value per sample
    PerSample,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LossValue {
    Scalar(LmkFloat),
    PerSample(Array1<LmkFloat>),
}

impl LossValue {
    pub fn as_scalar(&self) -> Option<LmkFloat> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::PerSample(_) => None,
        }
    }

    pub fn as_per_sample(&self) -> Option<&Array1<LmkFloat>> {
        match self {
            Self::Scalar(_) => None,
            Self::PerSample(v) => Some(v),
        }
    }

    /// The scalar, or the batch mean of the per-sample values.
    pub fn mean(&self) -> LmkFloat {
        match self {
            Self::Scalar(v) => *v,
            Self::PerSample(v) => v.mean().unwrap_or(LmkFloat::NAN),
        }
    }

    pub fn scaled(&self, factor: LmkFloat) -> Self {
        match self {
            Self::Scalar(v) => Self::Scalar(v * factor),
            Self::PerSample(v) => Self::PerSample(v * factor),
        }
    }
}

impl Add for LossValue {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Scalar(a), Self::Scalar(b)) => Self::Scalar(a + b),
            (Self::PerSample(a), Self::PerSample(b)) => Self::PerSample(a + b),
            (Self::Scalar(a), Self::PerSample(b)) | (Self::PerSample(b), Self::Scalar(a)) => {
                Self::PerSample(b + a)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum LocalizationLoss {
    #[default]
    Dice,
    CrossEntropy,
}

/// Which ground-truth map the Dice term compares the predicted heatmap with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum DiceTarget {
    #[default]
    Mask,
    Heatmap,
}

impl DiceTarget {
    fn select(self, supervision: &Supervision) -> &Array4<LmkFloat> {
        match self {
            Self::Mask => &supervision.mask,
            Self::Heatmap => &supervision.heatmap,
        }
    }
}

/// The scalar the attack ascends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub enum Objective {
    #[default]
    Localization,
    Regression,
    /// `regression + lambda * localization`
    Total { lambda: LmkFloat },
}

impl Objective {
    /// (localization weight, regression weight)
    pub fn weights(self) -> (LmkFloat, LmkFloat) {
        match self {
            Self::Localization => (1., 0.),
            Self::Regression => (0., 1.),
            Self::Total { lambda } => (lambda, 1.),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LossSettings {
    pub localization: LocalizationLoss,
    pub dice_target: DiceTarget,
    pub objective: Objective,
}

/// Both terms, kept apart so callers can pick either or combine them.
#[derive(Clone, Debug, PartialEq)]
pub struct LossTerms {
    pub localization: LossValue,
    pub regression: LossValue,
}

impl LossTerms {
    pub fn objective(&self, objective: Objective) -> LossValue {
        let (w_loc, w_reg) = objective.weights();
        match objective {
            Objective::Localization => self.localization.clone(),
            Objective::Regression => self.regression.clone(),
            Objective::Total { .. } => {
                self.regression.scaled(w_reg) + self.localization.scaled(w_loc)
            }
        }
    }
}

/// Dice coefficient `2 I / (sum(pred) + sum(target))` per (sample, landmark),
/// summed over the spatial axes. Both maps empty gives NaN.
fn landmark_dice(
    pred: &Array4<LmkFloat>,
    target: &Array4<LmkFloat>,
) -> Result<(Array2<LmkFloat>, Array2<LmkFloat>), AttackError> {
    ensure_same_shape("dice target", pred.shape(), target.shape())?;
    let intersection = (pred * target).sum_axis(Axis(3)).sum_axis(Axis(2));
    let total =
        pred.sum_axis(Axis(3)).sum_axis(Axis(2)) + target.sum_axis(Axis(3)).sum_axis(Axis(2));
    Ok((intersection, total))
}

fn reduce_landmarks(values: &Array2<LmkFloat>, reduction: Reduction) -> LossValue {
    match reduction {
        Reduction::Mean => LossValue::Scalar(values.mean().unwrap_or(LmkFloat::NAN)),
        Reduction::PerSample => LossValue::PerSample(
            values
                .outer_iter()
                .map(|row| row.mean().unwrap_or(LmkFloat::NAN))
                .collect(),
        ),
    }
}

fn reduce_elements(values: &Array4<LmkFloat>, reduction: Reduction) -> LossValue {
    match reduction {
        Reduction::Mean => LossValue::Scalar(values.mean().unwrap_or(LmkFloat::NAN)),
        Reduction::PerSample => LossValue::PerSample(
            values
                .outer_iter()
                .map(|sample| sample.mean().unwrap_or(LmkFloat::NAN))
                .collect(),
        ),
    }
}

/// # Errors
/// If `pred` and `target` differ in shape.
pub fn dice_score(
    pred: &Array4<LmkFloat>,
    target: &Array4<LmkFloat>,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    let (intersection, total) = landmark_dice(pred, target)?;
    Ok(reduce_landmarks(&(intersection * 2. / total), reduction))
}

/// `1 - Dice`, averaged over landmarks (and over the batch for `Mean`).
///
/// # Errors
/// If `pred` and `target` differ in shape.
pub fn dice_loss(
    pred: &Array4<LmkFloat>,
    target: &Array4<LmkFloat>,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    let (intersection, total) = landmark_dice(pred, target)?;
    let loss = (intersection * 2. / total).mapv(|d| 1. - d);
    Ok(reduce_landmarks(&loss, reduction))
}

/// Binary cross-entropy with `ln` clamped at -100.
///
/// # Errors
/// If `pred` and `target` differ in shape.
pub fn bce_loss(
    pred: &Array4<LmkFloat>,
    target: &Array4<LmkFloat>,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    ensure_same_shape("bce target", pred.shape(), target.shape())?;
    let elementwise = Zip::from(pred).and(target).map_collect(|&p, &t| {
        -(t * p.ln().max(LOG_FLOOR) + (1. - t) * (1. - p).ln().max(LOG_FLOOR))
    });
    Ok(reduce_elements(&elementwise, reduction))
}

/// `sum(|pred - gt| * mask) / sum(mask)`.
///
/// A mask with no valid pixel divides by zero and yields NaN; this is not
/// guarded against, only logged.
///
/// # Errors
/// If the three tensors differ in shape.
pub fn masked_l1_loss(
    pred: &Array4<LmkFloat>,
    gt: &Array4<LmkFloat>,
    mask: &Array4<LmkFloat>,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    ensure_same_shape("l1 target", pred.shape(), gt.shape())?;
    ensure_same_shape("l1 mask", pred.shape(), mask.shape())?;
    let distance = Zip::from(pred)
        .and(gt)
        .and(mask)
        .map_collect(|&p, &g, &m| (p - g).abs() * m);
    match reduction {
        Reduction::Mean => {
            let valid = mask.sum();
            if valid == 0. {
                warn!("degenerate mask: no valid pixels, regression loss is undefined");
            }
            Ok(LossValue::Scalar(distance.sum() / valid))
        }
        Reduction::PerSample => {
            let per_sample = distance
                .outer_iter()
                .zip(mask.outer_iter())
                .enumerate()
                .map(|(idx, (d, m))| {
                    let valid = m.sum();
                    if valid == 0. {
                        warn!("degenerate mask for sample {}: regression loss is undefined", idx);
                    }
                    d.sum() / valid
                })
                .collect();
            Ok(LossValue::PerSample(per_sample))
        }
    }
}

fn localization_loss(
    prediction: &Prediction,
    supervision: &Supervision,
    settings: &LossSettings,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    match settings.localization {
        LocalizationLoss::Dice => dice_loss(
            &prediction.heatmap,
            settings.dice_target.select(supervision),
            reduction,
        ),
        LocalizationLoss::CrossEntropy => {
            bce_loss(&prediction.heatmap, &supervision.heatmap, reduction)
        }
    }
}

fn regression_loss(
    prediction: &Prediction,
    supervision: &Supervision,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    let regression_y = masked_l1_loss(
        &prediction.regression_y,
        &supervision.offset_y,
        &supervision.mask,
        reduction,
    )?;
    let regression_x = masked_l1_loss(
        &prediction.regression_x,
        &supervision.offset_x,
        &supervision.mask,
        reduction,
    )?;
    Ok(regression_x + regression_y)
}

/// Localization and regression terms of one prediction.
///
/// # Errors
/// If prediction and supervision shapes disagree.
pub fn attack_loss(
    prediction: &Prediction,
    supervision: &Supervision,
    settings: &LossSettings,
    reduction: Reduction,
) -> Result<LossTerms, AttackError> {
    supervision.check_prediction(prediction)?;
    Ok(LossTerms {
        localization: localization_loss(prediction, supervision, settings, reduction)?,
        regression: regression_loss(prediction, supervision, reduction)?,
    })
}

/// The configured objective alone. Terms outside the objective are never
/// evaluated, so a degenerate mask only matters when regression is ascended.
///
/// # Errors
/// If prediction and supervision shapes disagree.
pub fn objective_loss(
    prediction: &Prediction,
    supervision: &Supervision,
    settings: &LossSettings,
    reduction: Reduction,
) -> Result<LossValue, AttackError> {
    supervision.check_prediction(prediction)?;
    match settings.objective {
        Objective::Localization => localization_loss(prediction, supervision, settings, reduction),
        Objective::Regression => regression_loss(prediction, supervision, reduction),
        Objective::Total { .. } => {
            Ok(attack_loss(prediction, supervision, settings, reduction)?
                .objective(settings.objective))
        }
    }
}

fn dice_loss_grad(
    pred: &Array4<LmkFloat>,
    target: &Array4<LmkFloat>,
) -> Result<Array4<LmkFloat>, AttackError> {
    let (intersection, total) = landmark_dice(pred, target)?;
    let (n, k, _, _) = pred.dim();
    let count = (n * k) as LmkFloat;
    let mut grad = Array4::zeros(pred.raw_dim());
    for (b, l) in (0..n).cartesian_product(0..k) {
        let inter = intersection[[b, l]];
        let tot = total[[b, l]];
        let coeff = -2. / (count * tot * tot);
        grad.slice_mut(s![b, l, .., ..])
            .zip_mut_with(&target.slice(s![b, l, .., ..]), |g, &t| {
                *g = coeff * (t * tot - inter);
            });
    }
    Ok(grad)
}

fn bce_loss_grad(pred: &Array4<LmkFloat>, target: &Array4<LmkFloat>) -> Array4<LmkFloat> {
    let count = pred.len() as LmkFloat;
    Zip::from(pred)
        .and(target)
        .map_collect(|&p, &t| (p - t) / (p * (1. - p)).max(BCE_GRAD_EPS) / count)
}

fn masked_l1_grad(
    pred: &Array4<LmkFloat>,
    gt: &Array4<LmkFloat>,
    mask: &Array4<LmkFloat>,
) -> Array4<LmkFloat> {
    let valid = mask.sum();
    Zip::from(pred)
        .and(gt)
        .and(mask)
        .map_collect(|&p, &g, &m| sign(p - g) * m / valid)
}

/// The batch-mean objective and its gradient with respect to every
/// predicted map. Maps that do not enter the objective get zero gradient.
///
/// # Errors
/// If prediction and supervision shapes disagree.
pub fn objective_gradient(
    prediction: &Prediction,
    supervision: &Supervision,
    settings: &LossSettings,
) -> Result<(LmkFloat, Prediction), AttackError> {
    let value = objective_loss(prediction, supervision, settings, Reduction::Mean)?.mean();
    let (w_loc, w_reg) = settings.objective.weights();
    let mut grad = Prediction::zeros(prediction.heatmap.dim());
    if w_loc != 0. {
        let heatmap_grad = match settings.localization {
            LocalizationLoss::Dice => {
                dice_loss_grad(&prediction.heatmap, settings.dice_target.select(supervision))?
            }
            LocalizationLoss::CrossEntropy => {
                bce_loss_grad(&prediction.heatmap, &supervision.heatmap)
            }
        };
        grad.heatmap = heatmap_grad * w_loc;
    }
    if w_reg != 0. {
        grad.regression_y =
            masked_l1_grad(&prediction.regression_y, &supervision.offset_y, &supervision.mask) * w_reg;
        grad.regression_x =
            masked_l1_grad(&prediction.regression_x, &supervision.offset_x, &supervision.mask) * w_reg;
    }
    Ok((value, grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn disk_mask(n: usize, k: usize, h: usize, w: usize) -> Array4<f64> {
        Array4::from_shape_fn((n, k, h, w), |(b, l, y, x)| {
            let cy = (h / 2 + l) as f64;
            let cx = (w / 2 + b) as f64;
            if (y as f64 - cy).powi(2) + (x as f64 - cx).powi(2) <= 4. {
                1.
            } else {
                0.
            }
        })
    }

    fn random_problem(seed: u64) -> (Prediction, Supervision) {
        let mut rng = Pcg64::seed_from_u64(seed);
        let shape = (2, 2, 6, 6);
        let mask = disk_mask(2, 2, 6, 6);
        let heatmap = Array4::random_using(shape, Uniform::new(0., 1.), &mut rng);
        let offset_y = Array4::random_using(shape, Uniform::new(-1., 1.), &mut rng);
        let offset_x = Array4::random_using(shape, Uniform::new(-1., 1.), &mut rng);
        let supervision = Supervision::new(mask, heatmap, offset_y, offset_x).unwrap();
        let prediction = Prediction::new(
            Array4::random_using(shape, Uniform::new(0.1, 0.9), &mut rng),
            Array4::random_using(shape, Uniform::new(-1., 1.), &mut rng),
            Array4::random_using(shape, Uniform::new(-1., 1.), &mut rng),
        )
        .unwrap();
        (prediction, supervision)
    }

    #[test]
    fn test_dice_loss_zero_on_exact_match() {
        let mask = disk_mask(2, 3, 9, 9);
        let loss = dice_loss(&mask, &mask, Reduction::Mean).unwrap();
        assert_abs_diff_eq!(loss.as_scalar().unwrap(), 0., epsilon = 1e-12);
        let score = dice_score(&mask, &mask, Reduction::PerSample).unwrap();
        assert_eq!(score.as_per_sample().unwrap().len(), 2);
        assert!(score.as_per_sample().unwrap().iter().all(|&d| (d - 1.).abs() < 1e-12));
    }

    #[test]
    fn test_dice_loss_one_without_overlap() {
        let mut a = Array4::<f64>::zeros((1, 1, 4, 4));
        let mut b = Array4::<f64>::zeros((1, 1, 4, 4));
        a[[0, 0, 0, 0]] = 1.;
        b[[0, 0, 3, 3]] = 1.;
        let loss = dice_loss(&a, &b, Reduction::Mean).unwrap();
        assert_abs_diff_eq!(loss.as_scalar().unwrap(), 1.);
        // tiny overlap stays close to one
        a[[0, 0, 3, 3]] = 1e-6;
        let loss = dice_loss(&a, &b, Reduction::Mean).unwrap();
        assert!(loss.mean() < 1. && loss.mean() > 0.999);
    }

    #[test]
    fn test_dice_shape_mismatch() {
        let a = Array4::<f64>::zeros((1, 1, 4, 4));
        let b = Array4::<f64>::zeros((1, 2, 4, 4));
        assert!(matches!(
            dice_loss(&a, &b, Reduction::Mean),
            Err(AttackError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_masked_l1() {
        let pred = Array4::from_elem((2, 1, 2, 2), 1.);
        let gt = Array4::zeros((2, 1, 2, 2));
        let mut mask = Array4::zeros((2, 1, 2, 2));
        mask[[0, 0, 0, 0]] = 1.;
        mask[[1, 0, 0, 0]] = 1.;
        mask[[1, 0, 1, 1]] = 1.;
        let mean = masked_l1_loss(&pred, &gt, &mask, Reduction::Mean).unwrap();
        assert_abs_diff_eq!(mean.as_scalar().unwrap(), 1.);
        let per = masked_l1_loss(&pred, &gt, &mask, Reduction::PerSample).unwrap();
        assert_eq!(per.as_per_sample().unwrap().to_vec(), vec![1., 1.]);
    }

    #[test]
    fn test_degenerate_mask_is_nan() {
        let pred = Array4::from_elem((1, 1, 2, 2), 1.);
        let zeros = Array4::zeros((1, 1, 2, 2));
        let loss = masked_l1_loss(&pred, &zeros, &zeros, Reduction::Mean).unwrap();
        assert!(loss.mean().is_nan());
    }

    #[test]
    fn test_objective_skips_unweighted_terms() {
        let (prediction, mut supervision) = random_problem(5);
        let settings = LossSettings::default();
        let terms = attack_loss(&prediction, &supervision, &settings, Reduction::PerSample).unwrap();
        assert_eq!(
            objective_loss(&prediction, &supervision, &settings, Reduction::PerSample).unwrap(),
            terms.localization
        );
        // an empty mask only poisons objectives that ascend the regression term
        supervision.mask.fill(0.);
        supervision.heatmap.fill(0.5);
        let settings = LossSettings {
            dice_target: DiceTarget::Heatmap,
            ..LossSettings::default()
        };
        let (value, grad) = objective_gradient(&prediction, &supervision, &settings).unwrap();
        assert!(value.is_finite());
        assert!(grad.heatmap.iter().all(|g| g.is_finite()));
        let regression = LossSettings {
            objective: Objective::Regression,
            ..settings
        };
        let value = objective_loss(&prediction, &supervision, &regression, Reduction::Mean)
            .unwrap()
            .mean();
        assert!(value.is_nan());
    }

    #[test]
    fn test_bce_perfect_prediction() {
        let target = disk_mask(1, 1, 5, 5);
        let loss = bce_loss(&target, &target, Reduction::Mean).unwrap();
        assert_abs_diff_eq!(loss.mean(), 0., epsilon = 1e-12);
        // confident and wrong hits the log floor
        let wrong = target.mapv(|t| 1. - t);
        let loss = bce_loss(&wrong, &target, Reduction::PerSample).unwrap();
        assert_abs_diff_eq!(loss.mean(), 100., epsilon = 1e-9);
    }

    #[test]
    fn test_total_objective_combines_terms() {
        let (prediction, supervision) = random_problem(3);
        let terms = attack_loss(&prediction, &supervision, &LossSettings::default(), Reduction::Mean)
            .unwrap();
        let total = terms.objective(Objective::Total { lambda: 2. }).mean();
        assert_abs_diff_eq!(
            total,
            terms.regression.mean() + 2. * terms.localization.mean(),
            epsilon = 1e-12
        );
    }

    fn check_gradient(settings: LossSettings, seed: u64) {
        let (prediction, supervision) = random_problem(seed);
        let (value, grad) = objective_gradient(&prediction, &supervision, &settings).unwrap();
        let h = 1e-6;
        let eval = |p: &Prediction| {
            attack_loss(p, &supervision, &settings, Reduction::Mean)
                .unwrap()
                .objective(settings.objective)
                .mean()
        };
        assert_abs_diff_eq!(value, eval(&prediction), epsilon = 1e-12);
        for idx in [(0, 0, 3, 3), (1, 1, 2, 4), (0, 1, 0, 5)] {
            let mut bumped = prediction.clone();
            bumped.heatmap[idx] += h;
            let numeric = (eval(&bumped) - value) / h;
            assert_abs_diff_eq!(numeric, grad.heatmap[idx], epsilon = 1e-4);

            let mut bumped = prediction.clone();
            bumped.regression_x[idx] += h;
            let numeric = (eval(&bumped) - value) / h;
            assert_abs_diff_eq!(numeric, grad.regression_x[idx], epsilon = 1e-4);

            let mut bumped = prediction.clone();
            bumped.regression_y[idx] += h;
            let numeric = (eval(&bumped) - value) / h;
            assert_abs_diff_eq!(numeric, grad.regression_y[idx], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_dice_gradient_matches_finite_difference() {
        check_gradient(LossSettings::default(), 11);
        check_gradient(
            LossSettings {
                dice_target: DiceTarget::Heatmap,
                ..LossSettings::default()
            },
            12,
        );
    }

    #[test]
    fn test_bce_gradient_matches_finite_difference() {
        check_gradient(
            LossSettings {
                localization: LocalizationLoss::CrossEntropy,
                ..LossSettings::default()
            },
            13,
        );
    }

    #[test]
    fn test_total_gradient_matches_finite_difference() {
        check_gradient(
            LossSettings {
                objective: Objective::Total { lambda: 2. },
                ..LossSettings::default()
            },
            14,
        );
        check_gradient(
            LossSettings {
                objective: Objective::Regression,
                ..LossSettings::default()
            },
            15,
        );
    }

    proptest! {
        #[test]
        fn test_dice_loss_in_unit_interval(pred in unit_array4(2, 2, 4, 4), target in unit_array4(2, 2, 4, 4)) {
            let loss = dice_loss(&pred, &target, Reduction::PerSample).unwrap();
            for &l in loss.as_per_sample().unwrap().iter() {
                prop_assert!((-1e-12..=1. + 1e-12).contains(&l));
            }
        }
    }
}
