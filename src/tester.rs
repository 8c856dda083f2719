//! Evaluation driver: attack, vote, and score a dataset at one or more
//! noise levels.
use crate::attack::PgdAttack;
use crate::config::EvalConfig;
use crate::error::{AttackError, ConfigError};
use crate::evaluate::{EvalSummary, Evaluator};
use crate::model::{LandmarkModel, Supervision};
use crate::norm::{per_sample_norm, NormType};
use crate::voting::{vote_batch, Landmark};
use crate::LmkFloat;
use log::{debug, info};
use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fs;
use std::path::Path;

/// One batch from the dataset: images, supervision for the attack and the
/// ground-truth landmarks (in network input pixels) for scoring.
#[derive(Clone, Debug)]
pub struct Batch {
    pub image: Array4<LmkFloat>,
    pub supervision: Supervision,
    pub landmarks: Vec<Vec<Landmark>>,
}

impl Batch {
    /// # Errors
    /// If supervision or landmark lists do not cover every image.
    pub fn new(
        image: Array4<LmkFloat>,
        supervision: Supervision,
        landmarks: Vec<Vec<Landmark>>,
    ) -> Result<Self, AttackError> {
        let batch = image.len_of(Axis(0));
        if supervision.batch_size() != batch {
            return Err(AttackError::shape_mismatch(
                "supervision batch",
                &[batch],
                &[supervision.batch_size()],
            ));
        }
        if landmarks.len() != batch {
            return Err(AttackError::shape_mismatch(
                "landmark lists",
                &[batch],
                &[landmarks.len()],
            ));
        }
        Ok(Self {
            image,
            supervision,
            landmarks,
        })
    }

    pub fn len(&self) -> usize {
        self.image.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EvalReport {
    pub noise_level: LmkFloat,
    pub norm_type: NormType,
    pub batches: usize,
    pub samples: usize,
    pub summary: EvalSummary,
    /// Mean norm of `adversarial - image` over samples, 0 on clean runs
    pub mean_perturbation_norm: LmkFloat,
}

#[derive(Clone, Debug)]
pub struct Tester {
    config: EvalConfig,
}

impl Tester {
    /// # Errors
    /// If the configuration does not validate.
    pub fn new(config: EvalConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn scale_for(&self, image: &Array4<LmkFloat>) -> (LmkFloat, LmkFloat) {
        let (_, _, h, w) = image.dim();
        match self.config.original_size {
            Some([orig_h, orig_w]) if h > 0 && w > 0 => (
                orig_h as LmkFloat / h as LmkFloat,
                orig_w as LmkFloat / w as LmkFloat,
            ),
            _ => (1., 1.),
        }
    }

    /// Scores `model` on every batch, attacking each one first when
    /// `noise_level > 0`.
    ///
    /// # Errors
    /// Any attack, model, voting or bookkeeping error aborts the run.
    pub fn run<M, I, B, R>(
        &self,
        model: &M,
        batches: I,
        noise_level: LmkFloat,
        rng: &mut R,
    ) -> Result<EvalReport, AttackError>
    where
        M: LandmarkModel + ?Sized,
        I: IntoIterator<Item = B>,
        B: Borrow<Batch>,
        R: Rng + ?Sized,
    {
        let attack = PgdAttack::from_config(&self.config.attack, noise_level);
        let mut evaluator = Evaluator::new(self.config.pixel_spacing, self.config.sdr_radii.clone());
        let mut batch_count = 0;
        let mut samples = 0;
        let mut perturbation_total = 0.;
        info!(
            "evaluating at noise level {} ({}, {} iterations, step {})",
            noise_level, attack.norm, attack.max_iter, attack.step_size
        );
        for batch in batches {
            let batch = batch.borrow();
            let adversarial = if noise_level > 0. {
                let adversarial = attack.attack(model, &batch.image, &batch.supervision, rng)?;
                if !batch.is_empty() {
                    perturbation_total +=
                        per_sample_norm(&(&adversarial - &batch.image), attack.norm)?.sum();
                }
                adversarial
            } else {
                batch.image.clone()
            };
            let prediction = model.forward(&adversarial)?;
            let predicted = vote_batch(&prediction, self.config.radius)?;
            if predicted.len() != batch.landmarks.len() {
                return Err(AttackError::shape_mismatch(
                    "landmark lists",
                    &[predicted.len()],
                    &[batch.landmarks.len()],
                ));
            }
            let scale = self.scale_for(&batch.image);
            for (p, t) in predicted.iter().zip(&batch.landmarks) {
                evaluator.record(p, t, scale)?;
            }
            batch_count += 1;
            samples += batch.len();
            debug!("batch {} done, {} samples so far", batch_count, samples);
        }
        let summary = evaluator.summary();
        match (summary.mre, summary.std) {
            (Some(mre), Some(std)) => info!(
                "noise level {}: {} samples, MRE {:.3} mm, std {:.3} mm",
                noise_level, samples, mre, std
            ),
            _ => info!("noise level {}: no landmarks recorded", noise_level),
        }
        for entry in &summary.sdr {
            if let Some(rate) = entry.rate {
                info!("  SDR {} mm: {:.2}%", entry.radius_mm, 100. * rate);
            }
        }
        Ok(EvalReport {
            noise_level,
            norm_type: attack.norm,
            batches: batch_count,
            samples,
            summary,
            mean_perturbation_norm: if samples == 0 {
                0.
            } else {
                perturbation_total / samples as LmkFloat
            },
        })
    }

    /// Runs every configured noise level, each with a fresh generator
    /// seeded from the attack config.
    ///
    /// # Errors
    /// See [`Tester::run`].
    pub fn sweep<M>(&self, model: &M, batches: &[Batch]) -> Result<Vec<EvalReport>, AttackError>
    where
        M: LandmarkModel + ?Sized,
    {
        self.config
            .noise_levels
            .iter()
            .map(|&noise_level| {
                let mut rng = StdRng::seed_from_u64(self.config.attack.seed);
                self.run(model, batches, noise_level, &mut rng)
            })
            .collect()
    }

    /// Writes `reports` as pretty JSON to `path`, or to the configured
    /// report path when `path` is `None`. Does nothing if neither is set.
    ///
    /// # Errors
    /// IO or serialization failures.
    pub fn write_reports(
        &self,
        reports: &[EvalReport],
        path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = match path.or_else(|| self.config.report_path.as_deref()) {
            Some(path) => path,
            None => return Ok(()),
        };
        fs::write(path, serde_json::to_string_pretty(reports)?)?;
        info!("wrote {} reports to {}", reports.len(), path.display());
        Ok(())
    }
}
