//! Radial error statistics over detected landmarks.
use crate::error::AttackError;
use crate::voting::Landmark;
use crate::LmkFloat;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SdrEntry {
    pub radius_mm: LmkFloat,
    /// Fraction of landmarks within `radius_mm`, in `[0, 1]`. `None` when
    /// nothing was recorded.
    pub rate: Option<LmkFloat>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EvalSummary {
    pub count: usize,
    /// Mean radial error in millimetres
    pub mre: Option<LmkFloat>,
    /// Population standard deviation of the radial error
    pub std: Option<LmkFloat>,
    pub sdr: Vec<SdrEntry>,
    pub per_landmark_mre: Vec<LmkFloat>,
}

/// Accumulates radial errors per landmark index.
///
/// Pixel distances are first scaled from the network input to the original
/// image size, then converted to millimetres with `pixel_spacing`. An empty
/// accumulator has no statistics, so they summarize to `None`.
#[derive(Clone, Debug)]
pub struct Evaluator {
    pixel_spacing: LmkFloat,
    sdr_radii: Vec<LmkFloat>,
    errors: Vec<Vec<LmkFloat>>,
}

impl Evaluator {
    pub fn new(pixel_spacing: LmkFloat, sdr_radii: Vec<LmkFloat>) -> Self {
        Self {
            pixel_spacing,
            sdr_radii,
            errors: Vec::new(),
        }
    }

    /// Records one sample. `scale` is `(rows, cols)` of original size over
    /// network input size.
    ///
    /// # Errors
    /// If the two landmark lists disagree in length, or differ from the
    /// landmark count of earlier samples.
    pub fn record(
        &mut self,
        predicted: &[Landmark],
        truth: &[Landmark],
        scale: (LmkFloat, LmkFloat),
    ) -> Result<(), AttackError> {
        if predicted.len() != truth.len() {
            return Err(AttackError::shape_mismatch(
                "predicted landmarks",
                &[truth.len()],
                &[predicted.len()],
            ));
        }
        if self.errors.is_empty() {
            self.errors = vec![Vec::new(); truth.len()];
        } else if self.errors.len() != truth.len() {
            return Err(AttackError::shape_mismatch(
                "landmarks per sample",
                &[self.errors.len()],
                &[truth.len()],
            ));
        }
        for ((p, t), errors) in predicted.iter().zip(truth).zip(self.errors.iter_mut()) {
            let dy = (p.y - t.y) * scale.0;
            let dx = (p.x - t.x) * scale.1;
            errors.push(dy.hypot(dx) * self.pixel_spacing);
        }
        Ok(())
    }

    /// Number of recorded (sample, landmark) pairs.
    pub fn count(&self) -> usize {
        self.errors.iter().map(Vec::len).sum()
    }

    pub fn summary(&self) -> EvalSummary {
        let all: Array1<LmkFloat> = self.errors.iter().flatten().copied().collect();
        let mre = all.mean();
        let sdr = self
            .sdr_radii
            .iter()
            .map(|&radius_mm| SdrEntry {
                radius_mm,
                rate: all.mapv(|e| if e <= radius_mm { 1. } else { 0. }).mean(),
            })
            .collect();
        EvalSummary {
            count: all.len(),
            mre,
            std: mre.map(|_| all.std(0.)),
            sdr,
            // every landmark holds one error per recorded sample
            per_landmark_mre: self
                .errors
                .iter()
                .filter_map(|e| ArrayView1::from(e.as_slice()).mean())
                .collect(),
        }
    }
}
