//! Turning predicted heatmaps and offset maps into landmark coordinates.
use crate::error::AttackError;
use crate::model::Prediction;
use crate::LmkFloat;
use itertools::Itertools;
use log::trace;
use ndarray::{s, Array2, ArrayView2};
use ndarray_stats::QuantileExt;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::f64::consts::PI;

/// A point in pixel coordinates; `x` is the column, `y` the row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Landmark {
    pub x: LmkFloat,
    pub y: LmkFloat,
}

impl Landmark {
    pub const fn new(x: LmkFloat, y: LmkFloat) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> LmkFloat {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

fn argmax_landmark(map: ArrayView2<LmkFloat>) -> Result<Landmark, AttackError> {
    let (y, x) = map.argmax().map_err(|err| AttackError::Model {
        message: format!("no maximum in predicted map: {}", err),
    })?;
    Ok(Landmark::new(x as LmkFloat, y as LmkFloat))
}

/// Locates every landmark of one sample.
///
/// The `⌊π r²⌋` most confident heatmap pixels each cast a vote at their own
/// position plus the predicted offset scaled by `radius` (truncated towards
/// zero). Votes landing outside the image are dropped and the most voted
/// pixel wins, the first in row-major order on ties. With `radius == 0`, or
/// when every vote falls outside, the heatmap maximum is used instead. An
/// empty vote map is not argmaxed, since every pixel would tie and the
/// landmark would always land at (0, 0).
///
/// # Errors
/// If `sample` is out of range, or a map has no maximum (empty or NaN).
pub fn vote(
    prediction: &Prediction,
    sample: usize,
    radius: LmkFloat,
) -> Result<Vec<Landmark>, AttackError> {
    let batch = prediction.batch_size();
    if sample >= batch {
        return Err(AttackError::shape_mismatch(
            "sample index",
            &[batch],
            &[sample],
        ));
    }
    let (_, num_landmarks, h, w) = prediction.heatmap.dim();
    let num_voters = ((PI * radius * radius).floor() as usize).min(h * w);
    (0..num_landmarks)
        .map(|landmark| {
            let heatmap = prediction.heatmap.slice(s![sample, landmark, .., ..]);
            if num_voters == 0 {
                return argmax_landmark(heatmap);
            }
            let offset_y = prediction.regression_y.slice(s![sample, landmark, .., ..]);
            let offset_x = prediction.regression_x.slice(s![sample, landmark, .., ..]);
            let mut votes = Array2::<LmkFloat>::zeros((h, w));
            let mut cast = 0_usize;
            // Stable sort keeps row-major order among equal confidences
            let voters = heatmap
                .indexed_iter()
                .sorted_by_key(|(_, p)| Reverse(OrderedFloat(**p)))
                .take(num_voters);
            for ((y, x), _) in voters {
                let vy = y as LmkFloat + (offset_y[[y, x]] * radius).trunc();
                let vx = x as LmkFloat + (offset_x[[y, x]] * radius).trunc();
                if vy >= 0. && vx >= 0. && vy < h as LmkFloat && vx < w as LmkFloat {
                    votes[[vy as usize, vx as usize]] += 1.;
                    cast += 1;
                }
            }
            trace!(
                "landmark {} of sample {}: {} of {} votes inside the image",
                landmark,
                sample,
                cast,
                num_voters
            );
            if cast == 0 {
                argmax_landmark(heatmap)
            } else {
                argmax_landmark(votes.view())
            }
        })
        .collect()
}

/// [`vote`] for every sample of the batch.
///
/// # Errors
/// See [`vote`].
pub fn vote_batch(
    prediction: &Prediction,
    radius: LmkFloat,
) -> Result<Vec<Vec<Landmark>>, AttackError> {
    (0..prediction.batch_size())
        .map(|sample| vote(prediction, sample, radius))
        .collect()
}
