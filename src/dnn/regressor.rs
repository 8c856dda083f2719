//! A small fully convolutional landmark detector.
use crate::dnn::{Conv2d, ReLU, Sequential};
use crate::error::{AttackError, ConfigError};
use crate::model::{LandmarkModel, Prediction};
use crate::util::{ensure_same_shape, sigmoid};
use crate::LmkFloat;
use log::debug;
use ndarray::{s, Array1, Array4, Axis, Zip};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Backbone output channels `[0, K)` are heatmap logits, `[K, 2K)` the y
/// offsets and `[2K, 3K)` the x offsets.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeatmapRegressor {
    backbone: Sequential,
    input_channels: usize,
    num_landmarks: usize,
}

impl HeatmapRegressor {
    /// # Errors
    /// If the backbone does not produce `3 * num_landmarks` channels.
    pub fn new(
        backbone: Sequential,
        input_channels: usize,
        num_landmarks: usize,
    ) -> Result<Self, AttackError> {
        let produced = backbone.output_channels(input_channels);
        if produced != 3 * num_landmarks {
            return Err(AttackError::shape_mismatch(
                "backbone output channels",
                &[3 * num_landmarks],
                &[produced],
            ));
        }
        Ok(Self {
            backbone,
            input_channels,
            num_landmarks,
        })
    }

    /// Conv(kernel) -> ReLU -> Conv(1x1) with He-scaled normal weights.
    /// `kernel` should be odd so the maps keep the input size.
    pub fn random<R: Rng + ?Sized>(
        input_channels: usize,
        num_landmarks: usize,
        hidden: usize,
        kernel: usize,
        rng: &mut R,
    ) -> Self {
        let out = 3 * num_landmarks;
        let std_1 = (2. / (input_channels * kernel * kernel).max(1) as LmkFloat).sqrt();
        let std_2 = (2. / hidden.max(1) as LmkFloat).sqrt();
        let k1 = Array4::<LmkFloat>::random_using((hidden, input_channels, kernel, kernel), StandardNormal, rng)
            * std_1;
        let k2 = Array4::<LmkFloat>::random_using((out, hidden, 1, 1), StandardNormal, rng) * std_2;
        let backbone = Sequential::new(vec![
            Box::new(Conv2d::same(k1, Array1::zeros(hidden))),
            Box::new(ReLU::new()),
            Box::new(Conv2d::same(k2, Array1::zeros(out))),
        ]);
        Self {
            backbone,
            input_channels,
            num_landmarks,
        }
    }

    pub fn backbone(&self) -> &Sequential {
        &self.backbone
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn num_landmarks(&self) -> usize {
        self.num_landmarks
    }

    /// # Errors
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// # Errors
    /// IO and parse errors, or a backbone that does not fit the stored
    /// channel counts.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let stored: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        debug!("loaded {} from {}", stored, path.display());
        Self::new(stored.backbone, stored.input_channels, stored.num_landmarks)
            .map_err(ConfigError::from)
    }

    fn check_input(&self, image: &Array4<LmkFloat>) -> Result<(), AttackError> {
        let channels = image.len_of(Axis(1));
        if channels == self.input_channels {
            Ok(())
        } else {
            Err(AttackError::shape_mismatch(
                "image channels",
                &[self.input_channels],
                &[channels],
            ))
        }
    }
}

impl LandmarkModel for HeatmapRegressor {
    fn forward(&self, image: &Array4<LmkFloat>) -> Result<Prediction, AttackError> {
        self.check_input(image)?;
        let raw = self.backbone.forward(image);
        let k = self.num_landmarks;
        Prediction::new(
            raw.slice(s![.., 0..k, .., ..]).mapv(sigmoid),
            raw.slice(s![.., k..2 * k, .., ..]).to_owned(),
            raw.slice(s![.., 2 * k..3 * k, .., ..]).to_owned(),
        )
    }

    fn input_gradient(
        &self,
        image: &Array4<LmkFloat>,
        output_grad: &Prediction,
    ) -> Result<Array4<LmkFloat>, AttackError> {
        self.check_input(image)?;
        let raw = self.backbone.forward(image);
        let k = self.num_landmarks;
        let (n, _, h, w) = raw.dim();
        ensure_same_shape("output gradient", &[n, k, h, w], output_grad.shape())?;
        let mut grad_raw = Array4::zeros(raw.raw_dim());
        let logits = raw.slice(s![.., 0..k, .., ..]);
        grad_raw
            .slice_mut(s![.., 0..k, .., ..])
            .assign(&Zip::from(&logits).and(&output_grad.heatmap).map_collect(
                |&z, &g| {
                    let p = sigmoid(z);
                    g * p * (1. - p)
                },
            ));
        grad_raw
            .slice_mut(s![.., k..2 * k, .., ..])
            .assign(&output_grad.regression_y);
        grad_raw
            .slice_mut(s![.., 2 * k..3 * k, .., ..])
            .assign(&output_grad.regression_x);
        Ok(self.backbone.backward(image, &grad_raw))
    }
}

impl fmt::Display for HeatmapRegressor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "HeatmapRegressor({} channels, {} landmarks): {}",
            self.input_channels, self.num_landmarks, self.backbone
        )
    }
}
