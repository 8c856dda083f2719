//! The frozen network seen by the attack, and the tensor bundles it consumes
//! and produces.
use crate::error::AttackError;
use crate::util::ensure_same_shape;
use crate::LmkFloat;
use ndarray::{Array4, Axis};

/// Network outputs, all of shape (batch, landmarks, height, width).
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub heatmap: Array4<LmkFloat>,
    pub regression_y: Array4<LmkFloat>,
    pub regression_x: Array4<LmkFloat>,
}

impl Prediction {
    /// # Errors
    /// If the three maps disagree in shape.
    pub fn new(
        heatmap: Array4<LmkFloat>,
        regression_y: Array4<LmkFloat>,
        regression_x: Array4<LmkFloat>,
    ) -> Result<Self, AttackError> {
        ensure_same_shape("regression_y", heatmap.shape(), regression_y.shape())?;
        ensure_same_shape("regression_x", heatmap.shape(), regression_x.shape())?;
        Ok(Self {
            heatmap,
            regression_y,
            regression_x,
        })
    }

    pub fn zeros(shape: (usize, usize, usize, usize)) -> Self {
        Self {
            heatmap: Array4::zeros(shape),
            regression_y: Array4::zeros(shape),
            regression_x: Array4::zeros(shape),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.heatmap.shape()
    }

    pub fn batch_size(&self) -> usize {
        self.heatmap.len_of(Axis(0))
    }

    pub fn num_landmarks(&self) -> usize {
        self.heatmap.len_of(Axis(1))
    }

    /// Multiplies every map by `factor`.
    pub fn scale(&mut self, factor: LmkFloat) {
        self.heatmap.mapv_inplace(|x| x * factor);
        self.regression_y.mapv_inplace(|x| x * factor);
        self.regression_x.mapv_inplace(|x| x * factor);
    }
}

/// Ground truth for one batch. Only ever borrowed by the loss.
#[derive(Clone, Debug, PartialEq)]
pub struct Supervision {
    /// Binary validity region per landmark
    pub mask: Array4<LmkFloat>,
    /// Gaussian heatmap per landmark, values in [0, 1]
    pub heatmap: Array4<LmkFloat>,
    pub offset_y: Array4<LmkFloat>,
    pub offset_x: Array4<LmkFloat>,
}

impl Supervision {
    /// # Errors
    /// If any tensor disagrees in shape with `mask`.
    pub fn new(
        mask: Array4<LmkFloat>,
        heatmap: Array4<LmkFloat>,
        offset_y: Array4<LmkFloat>,
        offset_x: Array4<LmkFloat>,
    ) -> Result<Self, AttackError> {
        ensure_same_shape("heatmap", mask.shape(), heatmap.shape())?;
        ensure_same_shape("offset_y", mask.shape(), offset_y.shape())?;
        ensure_same_shape("offset_x", mask.shape(), offset_x.shape())?;
        Ok(Self {
            mask,
            heatmap,
            offset_y,
            offset_x,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.mask.shape()
    }

    pub fn batch_size(&self) -> usize {
        self.mask.len_of(Axis(0))
    }

    /// # Errors
    /// If the prediction does not cover the same landmarks and pixels.
    pub fn check_prediction(&self, prediction: &Prediction) -> Result<(), AttackError> {
        ensure_same_shape("prediction", self.shape(), prediction.heatmap.shape())?;
        ensure_same_shape("prediction", self.shape(), prediction.regression_y.shape())?;
        ensure_same_shape("prediction", self.shape(), prediction.regression_x.shape())
    }
}

/// A trained landmark detector treated as a black box.
///
/// `input_gradient` is the vector-Jacobian product of the three outputs with
/// respect to the image: given `d loss / d output`, return `d loss / d image`.
/// Both methods take `&self`; the attack never touches the model's
/// parameters or any optimizer state attached to them.
pub trait LandmarkModel {
    /// # Errors
    /// Implementation-defined inference failures.
    fn forward(&self, image: &Array4<LmkFloat>) -> Result<Prediction, AttackError>;

    /// # Errors
    /// Implementation-defined failures in the backward pass.
    fn input_gradient(
        &self,
        image: &Array4<LmkFloat>,
        output_grad: &Prediction,
    ) -> Result<Array4<LmkFloat>, AttackError>;
}

impl<M: LandmarkModel + ?Sized> LandmarkModel for &M {
    fn forward(&self, image: &Array4<LmkFloat>) -> Result<Prediction, AttackError> {
        (**self).forward(image)
    }

    fn input_gradient(
        &self,
        image: &Array4<LmkFloat>,
        output_grad: &Prediction,
    ) -> Result<Array4<LmkFloat>, AttackError> {
        (**self).input_gradient(image, output_grad)
    }
}

impl<M: LandmarkModel + ?Sized> LandmarkModel for Box<M> {
    fn forward(&self, image: &Array4<LmkFloat>) -> Result<Prediction, AttackError> {
        (**self).forward(image)
    }

    fn input_gradient(
        &self,
        image: &Array4<LmkFloat>,
        output_grad: &Prediction,
    ) -> Result<Array4<LmkFloat>, AttackError> {
        (**self).input_gradient(image, output_grad)
    }
}
