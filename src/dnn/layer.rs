use crate::LmkFloat;
use dyn_clone::DynClone;
use ndarray::Array4;
use std::fmt::{Debug, Display};

/// A differentiable layer over NCHW tensors.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug + Send + Sync {
    fn output_channels(&self, input_channels: usize) -> usize {
        input_channels
    }

    fn forward(&self, input: &Array4<LmkFloat>) -> Array4<LmkFloat>;

    /// Gradient with respect to `input`, given the gradient with respect to
    /// `self.forward(input)`.
    fn backward(
        &self,
        input: &Array4<LmkFloat>,
        grad_output: &Array4<LmkFloat>,
    ) -> Array4<LmkFloat>;
}

// This implements `Clone` for the trait
dyn_clone::clone_trait_object!(Layer);
