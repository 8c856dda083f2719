//! A feed-forward stack of layers with a replaying backward pass.
use crate::dnn::layer::Layer;
use crate::LmkFloat;
use itertools::Itertools;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    pub fn output_channels(&self, input_channels: usize) -> usize {
        self.layers
            .iter()
            .fold(input_channels, |c, layer| layer.output_channels(c))
    }

    pub fn forward(&self, input: &Array4<LmkFloat>) -> Array4<LmkFloat> {
        self.layers
            .iter()
            .fold(input.to_owned(), |x, layer| layer.forward(&x))
    }

    /// The input of every layer followed by the final output.
    pub fn activations(&self, input: &Array4<LmkFloat>) -> Vec<Array4<LmkFloat>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.to_owned());
        for (i, layer) in self.layers.iter().enumerate() {
            let next = layer.forward(&activations[i]);
            activations.push(next);
        }
        activations
    }

    /// Vector-Jacobian product of the whole stack at `input`.
    pub fn backward(
        &self,
        input: &Array4<LmkFloat>,
        grad_output: &Array4<LmkFloat>,
    ) -> Array4<LmkFloat> {
        let activations = self.activations(input);
        self.layers
            .iter()
            .zip(activations.iter())
            .rev()
            .fold(grad_output.to_owned(), |grad, (layer, x)| {
                layer.backward(x, &grad)
            })
    }
}

impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Input => {}", self.layers.iter().join(" => "))
    }
}
