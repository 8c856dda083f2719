use crate::dnn::layer::Layer;
use crate::LmkFloat;
use ndarray::{Array4, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReLU;

impl ReLU {
    pub const fn new() -> Self {
        Self
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn forward(&self, input: &Array4<LmkFloat>) -> Array4<LmkFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    /// The subgradient at 0 is taken to be 0.
    fn backward(
        &self,
        input: &Array4<LmkFloat>,
        grad_output: &Array4<LmkFloat>,
    ) -> Array4<LmkFloat> {
        Zip::from(input)
            .and(grad_output)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::array4;
    use proptest::prelude::*;

    #[test]
    fn test_relu_backward_masks_inactive() {
        let input = Array4::from_shape_vec((1, 1, 1, 4), vec![-1., 0., 2., 3.]).unwrap();
        let grad = Array4::from_elem((1, 1, 1, 4), 5.);
        let out = ReLU::new().backward(&input, &grad);
        assert_eq!(out.into_raw_vec(), vec![0., 0., 5., 5.]);
    }

    proptest! {
        #[test]
        fn test_relu_forward_nonnegative(input in array4(2, 3, 4, 4)) {
            let out = ReLU.forward(&input);
            prop_assert!(out.iter().all(|&x| x >= 0.));
            prop_assert!(out.iter().zip(input.iter()).all(|(&o, &i)| o == i || i < 0.));
        }
    }
}
