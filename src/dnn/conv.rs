#![allow(clippy::module_name_repetitions)]
//! Two-dimensional convolution, stride 1, zero padding
use crate::dnn::layer::Layer;
use crate::LmkFloat;
use itertools::{iproduct, Itertools};
use ndarray::{s, Array1, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data is NCHW.
/// Weights are of the shape: (`channels_out`, `channels_in`, `kernel_h`, `kernel_w`)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Conv2d {
    kernel: Array4<LmkFloat>, // (C_out, C_in, K_h, K_w)
    bias: Array1<LmkFloat>,   // (C_out)
    padding: (usize, usize),  // (rows, cols) added on both sides
}

impl Conv2d {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(kernel: Array4<LmkFloat>, bias: Array1<LmkFloat>, padding: (usize, usize)) -> Self {
        assert_eq!(kernel.shape()[0], bias.len());
        Self {
            kernel,
            bias,
            padding,
        }
    }

    /// Padding that keeps the spatial size for odd kernels.
    pub fn same(kernel: Array4<LmkFloat>, bias: Array1<LmkFloat>) -> Self {
        let padding = (kernel.shape()[2] / 2, kernel.shape()[3] / 2);
        Self::new(kernel, bias, padding)
    }

    pub fn kernel(&self) -> &Array4<LmkFloat> {
        &self.kernel
    }

    pub fn output_size(&self, h_in: usize, w_in: usize) -> (usize, usize) {
        let (_, _, k_h, k_w) = self.kernel.dim();
        (
            (h_in + 2 * self.padding.0 + 1).saturating_sub(k_h),
            (w_in + 2 * self.padding.1 + 1).saturating_sub(k_w),
        )
    }

    /// Calls `visit(y_out, x_out, y_in, x_in, k_y, k_x)` for every kernel tap
    /// that lands inside the unpadded input.
    fn for_each_tap<F>(&self, h_in: usize, w_in: usize, mut visit: F)
    where
        F: FnMut(usize, usize, usize, usize, usize, usize),
    {
        let (_, _, k_h, k_w) = self.kernel.dim();
        let (h_out, w_out) = self.output_size(h_in, w_in);
        let (pad_y, pad_x) = self.padding;
        for (y_out, x_out) in (0..h_out).cartesian_product(0..w_out) {
            for k_y in 0..k_h {
                if y_out + k_y < pad_y || y_out + k_y >= h_in + pad_y {
                    // Assumption that padding value is 0, so continue;
                    continue;
                }
                let y_in = y_out + k_y - pad_y;
                for k_x in 0..k_w {
                    if x_out + k_x < pad_x || x_out + k_x >= w_in + pad_x {
                        continue;
                    }
                    let x_in = x_out + k_x - pad_x;
                    visit(y_out, x_out, y_in, x_in, k_y, k_x);
                }
            }
        }
    }
}

#[typetag::serde]
impl Layer for Conv2d {
    fn output_channels(&self, _input_channels: usize) -> usize {
        self.kernel.shape()[0]
    }

    /// # Panics
    /// If the input channel count does not match the kernel
    fn forward(&self, input: &Array4<LmkFloat>) -> Array4<LmkFloat> {
        let (n, c_in, h_in, w_in) = input.dim();
        let (c_out, k_c_in, _, _) = self.kernel.dim();
        assert_eq!(c_in, k_c_in);
        let (h_out, w_out) = self.output_size(h_in, w_in);
        let mut output = Array4::<LmkFloat>::zeros((n, c_out, h_out, w_out));
        for (f_out, &b) in self.bias.iter().enumerate() {
            output.slice_mut(s![.., f_out, .., ..]).fill(b);
        }
        self.for_each_tap(h_in, w_in, |y_out, x_out, y_in, x_in, k_y, k_x| {
            for (sample, f_in, f_out) in iproduct!(0..n, 0..c_in, 0..c_out) {
                output[[sample, f_out, y_out, x_out]] +=
                    input[[sample, f_in, y_in, x_in]] * self.kernel[[f_out, f_in, k_y, k_x]];
            }
        });
        output
    }

    fn backward(
        &self,
        input: &Array4<LmkFloat>,
        grad_output: &Array4<LmkFloat>,
    ) -> Array4<LmkFloat> {
        let (n, c_in, h_in, w_in) = input.dim();
        let c_out = self.kernel.shape()[0];
        let mut grad_input = Array4::<LmkFloat>::zeros(input.raw_dim());
        self.for_each_tap(h_in, w_in, |y_out, x_out, y_in, x_in, k_y, k_x| {
            for (sample, f_in, f_out) in iproduct!(0..n, 0..c_in, 0..c_out) {
                grad_input[[sample, f_in, y_in, x_in]] +=
                    grad_output[[sample, f_out, y_out, x_out]] * self.kernel[[f_out, f_in, k_y, k_x]];
            }
        });
        grad_input
    }
}

impl fmt::Display for Conv2d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv {}x{}, {} -> {}",
            self.kernel.shape()[2],
            self.kernel.shape()[3],
            self.kernel.shape()[1],
            self.kernel.shape()[0]
        )
    }
}
