#![cfg(test)]
use crate::error::AttackError;
use crate::model::{LandmarkModel, Prediction, Supervision};
use crate::util::sigmoid;
use crate::LmkFloat;
use ndarray::{Array1, Array3, Array4, Axis, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;
use rand::Rng;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<f64> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array4(n: usize, c: usize, h: usize, w: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(n * c * h * w..=n * c * h * w))) -> Array4<f64> {
        Array4::from_shape_vec((n, c, h, w), v).unwrap()
    }
}

prop_compose! {
    /// Values in (0, 1], away from the log/division singularities of the losses
    pub fn unit_array4(n: usize, c: usize, h: usize, w: usize)(v in Vec::lift1_with(0.01 ..= 1., SizeRange::new(n * c * h * w..=n * c * h * w))) -> Array4<f64> {
        Array4::from_shape_vec((n, c, h, w), v).unwrap()
    }
}

prop_compose! {
    pub fn budget_vec(len: usize)(v in Vec::lift1_with(0.01 .. 5., SizeRange::new(len..=len))) -> Array1<f64> {
        Array1::from_vec(v)
    }
}

/// Uniform in `[-1, 1]`, the attack's default pixel range.
pub fn random_image<R: Rng>(rng: &mut R, shape: (usize, usize, usize, usize)) -> Array4<f64> {
    Array4::random_using(shape, Uniform::new_inclusive(-1., 1.), rng)
}

/// Per-pixel toy detector on the channel mean `m`:
/// heatmap `sigmoid((1 + l) * m)`, `regression_y = m`, `regression_x = -m`.
#[derive(Clone, Debug)]
pub struct PixelModel {
    num_landmarks: usize,
}

impl PixelModel {
    pub fn new(num_landmarks: usize) -> Self {
        Self { num_landmarks }
    }

    fn weight(landmark: usize) -> LmkFloat {
        1. + landmark as LmkFloat
    }
}

impl LandmarkModel for PixelModel {
    fn forward(&self, image: &Array4<LmkFloat>) -> Result<Prediction, AttackError> {
        let (n, _, h, w) = image.dim();
        let k = self.num_landmarks;
        let mean = image
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array3::zeros((n, h, w)));
        let heatmap = Array4::from_shape_fn((n, k, h, w), |(b, l, y, x)| {
            sigmoid(Self::weight(l) * mean[[b, y, x]])
        });
        let regression_y = Array4::from_shape_fn((n, k, h, w), |(b, _, y, x)| mean[[b, y, x]]);
        let regression_x = regression_y.mapv(|v| -v);
        Prediction::new(heatmap, regression_y, regression_x)
    }

    fn input_gradient(
        &self,
        image: &Array4<LmkFloat>,
        output_grad: &Prediction,
    ) -> Result<Array4<LmkFloat>, AttackError> {
        let (n, c, h, w) = image.dim();
        let prediction = self.forward(image)?;
        let mut grad_mean = Array3::<LmkFloat>::zeros((n, h, w));
        for l in 0..self.num_landmarks {
            Zip::from(&mut grad_mean)
                .and(&prediction.heatmap.index_axis(Axis(1), l))
                .and(&output_grad.heatmap.index_axis(Axis(1), l))
                .and(&output_grad.regression_y.index_axis(Axis(1), l))
                .and(&output_grad.regression_x.index_axis(Axis(1), l))
                .for_each(|acc, &s, &g_heat, &g_y, &g_x| {
                    *acc += g_heat * s * (1. - s) * Self::weight(l) + g_y - g_x;
                });
        }
        Ok(Array4::from_shape_fn((n, c, h, w), |(b, _, y, x)| {
            grad_mean[[b, y, x]] / c as LmkFloat
        }))
    }
}

/// Disk masks of radius 3 with a Gaussian heatmap and offsets pointing at
/// the disk centre. Each sample and landmark gets its own centre.
pub fn blob_supervision(n: usize, k: usize, h: usize, w: usize) -> Supervision {
    let centre = |b: usize, l: usize| {
        (
            ((h / 3 + 2 * l).min(h - 1)) as f64,
            ((w / 3 + b).min(w - 1)) as f64,
        )
    };
    let dist2 = |b, l, y: usize, x: usize| {
        let (cy, cx) = centre(b, l);
        (y as f64 - cy).powi(2) + (x as f64 - cx).powi(2)
    };
    let shape = (n, k, h, w);
    let mask = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        if dist2(b, l, y, x) <= 9. {
            1.
        } else {
            0.
        }
    });
    let heatmap = Array4::from_shape_fn(shape, |(b, l, y, x)| (-dist2(b, l, y, x) / 4.5).exp());
    let offset_y = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        mask[[b, l, y, x]] * (centre(b, l).0 - y as f64) / 3.
    });
    let offset_x = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        mask[[b, l, y, x]] * (centre(b, l).1 - x as f64) / 3.
    });
    Supervision::new(mask, heatmap, offset_y, offset_x).unwrap()
}

#[test]
fn test_pixel_model_gradient() {
    use rand::SeedableRng;
    let model = PixelModel::new(2);
    let mut rng = rand_pcg::Pcg64::seed_from_u64(3);
    let image = random_image(&mut rng, (1, 3, 4, 4));
    let mut output_grad = Prediction::zeros((1, 2, 4, 4));
    output_grad.heatmap.fill(1.);
    output_grad.regression_y.fill(0.3);
    output_grad.regression_x.fill(0.1);
    let grad = model.input_gradient(&image, &output_grad).unwrap();
    let objective = |x: &Array4<f64>| {
        let p = model.forward(x).unwrap();
        p.heatmap.sum() + 0.3 * p.regression_y.sum() + 0.1 * p.regression_x.sum()
    };
    let mut bumped = image.clone();
    bumped[[0, 1, 2, 3]] += 1e-6;
    let numeric = (objective(&bumped) - objective(&image)) / 1e-6;
    assert!((numeric - grad[[0, 1, 2, 3]]).abs() < 1e-4);
}
