#![allow(dead_code)]
use landmark_pgd::dnn::HeatmapRegressor;
use landmark_pgd::{Batch, Landmark, Supervision};
use ndarray::Array4;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

pub fn make_model<R: Rng>(channels: usize, landmarks: usize, rng: &mut R) -> HeatmapRegressor {
    HeatmapRegressor::random(channels, landmarks, 6, 3, rng)
}

/// Ground truth for landmark `l` of sample `b`.
pub fn landmark_at(b: usize, l: usize, h: usize, w: usize) -> Landmark {
    Landmark::new(((w / 4 + 3 * l + b) % w) as f64, ((h / 4 + 2 * l) % h) as f64)
}

pub fn make_supervision(n: usize, k: usize, h: usize, w: usize, radius: f64) -> Supervision {
    let shape = (n, k, h, w);
    let delta = |b: usize, l: usize, y: usize, x: usize| {
        let lm = landmark_at(b, l, h, w);
        (lm.y - y as f64, lm.x - x as f64)
    };
    let mask = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        let (dy, dx) = delta(b, l, y, x);
        if dy.hypot(dx) <= radius {
            1.
        } else {
            0.
        }
    });
    let heatmap = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        let (dy, dx) = delta(b, l, y, x);
        (-(dy * dy + dx * dx) / (radius * radius)).exp()
    });
    let offset_y = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        mask[[b, l, y, x]] * delta(b, l, y, x).0 / radius
    });
    let offset_x = Array4::from_shape_fn(shape, |(b, l, y, x)| {
        mask[[b, l, y, x]] * delta(b, l, y, x).1 / radius
    });
    Supervision::new(mask, heatmap, offset_y, offset_x).unwrap()
}

pub fn make_batch<R: Rng>(
    n: usize,
    c: usize,
    k: usize,
    size: (usize, usize),
    rng: &mut R,
) -> Batch {
    let (h, w) = size;
    let image = Array4::random_using((n, c, h, w), Uniform::new_inclusive(-1., 1.), rng);
    let landmarks = (0..n)
        .map(|b| (0..k).map(|l| landmark_at(b, l, h, w)).collect())
        .collect();
    Batch::new(image, make_supervision(n, k, h, w, 3.), landmarks).unwrap()
}
