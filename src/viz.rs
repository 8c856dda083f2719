//! Landmark overlays for inspecting predictions.
use crate::error::AttackError;
use crate::voting::Landmark;
use crate::LmkFloat;
use ndarray::{arr1, s, stack, Array2, Array3, Array4, Axis};

const GREEN: [LmkFloat; 3] = [0., 1., 0.];
const RED: [LmkFloat; 3] = [1., 0., 0.];
const MARK_HALF_WIDTH: i64 = 1;

fn stamp(canvas: &mut Array3<LmkFloat>, at: &Landmark, colour: [LmkFloat; 3]) {
    let (h, w, _) = canvas.dim();
    let (cy, cx) = (at.y.round() as i64, at.x.round() as i64);
    for y in (cy - MARK_HALF_WIDTH)..=(cy + MARK_HALF_WIDTH) {
        for x in (cx - MARK_HALF_WIDTH)..=(cx + MARK_HALF_WIDTH) {
            if y < 0 || x < 0 || y >= h as i64 || x >= w as i64 {
                continue;
            }
            canvas
                .slice_mut(s![y as usize, x as usize, ..])
                .assign(&arr1(&colour));
        }
    }
}

/// Renders one sample as an HWC RGB image in `[0, 1]` with predicted
/// landmarks in green and ground truth in red.
///
/// Pixel values are mapped from `[-1, 1]`. Three-channel images are kept as
/// they are; any other channel count is shown as the grey channel mean.
///
/// # Errors
/// If `sample` is out of range or the image has no channels.
pub fn overlay_landmarks(
    image: &Array4<LmkFloat>,
    sample: usize,
    predicted: &[Landmark],
    ground_truth: &[Landmark],
) -> Result<Array3<LmkFloat>, AttackError> {
    let (n, c, h, w) = image.dim();
    if sample >= n || c == 0 {
        return Err(AttackError::shape_mismatch(
            "overlay sample",
            &[n, c.max(1)],
            &[sample, c],
        ));
    }
    let chw = image.index_axis(Axis(0), sample);
    let rgb = if c == 3 {
        chw.to_owned()
    } else {
        let grey = chw.mean_axis(Axis(0)).unwrap_or_else(|| Array2::zeros((h, w)));
        stack(Axis(0), &[grey.view(), grey.view(), grey.view()]).map_err(|err| {
            AttackError::Model {
                message: err.to_string(),
            }
        })?
    };
    let mut canvas = rgb
        .permuted_axes([1, 2, 0])
        .mapv(|v| ((v + 1.) / 2.).clamp(0., 1.));
    for landmark in predicted {
        stamp(&mut canvas, landmark, GREEN);
    }
    for landmark in ground_truth {
        stamp(&mut canvas, landmark, RED);
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_colours_and_range() {
        let image = Array4::from_elem((1, 1, 6, 6), 3.);
        let out = overlay_landmarks(
            &image,
            0,
            &[Landmark::new(1., 1.)],
            &[Landmark::new(4., 4.)],
        )
        .unwrap();
        assert_eq!(out.dim(), (6, 6, 3));
        assert_eq!(out.slice(s![1, 1, ..]).to_vec(), vec![0., 1., 0.]);
        assert_eq!(out.slice(s![4, 5, ..]).to_vec(), vec![1., 0., 0.]);
        assert_eq!(out.slice(s![3, 0, ..]).to_vec(), vec![1., 1., 1.]);
    }

    #[test]
    fn test_marks_clip_at_border() {
        let image = Array4::from_elem((2, 3, 4, 4), -1.);
        let out = overlay_landmarks(&image, 1, &[Landmark::new(-1., 0.)], &[]).unwrap();
        assert_eq!(out.slice(s![0, 0, ..]).to_vec(), vec![0., 1., 0.]);
        assert_eq!(out.slice(s![0, 1, ..]).to_vec(), vec![0., 0., 0.]);
        assert!(overlay_landmarks(&image, 2, &[], &[]).is_err());
    }
}
