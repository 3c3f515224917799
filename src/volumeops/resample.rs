use ndarray::{prelude::*, Zip};

use crate::errors::{MriSegError, Result};

/// Output extent of an axis with `len` voxels of `spacing` resampled to `target`:
/// enough samples to span the same distance between the first and last voxel centers.
pub fn resampled_len(len: usize, spacing: f64, target: f64) -> usize {
    ((len.saturating_sub(1) as f64 * spacing / target + 1.0).round() as usize).max(1)
}

/// Trilinear resampling onto a grid with `target` spacing on every axis.
///
/// Output voxel `j` sits at `j * target` mm from the first input voxel center,
/// so the first voxels coincide and samples past the last input voxel take
/// its value. A volume already at `target` spacing is returned as is.
pub fn resample_isotropic(volume: &Array3<f32>, spacing: [f64; 3], target: f64) -> Result<Array3<f32>> {
    if spacing.iter().chain(Some(&target)).any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(MriSegError::preprocessing(
            "resampling",
            format!("invalid spacing {:?} -> {}", spacing, target),
        ));
    }

    let shape = volume.shape();
    if shape.contains(&0) {
        return Err(MriSegError::preprocessing(
            "resampling",
            format!("empty volume {:?}", shape),
        ));
    }
    if spacing.iter().all(|&s| s == target) {
        return Ok(volume.clone());
    }

    let out_shape: [usize; 3] = std::array::from_fn(|i| resampled_len(shape[i], spacing[i], target));
    let taps: [Vec<(usize, usize, f32)>; 3] =
        std::array::from_fn(|i| axis_taps(shape[i], out_shape[i], target / spacing[i]));

    let mut resampled = Array3::<f32>::zeros(out_shape);
    Zip::indexed(&mut resampled).par_for_each(|(i, j, k), voxel| {
        let (z0, z1, fz) = taps[0][i];
        let (y0, y1, fy) = taps[1][j];
        let (x0, x1, fx) = taps[2][k];

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let plane = |z: usize| {
            let near = lerp(volume[[z, y0, x0]], volume[[z, y0, x1]], fx);
            let far = lerp(volume[[z, y1, x0]], volume[[z, y1, x1]], fx);
            lerp(near, far, fy)
        };
        *voxel = lerp(plane(z0), plane(z1), fz);
    });

    Ok(resampled)
}

/// For every output index: lower source index, upper source index, weight of the upper one.
/// `step` is the distance between output samples in input voxels.
fn axis_taps(len: usize, out_len: usize, step: f64) -> Vec<(usize, usize, f32)> {
    (0..out_len)
        .map(|j| {
            let coord = (j as f64 * step).min((len - 1) as f64);
            let lo = coord.floor() as usize;
            let hi = (lo + 1).min(len - 1);
            (lo, hi, (coord - lo as f64) as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampled_len() {
        assert_eq!(resampled_len(10, 1.0, 1.0), 10);
        assert_eq!(resampled_len(10, 0.5, 1.0), 6);
        assert_eq!(resampled_len(3, 2.0, 1.0), 5);
        assert_eq!(resampled_len(20, 3.0, 1.0), 58);
        assert_eq!(resampled_len(1, 0.1, 1.0), 1);
    }

    #[test]
    fn test_isotropic_input_is_unchanged() -> Result<()> {
        let volume = Array3::from_shape_fn((3, 4, 5), |(i, j, k)| (i + j + k) as f32);
        assert_eq!(resample_isotropic(&volume, [1.0; 3], 1.0)?, volume);
        Ok(())
    }

    #[test]
    fn test_samples_are_one_millimetre_apart() -> Result<()> {
        // 3 voxels of 2 mm along z: samples at 0, 1, 2, 3, 4 mm.
        let volume = Array3::from_shape_fn((3, 2, 2), |(z, _, _)| z as f32 * 10.0);
        let resampled = resample_isotropic(&volume, [2.0, 1.0, 1.0], 1.0)?;

        assert_eq!(resampled.dim(), (5, 2, 2));
        let profile = resampled.slice(s![.., 1, 1]).to_vec();
        for (j, value) in profile.iter().enumerate() {
            assert!((value - j as f32 * 5.0).abs() < 1e-4, "{:?}", profile);
        }
        Ok(())
    }

    #[test]
    fn test_thick_slices_keep_physical_step() -> Result<()> {
        // 20 slices at 3 mm span 57 mm, so 58 samples 1 mm apart.
        let volume = Array3::from_shape_fn((20, 1, 1), |(z, _, _)| z as f32 * 3.0);
        let resampled = resample_isotropic(&volume, [3.0, 1.0, 1.0], 1.0)?;

        assert_eq!(resampled.dim(), (58, 1, 1));
        for (j, value) in resampled.iter().enumerate() {
            assert!((value - j as f32).abs() < 1e-3, "sample {} is {}", j, value);
        }
        Ok(())
    }

    #[test]
    fn test_near_unit_spacing_is_still_resampled() -> Result<()> {
        // 10 voxels at 1.04 mm round to 10 samples, which still sit 1 mm apart.
        let volume = Array3::from_shape_fn((10, 1, 1), |(z, _, _)| z as f32 * 1.04);
        let resampled = resample_isotropic(&volume, [1.04, 1.0, 1.0], 1.0)?;

        assert_eq!(resampled.dim(), (10, 1, 1));
        assert!((resampled[[5, 0, 0]] - 5.0).abs() < 1e-4);
        assert!((resampled[[9, 0, 0]] - 9.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_downsampling_clamps_at_last_voxel() -> Result<()> {
        // 4 voxels of 0.5 mm span 1.5 mm, which rounds to 3 samples; the last one
        // falls past the final voxel center and takes its value.
        let volume = Array3::from_shape_fn((4, 1, 1), |(z, _, _)| z as f32);
        let resampled = resample_isotropic(&volume, [0.5, 1.0, 1.0], 1.0)?;

        assert_eq!(resampled.dim(), (3, 1, 1));
        assert_eq!(resampled.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_invalid_spacing() {
        let volume = Array3::<f32>::zeros((2, 2, 2));
        assert!(resample_isotropic(&volume, [0.0, 1.0, 1.0], 1.0).is_err());
        assert!(resample_isotropic(&volume, [1.0, f64::NAN, 1.0], 1.0).is_err());
    }
}
