use ndarray::prelude::*;

use crate::errors::{MriSegError, Result};

/// Voxel-to-world transform, row major, last row `[0, 0, 0, 1]`.
pub type Affine = [[f64; 4]; 4];

/// Axis permutation and reversals that bring a voxel grid into RAS order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orientation {
    /// `axes[w]` is the voxel axis that runs along world axis `w` (R, A, S).
    pub axes: [usize; 3],
    /// Set when that voxel axis points toward L, P or I.
    pub flips: [bool; 3],
}

impl Orientation {
    /// Pairs every voxel axis with the world axis its direction cosine is
    /// largest along, strongest pairing first.
    pub fn from_affine(affine: &Affine) -> Result<Self> {
        let spacing = voxel_spacing(affine);
        let mut cosines = [[0.0; 3]; 3]; // [world][voxel]
        for v in 0..3 {
            if !(spacing[v].is_finite() && spacing[v] > 0.0) {
                return Err(MriSegError::preprocessing(
                    "orientation",
                    format!("degenerate affine column {} (norm {})", v, spacing[v]),
                ));
            }
            for (w, row) in cosines.iter_mut().enumerate() {
                row[v] = affine[w][v] / spacing[v];
            }
        }

        let mut axes = [0; 3];
        let mut flips = [false; 3];
        let mut world_done = [false; 3];
        let mut voxel_done = [false; 3];

        for _ in 0..3 {
            let mut best: Option<(usize, usize, f64)> = None;
            for w in (0..3).filter(|&w| !world_done[w]) {
                for v in (0..3).filter(|&v| !voxel_done[v]) {
                    let strength = cosines[w][v].abs();
                    if best.map_or(true, |(_, _, s)| strength > s) {
                        best = Some((w, v, strength));
                    }
                }
            }
            // three free rows and columns on every pass, so there is always a pick
            let Some((w, v, _)) = best else { break };
            axes[w] = v;
            flips[w] = cosines[w][v] < 0.0;
            world_done[w] = true;
            voxel_done[v] = true;
        }

        Ok(Self { axes, flips })
    }

    pub fn is_canonical(&self) -> bool {
        self.axes == [0, 1, 2] && self.flips == [false; 3]
    }

    pub fn apply<A: Clone>(&self, volume: Array3<A>) -> Array3<A> {
        if self.is_canonical() {
            return volume;
        }

        let mut reoriented = volume.permuted_axes(self.axes);
        for (w, &flip) in self.flips.iter().enumerate() {
            if flip {
                reoriented.invert_axis(Axis(w));
            }
        }
        reoriented.as_standard_layout().into_owned()
    }

    /// Voxel spacing listed in the reoriented axis order.
    pub const fn apply_spacing(&self, spacing: [f64; 3]) -> [f64; 3] {
        [
            spacing[self.axes[0]],
            spacing[self.axes[1]],
            spacing[self.axes[2]],
        ]
    }
}

/// Length of each voxel axis in world units (the affine's column norms).
pub fn voxel_spacing(affine: &Affine) -> [f64; 3] {
    let mut spacing = [0.0; 3];
    for (v, s) in spacing.iter_mut().enumerate() {
        *s = (0..3).map(|w| affine[w][v].powi(2)).sum::<f64>().sqrt();
    }
    spacing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(x: f64, y: f64, z: f64) -> Affine {
        [
            [x, 0.0, 0.0, 0.0],
            [0.0, y, 0.0, 0.0],
            [0.0, 0.0, z, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn test_ras_is_canonical() -> Result<()> {
        let orientation = Orientation::from_affine(&diagonal(1.0, 2.0, 3.0))?;
        assert!(orientation.is_canonical());
        assert_eq!(voxel_spacing(&diagonal(1.0, 2.0, 3.0)), [1.0, 2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_las_flips_first_axis() -> Result<()> {
        let orientation = Orientation::from_affine(&diagonal(-1.0, 1.0, 1.0))?;
        assert_eq!(orientation.axes, [0, 1, 2]);
        assert_eq!(orientation.flips, [true, false, false]);

        let volume = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| x as f32);
        let reoriented = orientation.apply(volume);
        assert_eq!(reoriented.slice(s![.., 0, 0]).to_vec(), vec![2.0, 1.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_permuted_axes() -> Result<()> {
        // voxel i runs along S, voxel j along R, voxel k along -A
        let affine = [
            [0.0, 0.5, 0.0, 0.0],
            [0.0, 0.0, -2.0, 0.0],
            [3.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let orientation = Orientation::from_affine(&affine)?;
        assert_eq!(orientation.axes, [1, 2, 0]);
        assert_eq!(orientation.flips, [false, true, false]);
        assert_eq!(
            orientation.apply_spacing(voxel_spacing(&affine)),
            [0.5, 2.0, 3.0]
        );

        let volume = Array3::from_shape_fn((4, 5, 6), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        let reoriented = orientation.apply(volume);
        assert_eq!(reoriented.dim(), (5, 6, 4));
        // new (r, a, s) = old (s, r, 5 - a)
        assert_eq!(reoriented[[2, 0, 3]], 325.0);
        assert!(reoriented.is_standard_layout());
        Ok(())
    }

    #[test]
    fn test_degenerate_affine() {
        let affine = diagonal(1.0, 0.0, 1.0);
        assert!(Orientation::from_affine(&affine).is_err());
    }
}
