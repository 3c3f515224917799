use ndarray::prelude::*;
use num_traits::Zero;

/// How a leading (depth) axis of some length is brought to a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthAdjustment {
    Keep,
    /// Zero slices added before and after the existing ones.
    Pad { before: usize, after: usize },
    /// First kept slice of a centered window.
    Crop { start: usize },
}

impl DepthAdjustment {
    pub const fn new(depth: usize, target: usize) -> Self {
        if depth < target {
            let (before, after) = symmetric_split(target - depth);
            Self::Pad { before, after }
        } else if depth > target {
            Self::Crop {
                start: (depth - target) / 2,
            }
        } else {
            Self::Keep
        }
    }
}

/// Splits a deficit into `(before, after)`, the smaller half first.
pub const fn symmetric_split(deficit: usize) -> (usize, usize) {
    let before = deficit / 2;
    (before, deficit - before)
}

/// Zero-pads or center-crops axis 0 so it has exactly `target` entries.
/// The other axes are left as they are.
pub fn fit_depth<A>(volume: ArrayView3<A>, target: usize) -> Array3<A>
where
    A: Clone + Zero,
{
    let (depth, height, width) = volume.dim();

    match DepthAdjustment::new(depth, target) {
        DepthAdjustment::Keep => volume.to_owned(),
        DepthAdjustment::Pad { before, .. } => {
            let mut canvas = Array3::zeros((target, height, width));
            canvas
                .slice_mut(s![before..before + depth, .., ..])
                .assign(&volume);
            canvas
        }
        DepthAdjustment::Crop { start } => volume.slice(s![start..start + target, .., ..]).to_owned(),
    }
}
