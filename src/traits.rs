use crate::errors::Result;
use ndarray::prelude::*;

/// A 3D segmentation network evaluated one batch of windows at a time.
///
/// Input is `(batch, 1, depth, height, width)`; output is per-class logits
/// shaped `(batch, classes, depth, height, width)` with the same spatial extent.
pub trait VolumeSegmentationModel: Send + Sync {
    fn predict(&self, windows: ArrayView5<f32>) -> Result<Array5<f32>>;
}

/// A 3D classification network.
///
/// Input is `(batch, 1, depth, height, width)`; output is logits shaped
/// `(batch, classes)`.
pub trait VolumeClassificationModel: Send + Sync {
    fn predict(&self, input: ArrayView5<f32>) -> Result<Array2<f32>>;
}

