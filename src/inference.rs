//! Wraps normalized inputs into model batches and unwraps model outputs.

use ndarray::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::errors::{MriSegError, Result};
use crate::loader::{ClassificationInput, Volume};
use crate::traits::{VolumeClassificationModel, VolumeSegmentationModel};
use crate::volumeops::padding::symmetric_split;

/// Per-voxel class indices, same shape as the segmented volume.
pub type LabelVolume = Array3<u8>;

/// Patch-wise inference over a volume larger than the network's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindow {
    pub roi: [usize; 3],
    pub sw_batch_size: usize,
    pub overlap: f32,
}

impl SlidingWindow {
    pub const fn new(roi: [usize; 3], sw_batch_size: usize, overlap: f32) -> Self {
        Self {
            roi,
            sw_batch_size,
            overlap,
        }
    }

    pub const fn from_config(config: &Config) -> Self {
        Self::new(config.roi(), config.sw_batch_size, config.sw_overlap)
    }

    /// Runs `model` over every window and blends overlapping outputs by
    /// averaging. Returns logits shaped `(classes, depth, height, width)`.
    pub fn infer<M>(&self, model: &M, volume: ArrayView3<f32>, num_classes: usize) -> Result<Array4<f32>>
    where
        M: VolumeSegmentationModel + ?Sized,
    {
        let shape = [volume.dim().0, volume.dim().1, volume.dim().2];
        let pads: [(usize, usize); 3] =
            std::array::from_fn(|i| symmetric_split(self.roi[i].saturating_sub(shape[i])));
        let padded_shape: [usize; 3] = std::array::from_fn(|i| shape[i] + pads[i].0 + pads[i].1);

        let mut padded = Array3::<f32>::zeros(padded_shape);
        padded
            .slice_mut(s![
                pads[0].0..pads[0].0 + shape[0],
                pads[1].0..pads[1].0 + shape[1],
                pads[2].0..pads[2].0 + shape[2]
            ])
            .assign(&volume);

        let starts: [Vec<usize>; 3] =
            std::array::from_fn(|i| scan_starts(padded_shape[i], self.roi[i], self.overlap));
        let [zs, ys, xs] = &starts;
        let windows: Vec<[usize; 3]> = zs
            .iter()
            .flat_map(|&z| {
                ys.iter()
                    .flat_map(move |&y| xs.iter().map(move |&x| [z, y, x]))
            })
            .collect();
        debug!(?padded_shape, windows = windows.len(), "sliding window scan");

        let [rd, rh, rw] = self.roi;
        let mut sums = Array4::<f32>::zeros((num_classes, padded_shape[0], padded_shape[1], padded_shape[2]));
        let mut counts = Array3::<f32>::zeros(padded_shape);

        for chunk in windows.chunks(self.sw_batch_size.max(1)) {
            let mut batch = Array5::<f32>::zeros((chunk.len(), 1, rd, rh, rw));
            for (b, &[z, y, x]) in chunk.iter().enumerate() {
                batch
                    .slice_mut(s![b, 0, .., .., ..])
                    .assign(&padded.slice(s![z..z + rd, y..y + rh, x..x + rw]));
            }

            let output = model.predict(batch.view())?;
            let expected = [chunk.len(), num_classes, rd, rh, rw];
            if output.shape() != expected {
                return Err(MriSegError::model(
                    "sliding window inference",
                    format!("model returned shape {:?}, expected {:?}", output.shape(), expected),
                ));
            }

            for (b, &[z, y, x]) in chunk.iter().enumerate() {
                let mut region = sums.slice_mut(s![.., z..z + rd, y..y + rh, x..x + rw]);
                region += &output.slice(s![b, .., .., .., ..]);
                counts
                    .slice_mut(s![z..z + rd, y..y + rh, x..x + rw])
                    .mapv_inplace(|c| c + 1.0);
            }
        }

        for mut class in sums.outer_iter_mut() {
            class.zip_mut_with(&counts, |sum, &count| *sum /= count.max(1.0));
        }

        Ok(sums
            .slice_move(s![
                ..,
                pads[0].0..pads[0].0 + shape[0],
                pads[1].0..pads[1].0 + shape[1],
                pads[2].0..pads[2].0 + shape[2]
            ])
            .as_standard_layout()
            .into_owned())
    }
}

/// Window start offsets along one axis of length `size >= roi`.
pub fn scan_starts(size: usize, roi: usize, overlap: f32) -> Vec<usize> {
    let interval = if roi >= size {
        roi
    } else {
        ((roi as f32 * (1.0 - overlap)) as usize).max(1)
    };
    let span = size.saturating_sub(roi);
    let steps = span.div_ceil(interval) + 1;

    let mut starts: Vec<usize> = (0..steps).map(|k| (k * interval).min(span)).collect();
    starts.dedup();
    starts
}

/// Index of the largest value along axis 0; ties go to the lower index.
pub fn argmax_labels(logits: ArrayView4<f32>) -> LabelVolume {
    logits.map_axis(Axis(0), |lane| argmax(lane) as u8)
}

pub fn argmax(values: ArrayView1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}

pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

/// Batch the volume, run sliding-window inference, take the per-voxel class.
pub fn segment_volume<M>(
    model: &M,
    volume: &Volume,
    window: &SlidingWindow,
    num_classes: usize,
) -> Result<LabelVolume>
where
    M: VolumeSegmentationModel + ?Sized,
{
    let logits = window.infer(model, volume.view(), num_classes)?;
    Ok(argmax_labels(logits.view()))
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    Normal,
    Abnormal,
}

impl Diagnosis {
    pub const fn from_class(index: usize) -> Self {
        if index == 1 {
            Self::Abnormal
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub prediction: Diagnosis,
    pub probability_abnormal: f32,
}

/// Forward pass, softmax over the two logits, argmax as the label.
pub fn classify_input<M>(model: &M, input: &ClassificationInput) -> Result<Classification>
where
    M: VolumeClassificationModel + ?Sized,
{
    let batch = input.view().insert_axis(Axis(0));
    let logits = model.predict(batch)?;
    if logits.dim() != (1, 2) {
        return Err(MriSegError::model(
            "classification",
            format!("model returned shape {:?}, expected [1, 2]", logits.shape()),
        ));
    }

    let probabilities = softmax(logits.row(0));
    Ok(Classification {
        prediction: Diagnosis::from_class(argmax(probabilities.view())),
        probability_abnormal: probabilities[1],
    })
}
