use std::path::Path;

use crate::{
    errors::{MriSegError, Result},
    traits::{VolumeClassificationModel, VolumeSegmentationModel},
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::info;

/// An ONNX Runtime session plus the names of its first input and output.
///
/// `Session::run` needs `&mut self`, so concurrent requests take turns on the lock.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    pub fn new(model_path: &Path, num_threads: usize, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| MriSegError::model("session builder init", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| MriSegError::model("execution provider registration", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| MriSegError::model("intra-op thread setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| MriSegError::model("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| MriSegError::model(format!("model load: {}", model_path.display()), e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| MriSegError::model("model input lookup", "graph has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| MriSegError::model("model output lookup", "graph has no outputs"))?;

        info!(
            path = %model_path.display(),
            input = %input_name,
            output = %output_name,
            "loaded ONNX model"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    pub fn run<D: Dimension>(&self, tensor: ArrayView5<f32>) -> Result<Array<f32, D>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<D>()?
            .to_owned())
    }
}

/// 3D U-Net exported to ONNX: `(B, 1, D, H, W) -> (B, classes, D, H, W)`.
pub struct OnnxSegmentationModel {
    session: OnnxSession,
}

impl OnnxSegmentationModel {
    /// Loads the graph and runs one window of zeros so the first request does
    /// not pay for provider initialization.
    pub fn new(model_path: &Path, roi: [usize; 3], num_threads: usize, device_id: i32) -> Result<Self> {
        let model = Self {
            session: OnnxSession::new(model_path, num_threads, device_id)?,
        };

        let [d, h, w] = roi;
        let data = Array5::<f32>::zeros((1, 1, d, h, w));
        model.predict(data.view()).map_err(|e| MriSegError::model("segmentation warm-up", e))?;

        Ok(model)
    }
}

impl VolumeSegmentationModel for OnnxSegmentationModel {
    fn predict(&self, windows: ArrayView5<f32>) -> Result<Array5<f32>> {
        self.session.run::<Ix5>(windows)
    }
}

/// 3D ResNet exported to ONNX: `(B, 1, D, H, W) -> (B, 2)` logits.
pub struct OnnxClassificationModel {
    session: OnnxSession,
}

impl OnnxClassificationModel {
    pub fn new(model_path: &Path, num_threads: usize, device_id: i32) -> Result<Self> {
        Ok(Self {
            session: OnnxSession::new(model_path, num_threads, device_id)?,
        })
    }
}

impl VolumeClassificationModel for OnnxClassificationModel {
    fn predict(&self, input: ArrayView5<f32>) -> Result<Array2<f32>> {
        self.session.run::<Ix2>(input)
    }
}
