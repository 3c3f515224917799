pub mod config;
pub mod errors;
pub mod inference;
pub mod loader;
pub mod model;
pub mod render;
pub mod response;
pub mod server;
pub mod traits;
pub mod upload;
pub mod volumeops;

pub mod mocks;

use std::path::Path;
use tracing::info;

pub use config::{ColorMap, Config};
pub use errors::{MriSegError, Result};
pub use inference::{Classification, Diagnosis, LabelVolume, SlidingWindow};
pub use model::{OnnxClassificationModel, OnnxSegmentationModel};
pub use render::SliceImages;
pub use traits::*;

/// Result of one segmentation request before serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationReport {
    pub classes: Vec<usize>,
    pub images: SliceImages,
}

/// Owns the models and runs both request pipelines.
///
/// Built once at startup and shared read-only between handlers; the
/// classification stage is optional.
pub struct MriService<S: VolumeSegmentationModel, C: VolumeClassificationModel> {
    segmenter: S,
    classifier: Option<C>,
    config: Config,
}

impl<S: VolumeSegmentationModel, C: VolumeClassificationModel> MriService<S, C> {
    pub const fn new(segmenter: S, classifier: Option<C>, config: Config) -> Self {
        Self {
            segmenter,
            classifier,
            config,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn classification_enabled(&self) -> bool {
        self.classifier.is_some()
    }

    /// Load → normalize → sliding-window inference → render three mid-slices.
    pub fn segment_file(&self, path: &Path) -> Result<SegmentationReport> {
        let volume = loader::load_segmentation_volume(path)?;
        let labels = self.segment(&volume)?;

        let renderer = render::SliceRenderer::new(self.config.colormap, self.config.render_size);
        let images = renderer.render_all(&labels)?;

        info!(shape = ?labels.dim(), "segmentation finished");
        Ok(SegmentationReport {
            classes: self.config.classes(),
            images,
        })
    }

    pub fn segment(&self, volume: &loader::Volume) -> Result<LabelVolume> {
        inference::segment_volume(
            &self.segmenter,
            volume,
            &SlidingWindow::from_config(&self.config),
            self.config.num_classes,
        )
    }

    /// Load → normalize and fit depth → forward pass → softmax.
    pub fn classify_file(&self, path: &Path) -> Result<Classification> {
        let classifier = self.classifier.as_ref().ok_or_else(|| MriSegError::Configuration {
            message: "no classification model is configured".to_string(),
        })?;

        let input = loader::load_classification_input(path, self.config.fixed_slices)?;
        let classification = inference::classify_input(classifier, &input)?;

        info!(
            prediction = ?classification.prediction,
            probability_abnormal = classification.probability_abnormal,
            "classification finished"
        );
        Ok(classification)
    }
}

impl MriService<OnnxSegmentationModel, OnnxClassificationModel> {
    /// Loads both ONNX graphs named in `config`.
    pub fn with_onnx_models(config: Config) -> Result<Self> {
        let segmenter = OnnxSegmentationModel::new(
            &config.segmentation_model,
            config.roi(),
            config.num_threads,
            config.device_id,
        )?;
        let classifier = config
            .classification_model
            .as_deref()
            .map(|path| OnnxClassificationModel::new(path, config.num_threads, config.device_id))
            .transpose()?;
        Ok(Self::new(segmenter, classifier, config))
    }
}
