//! JSON payloads returned by the HTTP endpoints.

use serde::Serialize;

use crate::errors::MriSegError;
use crate::inference::{Classification, Diagnosis};
use crate::render::SliceImages;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SegmentResponse {
    Success {
        classes: Vec<usize>,
        images: SliceImages,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClassifyResponse {
    Success {
        prediction: Diagnosis,
        probability_abnormal: f64,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub classification_enabled: bool,
}

impl SegmentResponse {
    pub fn success(classes: Vec<usize>, images: SliceImages) -> Self {
        Self::Success { classes, images }
    }
}

impl From<&MriSegError> for SegmentResponse {
    fn from(err: &MriSegError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

impl ClassifyResponse {
    pub fn success(classification: Classification) -> Self {
        Self::Success {
            prediction: classification.prediction,
            probability_abnormal: round_to(classification.probability_abnormal as f64, 4),
        }
    }
}

impl From<&MriSegError> for ClassifyResponse {
    fn from(err: &MriSegError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segment_success_shape() {
        let response = SegmentResponse::success(
            vec![0, 1, 2],
            SliceImages {
                axial: "data:image/png;base64,AA==".to_string(),
                coronal: "data:image/png;base64,AQ==".to_string(),
                sagittal: "data:image/png;base64,Ag==".to_string(),
            },
        );

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "status": "success",
                "classes": [0, 1, 2],
                "images": {
                    "axial": "data:image/png;base64,AA==",
                    "coronal": "data:image/png;base64,AQ==",
                    "sagittal": "data:image/png;base64,Ag=="
                }
            })
        );
    }

    #[test]
    fn test_classify_success_rounds_probability() {
        let response = ClassifyResponse::success(Classification {
            prediction: Diagnosis::Abnormal,
            probability_abnormal: 0.876_543_2,
        });

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "status": "success",
                "prediction": "Abnormal",
                "probability_abnormal": 0.8765
            })
        );
    }

    #[test]
    fn test_error_shape() {
        let err = MriSegError::Upload {
            reason: "missing field `file`".to_string(),
        };
        let value = serde_json::to_value(ClassifyResponse::from(&err)).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Upload error: missing field `file`");
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123_46, 4), 0.1235);
        assert_eq!(round_to(1.0, 4), 1.0);
    }
}
