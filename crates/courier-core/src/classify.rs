//! Payload and result shapes for image classification jobs.

use serde::{Deserialize, Serialize};

/// Job payload: an image already stored in the shared upload folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJob {
    pub image_name: String,
}

impl ImageJob {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
        }
    }
}

/// Top-1 prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: String,
    pub score: f64,
}

impl Prediction {
    /// `score` is rounded to 4 decimals.
    pub fn new(prediction: impl Into<String>, score: f64) -> Self {
        Self {
            prediction: prediction.into(),
            score: (score * 10_000.0).round() / 10_000.0,
        }
    }
}
