//! Detection payloads exchanged with the backend and viewers

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Annotations produced by the detection backend for a single frame
///
/// Wire shape: `{"boxes": [[x1,y1,x2,y2], ...], "labels": [...], "scores": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Bounding boxes as `[x1, y1, x2, y2]` in source pixel coordinates
    #[serde(default)]
    pub boxes: Vec<[f64; 4]>,

    /// Class label per box
    #[serde(default)]
    pub labels: Vec<String>,

    /// Confidence per box, in `[0, 1]`
    #[serde(default)]
    pub scores: Vec<f64>,
}

impl DetectionResult {
    /// Number of detected objects
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Check that the three sequences line up and scores are probabilities.
    pub fn validate(&self) -> Result<()> {
        let boxes = self.boxes.len();
        if self.labels.len() != boxes || self.scores.len() != boxes {
            return Err(RelayError::malformed_detection(format!(
                "{} boxes, {} labels, {} scores",
                boxes,
                self.labels.len(),
                self.scores.len()
            )));
        }

        if let Some(score) = self.scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(RelayError::malformed_detection(format!("score {score} outside [0, 1]")));
        }

        Ok(())
    }
}

/// Structured (text) message pushed to viewers
///
/// Raw frames travel as binary messages; everything else is one of these,
/// serialized as JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewerMessage {
    /// Detection result for a recently released frame
    Detections {
        data: DetectionResult,

        /// Sequence of the sampled frame. Best-effort: viewers must not assume
        /// it matches the frame they are currently showing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<u64>,
    },
}

impl ViewerMessage {
    pub fn detections(data: DetectionResult, frame: Option<u64>) -> Self {
        ViewerMessage::Detections { data, frame }
    }

    /// Serialize to the JSON text sent over the viewer transport
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
