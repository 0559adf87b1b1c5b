//! Collaborator seams for detection/tracking and embedding extraction.
//!
//! The detector, the multi-object tracker and the appearance-embedding model
//! are external capabilities; the worker depends only on these traits. Stub
//! backends stand in where a deployment has not wired real models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel-coordinate bounding box, corner form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// One tracked detection emitted for a single frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub class_name: String,
    /// Stable only within one camera's tracking session
    pub track_id: u64,
    /// Confidence score in [0, 1]
    pub confidence: f32,
}

/// Errors from the detection/tracking backend
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Detection backend failed: {0}")]
    Backend(String),
}

/// Errors from the embedding backend
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Degenerate crop ({x1},{y1})-({x2},{y2})")]
    DegenerateCrop { x1: i32, y1: i32, x2: i32, y2: i32 },

    #[error("Embedding backend failed: {0}")]
    Backend(String),
}

/// Detect and track objects in encoded frames
#[async_trait]
pub trait DetectorTracker: Send + Sync {
    async fn detect(&self, frame: &[u8]) -> Result<Vec<TrackedDetection>, DetectorError>;
}

/// Produce a fixed-length appearance embedding for one detection crop
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, frame: &[u8], bbox: &BoundingBox)
        -> Result<Vec<f32>, ExtractionError>;
}

/// Development backend that detects nothing
#[derive(Debug, Default)]
pub struct StubDetector;

#[async_trait]
impl DetectorTracker for StubDetector {
    async fn detect(&self, _frame: &[u8]) -> Result<Vec<TrackedDetection>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Development backend that rejects every crop, so accidental production
/// wiring shows up in the logs instead of minting garbage identities
#[derive(Debug, Default)]
pub struct StubExtractor;

#[async_trait]
impl FeatureExtractor for StubExtractor {
    async fn extract(
        &self,
        _frame: &[u8],
        _bbox: &BoundingBox,
    ) -> Result<Vec<f32>, ExtractionError> {
        Err(ExtractionError::Backend(
            "no embedding backend configured".to_string(),
        ))
    }
}
