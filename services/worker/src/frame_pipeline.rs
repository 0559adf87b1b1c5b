//! Per-frame processing: filter detections, extract embeddings, assign
//! identities.
//!
//! Consumes the output of the detection/tracking collaborator for one frame
//! at a time. Detections outside the camera's object filter or below the
//! confidence gate are dropped; a failed embedding extraction skips that
//! detection without failing the frame.

use crate::config::MatchingConfig;
use crate::detector::{DetectorError, DetectorTracker, FeatureExtractor, TrackedDetection};
use crate::gallery::{IdentityGallery, IdentityId};
use revid_broker::diagnostics::DiagnosticsHandle;
use revid_broker::messages::FramePayload;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const EVENT_TYPE: &str = "frame-worker";

/// Detection annotated with its cross-camera identity
#[derive(Debug, Clone)]
pub struct AnnotatedDetection {
    pub detection: TrackedDetection,
    pub identity_id: IdentityId,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectorError),
}

/// One camera frame's trip from detections to annotated identities
pub struct FramePipeline {
    detector: Arc<dyn DetectorTracker>,
    extractor: Arc<dyn FeatureExtractor>,
    gallery: Arc<IdentityGallery>,
    reid_threshold: f32,
    min_confidence: f32,
    diagnostics: Option<DiagnosticsHandle>,
}

impl FramePipeline {
    pub fn new(
        detector: Arc<dyn DetectorTracker>,
        extractor: Arc<dyn FeatureExtractor>,
        gallery: Arc<IdentityGallery>,
        matching: &MatchingConfig,
    ) -> Self {
        Self {
            detector,
            extractor,
            gallery,
            reid_threshold: matching.reid_threshold,
            min_confidence: matching.min_confidence,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, handle: DiagnosticsHandle) -> Self {
        self.diagnostics = Some(handle);
        self
    }

    /// Current gallery size, for diagnostics
    pub fn gallery_len(&self) -> usize {
        self.gallery.len()
    }

    /// Process one frame envelope end to end.
    pub async fn process(
        &self,
        frame: &FramePayload,
    ) -> Result<Vec<AnnotatedDetection>, PipelineError> {
        let detections = self.detector.detect(&frame.frame).await?;
        metrics::counter!("worker.detections.total").increment(detections.len() as u64);

        let mut annotated = Vec::new();
        for detection in detections {
            if !class_requested(&frame.object_list, &detection.class_name) {
                debug!(
                    camera_id = %frame.camera_id,
                    class = %detection.class_name,
                    "Skipping detection outside the object filter"
                );
                continue;
            }
            if detection.confidence <= self.min_confidence {
                debug!(
                    camera_id = %frame.camera_id,
                    track_id = detection.track_id,
                    confidence = detection.confidence,
                    "Skipping low-confidence detection"
                );
                continue;
            }

            let embedding = match self.extractor.extract(&frame.frame, &detection.bbox).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(
                        camera_id = %frame.camera_id,
                        track_id = detection.track_id,
                        error = %err,
                        "Skipping detection without embedding"
                    );
                    if let Some(diagnostics) = &self.diagnostics {
                        diagnostics.error(
                            EVENT_TYPE,
                            format!(
                                "Embedding extraction failed for camera {}: {err}",
                                frame.camera_id
                            ),
                        );
                    }
                    metrics::counter!("worker.embeddings.failed").increment(1);
                    continue;
                }
            };

            let identity_id = self.gallery.match_or_insert(&embedding, self.reid_threshold);
            debug!(
                camera_id = %frame.camera_id,
                track_id = detection.track_id,
                identity_id,
                "Assigned identity"
            );
            annotated.push(AnnotatedDetection {
                detection,
                identity_id,
            });
        }

        metrics::counter!("worker.detections.identified").increment(annotated.len() as u64);
        metrics::gauge!("worker.gallery.identities").set(self.gallery.len() as f64);
        Ok(annotated)
    }
}

/// An empty filter requests nothing; classes compare case-insensitively.
fn class_requested(filter: &[String], class_name: &str) -> bool {
    filter.iter().any(|c| c.eq_ignore_ascii_case(class_name))
}
