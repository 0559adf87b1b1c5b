//! Camera registration: per-camera validation and activation broadcast.
//!
//! A batch is never rejected atomically. Each camera is validated and
//! published on its own; failures come back as per-camera error entries next
//! to whatever did succeed.

use revid_broker::diagnostics::DiagnosticsHandle;
use revid_broker::messages::{normalize_object_list, CameraActivation};
use revid_broker::publisher::ActivationPublisher;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const EVENT_TYPE: &str = "registration-gateway";

/// One camera descriptor submitted by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRegistration {
    #[serde(default)]
    pub camera_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub running: bool,
    /// Requested object classes as a free-form string
    #[serde(default)]
    pub objectlist: Option<String>,
}

/// Why a single camera failed to register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationErrorKind {
    Validation,
    Broker,
}

/// Per-camera failure description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraError {
    pub camera_id: String,
    pub kind: RegistrationErrorKind,
    pub error: String,
}

/// HTTP-style outcome of a registration batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<CameraError>,
}

impl RegistrationResponse {
    pub fn is_success(&self) -> bool {
        self.status == 201
    }

    fn summarize(total: usize, errors: Vec<CameraError>) -> Self {
        if errors.is_empty() {
            return Self {
                status: 201,
                message: "Cameras added/updated successfully".to_string(),
                errors,
            };
        }

        // Broker trouble outranks validation noise: it is the status an
        // operator can act on.
        let status = if errors
            .iter()
            .any(|e| e.kind == RegistrationErrorKind::Broker)
        {
            500
        } else {
            400
        };

        Self {
            status,
            message: format!("{} of {} cameras failed registration", errors.len(), total),
            errors,
        }
    }
}

/// Validates camera batches and broadcasts one activation per valid camera
pub struct RegistrationGateway<P> {
    publisher: P,
    diagnostics: Option<DiagnosticsHandle>,
}

impl<P: ActivationPublisher> RegistrationGateway<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, handle: DiagnosticsHandle) -> Self {
        self.diagnostics = Some(handle);
        self
    }

    /// Validate and broadcast a registration batch.
    ///
    /// Invalid cameras are reported individually; the rest of the batch
    /// still publishes. Broker failures surface as 5xx-equivalent entries,
    /// never as a crash.
    pub async fn register_cameras(&self, cameras: &[CameraRegistration]) -> RegistrationResponse {
        if cameras.is_empty() {
            self.diag_exception("No cameras provided in the request".to_string());
            return RegistrationResponse {
                status: 400,
                message: "No cameras provided".to_string(),
                errors: Vec::new(),
            };
        }

        let mut errors = Vec::new();

        for camera in cameras {
            if let Err(reason) = validate(camera) {
                warn!(camera_id = %camera.camera_id, reason = %reason, "Rejecting camera registration");
                self.diag_exception(format!(
                    "{reason} for camera {}",
                    display_id(&camera.camera_id)
                ));
                errors.push(CameraError {
                    camera_id: camera.camera_id.clone(),
                    kind: RegistrationErrorKind::Validation,
                    error: reason,
                });
                continue;
            }

            let activation = activation_for(camera);
            match self.publisher.publish_activation(activation).await {
                Ok(()) => {
                    info!(camera_id = %camera.camera_id, "Camera activation broadcast");
                    self.diag_info(format!(
                        "Queued activation for camera {}",
                        camera.camera_id
                    ));
                }
                Err(err) => {
                    warn!(camera_id = %camera.camera_id, error = %err, "Activation publish failed");
                    self.diag_exception(format!(
                        "Failed to publish activation for camera {}: {err}",
                        camera.camera_id
                    ));
                    errors.push(CameraError {
                        camera_id: camera.camera_id.clone(),
                        kind: RegistrationErrorKind::Broker,
                        error: err.to_string(),
                    });
                }
            }
        }

        RegistrationResponse::summarize(cameras.len(), errors)
    }

    fn diag_info(&self, message: String) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.info(EVENT_TYPE, message);
        }
    }

    fn diag_exception(&self, message: String) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.exception(EVENT_TYPE, message);
        }
    }
}

fn validate(camera: &CameraRegistration) -> Result<(), String> {
    let mut missing = Vec::new();
    if camera.camera_id.trim().is_empty() {
        missing.push("camera_id");
    }
    if camera.url.trim().is_empty() {
        missing.push("url");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing required fields: {}", missing.join(", ")))
    }
}

fn activation_for(camera: &CameraRegistration) -> CameraActivation {
    CameraActivation {
        camera_id: camera.camera_id.clone(),
        camera_url: camera.url.clone(),
        running: camera.running,
        user_id: camera.user_id.clone(),
        object_list: camera
            .objectlist
            .as_deref()
            .map(normalize_object_list)
            .unwrap_or_default(),
    }
}

fn display_id(camera_id: &str) -> &str {
    if camera_id.trim().is_empty() {
        "<unknown>"
    } else {
        camera_id
    }
}
