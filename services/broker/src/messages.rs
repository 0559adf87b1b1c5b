//! Wire schemas for the frame distribution topology.
//!
//! Every message crossing the broker has an explicit serde struct; raw frame
//! bytes travel base64-encoded inside JSON. Field casing follows the wire
//! contract consumed by downstream services, hence the renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Camera activation broadcast published by the registration gateway.
///
/// Fanned out to every queue currently bound to the activation exchange;
/// subscribers that bind later never see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraActivation {
    pub camera_id: String,
    pub camera_url: String,
    pub running: bool,
    pub user_id: String,
    /// Requested object classes, lowercase
    pub object_list: Vec<String>,
}

/// Frame envelope consumed by frame workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub camera_id: String,
    /// Encoded image bytes
    #[serde(with = "base64_bytes")]
    pub frame: Vec<u8>,
    pub user_id: String,
    /// Capture timestamp
    pub date_time: DateTime<Utc>,
    /// Object-class filter inherited from the camera's registration
    #[serde(default)]
    pub object_list: Vec<String>,
}

/// Base64 serialization helper
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Normalize an operator-supplied object list into lowercase class names.
///
/// Registration requests carry the list as a free-form string
/// (`"person, car"`, `"['Person','Car']"`, a bare `"[]"`); the wire schemas
/// carry a typed vector.
pub fn normalize_object_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| {
        c.is_whitespace() || matches!(c, ',' | '[' | ']' | '(' | ')' | '"' | '\'')
    })
    .filter(|token| !token.is_empty())
    .map(str::to_lowercase)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_wire_field_names() {
        let activation = CameraActivation {
            camera_id: "cam-20".to_string(),
            camera_url: "rtsp://example/stream".to_string(),
            running: true,
            user_id: "user-7".to_string(),
            object_list: vec!["person".to_string()],
        };

        let value = serde_json::to_value(&activation).unwrap();
        assert_eq!(value["CameraId"], "cam-20");
        assert_eq!(value["CameraUrl"], "rtsp://example/stream");
        assert_eq!(value["Running"], true);
        assert_eq!(value["UserId"], "user-7");
        assert_eq!(value["ObjectList"][0], "person");
    }

    #[test]
    fn test_frame_payload_roundtrip() {
        let payload = FramePayload {
            camera_id: "cam-21".to_string(),
            frame: vec![0xff, 0xd8, 0xff, 0xe0],
            user_id: "user-7".to_string(),
            date_time: "2024-01-15T10:30:00Z".parse().unwrap(),
            object_list: vec!["person".to_string(), "car".to_string()],
        };

        let json = serde_json::to_string(&payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        // Frame bytes are base64 text on the wire
        assert_eq!(value["frame"], "/9j/4A==");

        let back: FramePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_frame_payload_object_list_defaults_empty() {
        let json = r#"{
            "camera_id": "cam-1",
            "frame": "AAEC",
            "user_id": "u",
            "date_time": "2024-01-15T10:30:00Z"
        }"#;
        let payload: FramePayload = serde_json::from_str(json).unwrap();
        assert!(payload.object_list.is_empty());
        assert_eq!(payload.frame, vec![0, 1, 2]);
    }

    #[test]
    fn test_normalize_object_list() {
        assert_eq!(
            normalize_object_list("['Person','Car']"),
            vec!["person", "car"]
        );
        assert_eq!(normalize_object_list("PERSON, dog"), vec!["person", "dog"]);
        assert_eq!(normalize_object_list("person"), vec!["person"]);
        assert!(normalize_object_list("[]").is_empty());
        assert!(normalize_object_list("").is_empty());
    }
}
