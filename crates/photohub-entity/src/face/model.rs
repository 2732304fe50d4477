//! Face record entity model.

use serde::{Deserialize, Serialize};

/// Pixel-coordinate bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBounds {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Box width.
    pub width: u32,
    /// Box height.
    pub height: u32,
}

/// A single face detected in a photo.
///
/// The embedding is an opaque vector produced by the detection service;
/// the queue carries it through to storage without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Face embedding vector used for later similarity comparison.
    pub embedding: Vec<f32>,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Location of the face within the photo.
    pub bounds: FaceBounds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        let face = FaceRecord {
            embedding: vec![0.1, -0.2, 0.3],
            confidence: 0.97,
            bounds: FaceBounds {
                x: 10,
                y: 20,
                width: 64,
                height: 64,
            },
        };
        let json = serde_json::to_string(&face).expect("serialize");
        let parsed: FaceRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, face);
    }
}
