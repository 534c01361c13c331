//! Wire types of the prediction endpoint.
//!
use serde::{Deserialize, Serialize};

/// Route serving predictions.
pub const PREDICT_ROUTE: &str = "/predict";

/// Name of the multipart field carrying the uploaded image.
pub const FILE_FIELD: &str = "file";

/// One object found on an uploaded image.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    /// Class label of the detected object.
    pub breed: String,
    /// Confidence score in `[0, 1]`.
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixel coordinates of the uploaded image.
    pub bounding_box: [f32; 4],
}

impl Detection {
    pub fn new(breed: String, confidence: f32, bounding_box: [f32; 4]) -> Self {
        Self {
            breed,
            confidence,
            bounding_box,
        }
    }
}

/// Body of every non-200 response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn test_detection_json_layout() -> Result<(), Error> {
        let detection = Detection::new("beagle".into(), 0.5, [1.0, 2.0, 30.5, 40.0]);

        let value = serde_json::to_value(&detection)?;

        assert_eq!(
            value,
            serde_json::json!({
                "breed": "beagle",
                "confidence": 0.5,
                "bounding_box": [1.0, 2.0, 30.5, 40.0],
            })
        );

        Ok(())
    }

    #[test]
    fn test_error_body_from_json() -> Result<(), Error> {
        let body: ErrorBody = serde_json::from_str(r#"{"error": "No file part in the request"}"#)?;

        assert_eq!(body, ErrorBody::new("No file part in the request"));

        Ok(())
    }
}
