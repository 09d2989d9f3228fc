use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::EvaluationId;

#[derive(Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
}

/// Decodes a flag the server stores as an integer column. Only `1` is true;
/// plain JSON booleans are accepted as-is.
pub fn flag_from_wire<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match WireFlag::deserialize(deserializer)? {
        WireFlag::Bool(value) => value,
        WireFlag::Int(value) => value == 1,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictureData {
    pub format: String,
    pub timestamp: String,
    pub width: u32,
    pub height: u32,
    pub length: u64,
    /// Base64 encoded image bytes.
    pub data: String,
}

/// Latest capture reported by a meter, as returned by `GET /api/watermeters/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub name: String,
    pub picture_number: i64,
    #[serde(rename = "WiFi-RSSI", default)]
    pub wifi_rssi: i32,
    pub picture: PictureData,
}

/// One `(digit, confidence)` guess from the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitCandidate(pub String, pub f64);

/// Ranked candidates for a single digit position.
pub type DigitPrediction = Vec<DigitCandidate>;

fn best_reading(predictions: &[DigitPrediction]) -> String {
    predictions
        .iter()
        .map(|candidates| {
            candidates
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|candidate| candidate.0.as_str())
                .unwrap_or("?")
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub colored_digits: Vec<String>,
    #[serde(default)]
    pub processed_images: Vec<String>,
    #[serde(default)]
    pub predictions: Vec<DigitPrediction>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Evaluation {
    /// Highest-confidence digit per position, `?` where a position has no candidates.
    pub fn reading(&self) -> String {
        best_reading(&self.predictions)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationsResponse {
    #[serde(default)]
    pub evals: Vec<Evaluation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationsQuery {
    pub amount: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: i64,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "flag_from_wire")]
    pub manual: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Digits re-segmented from a stored capture under the current settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitSample {
    pub processed_images: Vec<String>,
    pub predictions: Vec<DigitPrediction>,
}

impl DigitSample {
    pub fn reading(&self) -> String {
        best_reading(&self.predictions)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleResponse {
    #[serde(default)]
    pub processed_images: Vec<String>,
    #[serde(default)]
    pub predictions: Vec<DigitPrediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SampleResponse {
    pub fn into_sample(self) -> Result<DigitSample, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(DigitSample {
                processed_images: self.processed_images,
                predictions: self.predictions,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReevaluateResponse {
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReevaluateResponse {
    /// A missing or `false` result means no display bounding box was found.
    pub fn bounding_box_found(&self) -> bool {
        self.result.unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
