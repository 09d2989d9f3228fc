use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_newtype!(EvaluationId);

/// Name under which a meter registered itself with the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeterId(pub String);

impl MeterId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(low, high)` brightness cut-offs applied to a digit crop.
pub type ThresholdPair = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    #[default]
    PickImage,
    Thresholds,
    Segmentation,
}

impl SetupStep {
    pub fn ordinal(self) -> u8 {
        match self {
            SetupStep::PickImage => 1,
            SetupStep::Thresholds => 2,
            SetupStep::Segmentation => 3,
        }
    }

    /// The step that follows ordinal `from`, if the flow has one.
    pub fn following(from: u8) -> Option<SetupStep> {
        match from {
            1 => Some(SetupStep::Thresholds),
            2 => Some(SetupStep::Segmentation),
            _ => None,
        }
    }
}

/// Flat per-meter configuration record as stored by the server.
///
/// Nothing here enforces `low <= high` for the threshold pairs; the editing
/// controls are expected to keep them ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub threshold_low: i32,
    pub threshold_high: i32,
    pub threshold_last_low: i32,
    pub threshold_last_high: i32,
    pub islanding_padding: i32,
    pub segments: u32,
    #[serde(deserialize_with = "crate::protocol::flag_from_wire")]
    pub extended_last_digit: bool,
    #[serde(deserialize_with = "crate::protocol::flag_from_wire")]
    pub shrink_last_3: bool,
    #[serde(deserialize_with = "crate::protocol::flag_from_wire")]
    pub rotated_180: bool,
    pub max_flow_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_threshold: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold_low: 0,
            threshold_high: 100,
            threshold_last_low: 0,
            threshold_last_high: 100,
            islanding_padding: 0,
            segments: 0,
            extended_last_digit: false,
            shrink_last_3: false,
            rotated_180: false,
            max_flow_rate: 1.0,
            conf_threshold: None,
        }
    }
}
