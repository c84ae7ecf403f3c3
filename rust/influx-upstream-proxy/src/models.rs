//! InfluxDB v1 `/query` response body.

use crate::error::{Result, ServiceError};
use serde::{ser::Error as _, ser::SerializeSeq, Serialize, Serializer};

pub const TIME_COLUMN: &str = "time";
pub const LAST_COLUMN: &str = "last";

// Integral floats inside this bound are written without a fraction, like the legacy server does.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyResponse {
    pub results: Vec<LegacyResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyResult {
    pub statement_id: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<LegacySeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacySeries {
    pub name: String,
    pub columns: Vec<String>,
    pub values: Vec<LegacyRow>,
}

/// One `[time, last]` row; `time` is whole epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyRow {
    pub time: i64,
    pub value: f64,
}

impl LegacyResponse {
    /// A single statement that matched nothing.
    pub fn empty() -> Self {
        Self {
            results: vec![LegacyResult {
                statement_id: 0,
                series: Vec::new(),
            }],
        }
    }

    pub fn last_value(name: &str, row: LegacyRow) -> Self {
        Self {
            results: vec![LegacyResult {
                statement_id: 0,
                series: vec![LegacySeries {
                    name: name.to_string(),
                    columns: vec![TIME_COLUMN.to_string(), LAST_COLUMN.to_string()],
                    values: vec![row],
                }],
            }],
        }
    }

    /// Serializes the body followed by a newline. Nothing is written on failure.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut body = serde_json::to_vec(self)
            .map_err(|err| ServiceError::EncodingFailed(err.to_string()))?;
        body.push(b'\n');
        Ok(body)
    }
}

impl Serialize for LegacyRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if !self.value.is_finite() {
            return Err(S::Error::custom(format!(
                "unsupported value {} at time {}",
                self.value, self.time
            )));
        }

        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.time)?;
        if self.value.fract() == 0.0 && self.value.abs() <= MAX_EXACT_INTEGER {
            seq.serialize_element(&(self.value as i64))?;
        } else {
            seq.serialize_element(&self.value)?;
        }
        seq.end()
    }
}
