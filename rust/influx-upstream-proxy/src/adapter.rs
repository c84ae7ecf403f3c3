//! Maps a backend instant-query result onto the legacy response body.

use crate::{
    backend::{QueryValue, Sample},
    error::{Result, ServiceError},
    models::{LegacyResponse, LegacyRow},
};

/// Scalar and single-sample vectors become one row named `metric`; an empty
/// vector becomes an empty statement. Anything else cannot be represented.
pub fn adapt(value: QueryValue, metric: &str) -> Result<LegacyResponse> {
    let sample = match value {
        QueryValue::Scalar(sample) => sample,
        QueryValue::Vector(mut samples) => {
            if samples.len() > 1 {
                return Err(ServiceError::AmbiguousResult(samples.len()));
            }
            match samples.pop() {
                Some(only) => only.sample,
                None => return Ok(LegacyResponse::empty()),
            }
        }
        other => {
            return Err(ServiceError::UnsupportedResultType(
                other.type_name().to_string(),
            ))
        }
    };

    Ok(LegacyResponse::last_value(metric, to_row(sample)))
}

// Truncate to whole seconds; never round up into the next second.
fn to_row(sample: Sample) -> LegacyRow {
    LegacyRow {
        time: sample.timestamp.floor() as i64,
        value: sample.value,
    }
}
