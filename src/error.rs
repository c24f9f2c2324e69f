//! Typed failures for the control plane.
//!
//! Validation problems and gate state conflicts are reported to the caller
//! as values; connector failures live in `signals::connector` because the
//! monitor and kill-switch absorb them instead of propagating.

use crate::gates::GateStatus;

/// Malformed input rejected before any computation runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A probability-like field fell outside its allowed range.
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// A numeric field was NaN or infinite.
    NotFinite { field: &'static str },
    /// A sample set that must be non-empty was empty.
    EmptySample { field: &'static str },
    /// A required text field was blank.
    Blank { field: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(
                f,
                "{} = {} is outside the allowed range [{}, {}]",
                field, value, min, max
            ),
            Self::NotFinite { field } => write!(f, "{} must be a finite number", field),
            Self::EmptySample { field } => write!(f, "{} must contain at least one value", field),
            Self::Blank { field } => write!(f, "{} must not be empty", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure reported by a gate store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No gate with this id exists.
    NotFound { gate_id: String },
    /// The stored gate changed since it was read.
    VersionConflict {
        gate_id: String,
        expected: u64,
        actual: u64,
    },
    /// The backend itself is unreachable or broken.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { gate_id } => write!(f, "gate {} not found in store", gate_id),
            Self::VersionConflict {
                gate_id,
                expected,
                actual,
            } => write!(
                f,
                "gate {} was modified concurrently (expected version {}, found {})",
                gate_id, expected, actual
            ),
            Self::Backend(msg) => write!(f, "gate store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Failure of a gate operation, shaped for the API layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GateError {
    NotFound { gate_id: String },
    AlreadyDecided { gate_id: String, status: GateStatus },
    Invalid(ValidationError),
    Store(StoreError),
}

impl GateError {
    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyDecided { .. } => 409,
            Self::Invalid(_) => 400,
            Self::Store(_) => 500,
        }
    }
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { gate_id } => write!(f, "gate {} not found", gate_id),
            Self::AlreadyDecided { gate_id, status } => {
                write!(f, "gate {} already decided ({})", gate_id, status.as_str())
            }
            Self::Invalid(err) => write!(f, "invalid gate request: {}", err),
            Self::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for GateError {
    fn from(err: ValidationError) -> Self {
        Self::Invalid(err)
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { gate_id } => Self::NotFound { gate_id },
            other => Self::Store(other),
        }
    }
}

/// Reject NaN and infinities.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NotFinite { field })
    }
}

/// Reject values outside `[min, max]`.
pub(crate) fn ensure_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    ensure_finite(field, value)?;
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Reject values outside the open interval `(min, max)`.
pub(crate) fn ensure_open_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    ensure_range(field, value, min, max)?;
    if value == min || value == max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_gate_not_found() {
        let err: GateError = StoreError::NotFound {
            gate_id: "g-1".into(),
        }
        .into();
        assert_eq!(err.http_status(), 404);
        assert!(matches!(err, GateError::NotFound { .. }));
    }

    #[test]
    fn test_already_decided_is_conflict() {
        let err = GateError::AlreadyDecided {
            gate_id: "g-1".into(),
            status: GateStatus::Approved,
        };
        assert_eq!(err.http_status(), 409);
        assert!(err.to_string().contains("approved"));
    }

    #[test]
    fn test_range_check() {
        assert!(ensure_range("confidence", 0.5, 0.0, 1.0).is_ok());
        assert!(ensure_range("confidence", 1.5, 0.0, 1.0).is_err());
        assert_eq!(
            ensure_range("confidence", f64::NAN, 0.0, 1.0),
            Err(ValidationError::NotFinite {
                field: "confidence"
            })
        );
    }

    #[test]
    fn test_open_range_rejects_endpoints() {
        assert!(ensure_open_range("confidence", 0.95, 0.0, 1.0).is_ok());
        assert!(ensure_open_range("confidence", 0.0, 0.0, 1.0).is_err());
        assert!(ensure_open_range("confidence", 1.0, 0.0, 1.0).is_err());
        assert!(ensure_open_range("confidence", f64::INFINITY, 0.0, 1.0).is_err());
    }
}
