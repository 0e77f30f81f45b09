//! Parameter validation
//!
//! Checks a requested register value against the catalog before anything
//! is sent to the modem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog;

/// Reasons a parameter write is refused before reaching the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ValidationError {
    /// No register has this name
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Value outside the register range
    #[error("{parameter} value {value} out of range: must be between {min} and {max}")]
    OutOfRange {
        /// Register name
        parameter: String,
        /// Rejected value
        value: i64,
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
}

/// Validate `value` for the register called `name`.
///
/// Returns the register index to use in `ATS{index}={value}`.
pub fn validate(name: &str, value: i64) -> Result<u8, ValidationError> {
    let descriptor =
        catalog::lookup(name).ok_or_else(|| ValidationError::UnknownParameter(name.to_string()))?;

    if !descriptor.contains(value) {
        return Err(ValidationError::OutOfRange {
            parameter: descriptor.name.to_string(),
            value,
            min: descriptor.min_val,
            max: descriptor.max_val,
        });
    }

    Ok(descriptor.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::REGISTERS;

    #[test]
    fn test_every_value_in_range_resolves_index() {
        for r in &REGISTERS {
            // Walk the whole range for small registers, sample the frequency ones
            let step = ((r.max_val - r.min_val) / 500).max(1);
            let mut v = r.min_val;
            while v <= r.max_val {
                assert_eq!(validate(r.name, v), Ok(r.index), "{}={}", r.name, v);
                v += step;
            }
            assert_eq!(validate(r.name, r.max_val), Ok(r.index));
        }
    }

    #[test]
    fn test_values_outside_range_cite_bounds() {
        for r in &REGISTERS {
            for v in [r.min_val - 1, r.max_val + 1, i64::MIN, i64::MAX] {
                match validate(r.name, v) {
                    Err(ValidationError::OutOfRange { min, max, value, .. }) => {
                        assert_eq!((min, max, value), (r.min_val, r.max_val, v));
                    }
                    other => panic!("{}={} should be out of range, got {:?}", r.name, v, other),
                }
            }
        }
    }

    #[test]
    fn test_unknown_parameter() {
        assert_eq!(
            validate("BOGUS", 1),
            Err(ValidationError::UnknownParameter("BOGUS".to_string()))
        );
    }

    #[test]
    fn test_lowercase_name_accepted() {
        assert_eq!(validate("netid", 5), Ok(3));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = validate("TXPOWER", 31).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TXPOWER value 31 out of range: must be between 0 and 30"
        );
    }
}
