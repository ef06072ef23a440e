//! OCPP-J CallError codes
//!
//! The error vocabulary carried in the third element of a `[4, ...]` frame.
//! `OccurenceConstraintViolation` keeps the protocol's historical spelling;
//! it is what peers put on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error codes a `CallError` frame may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotImplemented" => Ok(Self::NotImplemented),
            "NotSupported" => Ok(Self::NotSupported),
            "InternalError" => Ok(Self::InternalError),
            "ProtocolError" => Ok(Self::ProtocolError),
            "SecurityError" => Ok(Self::SecurityError),
            "FormationViolation" => Ok(Self::FormationViolation),
            "PropertyConstraintViolation" => Ok(Self::PropertyConstraintViolation),
            "OccurenceConstraintViolation" => Ok(Self::OccurenceConstraintViolation),
            "TypeConstraintViolation" => Ok(Self::TypeConstraintViolation),
            "GenericError" => Ok(Self::GenericError),
            other => Err(UnknownErrorCode(other.to_string())),
        }
    }
}

/// A code string that is not part of the OCPP-J vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownErrorCode(pub String);

impl fmt::Display for UnknownErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code: {}", self.0)
    }
}

impl std::error::Error for UnknownErrorCode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_codes() {
        let codes = [
            ErrorCode::NotImplemented,
            ErrorCode::NotSupported,
            ErrorCode::InternalError,
            ErrorCode::ProtocolError,
            ErrorCode::SecurityError,
            ErrorCode::FormationViolation,
            ErrorCode::PropertyConstraintViolation,
            ErrorCode::OccurenceConstraintViolation,
            ErrorCode::TypeConstraintViolation,
            ErrorCode::GenericError,
        ];
        for code in codes {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn historical_spelling_is_preserved() {
        assert_eq!(
            ErrorCode::OccurenceConstraintViolation.as_str(),
            "OccurenceConstraintViolation"
        );
    }

    #[test]
    fn unknown_code_is_an_error() {
        assert!("NoSuchCode".parse::<ErrorCode>().is_err());
    }
}
