use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::AliasError;

/// Why a lookup produced no rate. Carried inside a `RateResult`, never raised.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionFailure {
    #[error("no rate entry at `{path}`")]
    NotFound { path: String },
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
    #[error("degenerate computation: {reason}")]
    ComputationDegenerate { reason: String },
}

impl ResolutionFailure {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidQuery { reason: reason.into() }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::ComputationDegenerate { reason: reason.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidQuery { .. } => "invalid_query",
            Self::ComputationDegenerate { .. } => "computation_degenerate",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read rate store `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("rate store document is not valid: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("could not write rate store `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("could not write backup `{path}`: {source}")]
    Backup { path: PathBuf, source: std::io::Error },
    #[error("invalid cell path `{path}`: {reason}")]
    CellPath { path: String, reason: String },
    #[error(transparent)]
    Aliases(#[from] AliasError),
    #[error("rate store lock is poisoned")]
    Poisoned,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store failure: {0}")]
    Store(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Decode(_) | StoreError::CellPath { .. } | StoreError::Aliases(_) => {
                Self::InvalidInput(value.to_string())
            }
            StoreError::Read { .. }
            | StoreError::Write { .. }
            | StoreError::Backup { .. }
            | StoreError::Poisoned => Self::Store(value.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::InvalidInput(message) => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Store(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::errors::{ApplicationError, InterfaceError, ResolutionFailure, StoreError};

    #[test]
    fn invalid_document_maps_to_bad_request_interface_error() {
        let decode = serde_json::from_str::<serde_json::Value>("{").expect_err("truncated json");
        let interface = ApplicationError::from(StoreError::Decode(decode)).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn write_failure_maps_to_service_unavailable() {
        let error = StoreError::Write {
            path: PathBuf::from("data/rate-store.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        let interface = ApplicationError::from(error).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.message().contains("data/rate-store.json"));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("crm client missing".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn resolution_failures_serialize_with_kind_tag() {
        let failure = ResolutionFailure::not_found("isoneRates.adcr.CT.99-00");
        let json = serde_json::to_value(&failure).expect("serialize");

        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["path"], "isoneRates.adcr.CT.99-00");
        assert_eq!(failure.kind(), "not_found");
        assert_eq!(ResolutionFailure::degenerate("zero hours").kind(), "computation_degenerate");
    }
}
