// ========================================================================================
//
//                 The request handler: validation, estimation & response shaping
//
// ========================================================================================
//
// This is the boundary between an untrusted caller and the engine. It knows nothing
// about sockets or HTTP; it turns a raw body into a response class plus a JSON body.
// Each request moves through Parsing → Validating → Computing → Responding exactly
// once, and any stage may end in a failure record instead.

use crate::coefficients::CoefficientProvider;
use crate::engine::{self, EngineError};
use crate::validate::{self, InputError};
use serde::Serialize;
use std::fmt;

/// The fixed message returned for every server-class failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Headers sent with every response, and the whole of a preflight response.
pub const CORS_HEADERS: [(&str, &str); 2] = [
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-headers",
        "authorization, x-client-info, apikey, content-type",
    ),
];

/// The per-request lifecycle. No stage is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Parsing,
    Validating,
    Computing,
    Responding,
}

/// Logical outcome class, independent of any transport's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    ClientError,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedPayload,
    InvalidFieldType,
    WrongCardinality,
    InvalidElement,
    OutOfRangeValues,
    InvariantViolation,
    ConfigurationError,
    InternalError,
}

impl ErrorKind {
    pub fn class(self) -> ResponseClass {
        match self {
            Self::MalformedPayload
            | Self::InvalidFieldType
            | Self::WrongCardinality
            | Self::InvalidElement
            | Self::OutOfRangeValues => ResponseClass::ClientError,
            Self::InvariantViolation | Self::ConfigurationError | Self::InternalError => {
                ResponseClass::ServerError
            }
        }
    }

    /// The stage a request was in when a failure of this kind ended it.
    pub fn stage(self) -> RequestStage {
        match self {
            Self::MalformedPayload => RequestStage::Parsing,
            Self::InvalidFieldType
            | Self::WrongCardinality
            | Self::InvalidElement
            | Self::OutOfRangeValues => RequestStage::Validating,
            Self::InvariantViolation | Self::ConfigurationError | Self::InternalError => {
                RequestStage::Computing
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request-scoped failure: what went wrong and what the caller is told about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl ErrorRecord {
    /// Server-class failures never reveal their cause to the caller.
    pub fn internal(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            details: None,
        }
    }
}

impl From<&InputError> for ErrorRecord {
    fn from(err: &InputError) -> Self {
        let kind = match err {
            InputError::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            InputError::InvalidFieldType { .. } => ErrorKind::InvalidFieldType,
            InputError::WrongCardinality { .. } => ErrorKind::WrongCardinality,
            InputError::InvalidElement { .. } => ErrorKind::InvalidElement,
            InputError::OutOfRangeValues { .. } => ErrorKind::OutOfRangeValues,
        };
        Self {
            kind,
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// The JSON body of a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Estimate {
        #[serde(rename = "epiAge")]
        epi_age: f64,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub class: ResponseClass,
    pub body: ResponseBody,
}

impl HandlerResponse {
    fn success(epi_age: f64) -> Self {
        Self {
            class: ResponseClass::Success,
            body: ResponseBody::Estimate { epi_age },
        }
    }

    pub fn failure(record: ErrorRecord) -> Self {
        Self {
            class: record.kind.class(),
            body: ResponseBody::Error {
                error: record.message,
                details: record.details,
            },
        }
    }

    /// Serializes the body. Falls back to the fixed internal-error body, which cannot
    /// fail to serialize.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_else(|e| {
            log::error!("Failed to serialize response body: {e}");
            format!("{{\"error\":\"{INTERNAL_ERROR_MESSAGE}\"}}").into_bytes()
        })
    }
}

// ========================================================================================
//                                   Entry point
// ========================================================================================

/// Runs one estimation request end to end. Never panics on caller input and never
/// lets an error escape: every outcome is a [`HandlerResponse`].
pub fn handle_estimate_request<P>(raw_body: &[u8], provider: &P) -> HandlerResponse
where
    P: CoefficientProvider + ?Sized,
{
    match run_stages(raw_body, provider) {
        Ok(epi_age) => {
            log::debug!("Request reached stage {:?}", RequestStage::Responding);
            HandlerResponse::success(epi_age)
        }
        Err(record) => {
            log::debug!(
                "Request failed during stage {:?} with {}",
                record.kind.stage(),
                record.kind
            );
            HandlerResponse::failure(record)
        }
    }
}

fn run_stages<P>(raw_body: &[u8], provider: &P) -> Result<f64, ErrorRecord>
where
    P: CoefficientProvider + ?Sized,
{
    log::debug!(
        "Request at stage {:?}: {} byte body",
        RequestStage::Received,
        raw_body.len()
    );

    // --- Parsing & Validating ---
    let vector = validate::validate_payload(raw_body).map_err(|err| {
        log::warn!("Rejected estimate request: {err}");
        ErrorRecord::from(&err)
    })?;
    log::debug!("Received {} valid beta values", vector.len());

    // --- Computing ---
    let table = provider.table().map_err(|err| {
        log::error!("Coefficient table unavailable: {err}");
        ErrorRecord::internal(ErrorKind::ConfigurationError)
    })?;

    let age = engine::estimate_age(&vector, table).map_err(|err| match err {
        EngineError::InvariantViolation { .. } => {
            log::error!("BUG: validated request broke the engine precondition: {err}");
            ErrorRecord::internal(ErrorKind::InvariantViolation)
        }
    })?;

    if !age.years().is_finite() {
        log::error!(
            "Coefficient table '{}' produced a non-finite age estimate",
            table.version()
        );
        return Err(ErrorRecord::internal(ErrorKind::InternalError));
    }

    log::info!("Calculated epigenetic age: {}", age.years());
    Ok(age.years())
}
