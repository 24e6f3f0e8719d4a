//! Behavioral error taxonomy. Each variant corresponds to a distinct
//! handling policy, not just a distinct cause.

use thiserror::Error;

/// User-supplied input outside the permitted domain. Surfaced to the
/// caller, logged, leaves prior state intact.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("temperature {value} is below minimum {min}")]
    BelowMinimum { value: String, min: String },
    #[error("temperature {value} is above maximum {max}")]
    AboveMaximum { value: String, max: String },
    #[error("setpoint range is inverted: low {low} > high {high}")]
    InvertedRange { low: String, high: String },
    #[error("unknown temperature unit {0:?}")]
    UnknownUnit(String),
    #[error("settings value nesting deeper than one level is not supported")]
    NestingTooDeep,
}

/// Hardware absent, CRC mismatch, or malformed sensor output. Logged;
/// the control loop receives a sentinel reading and otherwise continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("1-wire device file not found")]
    Unavailable,
    #[error("1-wire CRC check failed")]
    Checksum,
    #[error("could not parse 1-wire sensor output: {0}")]
    Parse(String),
}

/// Network or upstream-service unavailability. Caught inside the
/// weather poller, reduces its fetch interval, never propagates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransientRemoteError {
    #[error("no internet connectivity")]
    NoConnectivity,
    #[error("weather service unavailable")]
    ServiceUnavailable,
}

/// Anything else from the weather client. Propagated to the caller,
/// which should restart the poller task.
#[derive(Debug, Error)]
pub enum FatalRemoteError {
    #[error("weather request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected weather response shape: {0}")]
    UnexpectedResponse(String),
}

/// Unparseable JSON document at startup. Fatal — aborts the process.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tariff database error: {0}")]
    Tariff(#[from] rusqlite::Error),
    #[error("corrupt {what}: {detail}")]
    Corrupt { what: String, detail: String },
}

/// Malformed inbound message, unknown action, or missing fields.
/// Ignored with a debug log.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("payload was not valid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("missing field {0:?}")]
    MissingField(&'static str),
}
