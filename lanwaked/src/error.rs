use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::types::ParseMacError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed request body, or a missing field
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Segment is not a usable CIDR block or /24 prefix
    #[error("invalid network segment {0:?}: expected CIDR notation such as 192.168.1.0/24")]
    InvalidSegment(String),

    #[error("no network interface available for probing")]
    NoInterfaceAvailable,

    #[error("invalid hardware address {0:?}")]
    InvalidHardwareAddress(String),

    /// Raw channel or socket refused (privilege, interface down, unsupported platform)
    #[error("transmission failure: {0}")]
    TransmissionFailure(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<ParseMacError> for Error {
    fn from(e: ParseMacError) -> Self {
        Error::InvalidHardwareAddress(e.0)
    }
}

impl Error {
    /// Every failure is reported to clients as a bad request
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}
