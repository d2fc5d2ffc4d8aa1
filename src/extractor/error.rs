use thiserror::Error;

use crate::credential::tier::CookieTier;
use crate::extractor::http::TransportError;

/// 解析流程对外暴露的错误分类。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no {0} credential available")]
    CredentialExhausted(CookieTier),
    #[error("credential rejected: login page returned")]
    AuthenticationRejected,
    #[error("data not found: {0}")]
    DataNotFound(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("request cancelled or timed out")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    pub fn http_status(&self) -> u16 {
        match self {
            ExtractError::CredentialExhausted(_) => 503,
            ExtractError::AuthenticationRejected => 401,
            ExtractError::DataNotFound(_) => 404,
            ExtractError::InvalidTarget(_) => 422,
            ExtractError::UpstreamUnavailable(_) | ExtractError::MalformedResponse(_) => 502,
            ExtractError::Cancelled => 504,
            ExtractError::Internal(_) => 500,
        }
    }

    /// Errors that another mirror cannot fix.
    pub fn stops_mirror_loop(&self) -> bool {
        matches!(
            self,
            ExtractError::DataNotFound(_)
                | ExtractError::CredentialExhausted(_)
                | ExtractError::Cancelled
        )
    }
}

impl From<TransportError> for ExtractError {
    fn from(e: TransportError) -> Self {
        ExtractError::UpstreamUnavailable(e.to_string())
    }
}
