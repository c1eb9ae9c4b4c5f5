use http::StatusCode;

use blockframe_runtime::ProviderError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The API answered with a non-success status.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("content is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// A raw path that would leave the API base.
    #[error("path is outside the API: {0:?}")]
    OutsideApi(String),

    /// The API answered with a shape the request did not expect.
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl Error {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Http(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Map a failed write. Conflicts and validation failures on a write mean
    /// the base blob is no longer current.
    pub fn for_write(self) -> ProviderError {
        match self.status() {
            Some(StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY) => {
                ProviderError::StaleBaseRevision(self.to_string())
            }
            _ => self.into(),
        }
    }
}

impl From<Error> for ProviderError {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error.status() {
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                ProviderError::Unauthorized(message)
            }
            Some(StatusCode::NOT_FOUND) => ProviderError::NotFound(message),
            Some(StatusCode::UNPROCESSABLE_ENTITY) => ProviderError::InvalidRequest(message),
            _ => match error {
                Error::Credentials(_) => ProviderError::Unauthorized(message),
                Error::UrlParse(_) | Error::OutsideApi(_) => {
                    ProviderError::InvalidRequest(message)
                }
                _ => ProviderError::Failed(message),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: StatusCode) -> Error {
        Error::Status {
            status: code,
            message: "nope".into(),
        }
    }

    #[test]
    fn read_statuses() {
        assert!(matches!(
            ProviderError::from(status(StatusCode::UNAUTHORIZED)),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from(status(StatusCode::FORBIDDEN)),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from(status(StatusCode::NOT_FOUND)),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            ProviderError::from(status(StatusCode::BAD_GATEWAY)),
            ProviderError::Failed(_)
        ));
    }

    #[test]
    fn write_conflicts_are_stale() {
        assert!(matches!(
            status(StatusCode::CONFLICT).for_write(),
            ProviderError::StaleBaseRevision(_)
        ));
        assert!(matches!(
            status(StatusCode::UNPROCESSABLE_ENTITY).for_write(),
            ProviderError::StaleBaseRevision(_)
        ));
        assert!(matches!(
            status(StatusCode::NOT_FOUND).for_write(),
            ProviderError::NotFound(_)
        ));
    }

    #[test]
    fn paths_outside_the_api_are_invalid() {
        assert!(matches!(
            ProviderError::from(Error::OutsideApi("//evil.example/x".into())),
            ProviderError::InvalidRequest(_)
        ));
    }

    #[test]
    fn missing_credentials_are_unauthorized() {
        assert!(matches!(
            ProviderError::from(Error::Credentials("vault sealed".into())),
            ProviderError::Unauthorized(_)
        ));
    }
}
