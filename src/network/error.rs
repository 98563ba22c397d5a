use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout error")]
    TimeoutError,

    #[error("HTTP {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::TimeoutError
        } else if err.is_builder() {
            NetworkError::InvalidUrl(err.to_string())
        } else {
            NetworkError::ConnectionError(err.to_string())
        }
    }
}
