use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {source}")]
    Transport {
        #[source]
        source: BoxError,
    },
    #[error("request failed with status {status}")]
    HttpStatus { status: u16 },
    #[error("server reported an error: {0}")]
    Application(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Self::Transport {
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Transport { .. } => "transport",
            ClientError::HttpStatus { .. } => "http_status",
            ClientError::Application(_) => "application",
            ClientError::InvalidUrl(_) => "invalid_url",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::transport(value)
    }
}

impl From<url::ParseError> for ClientError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUrl(value.to_string())
    }
}
