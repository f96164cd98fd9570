use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to read certificate {path}: {source}")]
    CertificateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        source: reqwest::Error,
    },

    #[error("Failed to create tokio runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Request has no URL")]
    MissingUrl,

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}

impl From<Error> for skein_core::Error {
    fn from(error: Error) -> Self {
        skein_core::Error::Transport {
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
