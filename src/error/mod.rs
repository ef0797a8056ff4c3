use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not Found. URL must end with {0}")]
    NotFound(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// 上游返回非2xx，原样透传给调用方
    #[error("Upstream returned error status {status}")]
    Upstream {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 返回给调用方的HTTP状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::MethodNotAllowed => 405,
            Error::Auth(_) => 401,
            Error::Config(_) => 400,
            Error::Upstream { status, .. } => *status,
            Error::Http(_) => 502,
            Error::Translation(_) | Error::Serialization(_) | Error::Io(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
