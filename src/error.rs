//! Proxy error types and gRPC status constructors.

use thiserror::Error;
use tonic::Status;

/// Errors raised while configuring or starting the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A `--connect` spec could not be parsed.
    #[error("invalid backend spec {spec:?}: {reason}")]
    InvalidBackendSpec { spec: String, reason: String },

    /// The stream URL could not be parsed.
    #[error("invalid stream URL {url:?}: {source}")]
    InvalidStreamUrl {
        url: String,
        source: url::ParseError,
    },

    /// I/O error (socket setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// gRPC transport error.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Routing error for a selector that names no registered backend.
pub fn unknown_runtime(selector: &str) -> Status {
    Status::invalid_argument(format!("criproxy: unknown runtime: {:?}", selector))
}

/// Routing error for an image whose selector disagrees with the sandbox's.
pub fn wrong_runtime_image(image: &str) -> Status {
    Status::invalid_argument(format!(
        "criproxy: image {:?} is for a wrong runtime",
        image
    ))
}
