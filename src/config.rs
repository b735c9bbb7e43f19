//! Proxy configuration: backend specs, stream URL, timeouts.
//!
//! Backends are given as an ordered list of specs. A bare socket path
//! denotes the primary backend (empty selector); any other backend is
//! written `<selector>:<socket_path>`. The first spec must be the primary.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ProxyError;
use crate::ident;

/// One backend runtime, immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    /// Short name choosing this backend; empty for the primary.
    pub selector: String,
    /// Local socket the backend's CRI server listens on.
    pub socket_path: PathBuf,
}

impl BackendSpec {
    /// Parse a `--connect` spec: either a bare socket path or
    /// `<selector>:<socket_path>`.
    pub fn parse(spec: &str) -> Result<Self, ProxyError> {
        let bad = |reason: &str| ProxyError::InvalidBackendSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Err(bad("empty spec"));
        }

        match spec.split_once(':') {
            None => Ok(Self {
                selector: String::new(),
                socket_path: PathBuf::from(spec),
            }),
            Some((selector, socket_path)) => {
                if !ident::is_valid_selector(selector) {
                    return Err(bad("selector must match [A-Za-z0-9_-]+ and not contain \"__\""));
                }
                if socket_path.is_empty() {
                    return Err(bad("empty socket path"));
                }
                Ok(Self {
                    selector: selector.to_string(),
                    socket_path: PathBuf::from(socket_path),
                })
            }
        }
    }
}

/// Startup configuration for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Ordered backends; the first is the primary.
    pub backends: Vec<BackendSpec>,
    /// Base URL substituted into primary-backend streaming responses.
    pub stream_url: Url,
    /// Ceiling applied to backend dials and individual backend calls.
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(
        specs: &[String],
        stream_url: &str,
        connect_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let stream_url = Url::parse(stream_url).map_err(|source| ProxyError::InvalidStreamUrl {
            url: stream_url.to_string(),
            source,
        })?;

        let mut backends = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let backend = BackendSpec::parse(spec)?;
            if i == 0 && !backend.selector.is_empty() {
                return Err(ProxyError::InvalidBackendSpec {
                    spec: spec.clone(),
                    reason: "the first backend is the primary and must be a bare socket path"
                        .to_string(),
                });
            }
            if i > 0 && backend.selector.is_empty() {
                return Err(ProxyError::InvalidBackendSpec {
                    spec: spec.clone(),
                    reason: "only the first backend may omit the selector".to_string(),
                });
            }
            if backends
                .iter()
                .any(|b: &BackendSpec| b.selector == backend.selector)
            {
                return Err(ProxyError::InvalidBackendSpec {
                    spec: spec.clone(),
                    reason: format!("duplicate selector {:?}", backend.selector),
                });
            }
            backends.push(backend);
        }
        if backends.is_empty() {
            return Err(ProxyError::InvalidBackendSpec {
                spec: String::new(),
                reason: "at least one backend is required".to_string(),
            });
        }

        Ok(Self {
            backends,
            stream_url,
            connect_timeout,
        })
    }
}
