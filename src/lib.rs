//! criproxy - a CRI multiplexing proxy.
//!
//! Presents a single CRI endpoint to the kubelet and transparently
//! dispatches each request to one of several backend container runtimes:
//! - Pod annotation `kubernetes.io/target-runtime` → picks the backend for a sandbox
//! - `<selector>__<id>` → pod sandbox and container IDs of non-primary backends
//! - `<selector>/<image>` → image references of non-primary backends

pub mod client;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod ident;
pub mod registry;
pub mod server;

/// Generated legacy CRI protobuf types (`runtime` package).
pub mod cri_api {
    tonic::include_proto!("runtime");
}

/// Generated CRI v1alpha2 protobuf types (`runtime.v1alpha2` package).
pub mod cri_api_v1alpha2 {
    tonic::include_proto!("runtime.v1alpha2");
}
