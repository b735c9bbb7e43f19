//! One backend runtime: a lazily-dialed gRPC channel over a Unix socket.
//!
//! The channel is established on first use (or by the registry's reconnect
//! poll) and gated on a successful `Version` probe. A backend that only
//! serves `runtime.v1alpha2` is detected by the probe failing with
//! `Unimplemented`; calls to such a backend are converted through the
//! version adapter in both directions, so the dispatcher always works with
//! the legacy schema.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Status};
use tower::service_fn;

use crate::cri_api as v1;
use crate::cri_api_v1alpha2 as v2;

use v1::image_service_client::ImageServiceClient;
use v1::runtime_service_client::RuntimeServiceClient;
use v2::image_service_client::ImageServiceClient as ImageServiceClientV1Alpha2;
use v2::runtime_service_client::RuntimeServiceClient as RuntimeServiceClientV1Alpha2;

/// CRI schema a backend was probed to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// Legacy `runtime` package.
    Legacy,
    /// `runtime.v1alpha2` package.
    V1Alpha2,
}

/// Connection state of a backend client.
#[derive(Debug)]
enum ClientState {
    /// No channel; the next use (or reconnect poll) dials the socket.
    Disconnected,
    /// Channel established and the `Version` probe succeeded.
    Ready(Conn),
    /// Shut down; further calls are refused.
    Stopped,
}

#[derive(Debug, Clone)]
struct Conn {
    channel: Channel,
    version: ApiVersion,
}

/// Client for one backend runtime.
#[derive(Debug)]
pub struct RuntimeClient {
    selector: String,
    socket_path: PathBuf,
    connect_timeout: Duration,
    state: Mutex<ClientState>,
}

impl RuntimeClient {
    pub fn new(selector: String, socket_path: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            selector,
            socket_path,
            connect_timeout,
            state: Mutex::new(ClientState::Disconnected),
        }
    }

    /// Selector this backend is registered under; empty for the primary.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Whether this client is the primary backend.
    pub fn is_primary(&self) -> bool {
        self.selector.is_empty()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether the client currently holds a probed channel.
    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.lock().await, ClientState::Ready(_))
    }

    /// Bring the client to the ready state, dialing and probing if needed.
    pub async fn ensure_ready(&self) -> Result<(), Status> {
        self.conn().await.map(|_| ())
    }

    /// Idempotently shut the client down. Further calls are refused.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, ClientState::Stopped) {
            tracing::debug!(selector = %self.selector, "stopping backend client");
            *state = ClientState::Stopped;
        }
    }

    /// Get the current channel, dialing and probing the backend first if
    /// the client is disconnected. The state lock is held across the dial,
    /// which serializes concurrent connection attempts to one backend.
    async fn conn(&self) -> Result<Conn, Status> {
        let mut state = self.state.lock().await;
        match &*state {
            ClientState::Ready(conn) => Ok(conn.clone()),
            ClientState::Stopped => Err(Status::unavailable(format!(
                "criproxy: backend {:?} is stopped",
                self.selector
            ))),
            ClientState::Disconnected => {
                let conn = self.dial_and_probe().await.map_err(|status| {
                    tracing::debug!(
                        selector = %self.selector,
                        socket = %self.socket_path.display(),
                        error = %status,
                        "backend unavailable"
                    );
                    Status::unavailable(format!(
                        "criproxy: backend {:?} unavailable: {}",
                        self.selector,
                        status.message()
                    ))
                })?;
                tracing::info!(
                    selector = %self.selector,
                    socket = %self.socket_path.display(),
                    version = ?conn.version,
                    "backend connected"
                );
                *state = ClientState::Ready(conn.clone());
                Ok(conn)
            }
        }
    }

    async fn dial_and_probe(&self) -> Result<Conn, Status> {
        let socket_path = self.socket_path.clone();
        // The endpoint URI is ignored; the connector dials the Unix socket.
        let channel = Endpoint::from_static("http://[::]:50051")
            .connect_timeout(self.connect_timeout)
            .timeout(self.connect_timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = socket_path.clone();
                async move { UnixStream::connect(path).await }
            }))
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;

        // The Version RPC is the readiness gate and doubles as schema
        // negotiation: a backend serving only runtime.v1alpha2 answers the
        // legacy probe with Unimplemented.
        let probe = v1::VersionRequest::default();
        match RuntimeServiceClient::new(channel.clone())
            .version(probe.clone())
            .await
        {
            Ok(_) => Ok(Conn {
                channel,
                version: ApiVersion::Legacy,
            }),
            Err(status) if status.code() == Code::Unimplemented => {
                RuntimeServiceClientV1Alpha2::new(channel.clone())
                    .version(v2::VersionRequest::from(probe))
                    .await?;
                Ok(Conn {
                    channel,
                    version: ApiVersion::V1Alpha2,
                })
            }
            Err(status) => Err(status),
        }
    }

    /// Record the outcome of a backend call: an `Unavailable` error drops
    /// the channel so the reconnect poll can re-establish it.
    async fn observe<T>(&self, result: Result<T, Status>) -> Result<T, Status> {
        if let Err(status) = &result {
            if status.code() == Code::Unavailable {
                let mut state = self.state.lock().await;
                if matches!(*state, ClientState::Ready(_)) {
                    tracing::warn!(
                        selector = %self.selector,
                        error = %status,
                        "backend disconnected"
                    );
                    *state = ClientState::Disconnected;
                }
            }
        }
        result
    }
}

/// Generate a RuntimeService method stub: dispatch on the negotiated
/// schema, converting requests and responses for v1alpha2 backends.
macro_rules! runtime_call {
    ($method:ident, $req:ident, $resp:ident) => {
        pub async fn $method(&self, req: v1::$req) -> Result<v1::$resp, Status> {
            let conn = self.conn().await?;
            let result = match conn.version {
                ApiVersion::Legacy => RuntimeServiceClient::new(conn.channel)
                    .$method(req)
                    .await
                    .map(|r| r.into_inner()),
                ApiVersion::V1Alpha2 => RuntimeServiceClientV1Alpha2::new(conn.channel)
                    .$method(v2::$req::from(req))
                    .await
                    .map(|r| v1::$resp::from(r.into_inner())),
            };
            self.observe(result).await
        }
    };
}

/// Same as `runtime_call!`, for the ImageService.
macro_rules! image_call {
    ($method:ident, $req:ident, $resp:ident) => {
        pub async fn $method(&self, req: v1::$req) -> Result<v1::$resp, Status> {
            let conn = self.conn().await?;
            let result = match conn.version {
                ApiVersion::Legacy => ImageServiceClient::new(conn.channel)
                    .$method(req)
                    .await
                    .map(|r| r.into_inner()),
                ApiVersion::V1Alpha2 => ImageServiceClientV1Alpha2::new(conn.channel)
                    .$method(v2::$req::from(req))
                    .await
                    .map(|r| v1::$resp::from(r.into_inner())),
            };
            self.observe(result).await
        }
    };
}

impl RuntimeClient {
    runtime_call!(version, VersionRequest, VersionResponse);
    runtime_call!(run_pod_sandbox, RunPodSandboxRequest, RunPodSandboxResponse);
    runtime_call!(stop_pod_sandbox, StopPodSandboxRequest, StopPodSandboxResponse);
    runtime_call!(remove_pod_sandbox, RemovePodSandboxRequest, RemovePodSandboxResponse);
    runtime_call!(pod_sandbox_status, PodSandboxStatusRequest, PodSandboxStatusResponse);
    runtime_call!(list_pod_sandbox, ListPodSandboxRequest, ListPodSandboxResponse);
    runtime_call!(create_container, CreateContainerRequest, CreateContainerResponse);
    runtime_call!(start_container, StartContainerRequest, StartContainerResponse);
    runtime_call!(stop_container, StopContainerRequest, StopContainerResponse);
    runtime_call!(remove_container, RemoveContainerRequest, RemoveContainerResponse);
    runtime_call!(list_containers, ListContainersRequest, ListContainersResponse);
    runtime_call!(container_status, ContainerStatusRequest, ContainerStatusResponse);
    runtime_call!(
        update_container_resources,
        UpdateContainerResourcesRequest,
        UpdateContainerResourcesResponse
    );
    runtime_call!(
        reopen_container_log,
        ReopenContainerLogRequest,
        ReopenContainerLogResponse
    );
    runtime_call!(exec_sync, ExecSyncRequest, ExecSyncResponse);
    runtime_call!(exec, ExecRequest, ExecResponse);
    runtime_call!(attach, AttachRequest, AttachResponse);
    runtime_call!(port_forward, PortForwardRequest, PortForwardResponse);
    runtime_call!(container_stats, ContainerStatsRequest, ContainerStatsResponse);
    runtime_call!(
        list_container_stats,
        ListContainerStatsRequest,
        ListContainerStatsResponse
    );
    runtime_call!(
        update_runtime_config,
        UpdateRuntimeConfigRequest,
        UpdateRuntimeConfigResponse
    );
    runtime_call!(status, StatusRequest, StatusResponse);

    image_call!(list_images, ListImagesRequest, ListImagesResponse);
    image_call!(image_status, ImageStatusRequest, ImageStatusResponse);
    image_call!(pull_image, PullImageRequest, PullImageResponse);
    image_call!(remove_image, RemoveImageRequest, RemoveImageResponse);
    image_call!(image_fs_info, ImageFsInfoRequest, ImageFsInfoResponse);
}
