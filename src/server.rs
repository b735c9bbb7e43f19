//! gRPC server facade.
//!
//! Binds one Unix domain socket and registers the CRI services of both
//! schemas on it: `runtime.RuntimeService`/`runtime.ImageService` and their
//! `runtime.v1alpha2` counterparts. The legacy services call the dispatcher
//! directly; the v1alpha2 services down-convert requests to the canonical
//! legacy schema and up-convert responses on the way out.
//!
//! A post-call hook supplied at construction fires exactly once per handled
//! RPC (success, error, or cancellation) and is used for instrumentation
//! and test synchronization.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::cri_api as v1;
use crate::cri_api_v1alpha2 as v2;
use crate::dispatch::CriProxy;

use v1::image_service_server::{ImageService, ImageServiceServer};
use v1::runtime_service_server::{RuntimeService, RuntimeServiceServer};
use v2::image_service_server::{
    ImageService as ImageServiceV1Alpha2, ImageServiceServer as ImageServiceServerV1Alpha2,
};
use v2::runtime_service_server::{
    RuntimeService as RuntimeServiceV1Alpha2, RuntimeServiceServer as RuntimeServiceServerV1Alpha2,
};

/// Callback fired once per handled RPC.
pub type PostCallHook = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    proxy: Arc<CriProxy>,
    hook: Option<PostCallHook>,
}

impl Shared {
    fn hook_guard(&self) -> HookGuard {
        HookGuard(self.hook.clone())
    }
}

/// Fires the post-call hook when dropped, so it runs exactly once per RPC
/// even when the inbound request is cancelled mid-dispatch.
struct HookGuard(Option<PostCallHook>);

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

#[derive(Clone)]
struct LegacyRuntime(Arc<Shared>);

#[derive(Clone)]
struct LegacyImage(Arc<Shared>);

#[derive(Clone)]
struct V1Alpha2Runtime(Arc<Shared>);

#[derive(Clone)]
struct V1Alpha2Image(Arc<Shared>);

/// Implement a legacy-schema service by delegating to the dispatcher.
macro_rules! legacy_service {
    ($trait_:ident for $ty:ident { $($method:ident($req:ident) -> $resp:ident;)* }) => {
        #[tonic::async_trait]
        impl $trait_ for $ty {
            $(
                async fn $method(
                    &self,
                    request: Request<v1::$req>,
                ) -> Result<Response<v1::$resp>, Status> {
                    let _hook = self.0.hook_guard();
                    self.0
                        .proxy
                        .$method(request.into_inner())
                        .await
                        .map(Response::new)
                }
            )*
        }
    };
}

/// Implement a v1alpha2 service: down-convert the request to the canonical
/// legacy schema, dispatch, up-convert the response.
macro_rules! v1alpha2_service {
    ($trait_:ident for $ty:ident { $($method:ident($req:ident) -> $resp:ident;)* }) => {
        #[tonic::async_trait]
        impl $trait_ for $ty {
            $(
                async fn $method(
                    &self,
                    request: Request<v2::$req>,
                ) -> Result<Response<v2::$resp>, Status> {
                    let _hook = self.0.hook_guard();
                    let req = v1::$req::from(request.into_inner());
                    self.0
                        .proxy
                        .$method(req)
                        .await
                        .map(|resp| Response::new(v2::$resp::from(resp)))
                }
            )*
        }
    };
}

macro_rules! runtime_methods {
    ($impl_macro:ident, $trait_:ident, $ty:ident) => {
        $impl_macro! {
            $trait_ for $ty {
                version(VersionRequest) -> VersionResponse;
                run_pod_sandbox(RunPodSandboxRequest) -> RunPodSandboxResponse;
                stop_pod_sandbox(StopPodSandboxRequest) -> StopPodSandboxResponse;
                remove_pod_sandbox(RemovePodSandboxRequest) -> RemovePodSandboxResponse;
                pod_sandbox_status(PodSandboxStatusRequest) -> PodSandboxStatusResponse;
                list_pod_sandbox(ListPodSandboxRequest) -> ListPodSandboxResponse;
                create_container(CreateContainerRequest) -> CreateContainerResponse;
                start_container(StartContainerRequest) -> StartContainerResponse;
                stop_container(StopContainerRequest) -> StopContainerResponse;
                remove_container(RemoveContainerRequest) -> RemoveContainerResponse;
                list_containers(ListContainersRequest) -> ListContainersResponse;
                container_status(ContainerStatusRequest) -> ContainerStatusResponse;
                update_container_resources(UpdateContainerResourcesRequest) -> UpdateContainerResourcesResponse;
                reopen_container_log(ReopenContainerLogRequest) -> ReopenContainerLogResponse;
                exec_sync(ExecSyncRequest) -> ExecSyncResponse;
                exec(ExecRequest) -> ExecResponse;
                attach(AttachRequest) -> AttachResponse;
                port_forward(PortForwardRequest) -> PortForwardResponse;
                container_stats(ContainerStatsRequest) -> ContainerStatsResponse;
                list_container_stats(ListContainerStatsRequest) -> ListContainerStatsResponse;
                update_runtime_config(UpdateRuntimeConfigRequest) -> UpdateRuntimeConfigResponse;
                status(StatusRequest) -> StatusResponse;
            }
        }
    };
}

macro_rules! image_methods {
    ($impl_macro:ident, $trait_:ident, $ty:ident) => {
        $impl_macro! {
            $trait_ for $ty {
                list_images(ListImagesRequest) -> ListImagesResponse;
                image_status(ImageStatusRequest) -> ImageStatusResponse;
                pull_image(PullImageRequest) -> PullImageResponse;
                remove_image(RemoveImageRequest) -> RemoveImageResponse;
                image_fs_info(ImageFsInfoRequest) -> ImageFsInfoResponse;
            }
        }
    };
}

runtime_methods!(legacy_service, RuntimeService, LegacyRuntime);
image_methods!(legacy_service, ImageService, LegacyImage);
runtime_methods!(v1alpha2_service, RuntimeServiceV1Alpha2, V1Alpha2Runtime);
image_methods!(v1alpha2_service, ImageServiceV1Alpha2, V1Alpha2Image);

/// The kubelet-facing gRPC server.
pub struct ProxyServer {
    shared: Arc<Shared>,
}

impl ProxyServer {
    pub fn new(proxy: Arc<CriProxy>, hook: Option<PostCallHook>) -> Self {
        Self {
            shared: Arc::new(Shared { proxy, hook }),
        }
    }

    /// Bind the listening socket, replacing a stale socket file if one is
    /// left over from a previous run.
    pub fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        UnixListener::bind(socket_path)
    }

    /// Serve until the process exits.
    pub async fn serve(self, socket_path: &Path) -> crate::error::Result<()> {
        let uds = Self::bind(socket_path)?;
        tracing::info!(socket = %socket_path.display(), "CRI proxy listening");
        self.serve_incoming(uds, futures::future::pending()).await?;
        Ok(())
    }

    /// Serve on an already-bound listener until `shutdown` resolves, then
    /// stop all backend clients.
    pub async fn serve_incoming(
        self,
        uds: UnixListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), tonic::transport::Error> {
        let reconnect = self.shared.proxy.registry().clone().spawn_reconnect();

        let result = Server::builder()
            .add_service(RuntimeServiceServer::new(LegacyRuntime(self.shared.clone())))
            .add_service(ImageServiceServer::new(LegacyImage(self.shared.clone())))
            .add_service(RuntimeServiceServerV1Alpha2::new(V1Alpha2Runtime(
                self.shared.clone(),
            )))
            .add_service(ImageServiceServerV1Alpha2::new(V1Alpha2Image(
                self.shared.clone(),
            )))
            .serve_with_incoming_shutdown(UnixListenerStream::new(uds), shutdown)
            .await;

        reconnect.abort();
        self.shared.proxy.registry().stop().await;
        result
    }
}
