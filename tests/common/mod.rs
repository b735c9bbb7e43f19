//! Test support: fake CRI backends with a shared journal.
//!
//! The journal is an ordered log of `<prefix><service>/<method>` entries
//! recorded by the fake backends, used to verify which backend saw which
//! RPC. Fakes can serve either CRI schema over a real Unix socket.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tonic::{Request, Response, Status};
use tower::service_fn;

use criproxy::cri_api as v1;
use criproxy::cri_api_v1alpha2 as v2;

pub const FAKE_TIMESTAMP: i64 = 1_553_430_000_000_000_000;
pub const FAKE_POD_IP: &str = "192.168.192.168";

// ── Journal ──────────────────────────────────────────────────────────

#[derive(Default)]
struct JournalInner {
    items: Vec<String>,
    skipped: HashSet<String>,
}

/// Ordered log of which backend saw which RPC.
#[derive(Clone, Default)]
pub struct Journal {
    inner: Arc<Mutex<JournalInner>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, item: String) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.skipped.contains(&item) {
            inner.items.push(item);
        }
    }

    /// Stop recording the given items. Used for entries whose position is
    /// timing-dependent, such as connection probes.
    pub fn skip(&self, items: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.skipped.extend(items.iter().map(|s| s.to_string()));
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().unwrap().items)
    }

    /// Drain and compare against the expected entries in order.
    pub fn verify(&self, expected: &[&str]) {
        assert_eq!(self.drain(), expected, "journal mismatch");
    }

    /// Drain and compare ignoring order; fan-out calls run in parallel, so
    /// entries from different backends may interleave either way.
    pub fn verify_unordered(&self, expected: &[&str]) {
        let mut actual = self.drain();
        actual.sort();
        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(actual, expected, "journal mismatch (unordered)");
    }
}

// ── Fake backend state ───────────────────────────────────────────────

/// In-memory state of one fake CRI runtime. Both schema frontends share
/// it, so a v1alpha2-only fake behaves identically modulo conversion.
pub struct FakeCriState {
    journal: Journal,
    prefix: String,
    stream_url: String,
    image_size: u64,
    images: Mutex<Vec<String>>,
    sandboxes: Mutex<Vec<v1::PodSandbox>>,
    containers: Mutex<Vec<v1::Container>>,
    stats: Mutex<Vec<v1::ContainerStats>>,
    fs_usage: Mutex<Vec<v1::FilesystemUsage>>,
}

impl FakeCriState {
    pub fn new(journal: Journal, prefix: &str, stream_url: &str, image_size: u64) -> Self {
        Self {
            journal,
            prefix: prefix.to_string(),
            stream_url: stream_url.to_string(),
            image_size,
            images: Mutex::new(Vec::new()),
            sandboxes: Mutex::new(Vec::new()),
            containers: Mutex::new(Vec::new()),
            stats: Mutex::new(Vec::new()),
            fs_usage: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, service: &str, method: &str) {
        self.journal
            .record(format!("{}{}/{}", self.prefix, service, method));
    }

    pub fn set_fake_images(&self, names: &[&str]) {
        *self.images.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_fake_container_stats(
        &self,
        container_id: &str,
        container_name: &str,
        fs_uuid: &str,
    ) -> v1::ContainerStats {
        let stats = v1::ContainerStats {
            attributes: Some(v1::ContainerAttributes {
                id: container_id.to_string(),
                metadata: Some(v1::ContainerMetadata {
                    name: container_name.to_string(),
                    attempt: 0,
                }),
                labels: Default::default(),
                annotations: Default::default(),
            }),
            cpu: Some(v1::CpuUsage {
                timestamp: FAKE_TIMESTAMP,
                usage_core_nano_seconds: Some(v1::UInt64Value { value: 100_000 }),
            }),
            memory: Some(v1::MemoryUsage {
                timestamp: FAKE_TIMESTAMP,
                working_set_bytes: Some(v1::UInt64Value { value: 4096 }),
            }),
            writable_layer: Some(v1::FilesystemUsage {
                timestamp: FAKE_TIMESTAMP,
                storage_id: Some(v1::StorageIdentifier {
                    uuid: fs_uuid.to_string(),
                }),
                used_bytes: Some(v1::UInt64Value { value: 512 }),
                inodes_used: Some(v1::UInt64Value { value: 2 }),
            }),
        };
        self.stats.lock().unwrap().push(stats.clone());
        stats
    }

    pub fn set_fake_filesystem_usage(&self, fs_uuid: &str) -> v1::FilesystemUsage {
        let usage = v1::FilesystemUsage {
            timestamp: FAKE_TIMESTAMP,
            storage_id: Some(v1::StorageIdentifier {
                uuid: fs_uuid.to_string(),
            }),
            used_bytes: Some(v1::UInt64Value {
                value: self.image_size,
            }),
            inodes_used: Some(v1::UInt64Value { value: 100 }),
        };
        self.fs_usage.lock().unwrap().push(usage.clone());
        usage
    }

    fn image_object(&self, name: &str) -> v1::Image {
        v1::Image {
            id: name.to_string(),
            repo_tags: vec![name.to_string()],
            repo_digests: vec![],
            size: self.image_size,
            uid: None,
            username: String::new(),
        }
    }

    // ── RuntimeService behavior ──────────────────────────────────────

    async fn version(&self, _req: v1::VersionRequest) -> Result<v1::VersionResponse, Status> {
        self.record("runtime", "Version");
        Ok(v1::VersionResponse {
            version: "0.1.0".to_string(),
            runtime_name: "fakeRuntime".to_string(),
            runtime_version: "0.1.0".to_string(),
            runtime_api_version: "0.1.0".to_string(),
        })
    }

    async fn run_pod_sandbox(
        &self,
        req: v1::RunPodSandboxRequest,
    ) -> Result<v1::RunPodSandboxResponse, Status> {
        self.record("runtime", "RunPodSandbox");
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("sandbox config required"))?;
        let metadata = config
            .metadata
            .clone()
            .ok_or_else(|| Status::invalid_argument("sandbox metadata required"))?;
        let id = format!(
            "{}_{}_{}_{}",
            metadata.name, metadata.namespace, metadata.uid, metadata.attempt
        );
        self.sandboxes.lock().unwrap().push(v1::PodSandbox {
            id: id.clone(),
            metadata: Some(metadata),
            state: v1::PodSandboxState::SandboxReady as i32,
            created_at: FAKE_TIMESTAMP,
            labels: config.labels,
            annotations: config.annotations,
        });
        Ok(v1::RunPodSandboxResponse { pod_sandbox_id: id })
    }

    async fn stop_pod_sandbox(
        &self,
        req: v1::StopPodSandboxRequest,
    ) -> Result<v1::StopPodSandboxResponse, Status> {
        self.record("runtime", "StopPodSandbox");
        let mut sandboxes = self.sandboxes.lock().unwrap();
        for sandbox in sandboxes.iter_mut() {
            if sandbox.id == req.pod_sandbox_id {
                sandbox.state = v1::PodSandboxState::SandboxNotready as i32;
            }
        }
        Ok(Default::default())
    }

    async fn remove_pod_sandbox(
        &self,
        req: v1::RemovePodSandboxRequest,
    ) -> Result<v1::RemovePodSandboxResponse, Status> {
        self.record("runtime", "RemovePodSandbox");
        self.sandboxes
            .lock()
            .unwrap()
            .retain(|s| s.id != req.pod_sandbox_id);
        self.containers
            .lock()
            .unwrap()
            .retain(|c| c.pod_sandbox_id != req.pod_sandbox_id);
        Ok(Default::default())
    }

    async fn pod_sandbox_status(
        &self,
        req: v1::PodSandboxStatusRequest,
    ) -> Result<v1::PodSandboxStatusResponse, Status> {
        self.record("runtime", "PodSandboxStatus");
        let sandboxes = self.sandboxes.lock().unwrap();
        let sandbox = sandboxes
            .iter()
            .find(|s| s.id == req.pod_sandbox_id)
            .ok_or_else(|| Status::not_found(format!("sandbox {:?}", req.pod_sandbox_id)))?;
        Ok(v1::PodSandboxStatusResponse {
            status: Some(v1::PodSandboxStatus {
                id: sandbox.id.clone(),
                metadata: sandbox.metadata.clone(),
                state: sandbox.state,
                created_at: sandbox.created_at,
                network: Some(v1::PodSandboxNetworkStatus {
                    ip: FAKE_POD_IP.to_string(),
                }),
                labels: sandbox.labels.clone(),
                annotations: sandbox.annotations.clone(),
            }),
            info: Default::default(),
        })
    }

    async fn list_pod_sandbox(
        &self,
        req: v1::ListPodSandboxRequest,
    ) -> Result<v1::ListPodSandboxResponse, Status> {
        self.record("runtime", "ListPodSandbox");
        let items = self
            .sandboxes
            .lock()
            .unwrap()
            .iter()
            .filter(|s| match &req.filter {
                None => true,
                Some(filter) => {
                    (filter.id.is_empty() || s.id == filter.id)
                        && filter
                            .state
                            .as_ref()
                            .map_or(true, |state| state.state == s.state)
                        && filter
                            .label_selector
                            .iter()
                            .all(|(k, v)| s.labels.get(k) == Some(v))
                }
            })
            .cloned()
            .collect();
        Ok(v1::ListPodSandboxResponse { items })
    }

    async fn create_container(
        &self,
        req: v1::CreateContainerRequest,
    ) -> Result<v1::CreateContainerResponse, Status> {
        self.record("runtime", "CreateContainer");
        let config = req
            .config
            .ok_or_else(|| Status::invalid_argument("container config required"))?;
        let metadata = config
            .metadata
            .clone()
            .ok_or_else(|| Status::invalid_argument("container metadata required"))?;
        let id = format!("{}_{}_{}", req.pod_sandbox_id, metadata.name, metadata.attempt);
        let image_ref = config.image.as_ref().map(|i| i.image.clone()).unwrap_or_default();
        self.containers.lock().unwrap().push(v1::Container {
            id: id.clone(),
            pod_sandbox_id: req.pod_sandbox_id,
            metadata: Some(metadata),
            image: config.image,
            image_ref,
            state: v1::ContainerState::ContainerCreated as i32,
            created_at: FAKE_TIMESTAMP,
            labels: config.labels,
            annotations: config.annotations,
        });
        Ok(v1::CreateContainerResponse { container_id: id })
    }

    async fn start_container(
        &self,
        req: v1::StartContainerRequest,
    ) -> Result<v1::StartContainerResponse, Status> {
        self.record("runtime", "StartContainer");
        let mut containers = self.containers.lock().unwrap();
        for container in containers.iter_mut() {
            if container.id == req.container_id {
                container.state = v1::ContainerState::ContainerRunning as i32;
            }
        }
        Ok(Default::default())
    }

    async fn stop_container(
        &self,
        req: v1::StopContainerRequest,
    ) -> Result<v1::StopContainerResponse, Status> {
        self.record("runtime", "StopContainer");
        let mut containers = self.containers.lock().unwrap();
        for container in containers.iter_mut() {
            if container.id == req.container_id {
                container.state = v1::ContainerState::ContainerExited as i32;
            }
        }
        Ok(Default::default())
    }

    async fn remove_container(
        &self,
        req: v1::RemoveContainerRequest,
    ) -> Result<v1::RemoveContainerResponse, Status> {
        self.record("runtime", "RemoveContainer");
        self.containers
            .lock()
            .unwrap()
            .retain(|c| c.id != req.container_id);
        Ok(Default::default())
    }

    async fn list_containers(
        &self,
        req: v1::ListContainersRequest,
    ) -> Result<v1::ListContainersResponse, Status> {
        self.record("runtime", "ListContainers");
        let containers = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| match &req.filter {
                None => true,
                Some(filter) => {
                    (filter.id.is_empty() || c.id == filter.id)
                        && (filter.pod_sandbox_id.is_empty()
                            || c.pod_sandbox_id == filter.pod_sandbox_id)
                        && filter
                            .state
                            .as_ref()
                            .map_or(true, |state| state.state == c.state)
                        && filter
                            .label_selector
                            .iter()
                            .all(|(k, v)| c.labels.get(k) == Some(v))
                }
            })
            .cloned()
            .collect();
        Ok(v1::ListContainersResponse { containers })
    }

    async fn container_status(
        &self,
        req: v1::ContainerStatusRequest,
    ) -> Result<v1::ContainerStatusResponse, Status> {
        self.record("runtime", "ContainerStatus");
        let containers = self.containers.lock().unwrap();
        let container = containers
            .iter()
            .find(|c| c.id == req.container_id)
            .ok_or_else(|| Status::not_found(format!("container {:?}", req.container_id)))?;
        Ok(v1::ContainerStatusResponse {
            status: Some(v1::ContainerStatus {
                id: container.id.clone(),
                metadata: container.metadata.clone(),
                state: container.state,
                created_at: container.created_at,
                started_at: 0,
                finished_at: 0,
                exit_code: 0,
                image: container.image.clone(),
                image_ref: container.image_ref.clone(),
                reason: String::new(),
                message: String::new(),
                labels: container.labels.clone(),
                annotations: container.annotations.clone(),
                mounts: vec![],
                log_path: String::new(),
            }),
            info: Default::default(),
        })
    }

    async fn update_container_resources(
        &self,
        _req: v1::UpdateContainerResourcesRequest,
    ) -> Result<v1::UpdateContainerResourcesResponse, Status> {
        self.record("runtime", "UpdateContainerResources");
        Ok(Default::default())
    }

    async fn reopen_container_log(
        &self,
        _req: v1::ReopenContainerLogRequest,
    ) -> Result<v1::ReopenContainerLogResponse, Status> {
        self.record("runtime", "ReopenContainerLog");
        Ok(Default::default())
    }

    async fn exec_sync(&self, _req: v1::ExecSyncRequest) -> Result<v1::ExecSyncResponse, Status> {
        self.record("runtime", "ExecSync");
        Ok(v1::ExecSyncResponse {
            stdout: vec![],
            stderr: vec![],
            exit_code: 0,
        })
    }

    async fn exec(&self, _req: v1::ExecRequest) -> Result<v1::ExecResponse, Status> {
        self.record("runtime", "Exec");
        Ok(v1::ExecResponse {
            url: self.stream_url.clone(),
        })
    }

    async fn attach(&self, _req: v1::AttachRequest) -> Result<v1::AttachResponse, Status> {
        self.record("runtime", "Attach");
        Ok(v1::AttachResponse {
            url: self.stream_url.clone(),
        })
    }

    async fn port_forward(
        &self,
        _req: v1::PortForwardRequest,
    ) -> Result<v1::PortForwardResponse, Status> {
        self.record("runtime", "PortForward");
        Ok(v1::PortForwardResponse {
            url: self.stream_url.clone(),
        })
    }

    async fn container_stats(
        &self,
        req: v1::ContainerStatsRequest,
    ) -> Result<v1::ContainerStatsResponse, Status> {
        self.record("runtime", "ContainerStats");
        let stats = self.stats.lock().unwrap();
        let found = stats
            .iter()
            .find(|s| {
                s.attributes
                    .as_ref()
                    .map_or(false, |a| a.id == req.container_id)
            })
            .cloned()
            .ok_or_else(|| Status::not_found(format!("stats for {:?}", req.container_id)))?;
        Ok(v1::ContainerStatsResponse { stats: Some(found) })
    }

    async fn list_container_stats(
        &self,
        req: v1::ListContainerStatsRequest,
    ) -> Result<v1::ListContainerStatsResponse, Status> {
        self.record("runtime", "ListContainerStats");
        let stats = self
            .stats
            .lock()
            .unwrap()
            .iter()
            .filter(|s| match &req.filter {
                None => true,
                Some(filter) => {
                    filter.id.is_empty()
                        || s.attributes.as_ref().map_or(false, |a| a.id == filter.id)
                }
            })
            .cloned()
            .collect();
        Ok(v1::ListContainerStatsResponse { stats })
    }

    async fn update_runtime_config(
        &self,
        _req: v1::UpdateRuntimeConfigRequest,
    ) -> Result<v1::UpdateRuntimeConfigResponse, Status> {
        self.record("runtime", "UpdateRuntimeConfig");
        Ok(Default::default())
    }

    async fn status(&self, _req: v1::StatusRequest) -> Result<v1::StatusResponse, Status> {
        self.record("runtime", "Status");
        Ok(v1::StatusResponse {
            status: Some(v1::RuntimeStatus {
                conditions: vec![
                    v1::RuntimeCondition {
                        r#type: "RuntimeReady".to_string(),
                        status: true,
                        reason: String::new(),
                        message: String::new(),
                    },
                    v1::RuntimeCondition {
                        r#type: "NetworkReady".to_string(),
                        status: true,
                        reason: String::new(),
                        message: String::new(),
                    },
                ],
            }),
            info: Default::default(),
        })
    }

    // ── ImageService behavior ────────────────────────────────────────

    async fn list_images(
        &self,
        req: v1::ListImagesRequest,
    ) -> Result<v1::ListImagesResponse, Status> {
        self.record("image", "ListImages");
        let name_filter = req
            .filter
            .as_ref()
            .and_then(|f| f.image.as_ref())
            .map(|spec| spec.image.clone())
            .filter(|name| !name.is_empty());
        let images = self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name_filter.as_deref().map_or(true, |f| *name == f))
            .map(|name| self.image_object(name))
            .collect();
        Ok(v1::ListImagesResponse { images })
    }

    async fn image_status(
        &self,
        req: v1::ImageStatusRequest,
    ) -> Result<v1::ImageStatusResponse, Status> {
        self.record("image", "ImageStatus");
        let name = req
            .image
            .ok_or_else(|| Status::invalid_argument("image spec required"))?
            .image;
        let image = self
            .images
            .lock()
            .unwrap()
            .iter()
            .find(|n| **n == name)
            .map(|n| self.image_object(n));
        Ok(v1::ImageStatusResponse {
            image,
            info: Default::default(),
        })
    }

    async fn pull_image(&self, req: v1::PullImageRequest) -> Result<v1::PullImageResponse, Status> {
        self.record("image", "PullImage");
        let name = req
            .image
            .ok_or_else(|| Status::invalid_argument("image spec required"))?
            .image;
        let mut images = self.images.lock().unwrap();
        if !images.contains(&name) {
            images.push(name.clone());
        }
        Ok(v1::PullImageResponse { image_ref: name })
    }

    async fn remove_image(
        &self,
        req: v1::RemoveImageRequest,
    ) -> Result<v1::RemoveImageResponse, Status> {
        self.record("image", "RemoveImage");
        let name = req
            .image
            .ok_or_else(|| Status::invalid_argument("image spec required"))?
            .image;
        self.images.lock().unwrap().retain(|n| *n != name);
        Ok(Default::default())
    }

    async fn image_fs_info(
        &self,
        _req: v1::ImageFsInfoRequest,
    ) -> Result<v1::ImageFsInfoResponse, Status> {
        self.record("image", "ImageFsInfo");
        Ok(v1::ImageFsInfoResponse {
            image_filesystems: self.fs_usage.lock().unwrap().clone(),
        })
    }
}

// ── Schema frontends ─────────────────────────────────────────────────

#[derive(Clone)]
struct FakeRuntime(Arc<FakeCriState>);

#[derive(Clone)]
struct FakeImage(Arc<FakeCriState>);

#[derive(Clone)]
struct FakeRuntimeV1Alpha2(Arc<FakeCriState>);

#[derive(Clone)]
struct FakeImageV1Alpha2(Arc<FakeCriState>);

macro_rules! fake_legacy_service {
    ($trait_:path, $ty:ident { $($method:ident($req:ident) -> $resp:ident;)* }) => {
        #[tonic::async_trait]
        impl $trait_ for $ty {
            $(
                async fn $method(
                    &self,
                    request: Request<v1::$req>,
                ) -> Result<Response<v1::$resp>, Status> {
                    self.0.$method(request.into_inner()).await.map(Response::new)
                }
            )*
        }
    };
}

macro_rules! fake_v1alpha2_service {
    ($trait_:path, $ty:ident { $($method:ident($req:ident) -> $resp:ident;)* }) => {
        #[tonic::async_trait]
        impl $trait_ for $ty {
            $(
                async fn $method(
                    &self,
                    request: Request<v2::$req>,
                ) -> Result<Response<v2::$resp>, Status> {
                    let req = v1::$req::from(request.into_inner());
                    self.0
                        .$method(req)
                        .await
                        .map(|resp| Response::new(v2::$resp::from(resp)))
                }
            )*
        }
    };
}

macro_rules! fake_runtime_methods {
    ($impl_macro:ident, $trait_:path, $ty:ident) => {
        $impl_macro! {
            $trait_, $ty {
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

macro_rules! fake_image_methods {
    ($impl_macro:ident, $trait_:path, $ty:ident) => {
        $impl_macro! {
            $trait_, $ty {
                list_images(ListImagesRequest) -> ListImagesResponse;
                image_status(ImageStatusRequest) -> ImageStatusResponse;
                pull_image(PullImageRequest) -> PullImageResponse;
                remove_image(RemoveImageRequest) -> RemoveImageResponse;
                image_fs_info(ImageFsInfoRequest) -> ImageFsInfoResponse;
            }
        }
    };
}

fake_runtime_methods!(
    fake_legacy_service,
    v1::runtime_service_server::RuntimeService,
    FakeRuntime
);
fake_image_methods!(
    fake_legacy_service,
    v1::image_service_server::ImageService,
    FakeImage
);
fake_runtime_methods!(
    fake_v1alpha2_service,
    v2::runtime_service_server::RuntimeService,
    FakeRuntimeV1Alpha2
);
fake_image_methods!(
    fake_v1alpha2_service,
    v2::image_service_server::ImageService,
    FakeImageV1Alpha2
);

// ── Server plumbing ──────────────────────────────────────────────────

/// A fake backend serving on a Unix socket until stopped.
pub struct FakeBackend {
    pub state: Arc<FakeCriState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeBackend {
    /// Bind and serve. With `v1alpha2_only`, the fake registers only the
    /// `runtime.v1alpha2` services, so the legacy probe gets Unimplemented.
    pub fn start(state: Arc<FakeCriState>, socket_path: &Path, v1alpha2_only: bool) -> Self {
        let _ = std::fs::remove_file(socket_path);
        let uds = UnixListener::bind(socket_path).expect("bind fake backend socket");
        let incoming = UnixListenerStream::new(uds);
        let (tx, rx) = oneshot::channel();
        let serve_state = state.clone();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            let result = if v1alpha2_only {
                Server::builder()
                    .add_service(v2::runtime_service_server::RuntimeServiceServer::new(
                        FakeRuntimeV1Alpha2(serve_state.clone()),
                    ))
                    .add_service(v2::image_service_server::ImageServiceServer::new(
                        FakeImageV1Alpha2(serve_state),
                    ))
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
            } else {
                Server::builder()
                    .add_service(v1::runtime_service_server::RuntimeServiceServer::new(
                        FakeRuntime(serve_state.clone()),
                    ))
                    .add_service(v1::image_service_server::ImageServiceServer::new(
                        FakeImage(serve_state),
                    ))
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
            };
            if let Err(e) = result {
                eprintln!("fake backend server error: {}", e);
            }
        });
        Self {
            state,
            shutdown: Some(tx),
            task,
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(std::time::Duration::from_secs(5), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

/// Open a client channel to a gRPC server on a Unix socket.
pub async fn connect_uds(socket_path: &Path) -> Channel {
    let path: PathBuf = socket_path.to_path_buf();
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { UnixStream::connect(path).await }
        }))
        .await
        .expect("connect over unix socket")
}
