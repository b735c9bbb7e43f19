//! Per-method dispatch rules.
//!
//! Every CRI method follows the same template: select the target
//! backend(s), rewrite the outbound request into the backend's own
//! namespace, invoke, rewrite the response back into the merged namespace,
//! and (for fan-out methods) merge in backend-registration order.
//!
//! Fan-out error policy: a backend that cannot be reached is skipped
//! silently, so a transient outage of a non-primary runtime never blocks
//! the others; the first RPC error from a reached backend aborts the merge
//! and is returned verbatim.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tonic::{Code, Status};
use url::Url;

use crate::client::RuntimeClient;
use crate::cri_api as v1;
use crate::error;
use crate::ident;
use crate::registry::RuntimeRegistry;

/// The dispatch engine: routes inbound CRI requests across the registered
/// backends and maintains the merged object namespace.
pub struct CriProxy {
    registry: Arc<RuntimeRegistry>,
    stream_url: Url,
}

impl CriProxy {
    pub fn new(registry: Arc<RuntimeRegistry>, stream_url: Url) -> Self {
        Self {
            registry,
            stream_url,
        }
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    // ── Fan-out plumbing ─────────────────────────────────────────────

    /// Invoke `call` on every active backend concurrently and collect the
    /// results in backend-registration order. Backends that turn out to be
    /// unavailable are dropped from the merge; any other error wins.
    async fn fan_out<T, F, Fut>(&self, call: F) -> Result<Vec<(Arc<RuntimeClient>, T)>, Status>
    where
        F: Fn(Arc<RuntimeClient>) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let clients = self.registry.active().await;
        let calls = clients.into_iter().map(|client| {
            let fut = call(client.clone());
            async move { (client, fut.await) }
        });

        let mut merged = Vec::new();
        for (client, result) in join_all(calls).await {
            match result {
                Ok(value) => merged.push((client, value)),
                Err(status) if status.code() == Code::Unavailable => {
                    tracing::debug!(
                        selector = %client.selector(),
                        error = %status,
                        "skipping unavailable backend in fan-out"
                    );
                }
                Err(status) => return Err(status),
            }
        }
        Ok(merged)
    }

    // ── Response rewriting helpers ───────────────────────────────────

    /// Prefix an image name for a non-primary backend. Bare digests are
    /// namespace-free and pass through unchanged.
    fn prefix_image(selector: &str, image: &str) -> String {
        if selector.is_empty() || ident::is_digest(image) {
            image.to_string()
        } else {
            ident::encode_image(selector, image)
        }
    }

    fn prefix_image_object(selector: &str, image: &mut v1::Image) {
        image.id = Self::prefix_image(selector, &image.id);
        for tag in &mut image.repo_tags {
            *tag = Self::prefix_image(selector, tag);
        }
        for digest in &mut image.repo_digests {
            *digest = Self::prefix_image(selector, digest);
        }
    }

    /// Move a container list item into the merged namespace. `image_ref`
    /// is opaque to the client and stays as the backend produced it.
    fn prefix_container(selector: &str, container: &mut v1::Container) {
        container.id = ident::encode_id(selector, &container.id);
        container.pod_sandbox_id = ident::encode_id(selector, &container.pod_sandbox_id);
        if let Some(spec) = container.image.as_mut() {
            spec.image = Self::prefix_image(selector, &spec.image);
        }
    }

    fn prefix_container_stats(selector: &str, stats: &mut v1::ContainerStats) {
        if let Some(attributes) = stats.attributes.as_mut() {
            attributes.id = ident::encode_id(selector, &attributes.id);
        }
    }

    /// Rewrite a streaming URL returned by the primary backend so the
    /// kubelet connects back through the proxy's own stream endpoint.
    /// Non-primary URLs pass through: the proxy does not stream-proxy for
    /// non-primary backends.
    fn rewrite_stream_url(&self, client: &RuntimeClient, url: String) -> Result<String, Status> {
        if !client.is_primary() {
            return Ok(url);
        }
        let bad = |e: &dyn std::fmt::Display| {
            Status::internal(format!("criproxy: bad stream URL {:?}: {}", url, e))
        };
        match Url::parse(&url) {
            Ok(backend) => {
                let mut rewritten = self.stream_url.clone();
                rewritten.set_path(backend.path());
                rewritten.set_query(backend.query());
                Ok(rewritten.into())
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => match self.stream_url.join(&url) {
                Ok(joined) => Ok(joined.into()),
                Err(e) => Err(bad(&e)),
            },
            Err(e) => Err(bad(&e)),
        }
    }

    // ── Version / Status ─────────────────────────────────────────────

    pub async fn version(&self, req: v1::VersionRequest) -> Result<v1::VersionResponse, Status> {
        self.registry.primary().version(req).await
    }

    /// Runtime status of the primary backend. Conditions reported by
    /// non-primary backends are not merged yet; keeping this rule separate
    /// leaves one place to change when they are.
    pub async fn status(&self, req: v1::StatusRequest) -> Result<v1::StatusResponse, Status> {
        self.registry.primary().status(req).await
    }

    // ── Pod sandboxes ────────────────────────────────────────────────

    pub async fn run_pod_sandbox(
        &self,
        req: v1::RunPodSandboxRequest,
    ) -> Result<v1::RunPodSandboxResponse, Status> {
        let selector = req
            .config
            .as_ref()
            .and_then(|c| c.annotations.get(ident::TARGET_RUNTIME_ANNOTATION))
            .cloned()
            .unwrap_or_default();
        let client = self
            .registry
            .by_selector(&selector)
            .ok_or_else(|| error::unknown_runtime(&selector))?
            .clone();

        tracing::info!(runtime = %client.selector(), "RunPodSandbox");

        let mut resp = client.run_pod_sandbox(req).await?;
        resp.pod_sandbox_id = ident::encode_id(client.selector(), &resp.pod_sandbox_id);
        Ok(resp)
    }

    pub async fn stop_pod_sandbox(
        &self,
        mut req: v1::StopPodSandboxRequest,
    ) -> Result<v1::StopPodSandboxResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.pod_sandbox_id)?;
        let inner = inner.to_string();
        tracing::info!(runtime = %client.selector(), sandbox_id = %inner, "StopPodSandbox");
        req.pod_sandbox_id = inner;
        client.stop_pod_sandbox(req).await
    }

    pub async fn remove_pod_sandbox(
        &self,
        mut req: v1::RemovePodSandboxRequest,
    ) -> Result<v1::RemovePodSandboxResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.pod_sandbox_id)?;
        let inner = inner.to_string();
        tracing::info!(runtime = %client.selector(), sandbox_id = %inner, "RemovePodSandbox");
        req.pod_sandbox_id = inner;
        client.remove_pod_sandbox(req).await
    }

    pub async fn pod_sandbox_status(
        &self,
        mut req: v1::PodSandboxStatusRequest,
    ) -> Result<v1::PodSandboxStatusResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.pod_sandbox_id)?;
        let inner = inner.to_string();
        req.pod_sandbox_id = inner;
        let mut resp = client.pod_sandbox_status(req).await?;
        if let Some(status) = resp.status.as_mut() {
            status.id = ident::encode_id(client.selector(), &status.id);
        }
        Ok(resp)
    }

    pub async fn list_pod_sandbox(
        &self,
        mut req: v1::ListPodSandboxRequest,
    ) -> Result<v1::ListPodSandboxResponse, Status> {
        if let Some(filter) = req.filter.as_mut() {
            if !filter.id.is_empty() {
                let (client, inner) = self.registry.client_for_id(&filter.id)?;
                let inner = inner.to_string();
                filter.id = inner;
                let selector = client.selector().to_string();
                return match none_if_unavailable(client.list_pod_sandbox(req).await)? {
                    None => Ok(Default::default()),
                    Some(mut resp) => {
                        for sandbox in &mut resp.items {
                            sandbox.id = ident::encode_id(&selector, &sandbox.id);
                        }
                        Ok(resp)
                    }
                };
            }
        }

        let results = self
            .fan_out(|client| {
                let req = req.clone();
                async move { client.list_pod_sandbox(req).await }
            })
            .await?;

        let mut items = Vec::new();
        for (client, resp) in results {
            let selector = client.selector();
            items.extend(resp.items.into_iter().map(|mut sandbox| {
                sandbox.id = ident::encode_id(selector, &sandbox.id);
                sandbox
            }));
        }
        Ok(v1::ListPodSandboxResponse { items })
    }

    // ── Containers ───────────────────────────────────────────────────

    pub async fn create_container(
        &self,
        mut req: v1::CreateContainerRequest,
    ) -> Result<v1::CreateContainerResponse, Status> {
        // The sandbox ID is authoritative: its selector committed the pod
        // to one backend, and all its containers inherit it.
        let (client, inner) = self.registry.client_for_id(&req.pod_sandbox_id)?;
        let inner = inner.to_string();
        req.pod_sandbox_id = inner;

        if let Some(spec) = req.config.as_mut().and_then(|c| c.image.as_mut()) {
            let image = spec.image.clone();
            if !image.is_empty() && !ident::is_digest(&image) {
                if !self.registry.image_belongs_to(&image, client.selector()) {
                    return Err(error::wrong_runtime_image(&image));
                }
                let (_, inner_image) = self.registry.client_for_image(&image);
                spec.image = inner_image.to_string();
            }
        }

        tracing::info!(runtime = %client.selector(), "CreateContainer");

        let mut resp = client.create_container(req).await?;
        resp.container_id = ident::encode_id(client.selector(), &resp.container_id);
        Ok(resp)
    }

    pub async fn start_container(
        &self,
        mut req: v1::StartContainerRequest,
    ) -> Result<v1::StartContainerResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.start_container(req).await
    }

    pub async fn stop_container(
        &self,
        mut req: v1::StopContainerRequest,
    ) -> Result<v1::StopContainerResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.stop_container(req).await
    }

    pub async fn remove_container(
        &self,
        mut req: v1::RemoveContainerRequest,
    ) -> Result<v1::RemoveContainerResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.remove_container(req).await
    }

    pub async fn container_status(
        &self,
        mut req: v1::ContainerStatusRequest,
    ) -> Result<v1::ContainerStatusResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        let mut resp = client.container_status(req).await?;
        if let Some(status) = resp.status.as_mut() {
            status.id = ident::encode_id(client.selector(), &status.id);
            if let Some(spec) = status.image.as_mut() {
                spec.image = Self::prefix_image(client.selector(), &spec.image);
            }
            // image_ref stays as the backend produced it
        }
        Ok(resp)
    }

    pub async fn list_containers(
        &self,
        mut req: v1::ListContainersRequest,
    ) -> Result<v1::ListContainersResponse, Status> {
        if let Some(filter) = req.filter.as_mut() {
            let by_id = if filter.id.is_empty() {
                None
            } else {
                let (client, inner) = self.registry.client_for_id(&filter.id)?;
                Some((client, inner.to_string()))
            };
            let by_sandbox = if filter.pod_sandbox_id.is_empty() {
                None
            } else {
                let (client, inner) = self.registry.client_for_id(&filter.pod_sandbox_id)?;
                Some((client, inner.to_string()))
            };

            if let (Some((c1, _)), Some((c2, _))) = (&by_id, &by_sandbox) {
                if c1.selector() != c2.selector() {
                    // The filter names objects from different runtimes;
                    // nothing can match, so no backend is contacted.
                    return Ok(Default::default());
                }
            }

            let target = by_id
                .as_ref()
                .or(by_sandbox.as_ref())
                .map(|(client, _)| client.clone());
            if let Some((_, inner)) = by_id {
                filter.id = inner;
            }
            if let Some((_, inner)) = by_sandbox {
                filter.pod_sandbox_id = inner;
            }

            if let Some(client) = target {
                let selector = client.selector().to_string();
                return match none_if_unavailable(client.list_containers(req).await)? {
                    None => Ok(Default::default()),
                    Some(mut resp) => {
                        for container in &mut resp.containers {
                            Self::prefix_container(&selector, container);
                        }
                        Ok(resp)
                    }
                };
            }
        }

        let results = self
            .fan_out(|client| {
                let req = req.clone();
                async move { client.list_containers(req).await }
            })
            .await?;

        let mut containers = Vec::new();
        for (client, resp) in results {
            let selector = client.selector();
            containers.extend(resp.containers.into_iter().map(|mut container| {
                Self::prefix_container(selector, &mut container);
                container
            }));
        }
        Ok(v1::ListContainersResponse { containers })
    }

    pub async fn update_container_resources(
        &self,
        mut req: v1::UpdateContainerResourcesRequest,
    ) -> Result<v1::UpdateContainerResourcesResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.update_container_resources(req).await
    }

    pub async fn reopen_container_log(
        &self,
        mut req: v1::ReopenContainerLogRequest,
    ) -> Result<v1::ReopenContainerLogResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.reopen_container_log(req).await
    }

    // ── Exec / Attach / PortForward ──────────────────────────────────

    pub async fn exec_sync(&self, mut req: v1::ExecSyncRequest) -> Result<v1::ExecSyncResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        client.exec_sync(req).await
    }

    pub async fn exec(&self, mut req: v1::ExecRequest) -> Result<v1::ExecResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        let mut resp = client.exec(req).await?;
        resp.url = self.rewrite_stream_url(&client, resp.url)?;
        Ok(resp)
    }

    pub async fn attach(&self, mut req: v1::AttachRequest) -> Result<v1::AttachResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        let mut resp = client.attach(req).await?;
        resp.url = self.rewrite_stream_url(&client, resp.url)?;
        Ok(resp)
    }

    pub async fn port_forward(
        &self,
        mut req: v1::PortForwardRequest,
    ) -> Result<v1::PortForwardResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.pod_sandbox_id)?;
        let inner = inner.to_string();
        req.pod_sandbox_id = inner;
        let mut resp = client.port_forward(req).await?;
        resp.url = self.rewrite_stream_url(&client, resp.url)?;
        Ok(resp)
    }

    // ── Container stats ──────────────────────────────────────────────

    pub async fn container_stats(
        &self,
        mut req: v1::ContainerStatsRequest,
    ) -> Result<v1::ContainerStatsResponse, Status> {
        let (client, inner) = self.registry.client_for_id(&req.container_id)?;
        let inner = inner.to_string();
        req.container_id = inner;
        let mut resp = client.container_stats(req).await?;
        if let Some(stats) = resp.stats.as_mut() {
            Self::prefix_container_stats(client.selector(), stats);
        }
        Ok(resp)
    }

    pub async fn list_container_stats(
        &self,
        mut req: v1::ListContainerStatsRequest,
    ) -> Result<v1::ListContainerStatsResponse, Status> {
        if let Some(filter) = req.filter.as_mut() {
            let by_id = if filter.id.is_empty() {
                None
            } else {
                let (client, inner) = self.registry.client_for_id(&filter.id)?;
                Some((client, inner.to_string()))
            };
            let by_sandbox = if filter.pod_sandbox_id.is_empty() {
                None
            } else {
                let (client, inner) = self.registry.client_for_id(&filter.pod_sandbox_id)?;
                Some((client, inner.to_string()))
            };

            if let (Some((c1, _)), Some((c2, _))) = (&by_id, &by_sandbox) {
                if c1.selector() != c2.selector() {
                    return Ok(Default::default());
                }
            }

            let target = by_id
                .as_ref()
                .or(by_sandbox.as_ref())
                .map(|(client, _)| client.clone());
            if let Some((_, inner)) = by_id {
                filter.id = inner;
            }
            if let Some((_, inner)) = by_sandbox {
                filter.pod_sandbox_id = inner;
            }

            if let Some(client) = target {
                let selector = client.selector().to_string();
                return match none_if_unavailable(client.list_container_stats(req).await)? {
                    None => Ok(Default::default()),
                    Some(mut resp) => {
                        for stats in &mut resp.stats {
                            Self::prefix_container_stats(&selector, stats);
                        }
                        Ok(resp)
                    }
                };
            }
        }

        let results = self
            .fan_out(|client| {
                let req = req.clone();
                async move { client.list_container_stats(req).await }
            })
            .await?;

        let mut stats = Vec::new();
        for (client, resp) in results {
            let selector = client.selector();
            stats.extend(resp.stats.into_iter().map(|mut s| {
                Self::prefix_container_stats(selector, &mut s);
                s
            }));
        }
        Ok(v1::ListContainerStatsResponse { stats })
    }

    // ── Runtime configuration ────────────────────────────────────────

    /// Best-effort broadcast: every reachable backend gets the update,
    /// unreachable ones are skipped, the first real error wins.
    pub async fn update_runtime_config(
        &self,
        req: v1::UpdateRuntimeConfigRequest,
    ) -> Result<v1::UpdateRuntimeConfigResponse, Status> {
        self.fan_out(|client| {
            let req = req.clone();
            async move { client.update_runtime_config(req).await }
        })
        .await?;
        Ok(Default::default())
    }

    // ── Images ───────────────────────────────────────────────────────

    pub async fn list_images(
        &self,
        mut req: v1::ListImagesRequest,
    ) -> Result<v1::ListImagesResponse, Status> {
        if let Some(spec) = req.filter.as_mut().and_then(|f| f.image.as_mut()) {
            if !spec.image.is_empty() {
                let image = spec.image.clone();
                let (client, inner) = self.registry.client_for_image(&image);
                spec.image = inner.to_string();
                let selector = client.selector().to_string();
                return match none_if_unavailable(client.list_images(req).await)? {
                    None => Ok(Default::default()),
                    Some(mut resp) => {
                        for img in &mut resp.images {
                            Self::prefix_image_object(&selector, img);
                        }
                        Ok(resp)
                    }
                };
            }
        }

        let results = self
            .fan_out(|client| {
                let req = req.clone();
                async move { client.list_images(req).await }
            })
            .await?;

        let mut images = Vec::new();
        for (client, resp) in results {
            let selector = client.selector();
            images.extend(resp.images.into_iter().map(|mut img| {
                Self::prefix_image_object(selector, &mut img);
                img
            }));
        }
        Ok(v1::ListImagesResponse { images })
    }

    /// Unlike the other image operations, a status query for an image on
    /// an unreachable backend degrades to "no such image" rather than an
    /// error, matching the fan-out policy the kubelet relies on.
    pub async fn image_status(
        &self,
        mut req: v1::ImageStatusRequest,
    ) -> Result<v1::ImageStatusResponse, Status> {
        let image = req
            .image
            .as_ref()
            .map(|s| s.image.clone())
            .unwrap_or_default();
        let (client, inner) = self.registry.client_for_image(&image);
        let inner = inner.to_string();
        if let Some(spec) = req.image.as_mut() {
            spec.image = inner;
        }
        let selector = client.selector().to_string();
        match none_if_unavailable(client.image_status(req).await)? {
            None => Ok(Default::default()),
            Some(mut resp) => {
                if let Some(img) = resp.image.as_mut() {
                    Self::prefix_image_object(&selector, img);
                }
                Ok(resp)
            }
        }
    }

    pub async fn pull_image(
        &self,
        mut req: v1::PullImageRequest,
    ) -> Result<v1::PullImageResponse, Status> {
        let image = req
            .image
            .as_ref()
            .map(|s| s.image.clone())
            .unwrap_or_default();
        let (client, inner) = self.registry.client_for_image(&image);
        let inner = inner.to_string();
        if let Some(spec) = req.image.as_mut() {
            spec.image = inner;
        }

        tracing::info!(runtime = %client.selector(), image = %image, "PullImage");

        let mut resp = client.pull_image(req).await?;
        resp.image_ref = Self::prefix_image(client.selector(), &resp.image_ref);
        Ok(resp)
    }

    pub async fn remove_image(
        &self,
        mut req: v1::RemoveImageRequest,
    ) -> Result<v1::RemoveImageResponse, Status> {
        let image = req
            .image
            .as_ref()
            .map(|s| s.image.clone())
            .unwrap_or_default();
        let (client, inner) = self.registry.client_for_image(&image);
        let inner = inner.to_string();
        if let Some(spec) = req.image.as_mut() {
            spec.image = inner;
        }

        tracing::info!(runtime = %client.selector(), image = %image, "RemoveImage");

        client.remove_image(req).await
    }

    pub async fn image_fs_info(
        &self,
        req: v1::ImageFsInfoRequest,
    ) -> Result<v1::ImageFsInfoResponse, Status> {
        let results = self
            .fan_out(|client| {
                let req = req.clone();
                async move { client.image_fs_info(req).await }
            })
            .await?;

        let mut image_filesystems = Vec::new();
        for (_, resp) in results {
            image_filesystems.extend(resp.image_filesystems);
        }
        Ok(v1::ImageFsInfoResponse { image_filesystems })
    }
}

/// Degrade an unavailable single-backend lookup to "no data". Used by the
/// filtered list paths and `ImageStatus`, where a missing backend must not
/// produce an error.
fn none_if_unavailable<T>(result: Result<T, Status>) -> Result<Option<T>, Status> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(status) if status.code() == Code::Unavailable => Ok(None),
        Err(status) => Err(status),
    }
}
