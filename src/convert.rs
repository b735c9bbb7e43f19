//! Conversions between the legacy `runtime` schema and `runtime.v1alpha2`.
//!
//! Every message the proxy handles has a `From` impl in both directions, so
//! callers upgrade or downgrade with `.into()`. Most messages carry the same
//! fields in both schemas and are mapped by the `convert!` macro below; the
//! handful of genuinely divergent messages are written out by hand, with the
//! lossy fields called out at the conversion site.
//!
//! Round-trip guarantee: `v1 -> v1alpha2 -> v1` is the identity, and
//! `v1alpha2 -> v1 -> v1alpha2` is the identity for messages that do not use
//! v1alpha2-only fields.

use crate::cri_api as v1;
use crate::cri_api_v1alpha2 as v2;

/// Copy one field across schemas. `opt` maps an optional nested message,
/// `vec` maps a repeated nested message; everything else moves as-is.
macro_rules! cfield {
    ($m:ident, $field:ident) => {
        $m.$field
    };
    ($m:ident, $field:ident, opt) => {
        $m.$field.map(Into::into)
    };
    ($m:ident, $field:ident, vec) => {
        $m.$field.into_iter().map(Into::into).collect()
    };
}

/// Generate symmetric `From` impls for messages whose field sets are
/// identical in both schemas.
macro_rules! convert {
    ($($name:ident { $($field:ident $(($kind:ident))?),* $(,)? });* $(;)?) => {$(
        impl From<v2::$name> for v1::$name {
            fn from(m: v2::$name) -> Self {
                Self { $($field: cfield!(m, $field $(, $kind)?)),* }
            }
        }

        impl From<v1::$name> for v2::$name {
            fn from(m: v1::$name) -> Self {
                Self { $($field: cfield!(m, $field $(, $kind)?)),* }
            }
        }
    )*};
}

convert! {
    VersionRequest { version };
    VersionResponse { version, runtime_name, runtime_version, runtime_api_version };
    DnsConfig { servers, searches, options };
    PortMapping { protocol, container_port, host_port, host_ip };
    Mount { container_path, host_path, readonly, selinux_relabel };
    Int64Value { value };
    UInt64Value { value };
    SeLinuxOption { user, role, r#type, level };
    LinuxPodSandboxConfig { cgroup_parent, security_context(opt), sysctls };
    PodSandboxMetadata { name, uid, namespace, attempt };
    PodSandboxConfig {
        metadata(opt), hostname, log_directory, dns_config(opt),
        port_mappings(vec), labels, annotations, linux(opt),
    };
    RunPodSandboxResponse { pod_sandbox_id };
    StopPodSandboxRequest { pod_sandbox_id };
    StopPodSandboxResponse {};
    RemovePodSandboxRequest { pod_sandbox_id };
    RemovePodSandboxResponse {};
    PodSandboxStatusRequest { pod_sandbox_id, verbose };
    PodSandboxNetworkStatus { ip };
    PodSandboxStatus {
        id, metadata(opt), state, created_at, network(opt), labels, annotations,
    };
    PodSandboxStatusResponse { status(opt), info };
    PodSandboxStateValue { state };
    PodSandboxFilter { id, state(opt), label_selector };
    ListPodSandboxRequest { filter(opt) };
    ListPodSandboxResponse { items(vec) };
    ImageSpec { image };
    KeyValue { key, value };
    LinuxContainerResources {
        cpu_period, cpu_quota, cpu_shares, memory_limit_in_bytes,
        oom_score_adj, cpuset_cpus, cpuset_mems,
    };
    Capability { add_capabilities, drop_capabilities };
    LinuxContainerConfig { resources(opt), security_context(opt) };
    Device { container_path, host_path, permissions };
    ContainerMetadata { name, attempt };
    ContainerConfig {
        metadata(opt), image(opt), command, args, working_dir, envs(vec),
        mounts(vec), devices(vec), labels, annotations, log_path,
        stdin, stdin_once, tty, linux(opt),
    };
    CreateContainerRequest { pod_sandbox_id, config(opt), sandbox_config(opt) };
    CreateContainerResponse { container_id };
    StartContainerRequest { container_id };
    StartContainerResponse {};
    StopContainerRequest { container_id, timeout };
    StopContainerResponse {};
    RemoveContainerRequest { container_id };
    RemoveContainerResponse {};
    ContainerStateValue { state };
    ContainerFilter { id, state(opt), pod_sandbox_id, label_selector };
    ListContainersRequest { filter(opt) };
    Container {
        id, pod_sandbox_id, metadata(opt), image(opt), image_ref,
        state, created_at, labels, annotations,
    };
    ListContainersResponse { containers(vec) };
    ContainerStatusRequest { container_id, verbose };
    ContainerStatus {
        id, metadata(opt), state, created_at, started_at, finished_at,
        exit_code, image(opt), image_ref, reason, message, labels,
        annotations, mounts(vec), log_path,
    };
    ContainerStatusResponse { status(opt), info };
    UpdateContainerResourcesRequest { container_id, linux(opt) };
    UpdateContainerResourcesResponse {};
    ReopenContainerLogRequest { container_id };
    ReopenContainerLogResponse {};
    ExecSyncRequest { container_id, cmd, timeout };
    ExecSyncResponse { stdout, stderr, exit_code };
    ExecRequest { container_id, cmd, tty, stdin };
    ExecResponse { url };
    AttachRequest { container_id, stdin, tty };
    AttachResponse { url };
    PortForwardRequest { pod_sandbox_id, port };
    PortForwardResponse { url };
    ContainerAttributes { id, metadata(opt), labels, annotations };
    CpuUsage { timestamp, usage_core_nano_seconds(opt) };
    MemoryUsage { timestamp, working_set_bytes(opt) };
    ContainerStats { attributes(opt), cpu(opt), memory(opt), writable_layer(opt) };
    ContainerStatsRequest { container_id };
    ContainerStatsResponse { stats(opt) };
    ContainerStatsFilter { id, pod_sandbox_id, label_selector };
    ListContainerStatsRequest { filter(opt) };
    ListContainerStatsResponse { stats(vec) };
    NetworkConfig { pod_cidr };
    RuntimeConfig { network_config(opt) };
    UpdateRuntimeConfigRequest { runtime_config(opt) };
    UpdateRuntimeConfigResponse {};
    RuntimeCondition { r#type, status, reason, message };
    RuntimeStatus { conditions(vec) };
    StatusRequest { verbose };
    StatusResponse { status(opt), info };
    ImageFilter { image(opt) };
    ListImagesRequest { filter(opt) };
    Image { id, repo_tags, repo_digests, size, uid(opt), username };
    ListImagesResponse { images(vec) };
    ImageStatusRequest { image(opt), verbose };
    ImageStatusResponse { image(opt), info };
    AuthConfig { username, password, auth, server_address, identity_token, registry_token };
    PullImageRequest { image(opt), auth(opt), sandbox_config(opt) };
    PullImageResponse { image_ref };
    RemoveImageRequest { image(opt) };
    RemoveImageResponse {};
    ImageFsInfoRequest {};
    ImageFsInfoResponse { image_filesystems(vec) };
}

// ── Divergent messages ───────────────────────────────────────────────

impl From<v2::NamespaceOption> for v1::NamespaceOption {
    fn from(m: v2::NamespaceOption) -> Self {
        // CONTAINER mode has no legacy equivalent and downgrades to the
        // POD default (false).
        Self {
            host_network: m.network == v2::NamespaceMode::Node as i32,
            host_pid: m.pid == v2::NamespaceMode::Node as i32,
            host_ipc: m.ipc == v2::NamespaceMode::Node as i32,
        }
    }
}

impl From<v1::NamespaceOption> for v2::NamespaceOption {
    fn from(m: v1::NamespaceOption) -> Self {
        let mode = |host: bool| {
            if host {
                v2::NamespaceMode::Node as i32
            } else {
                v2::NamespaceMode::Pod as i32
            }
        };
        Self {
            network: mode(m.host_network),
            pid: mode(m.host_pid),
            ipc: mode(m.host_ipc),
        }
    }
}

impl From<v2::LinuxSandboxSecurityContext> for v1::LinuxSandboxSecurityContext {
    fn from(m: v2::LinuxSandboxSecurityContext) -> Self {
        // run_as_group has no legacy equivalent and is dropped.
        Self {
            namespace_options: m.namespace_options.map(Into::into),
            selinux_options: m.selinux_options.map(Into::into),
            run_as_user: m.run_as_user.map(Into::into),
            readonly_rootfs: m.readonly_rootfs,
            supplemental_groups: m.supplemental_groups,
            privileged: m.privileged,
            seccomp_profile_path: m.seccomp_profile_path,
        }
    }
}

impl From<v1::LinuxSandboxSecurityContext> for v2::LinuxSandboxSecurityContext {
    fn from(m: v1::LinuxSandboxSecurityContext) -> Self {
        Self {
            namespace_options: m.namespace_options.map(Into::into),
            selinux_options: m.selinux_options.map(Into::into),
            run_as_user: m.run_as_user.map(Into::into),
            readonly_rootfs: m.readonly_rootfs,
            supplemental_groups: m.supplemental_groups,
            privileged: m.privileged,
            seccomp_profile_path: m.seccomp_profile_path,
            run_as_group: None,
        }
    }
}

impl From<v2::LinuxContainerSecurityContext> for v1::LinuxContainerSecurityContext {
    fn from(m: v2::LinuxContainerSecurityContext) -> Self {
        // run_as_group has no legacy equivalent and is dropped.
        Self {
            capabilities: m.capabilities.map(Into::into),
            privileged: m.privileged,
            namespace_options: m.namespace_options.map(Into::into),
            selinux_options: m.selinux_options.map(Into::into),
            run_as_user: m.run_as_user.map(Into::into),
            run_as_username: m.run_as_username,
            readonly_rootfs: m.readonly_rootfs,
            supplemental_groups: m.supplemental_groups,
            apparmor_profile: m.apparmor_profile,
            seccomp_profile_path: m.seccomp_profile_path,
            no_new_privs: m.no_new_privs,
        }
    }
}

impl From<v1::LinuxContainerSecurityContext> for v2::LinuxContainerSecurityContext {
    fn from(m: v1::LinuxContainerSecurityContext) -> Self {
        Self {
            capabilities: m.capabilities.map(Into::into),
            privileged: m.privileged,
            namespace_options: m.namespace_options.map(Into::into),
            selinux_options: m.selinux_options.map(Into::into),
            run_as_user: m.run_as_user.map(Into::into),
            run_as_username: m.run_as_username,
            readonly_rootfs: m.readonly_rootfs,
            supplemental_groups: m.supplemental_groups,
            apparmor_profile: m.apparmor_profile,
            seccomp_profile_path: m.seccomp_profile_path,
            no_new_privs: m.no_new_privs,
            run_as_group: None,
        }
    }
}

impl From<v2::RunPodSandboxRequest> for v1::RunPodSandboxRequest {
    fn from(m: v2::RunPodSandboxRequest) -> Self {
        // runtime_handler has no legacy equivalent and is dropped.
        Self {
            config: m.config.map(Into::into),
        }
    }
}

impl From<v1::RunPodSandboxRequest> for v2::RunPodSandboxRequest {
    fn from(m: v1::RunPodSandboxRequest) -> Self {
        Self {
            config: m.config.map(Into::into),
            runtime_handler: String::new(),
        }
    }
}

impl From<v2::PodSandbox> for v1::PodSandbox {
    fn from(m: v2::PodSandbox) -> Self {
        // runtime_handler has no legacy equivalent and is dropped.
        Self {
            id: m.id,
            metadata: m.metadata.map(Into::into),
            state: m.state,
            created_at: m.created_at,
            labels: m.labels,
            annotations: m.annotations,
        }
    }
}

impl From<v1::PodSandbox> for v2::PodSandbox {
    fn from(m: v1::PodSandbox) -> Self {
        Self {
            id: m.id,
            metadata: m.metadata.map(Into::into),
            state: m.state,
            created_at: m.created_at,
            labels: m.labels,
            annotations: m.annotations,
            runtime_handler: String::new(),
        }
    }
}

impl From<v2::FilesystemUsage> for v1::FilesystemUsage {
    fn from(m: v2::FilesystemUsage) -> Self {
        // The legacy storage UUID cannot be derived from the v1alpha2
        // mount point; both identifiers are dropped across the bridge.
        Self {
            timestamp: m.timestamp,
            storage_id: None,
            used_bytes: m.used_bytes.map(Into::into),
            inodes_used: m.inodes_used.map(Into::into),
        }
    }
}

impl From<v1::FilesystemUsage> for v2::FilesystemUsage {
    fn from(m: v1::FilesystemUsage) -> Self {
        // The v1alpha2 mount point cannot be derived from the legacy
        // storage UUID; both identifiers are dropped across the bridge.
        Self {
            timestamp: m.timestamp,
            fs_id: None,
            used_bytes: m.used_bytes.map(Into::into),
            inodes_used: m.inodes_used.map(Into::into),
        }
    }
}
